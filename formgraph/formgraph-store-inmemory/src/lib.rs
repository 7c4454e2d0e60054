//! An in-memory graph store, mostly useful for testing the submission
//! pipeline without a backend.

#![forbid(unsafe_code)]

mod core;
mod query;
mod write;

use fnv::FnvHashMap;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use formgraph_core::{
    FormResult, UuidGenerator,
    graph_store::{CreatedGraphIds, GraphStoreAPI, NeighborFilter, NeighborRecord},
};
use formgraph_runtime::{
    EntityKeyId, EntitySetId,
    payload::{AssociationDataPayload, DataGraph, PropertyMap, UpdateMode},
};

use crate::core::{InMemoryGraph, VertexAddr};

#[derive(Default)]
pub struct InMemoryGraphStore {
    graph: RwLock<InMemoryGraph>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store minting EKIDs with the given strategy, typically the one the
    /// engine's `Config` carries.
    pub fn with_uuid_generator(uuid_generator: UuidGenerator) -> Self {
        Self {
            graph: RwLock::new(InMemoryGraph {
                uuid_generator,
                ..InMemoryGraph::default()
            }),
        }
    }

    /// Direct read access, for asserting on applied state in tests.
    pub async fn entity(
        &self,
        entity_set_id: EntitySetId,
        entity_key_id: EntityKeyId,
    ) -> Option<PropertyMap> {
        self.graph
            .read()
            .await
            .vertex(VertexAddr {
                entity_set_id,
                entity_key_id,
            })
            .cloned()
    }

    pub async fn entity_count(&self, entity_set_id: EntitySetId) -> usize {
        self.graph
            .read()
            .await
            .vertices
            .get(&entity_set_id)
            .map_or(0, IndexMap::len)
    }

    pub async fn edge_count(&self) -> usize {
        self.graph.read().await.edges.len()
    }
}

#[async_trait::async_trait]
impl GraphStoreAPI for InMemoryGraphStore {
    async fn create_entity_and_association_data(
        &self,
        graph: DataGraph,
    ) -> FormResult<CreatedGraphIds> {
        self.graph.write().await.create_graph(graph)
    }

    async fn update_entity_data(
        &self,
        entity_set_id: EntitySetId,
        entities: FnvHashMap<EntityKeyId, PropertyMap>,
        mode: UpdateMode,
    ) -> FormResult<()> {
        self.graph
            .write()
            .await
            .update_entity_data(entity_set_id, entities, mode)
    }

    async fn delete_entity_data(
        &self,
        entity_set_id: EntitySetId,
        entity_key_ids: Vec<EntityKeyId>,
    ) -> FormResult<()> {
        self.graph
            .write()
            .await
            .delete_entity_data(entity_set_id, entity_key_ids)
    }

    async fn create_associations(
        &self,
        payload: AssociationDataPayload,
    ) -> FormResult<FnvHashMap<EntitySetId, Vec<EntityKeyId>>> {
        self.graph.write().await.create_associations(payload)
    }

    async fn search_entity_neighbors(
        &self,
        entity_set_id: EntitySetId,
        filter: NeighborFilter,
    ) -> FormResult<IndexMap<EntityKeyId, Vec<NeighborRecord>>> {
        self.graph
            .read()
            .await
            .search_entity_neighbors(entity_set_id, filter)
    }
}
