//! The abstract RPC boundary the submission engine drives.
//!
//! The exact wire format is the external API's concern; this trait is the
//! contract only. Transport failures come back as error values, never as
//! panics, and the engine re-raises them as the operation's failure reason.

use std::sync::Arc;

use fnv::FnvHashMap;
use indexmap::IndexMap;

use formgraph_runtime::{
    EntityKeyId, EntitySetId,
    payload::{AssociationDataPayload, DataGraph, PropertyMap, UpdateMode},
};

use crate::form_error::FormResult;

/// Ids assigned by the backend for a first-time graph write, keyed by entity
/// set, in the same order entities were submitted for that set.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct CreatedGraphIds {
    pub entity_key_ids: FnvHashMap<EntitySetId, Vec<EntityKeyId>>,
    pub association_key_ids: FnvHashMap<EntitySetId, Vec<EntityKeyId>>,
}

/// Neighbor search constraints. `None` direction filters match any set.
#[derive(Clone, Default, Debug)]
pub struct NeighborFilter {
    pub entity_key_ids: Vec<EntityKeyId>,
    pub source_entity_set_ids: Option<Vec<EntitySetId>>,
    pub destination_entity_set_ids: Option<Vec<EntitySetId>>,
}

/// One edge from a neighbor search: the association instance and the entity
/// on the far side.
#[derive(Clone, PartialEq, Debug)]
pub struct NeighborRecord {
    pub association_entity_set_id: EntitySetId,
    pub association_entity_key_id: EntityKeyId,
    pub neighbor_entity_set_id: EntitySetId,
    pub neighbor_entity_key_id: EntityKeyId,
    pub neighbor_properties: PropertyMap,
}

#[async_trait::async_trait]
pub trait GraphStoreAPI {
    /// Write entities and the associations between them in one call.
    /// The backend assigns EKIDs to placeholder entities and resolves
    /// placeholder association endpoints against the same graph's indices.
    async fn create_entity_and_association_data(
        &self,
        graph: DataGraph,
    ) -> FormResult<CreatedGraphIds>;

    async fn update_entity_data(
        &self,
        entity_set_id: EntitySetId,
        entities: FnvHashMap<EntityKeyId, PropertyMap>,
        mode: UpdateMode,
    ) -> FormResult<()>;

    async fn delete_entity_data(
        &self,
        entity_set_id: EntitySetId,
        entity_key_ids: Vec<EntityKeyId>,
    ) -> FormResult<()>;

    /// Create associations between already-existing entities. Every endpoint
    /// must be a concrete EKID.
    async fn create_associations(
        &self,
        payload: AssociationDataPayload,
    ) -> FormResult<FnvHashMap<EntitySetId, Vec<EntityKeyId>>>;

    /// Read-side collaborator used to hydrate the index-to-id map and
    /// original payloads before editing. Keyed by origin EKID, in filter
    /// order.
    async fn search_entity_neighbors(
        &self,
        entity_set_id: EntitySetId,
        filter: NeighborFilter,
    ) -> FormResult<IndexMap<EntityKeyId, Vec<NeighborRecord>>>;
}

pub type ArcGraphStore = Arc<dyn GraphStoreAPI + Send + Sync>;
