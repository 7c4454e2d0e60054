use fnv::FnvHashMap;
use tracing::{debug, debug_span};

use formgraph_core::{
    FormError, FormResult,
    graph_store::CreatedGraphIds,
};
use formgraph_runtime::{
    EntityKeyId, EntityRef, EntitySetId,
    payload::{AssociationDataPayload, DataGraph, PropertyMap, UpdateMode},
};

use crate::core::{EdgeRow, InMemoryGraph, VertexAddr};

impl InMemoryGraph {
    pub fn create_graph(&mut self, graph: DataGraph) -> FormResult<CreatedGraphIds> {
        let _entered = debug_span!("wr_graph").entered();

        let mut created = CreatedGraphIds::default();

        // `(set, placeholder index)` of this submission, for resolving
        // deferred association endpoints against the same graph.
        let mut by_index: FnvHashMap<(EntitySetId, i64), EntityKeyId> = FnvHashMap::default();

        for (entity_set_id, entities) in graph.entities.iter() {
            for (entity_ref, properties) in entities {
                let entity_key_id = match entity_ref {
                    EntityRef::Placeholder(index) if *index >= 0 => {
                        let entity_key_id = self.mint_key_id();
                        by_index.insert((entity_set_id, *index), entity_key_id);
                        entity_key_id
                    }
                    EntityRef::Placeholder(index) => {
                        return Err(FormError::store(format!(
                            "cannot create an entity at sentinel index {index}"
                        )));
                    }
                    EntityRef::Key(key) => *key,
                };

                debug!("write vertex {entity_set_id}/{entity_key_id}");
                self.vertices
                    .entry(entity_set_id)
                    .or_default()
                    .insert(entity_key_id, properties.clone());
                created
                    .entity_key_ids
                    .entry(entity_set_id)
                    .or_default()
                    .push(entity_key_id);
            }
        }

        for (association_set_id, records) in graph.associations.iter() {
            for record in records {
                let src = resolve_endpoint_addr(record.src.entity_set_id, record.src.key, &by_index)?;
                let dst = resolve_endpoint_addr(record.dst.entity_set_id, record.dst.key, &by_index)?;
                let association_key_id =
                    self.write_edge(association_set_id, record.data.clone(), src, dst);
                created
                    .association_key_ids
                    .entry(association_set_id)
                    .or_default()
                    .push(association_key_id);
            }
        }

        Ok(created)
    }

    pub fn update_entity_data(
        &mut self,
        entity_set_id: EntitySetId,
        entities: FnvHashMap<EntityKeyId, PropertyMap>,
        mode: UpdateMode,
    ) -> FormResult<()> {
        let _entered = debug_span!("upd_vtx", set = %entity_set_id).entered();

        let collection = self
            .vertices
            .get_mut(&entity_set_id)
            .ok_or_else(|| FormError::store(format!("unknown entity set {entity_set_id}")))?;

        for (entity_key_id, properties) in entities {
            let vertex = collection.get_mut(&entity_key_id).ok_or_else(|| {
                FormError::store(format!("unknown entity {entity_set_id}/{entity_key_id}"))
            })?;

            match mode {
                UpdateMode::Merge => {
                    for (property_type_id, values) in properties {
                        vertex.entry(property_type_id).or_default().extend(values);
                    }
                }
                UpdateMode::PartialReplace => {
                    for (property_type_id, values) in properties {
                        vertex.insert(property_type_id, values);
                    }
                }
                UpdateMode::Replace => {
                    *vertex = properties;
                }
            }
        }

        Ok(())
    }

    pub fn delete_entity_data(
        &mut self,
        entity_set_id: EntitySetId,
        entity_key_ids: Vec<EntityKeyId>,
    ) -> FormResult<()> {
        let collection = self
            .vertices
            .get_mut(&entity_set_id)
            .ok_or_else(|| FormError::store(format!("unknown entity set {entity_set_id}")))?;

        for entity_key_id in &entity_key_ids {
            collection.shift_remove(entity_key_id);
        }

        // drop edges that touch a deleted vertex, or that *are* a deleted
        // association instance
        self.edges.retain(|edge| {
            let deleted = |addr: &VertexAddr| {
                addr.entity_set_id == entity_set_id && entity_key_ids.contains(&addr.entity_key_id)
            };
            let deleted_association = edge.association_set_id == entity_set_id
                && entity_key_ids.contains(&edge.association_key_id);

            !(deleted(&edge.src) || deleted(&edge.dst) || deleted_association)
        });

        Ok(())
    }

    pub fn create_associations(
        &mut self,
        payload: AssociationDataPayload,
    ) -> FormResult<FnvHashMap<EntitySetId, Vec<EntityKeyId>>> {
        let mut created: FnvHashMap<EntitySetId, Vec<EntityKeyId>> = FnvHashMap::default();

        for (association_set_id, records) in payload.iter() {
            for record in records {
                let src = concrete_endpoint_addr(record.src.entity_set_id, record.src.key)?;
                let dst = concrete_endpoint_addr(record.dst.entity_set_id, record.dst.key)?;

                if self.vertex(src).is_none() {
                    return Err(FormError::store(format!(
                        "association source {}/{} does not exist",
                        src.entity_set_id, src.entity_key_id
                    )));
                }
                if self.vertex(dst).is_none() {
                    return Err(FormError::store(format!(
                        "association destination {}/{} does not exist",
                        dst.entity_set_id, dst.entity_key_id
                    )));
                }

                let association_key_id =
                    self.write_edge(association_set_id, record.data.clone(), src, dst);
                created
                    .entry(association_set_id)
                    .or_default()
                    .push(association_key_id);
            }
        }

        Ok(created)
    }

    fn write_edge(
        &mut self,
        association_set_id: EntitySetId,
        data: PropertyMap,
        src: VertexAddr,
        dst: VertexAddr,
    ) -> EntityKeyId {
        let _entered = debug_span!("wr_edge", set = %association_set_id).entered();

        let association_key_id = self.mint_key_id();
        self.vertices
            .entry(association_set_id)
            .or_default()
            .insert(association_key_id, data);
        self.edges.push(EdgeRow {
            association_set_id,
            association_key_id,
            src,
            dst,
        });

        association_key_id
    }
}

fn resolve_endpoint_addr(
    entity_set_id: EntitySetId,
    key: EntityRef,
    by_index: &FnvHashMap<(EntitySetId, i64), EntityKeyId>,
) -> FormResult<VertexAddr> {
    let entity_key_id = match key {
        EntityRef::Key(entity_key_id) => entity_key_id,
        EntityRef::Placeholder(index) => {
            *by_index.get(&(entity_set_id, index)).ok_or_else(|| {
                FormError::store(format!(
                    "association endpoint index {index} not present in graph for set {entity_set_id}"
                ))
            })?
        }
    };

    Ok(VertexAddr {
        entity_set_id,
        entity_key_id,
    })
}

fn concrete_endpoint_addr(entity_set_id: EntitySetId, key: EntityRef) -> FormResult<VertexAddr> {
    match key {
        EntityRef::Key(entity_key_id) => Ok(VertexAddr {
            entity_set_id,
            entity_key_id,
        }),
        EntityRef::Placeholder(index) => Err(FormError::store(format!(
            "standalone association endpoint must be an entity key id, got index {index}"
        ))),
    }
}
