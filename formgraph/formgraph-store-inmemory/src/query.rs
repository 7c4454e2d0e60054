use indexmap::IndexMap;
use itertools::Itertools;

use formgraph_core::{
    FormResult,
    graph_store::{NeighborFilter, NeighborRecord},
};
use formgraph_runtime::{EntityKeyId, EntitySetId, payload::PropertyMap};

use crate::core::{EdgeRow, InMemoryGraph, VertexAddr};

impl InMemoryGraph {
    /// Neighbor search over the edge rows. For each origin entity, a
    /// neighbor qualifies when the origin is the edge's destination and the
    /// neighbor's set passes the source filter, or vice versa. `None`
    /// direction filters match any set.
    pub fn search_entity_neighbors(
        &self,
        entity_set_id: EntitySetId,
        filter: NeighborFilter,
    ) -> FormResult<IndexMap<EntityKeyId, Vec<NeighborRecord>>> {
        let mut out: IndexMap<EntityKeyId, Vec<NeighborRecord>> = IndexMap::new();

        for entity_key_id in filter.entity_key_ids.iter().copied() {
            let origin = VertexAddr {
                entity_set_id,
                entity_key_id,
            };

            let records = self
                .edges
                .iter()
                .filter_map(|edge| {
                    let neighbor = if edge.dst == origin {
                        set_allowed(edge.src.entity_set_id, &filter.source_entity_set_ids)
                            .then_some(edge.src)?
                    } else if edge.src == origin {
                        set_allowed(edge.dst.entity_set_id, &filter.destination_entity_set_ids)
                            .then_some(edge.dst)?
                    } else {
                        return None;
                    };

                    Some(self.neighbor_record(edge, neighbor))
                })
                .collect_vec();

            out.insert(entity_key_id, records);
        }

        Ok(out)
    }

    fn neighbor_record(&self, edge: &EdgeRow, neighbor: VertexAddr) -> NeighborRecord {
        NeighborRecord {
            association_entity_set_id: edge.association_set_id,
            association_entity_key_id: edge.association_key_id,
            neighbor_entity_set_id: neighbor.entity_set_id,
            neighbor_entity_key_id: neighbor.entity_key_id,
            neighbor_properties: self.vertex(neighbor).cloned().unwrap_or(PropertyMap::default()),
        }
    }
}

fn set_allowed(entity_set_id: EntitySetId, allowed: &Option<Vec<EntitySetId>>) -> bool {
    match allowed {
        Some(sets) => sets.contains(&entity_set_id),
        None => true,
    }
}
