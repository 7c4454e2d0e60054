use fnv::FnvHashMap;
use indexmap::IndexMap;

use formgraph_core::UuidGenerator;
use formgraph_runtime::{EntityKeyId, EntitySetId, payload::PropertyMap};

/// Address of one vertex: which set it lives in, and its key there.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct VertexAddr {
    pub entity_set_id: EntitySetId,
    pub entity_key_id: EntityKeyId,
}

/// One stored association instance. The association itself is also a vertex
/// in its own set, carrying the edge's properties.
#[derive(Clone, Debug)]
pub(crate) struct EdgeRow {
    pub association_set_id: EntitySetId,
    pub association_key_id: EntityKeyId,
    pub src: VertexAddr,
    pub dst: VertexAddr,
}

/// Vertices per set are insertion-ordered: the create call's contract is that
/// generated ids come back in submission order.
#[derive(Default, Debug)]
pub(crate) struct InMemoryGraph {
    pub vertices: FnvHashMap<EntitySetId, IndexMap<EntityKeyId, PropertyMap>>,
    pub edges: Vec<EdgeRow>,
    pub uuid_generator: UuidGenerator,
}

impl InMemoryGraph {
    pub fn vertex(&self, addr: VertexAddr) -> Option<&PropertyMap> {
        self.vertices.get(&addr.entity_set_id)?.get(&addr.entity_key_id)
    }

    pub fn mint_key_id(&self) -> EntityKeyId {
        EntityKeyId(self.uuid_generator.generate())
    }
}
