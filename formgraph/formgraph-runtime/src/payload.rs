//! The nested payload shapes consumed by the graph persistence API, plus the
//! association tuple vocabulary forms use to describe edges.
//!
//! These are ephemeral compiler outputs: produced, handed to the submission
//! engine, then discarded. Entity insertion order within a set is preserved
//! because the create call returns generated EKIDs per set in submission
//! order.

use fnv::FnvHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EntityKeyId, EntityRef, EntitySetId, Fqn, PropertyTypeId};

/// Property type id to ordered value list. Every property is multi-valued on
/// the wire; scalars are single-element lists.
pub type PropertyMap = IndexMap<PropertyTypeId, Vec<Value>>;

/// `EntitySetId -> EntityRef -> PropertyTypeId -> values`, the exact shape the
/// create/update API consumes.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Debug)]
#[serde(transparent)]
pub struct EntityDataPayload {
    sets: IndexMap<EntitySetId, IndexMap<EntityRef, PropertyMap>>,
}

impl EntityDataPayload {
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Append values for one property. Values for a property type already
    /// present on the same entity accumulate rather than overwrite, which is
    /// what supports multi-valued properties.
    pub fn append(
        &mut self,
        entity_set_id: EntitySetId,
        entity_ref: EntityRef,
        property_type_id: PropertyTypeId,
        values: impl IntoIterator<Item = Value>,
    ) {
        self.sets
            .entry(entity_set_id)
            .or_default()
            .entry(entity_ref)
            .or_default()
            .entry(property_type_id)
            .or_default()
            .extend(values);
    }

    pub fn values(
        &self,
        entity_set_id: EntitySetId,
        entity_ref: EntityRef,
        property_type_id: PropertyTypeId,
    ) -> Option<&[Value]> {
        self.sets
            .get(&entity_set_id)?
            .get(&entity_ref)?
            .get(&property_type_id)
            .map(Vec::as_slice)
    }

    pub fn entity(&self, entity_set_id: EntitySetId, entity_ref: EntityRef) -> Option<&PropertyMap> {
        self.sets.get(&entity_set_id)?.get(&entity_ref)
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (EntitySetId, &IndexMap<EntityRef, PropertyMap>)> + '_ {
        self.sets.iter().map(|(id, entities)| (*id, entities))
    }

    pub fn into_sets(self) -> IndexMap<EntitySetId, IndexMap<EntityRef, PropertyMap>> {
        self.sets
    }

    pub fn entity_count(&self) -> usize {
        self.sets.values().map(IndexMap::len).sum()
    }
}

/// One end of a compiled association: an entity set plus a position in it.
/// The key may still be a placeholder when the record travels inside a
/// first-time [DataGraph], where the backend resolves it against the graph's
/// own entity indices.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct GraphEndpoint {
    pub entity_set_id: EntitySetId,
    pub key: EntityRef,
}

/// One directed, typed, property-bearing edge to create.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct AssociationRecord {
    pub data: PropertyMap,
    pub src: GraphEndpoint,
    pub dst: GraphEndpoint,
}

/// `AssociationSetId -> edge records`. One association set may receive many
/// records from one form (e.g. "contacted via", repeated per phone number).
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Debug)]
#[serde(transparent)]
pub struct AssociationDataPayload {
    sets: IndexMap<EntitySetId, Vec<AssociationRecord>>,
}

impl AssociationDataPayload {
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn push(&mut self, association_set_id: EntitySetId, record: AssociationRecord) {
        self.sets.entry(association_set_id).or_default().push(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntitySetId, &[AssociationRecord])> + '_ {
        self.sets
            .iter()
            .map(|(id, records)| (*id, records.as_slice()))
    }

    pub fn record_count(&self) -> usize {
        self.sets.values().map(Vec::len).sum()
    }
}

/// The first-time graph write: entities and the edges between them, submitted
/// in one call.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Debug)]
pub struct DataGraph {
    pub entities: EntityDataPayload,
    pub associations: AssociationDataPayload,
}

/// One end of an association tuple, still in FQN vocabulary.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TupleEndpoint {
    pub entity_type: Fqn,
    pub entity_ref: EntityRef,
}

impl TupleEndpoint {
    pub fn placeholder(entity_type: Fqn, index: i64) -> Self {
        Self {
            entity_type,
            entity_ref: EntityRef::Placeholder(index),
        }
    }

    pub fn key(entity_type: Fqn, key: EntityKeyId) -> Self {
        Self {
            entity_type,
            entity_ref: EntityRef::Key(key),
        }
    }
}

/// A directed, typed edge between two form positions, before compilation.
/// Either side may be an unresolved placeholder (first submission) or an
/// already-known EKID (editing).
#[derive(Clone, PartialEq, Debug)]
pub struct AssociationTuple {
    pub association_type: Fqn,
    pub src: TupleEndpoint,
    pub dst: TupleEndpoint,
    /// Extra properties carried by the edge itself, keyed by property type
    /// FQN; compiled exactly like entity properties.
    pub properties: IndexMap<Fqn, Value>,
}

/// `(entity type FQN, placeholder index) -> EKID`.
///
/// Entries come either from already-loaded entities (edit flows) or from the
/// ids returned by the create call, and live only as long as the editing
/// session.
#[derive(Clone, Default, Debug)]
pub struct EntityIndexToIdMap {
    map: FnvHashMap<(Fqn, i64), EntityKeyId>,
}

impl EntityIndexToIdMap {
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn insert(&mut self, entity_type: Fqn, index: i64, key: EntityKeyId) {
        self.map.insert((entity_type, index), key);
    }

    pub fn get(&self, entity_type: &Fqn, index: i64) -> Option<EntityKeyId> {
        self.map.get(&(entity_type.clone(), index)).copied()
    }

    pub fn extend(&mut self, other: Self) {
        self.map.extend(other.map);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Fqn, i64, EntityKeyId)> + '_ {
        self.map
            .iter()
            .map(|((fqn, index), key)| (fqn, *index, *key))
    }
}

/// How an update call treats properties not present in the payload.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum UpdateMode {
    /// Append supplied values to existing value lists.
    Merge,
    /// Overwrite only the supplied property keys, leave others untouched.
    PartialReplace,
    /// Replace the whole property map.
    Replace,
}

/// One batch of entities to delete from one set.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct EntityDeleteGroup {
    pub entity_set_id: EntitySetId,
    pub entity_key_ids: Vec<EntityKeyId>,
}
