//! Entity data model lookup: FQN to runtime id and back.
//!
//! The lookup tables are populated by collaborators that load the EDM for the
//! active organization; payload construction never hard-codes a runtime id.

use fnv::FnvHashMap;
use thiserror::Error;

use crate::{EntitySetId, Fqn, OrganizationId, PropertyTypeId};

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum EdmError {
    /// The name has no mapping in the current context. This aborts
    /// compilation of the whole operation: a silently dropped property would
    /// be indistinguishable from "user left it blank".
    #[error("unresolved entity type `{fqn}` in organization {org}")]
    UnresolvedEntityType { fqn: Fqn, org: OrganizationId },
    #[error("unresolved property type `{0}`")]
    UnresolvedPropertyType(Fqn),
    #[error("unknown entity set id {0}")]
    UnknownEntitySetId(EntitySetId),
    #[error("unknown property type id {0}")]
    UnknownPropertyTypeId(PropertyTypeId),
}

/// Bidirectional FQN <-> runtime id resolver.
///
/// Entity sets are scoped per organization; property types live in the global
/// schema.
#[derive(Clone, Default, Debug)]
pub struct EdmResolver {
    entity_sets: FnvHashMap<(OrganizationId, Fqn), EntitySetId>,
    entity_set_fqns: FnvHashMap<EntitySetId, Fqn>,
    property_types: FnvHashMap<Fqn, PropertyTypeId>,
    property_type_fqns: FnvHashMap<PropertyTypeId, Fqn>,
}

impl EdmResolver {
    pub fn builder() -> EdmResolverBuilder {
        EdmResolverBuilder {
            resolver: Self::default(),
        }
    }

    pub fn resolve_entity_set_id(
        &self,
        fqn: &Fqn,
        org: OrganizationId,
    ) -> Result<EntitySetId, EdmError> {
        self.entity_sets
            .get(&(org, fqn.clone()))
            .copied()
            .ok_or_else(|| EdmError::UnresolvedEntityType {
                fqn: fqn.clone(),
                org,
            })
    }

    pub fn resolve_property_type_id(&self, fqn: &Fqn) -> Result<PropertyTypeId, EdmError> {
        self.property_types
            .get(fqn)
            .copied()
            .ok_or_else(|| EdmError::UnresolvedPropertyType(fqn.clone()))
    }

    pub fn entity_set_fqn(&self, id: EntitySetId) -> Result<&Fqn, EdmError> {
        self.entity_set_fqns
            .get(&id)
            .ok_or(EdmError::UnknownEntitySetId(id))
    }

    pub fn property_type_fqn(&self, id: PropertyTypeId) -> Result<&Fqn, EdmError> {
        self.property_type_fqns
            .get(&id)
            .ok_or(EdmError::UnknownPropertyTypeId(id))
    }
}

pub struct EdmResolverBuilder {
    resolver: EdmResolver,
}

impl EdmResolverBuilder {
    pub fn entity_set(mut self, org: OrganizationId, fqn: Fqn, id: EntitySetId) -> Self {
        self.resolver.entity_sets.insert((org, fqn.clone()), id);
        self.resolver.entity_set_fqns.insert(id, fqn);
        self
    }

    pub fn property_type(mut self, fqn: Fqn, id: PropertyTypeId) -> Self {
        self.resolver.property_types.insert(fqn.clone(), id);
        self.resolver.property_type_fqns.insert(id, fqn);
        self
    }

    pub fn build(self) -> EdmResolver {
        self.resolver
    }
}
