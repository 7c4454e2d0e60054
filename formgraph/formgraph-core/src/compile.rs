//! Compiles address-keyed form data trees into the nested payloads the graph
//! persistence API expects.
//!
//! Form data arrives as an arbitrarily nested tree: page-section keys map to
//! objects whose leaf keys are address keys. Compilation flattens the tree,
//! decodes each address key, resolves runtime ids through the EDM, and groups
//! values under `entity set -> entity position -> property type`.

use serde_json::Value;
use tracing::trace;

use formgraph_runtime::{
    EntityRef, OrganizationId,
    address::AddressKey,
    edm::EdmResolver,
    payload::{
        AssociationDataPayload, AssociationRecord, AssociationTuple, EntityDataPayload,
        EntityIndexToIdMap, GraphEndpoint, PropertyMap, TupleEndpoint,
    },
};

use crate::{
    diff::{ClearedValuePolicy, diff_partial_replace},
    form_error::{FormError, FormResult},
};

/// What to do with an association endpoint that is still a placeholder after
/// the index-to-id map lookup.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PlaceholderResolution {
    /// Pass the placeholder through; valid only inside a first-time
    /// [DataGraph](formgraph_runtime::payload::DataGraph) write, where the
    /// backend resolves it against the same graph's entity indices.
    Defer,
    /// Fail with `UnresolvedPlaceholder`. Used by every standalone
    /// association path.
    Require,
}

/// Recursively flatten a form data tree into `(address key, value)` pairs.
///
/// Nested objects and arrays of objects (repeatable groups) recurse; `null`
/// and empty-array leaves are skipped — absence is a no-op, not an explicit
/// empty value. Any remaining leaf key must decode as an address key.
pub fn flatten_form_data(tree: &Value) -> FormResult<Vec<(AddressKey, Value)>> {
    let mut out = Vec::new();
    flatten_into(tree, &mut out)?;
    Ok(out)
}

fn flatten_into(value: &Value, out: &mut Vec<(AddressKey, Value)>) -> FormResult<()> {
    let Value::Object(map) = value else {
        return Ok(());
    };

    for (key, child) in map {
        match child {
            Value::Null => {}
            Value::Object(_) => flatten_into(child, out)?,
            Value::Array(items) => {
                if items.is_empty() {
                    continue;
                }
                if items.iter().all(Value::is_object) {
                    // repeatable group
                    for item in items {
                        flatten_into(item, out)?;
                    }
                } else {
                    out.push((key.parse()?, child.clone()));
                }
            }
            _leaf => out.push((key.parse()?, child.clone())),
        }
    }

    Ok(())
}

/// A scalar becomes a single-element list; an array passes through as-is.
/// Input order is preserved — it is semantically meaningful for ordered
/// multi-valued properties.
fn wrap_values(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        scalar => vec![scalar],
    }
}

pub fn compile_entity_data(
    tree: &Value,
    resolver: &EdmResolver,
    org: OrganizationId,
) -> FormResult<EntityDataPayload> {
    let mut payload = EntityDataPayload::default();

    for (key, value) in flatten_form_data(tree)? {
        if !key.entity_ref.is_concrete() {
            // negative sentinel: a derived/virtual field, never an entity
            trace!("skipping virtual field {key}");
            continue;
        }

        let entity_set_id = resolver.resolve_entity_set_id(&key.entity_type, org)?;
        let property_type_id = resolver.resolve_property_type_id(&key.property_type)?;

        payload.append(entity_set_id, key.entity_ref, property_type_id, wrap_values(value));
    }

    Ok(payload)
}

pub fn compile_association_data(
    tuples: &[AssociationTuple],
    resolver: &EdmResolver,
    index_map: &EntityIndexToIdMap,
    org: OrganizationId,
    resolution: PlaceholderResolution,
) -> FormResult<AssociationDataPayload> {
    let mut payload = AssociationDataPayload::default();

    for tuple in tuples {
        let association_set_id = resolver.resolve_entity_set_id(&tuple.association_type, org)?;
        let src = resolve_endpoint(&tuple.src, resolver, index_map, org, resolution)?;
        let dst = resolve_endpoint(&tuple.dst, resolver, index_map, org, resolution)?;

        let mut data = PropertyMap::default();
        for (property_type, value) in &tuple.properties {
            let property_type_id = resolver.resolve_property_type_id(property_type)?;
            data.entry(property_type_id)
                .or_default()
                .extend(wrap_values(value.clone()));
        }

        payload.push(association_set_id, AssociationRecord { data, src, dst });
    }

    Ok(payload)
}

fn resolve_endpoint(
    endpoint: &TupleEndpoint,
    resolver: &EdmResolver,
    index_map: &EntityIndexToIdMap,
    org: OrganizationId,
    resolution: PlaceholderResolution,
) -> FormResult<GraphEndpoint> {
    let entity_set_id = resolver.resolve_entity_set_id(&endpoint.entity_type, org)?;

    let unresolved = || FormError::UnresolvedPlaceholder {
        entity_type: endpoint.entity_type.clone(),
        index: endpoint.entity_ref.as_placeholder().unwrap_or_default(),
    };

    let key = match endpoint.entity_ref {
        EntityRef::Key(key) => EntityRef::Key(key),
        EntityRef::Placeholder(index) if index < 0 => return Err(unresolved()),
        EntityRef::Placeholder(index) => match index_map.get(&endpoint.entity_type, index) {
            Some(key) => EntityRef::Key(key),
            None => match resolution {
                PlaceholderResolution::Defer => EntityRef::Placeholder(index),
                PlaceholderResolution::Require => return Err(unresolved()),
            },
        },
    };

    Ok(GraphEndpoint { entity_set_id, key })
}

/// Pre-pass used before partial-replace compilation: rewrite every address
/// key whose `(entity type, placeholder index)` has a known EKID, leaving
/// unresolved placeholders for first-time entities untouched. Returns a new
/// tree; the input is never mutated. This lets the same compiler serve both
/// create and update call sites.
pub fn replace_address_keys(tree: &Value, index_map: &EntityIndexToIdMap) -> Value {
    match tree {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, child)| {
                    (
                        rewrite_key(key, index_map),
                        replace_address_keys(child, index_map),
                    )
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| replace_address_keys(item, index_map))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn rewrite_key(key: &str, index_map: &EntityIndexToIdMap) -> String {
    let Ok(address) = key.parse::<AddressKey>() else {
        // page-section key or other grouping key
        return key.to_string();
    };
    let Some(index) = address.entity_ref.as_placeholder() else {
        return key.to_string();
    };

    match index_map.get(&address.entity_type, index) {
        Some(ekid) => {
            AddressKey::with_key(ekid, address.entity_type, address.property_type).encode()
        }
        None => key.to_string(),
    }
}

/// The boundary exposed upward to forms.
pub struct CompileContext<'a> {
    pub resolver: &'a EdmResolver,
    pub org: OrganizationId,
    pub index_map: &'a EntityIndexToIdMap,
    pub cleared_value_policy: ClearedValuePolicy,
}

pub enum CompileMode<'a> {
    /// First submission: placeholder association endpoints defer to the
    /// backend's in-graph resolution.
    Create,
    /// Edit flow: address keys are rewritten to EKIDs first, and the result
    /// carries a minimal diff against the pre-edit form data.
    Update { original_tree: &'a Value },
}

pub struct CompiledForm {
    pub entities: EntityDataPayload,
    pub associations: AssociationDataPayload,
    pub diff: Option<EntityDataPayload>,
}

pub fn compile_form(
    tree: &Value,
    associations: &[AssociationTuple],
    mode: CompileMode,
    ctx: &CompileContext,
) -> FormResult<CompiledForm> {
    match mode {
        CompileMode::Create => Ok(CompiledForm {
            entities: compile_entity_data(tree, ctx.resolver, ctx.org)?,
            associations: compile_association_data(
                associations,
                ctx.resolver,
                ctx.index_map,
                ctx.org,
                PlaceholderResolution::Defer,
            )?,
            diff: None,
        }),
        CompileMode::Update { original_tree } => {
            let edited_tree = replace_address_keys(tree, ctx.index_map);
            let original_tree = replace_address_keys(original_tree, ctx.index_map);

            let entities = compile_entity_data(&edited_tree, ctx.resolver, ctx.org)?;
            let original = compile_entity_data(&original_tree, ctx.resolver, ctx.org)?;
            let diff = diff_partial_replace(&entities, &original, ctx.cleared_value_policy);

            Ok(CompiledForm {
                entities,
                associations: compile_association_data(
                    associations,
                    ctx.resolver,
                    ctx.index_map,
                    ctx.org,
                    PlaceholderResolution::Require,
                )?,
                diff: Some(diff),
            })
        }
    }
}
