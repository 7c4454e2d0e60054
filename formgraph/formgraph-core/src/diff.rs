//! The partial-replace differ: compares a freshly compiled payload against
//! one compiled from the pre-edit form data, and keeps only what changed.
//! This is the mechanism that prevents no-op network writes field by field.

use formgraph_runtime::payload::EntityDataPayload;

/// What to do with a property present in the original payload but absent
/// from the edited one. This is an explicit parameter rather than a call-site
/// convention.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum ClearedValuePolicy {
    /// Silent disappearance is not a diff; removal must be requested through
    /// an explicit delete operation.
    #[default]
    Ignore,
    /// Emit the property with an empty value list so a partial replace
    /// clears it.
    EmitEmpty,
}

/// Value-list comparison is structural: order-sensitive and length-sensitive.
/// `["a"]` differs from `["a","b"]`, and `["a","b"]` differs from `["b","a"]`.
/// Equal lists are omitted; entities and entity sets with nothing changed are
/// omitted; an empty result means "nothing to submit".
pub fn diff_partial_replace(
    edited: &EntityDataPayload,
    original: &EntityDataPayload,
    policy: ClearedValuePolicy,
) -> EntityDataPayload {
    let mut out = EntityDataPayload::default();

    for (entity_set_id, entities) in edited.iter() {
        for (entity_ref, properties) in entities {
            for (property_type_id, values) in properties {
                let before = original
                    .values(entity_set_id, *entity_ref, *property_type_id)
                    .unwrap_or(&[]);

                if before != values.as_slice() {
                    out.append(
                        entity_set_id,
                        *entity_ref,
                        *property_type_id,
                        values.iter().cloned(),
                    );
                }
            }
        }
    }

    if policy == ClearedValuePolicy::EmitEmpty {
        for (entity_set_id, entities) in original.iter() {
            for (entity_ref, properties) in entities {
                for (property_type_id, values) in properties {
                    // absent edited value == empty list, so an empty original
                    // is not a change either way
                    if !values.is_empty()
                        && edited
                            .values(entity_set_id, *entity_ref, *property_type_id)
                            .is_none()
                    {
                        out.append(entity_set_id, *entity_ref, *property_type_id, []);
                    }
                }
            }
        }
    }

    out
}
