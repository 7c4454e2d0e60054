//! Schema option hydration.
//!
//! Form schemas are shared, long-lived values; injecting dynamic enum options
//! (e.g. the entity sets available to the active organization) must not
//! mutate them in place. Hydration is a pure function returning a new schema.

use serde_json::Value;
use tracing::warn;

/// Return a copy of `schema` with the value at the JSON pointer `path`
/// replaced by `options`. An unknown path leaves the schema unchanged — the
/// schema document is a collaborator-owned input, not something to invent
/// structure in.
pub fn hydrate_enum_options(schema: &Value, path: &str, options: &[Value]) -> Value {
    let mut hydrated = schema.clone();

    match hydrated.pointer_mut(path) {
        Some(target) => *target = Value::Array(options.to_vec()),
        None => warn!("schema has no node at `{path}`, options not injected"),
    }

    hydrated
}
