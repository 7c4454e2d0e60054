//! Per-operation request lifecycle tracking.
//!
//! Every dispatched write operation is tracked independently under
//! `(operation kind, request id)`: concurrent dispatches of the same kind
//! with different ids never clobber each other. A lifecycle is created on
//! dispatch, transitions once to a terminal state, and is deleted on clean
//! up — it never resurrects. Terminal states are transient signals, not
//! persisted facts: after clean up, observers see `Standby` again.

use std::{fmt, str::FromStr, sync::Arc};

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::form_error::{FormError, FormResult};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum OperationKind {
    SubmitDataGraph,
    PartialReplace,
    ReplaceAssociation,
    DeleteEntities,
}

/// Caller-provided unique id for one dispatch. At-most-once: a caller wanting
/// retry re-dispatches with a new id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Clone, Default, Debug)]
pub enum RequestState {
    /// No tracked request under this key.
    #[default]
    Standby,
    Pending,
    Success,
    Failure(Arc<FormError>),
}

impl RequestState {
    pub fn is_standby(&self) -> bool {
        matches!(self, Self::Standby)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure(&self) -> Option<&FormError> {
        match self {
            Self::Failure(error) => Some(error),
            _ => None,
        }
    }
}

/// The only externally observable request status surface. Owned by the
/// submission engine; mutated only at the dispatch/terminal/clean-up
/// transition points.
#[derive(Default, Debug)]
pub struct RequestStateTable {
    table: FnvHashMap<(OperationKind, RequestId), RequestState>,
}

impl RequestStateTable {
    /// Create the lifecycle for one dispatch. A key already present — pending
    /// or terminal-but-not-cleaned — is a duplicate dispatch.
    pub fn begin(&mut self, kind: OperationKind, request_id: RequestId) -> FormResult<()> {
        match self.table.entry((kind, request_id)) {
            std::collections::hash_map::Entry::Occupied(_) => {
                Err(FormError::DuplicateRequest { kind, request_id })
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(RequestState::Pending);
                Ok(())
            }
        }
    }

    /// Transition a pending request to its terminal state. Anything else is
    /// left alone: a lifecycle transitions once.
    pub fn finish(&mut self, kind: OperationKind, request_id: RequestId, state: RequestState) {
        if let Some(slot) = self.table.get_mut(&(kind, request_id)) {
            if slot.is_pending() {
                *slot = state;
            }
        }
    }

    pub fn state_of(&self, kind: OperationKind, request_id: RequestId) -> RequestState {
        self.table
            .get(&(kind, request_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn clean_up(&mut self, kind: OperationKind, request_id: RequestId) {
        self.table.remove(&(kind, request_id));
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
