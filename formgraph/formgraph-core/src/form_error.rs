use std::{fmt, sync::Arc};

use formgraph_runtime::{EntitySetId, Fqn, address::AddressKeyError, edm::EdmError};
use thiserror::Error;

use crate::request::{OperationKind, RequestId};

#[derive(Error, Debug)]
pub enum FormError {
    #[error(transparent)]
    MalformedKey(#[from] AddressKeyError),
    #[error(transparent)]
    Edm(#[from] EdmError),
    /// An association endpoint (or a partial-replace entity) still addresses
    /// a placeholder with no known EKID. Never emitted as a null/empty
    /// endpoint; the whole operation aborts before any network call.
    #[error("unresolved placeholder {index} for `{entity_type}`")]
    UnresolvedPlaceholder { entity_type: Fqn, index: i64 },
    /// Each dispatch is at-most-once; retry means a new request id.
    #[error("{kind:?} request {request_id} already dispatched")]
    DuplicateRequest {
        kind: OperationKind,
        request_id: RequestId,
    },
    /// The store returned a different number of generated ids than entities
    /// submitted for the set. The write may have been applied; callers must
    /// re-fetch truth.
    #[error(
        "entity set {entity_set_id}: submitted {expected} entities, store returned {returned} ids"
    )]
    CreatedIdMismatch {
        entity_set_id: EntitySetId,
        expected: usize,
        returned: usize,
    },
    /// Transport/API failure surfaced by the graph store boundary.
    #[error("graph store error: {0}")]
    Store(#[source] anyhow::Error),
    /// Aggregate failure of a concurrent sub-call batch.
    #[error(transparent)]
    Join(#[from] JoinError),
    /// An operation failure that is also recorded in the request state table.
    #[error("{0}")]
    Tracked(Arc<FormError>),
}

impl FormError {
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(anyhow::anyhow!("{message}"))
    }

    /// Peel request tracking wrappers off, down to the causing error.
    pub fn root(&self) -> &Self {
        match self {
            Self::Tracked(inner) => inner.root(),
            other => other,
        }
    }
}

pub type FormResult<T> = Result<T, FormError>;

/// Failures collected from a batch of concurrent sub-calls. Sub-calls that
/// succeeded are not rolled back; "some writes may already be applied".
#[derive(Debug)]
pub struct JoinError {
    errors: Vec<FormError>,
}

impl JoinError {
    pub fn first(&self) -> &FormError {
        &self.errors[0]
    }

    pub fn errors(&self) -> &[FormError] {
        &self.errors
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} concurrent sub-request(s) failed, first: {}",
            self.errors.len(),
            self.errors[0]
        )
    }
}

impl std::error::Error for JoinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.first())
    }
}

/// All-or-error join: every sub-result is inspected, all errors are collected
/// into one aggregate, and success requires every sub-call to have succeeded.
pub fn join_all_or_error(results: impl IntoIterator<Item = FormResult<()>>) -> FormResult<()> {
    let errors: Vec<FormError> = results.into_iter().filter_map(Result::err).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(JoinError { errors }.into())
    }
}
