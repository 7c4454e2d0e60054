#![forbid(unsafe_code)]

pub mod compile;
pub mod diff;
pub mod form_error;
pub mod graph_store;
pub mod request;
pub mod schema;

mod form_engine;

pub use form_engine::{AssociationReplace, FormEngine, FormEngineBuilder};
pub use form_error::{FormError, FormResult};

use diff::ClearedValuePolicy;
use uuid::Uuid;

/// Strategy for minting entity key ids.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum UuidGenerator {
    V4,
    /// SortRand uuids, preferable in a database context.
    #[default]
    V7,
}

impl UuidGenerator {
    pub fn generate(&self) -> Uuid {
        match self {
            Self::V4 => Uuid::new_v4(),
            Self::V7 => Uuid::now_v7(),
        }
    }
}

pub struct Config {
    /// How the differ treats a property present originally but absent from
    /// the edited form data.
    pub cleared_value_policy: ClearedValuePolicy,
    /// Id-minting strategy for stores that assign EKIDs locally.
    pub uuid_generator: UuidGenerator,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cleared_value_policy: ClearedValuePolicy::Ignore,
            uuid_generator: UuidGenerator::default(),
        }
    }
}
