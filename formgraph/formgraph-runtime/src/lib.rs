#![forbid(unsafe_code)]

pub mod address;
pub mod edm;
pub mod payload;

use std::{fmt, str::FromStr};

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::address::ADDRESS_KEY_SEPARATOR;

macro_rules! runtime_id {
    ($(#[doc = $doc:literal])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        /// This forces single-line output even when pretty-printed
        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

runtime_id!(
    /// Runtime identifier of a named collection of entities of one type (ESID).
    /// Assigned at deployment time, resolved through the EDM, never hard-coded.
    EntitySetId
);
runtime_id!(
    /// Runtime identifier of a property type (PTID).
    PropertyTypeId
);
runtime_id!(
    /// Identifier of one concrete entity instance (EKID).
    EntityKeyId
);
runtime_id!(
    /// The organization context an entity data model is resolved within.
    OrganizationId
);

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FqnError {
    #[error("fully qualified name is empty")]
    Empty,
    #[error("fully qualified name `{0}` contains the reserved address key separator")]
    ReservedSeparator(String),
}

/// A stable, environment-independent, fully qualified type name (FQN).
///
/// FQNs are the durable vocabulary of the domain model; runtime ids are looked
/// up from them per environment. The text may contain dots, which is why the
/// address key codec uses a longer reserved separator that is rejected here.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fqn(ArcStr);

impl Fqn {
    pub fn new(text: impl AsRef<str>) -> Result<Self, FqnError> {
        let text = text.as_ref();
        if text.is_empty() {
            return Err(FqnError::Empty);
        }
        if text.contains(ADDRESS_KEY_SEPARATOR) {
            return Err(FqnError::ReservedSeparator(text.to_string()));
        }
        Ok(Self(ArcStr::from(text)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Fqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fqn({})", self.0)
    }
}

impl FromStr for Fqn {
    type Err = FqnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Fqn {
    type Error = FqnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Fqn> for String {
    fn from(fqn: Fqn) -> Self {
        fqn.0.to_string()
    }
}

/// Reference to one entity position within a form or payload.
///
/// `Placeholder(n)` means "the nth entity of this type referenced in this
/// form", before any real identifier exists. A negative placeholder is the
/// sentinel for a derived/virtual field that belongs to no concrete instance.
/// `Key` is a concrete, already-assigned EKID.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRef {
    Placeholder(i64),
    Key(EntityKeyId),
}

impl EntityRef {
    pub fn as_placeholder(&self) -> Option<i64> {
        match self {
            Self::Placeholder(index) => Some(*index),
            Self::Key(_) => None,
        }
    }

    pub fn as_key(&self) -> Option<EntityKeyId> {
        match self {
            Self::Placeholder(_) => None,
            Self::Key(key) => Some(*key),
        }
    }

    /// Whether this reference addresses a concrete entity position at all.
    /// Negative placeholders do not.
    pub fn is_concrete(&self) -> bool {
        match self {
            Self::Placeholder(index) => *index >= 0,
            Self::Key(_) => true,
        }
    }
}

impl From<EntityKeyId> for EntityRef {
    fn from(key: EntityKeyId) -> Self {
        Self::Key(key)
    }
}

impl From<i64> for EntityRef {
    fn from(index: i64) -> Self {
        Self::Placeholder(index)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placeholder(index) => write!(f, "{index}"),
            Self::Key(key) => write!(f, "{key}"),
        }
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placeholder(index) => write!(f, "Placeholder({index})"),
            Self::Key(key) => write!(f, "Key({key})"),
        }
    }
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("`{0}` is neither a placeholder index nor an entity key id")]
pub struct EntityRefParseError(String);

impl FromStr for EntityRef {
    type Err = EntityRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(index) = s.parse::<i64>() {
            return Ok(Self::Placeholder(index));
        }
        match Uuid::parse_str(s) {
            Ok(uuid) => Ok(Self::Key(EntityKeyId(uuid))),
            Err(_) => Err(EntityRefParseError(s.to_string())),
        }
    }
}

impl Serialize for EntityRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
