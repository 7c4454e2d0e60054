//! The flat addressing scheme forms use instead of runtime identifiers.
//!
//! An address key encodes `(entity position, entity type FQN, property type
//! FQN)` into one string, so arbitrarily nested form schemas can reference
//! graph positions before any real identifier exists. Decoding is a pure,
//! total function of the string form and the exact inverse of encoding.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::{EntityKeyId, EntityRef, Fqn};

/// Separator between the three address key segments.
///
/// FQNs may contain dots, so a single character cannot delimit them
/// unambiguously. [Fqn] construction rejects names containing this sequence.
pub const ADDRESS_KEY_SEPARATOR: &str = "__@@__";

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum AddressKeyError {
    /// A schema/key mismatch. This is a programmer error, not a user-facing
    /// condition; compilation of the whole operation must abort.
    #[error("malformed address key `{0}`")]
    Malformed(String),
    #[error("malformed page section key `{0}`")]
    MalformedPageSectionKey(String),
}

/// One decoded form-data address: which entity position a value belongs to,
/// and under which property type.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct AddressKey {
    pub entity_ref: EntityRef,
    pub entity_type: Fqn,
    pub property_type: Fqn,
}

impl AddressKey {
    pub fn new(index: i64, entity_type: Fqn, property_type: Fqn) -> Self {
        Self {
            entity_ref: EntityRef::Placeholder(index),
            entity_type,
            property_type,
        }
    }

    /// An address key whose entity position is already a concrete EKID,
    /// as produced by the replace pre-pass before partial-replace compilation.
    pub fn with_key(key: EntityKeyId, entity_type: Fqn, property_type: Fqn) -> Self {
        Self {
            entity_ref: EntityRef::Key(key),
            entity_type,
            property_type,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ref}{sep}{et}{sep}{pt}",
            ref = self.entity_ref,
            sep = ADDRESS_KEY_SEPARATOR,
            et = self.entity_type,
            pt = self.property_type,
        )
    }
}

impl FromStr for AddressKey {
    type Err = AddressKeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let malformed = || AddressKeyError::Malformed(key.to_string());

        let mut segments = key.split(ADDRESS_KEY_SEPARATOR);
        let entity_ref = segments
            .next()
            .and_then(|s| s.parse::<EntityRef>().ok())
            .ok_or_else(malformed)?;
        let entity_type = segments
            .next()
            .and_then(|s| Fqn::new(s).ok())
            .ok_or_else(malformed)?;
        let property_type = segments
            .next()
            .and_then(|s| Fqn::new(s).ok())
            .ok_or_else(malformed)?;

        if segments.next().is_some() {
            return Err(malformed());
        }

        Ok(Self {
            entity_ref,
            entity_type,
            property_type,
        })
    }
}

/// The second, independent addressing scheme: grouping fields into
/// visual/logical sections. Orthogonal to entity addressing.
pub fn page_section_key(page: u32, section: u32) -> String {
    format!("page_{page}_section_{section}")
}

pub fn parse_page_section_key(key: &str) -> Result<(u32, u32), AddressKeyError> {
    let malformed = || AddressKeyError::MalformedPageSectionKey(key.to_string());

    let rest = key.strip_prefix("page_").ok_or_else(malformed)?;
    let (page, rest) = rest.split_once("_section_").ok_or_else(malformed)?;

    Ok((
        page.parse().map_err(|_| malformed())?,
        rest.parse().map_err(|_| malformed())?,
    ))
}
