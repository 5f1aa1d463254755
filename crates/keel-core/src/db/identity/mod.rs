#![expect(clippy::cast_possible_truncation)]
//! Module: identity
//! Responsibility: validated entity naming with a stable ordering contract.
//! Does not own: identifier values or identity-map keys (see `db::identity_map`).
//!
//! Invariants:
//! - Entity names are ASCII, non-empty, and bounded by MAX_ENTITY_NAME_LEN.
//! - All construction paths validate invariants.
//! - Ordering follows the length-prefixed byte layout, not lexicographic order.


use std::{
    cmp::Ordering,
    fmt::{self, Display},
};
use thiserror::Error as ThisError;

///
/// Constants
///

pub(crate) const MAX_ENTITY_NAME_LEN: usize = 64;

///
/// EntityNameError
///

#[derive(Debug, ThisError)]
pub enum EntityNameError {
    #[error("entity name is empty")]
    Empty,

    #[error("entity name length {len} exceeds max {max}")]
    TooLong { len: usize, max: usize },

    #[error("entity name must be ASCII")]
    NonAscii,

    #[error("entity name must not contain '{0}'")]
    ReservedChar(char),
}

///
/// EntityName
///
/// Stable external name of an entity type; the first half of every
/// identity-map key.
///

#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct EntityName {
    len: u8,
    bytes: [u8; MAX_ENTITY_NAME_LEN],
}

impl EntityName {
    /// Separator between entity name and identifier fragments in identity keys.
    pub(crate) const KEY_SEPARATOR: char = '#';

    /// Validate and construct an entity name from one ASCII string.
    pub fn try_from_str(name: &str) -> Result<Self, EntityNameError> {
        // Phase 1: validate user-visible identity constraints.
        let bytes = name.as_bytes();
        let len = bytes.len();

        if len == 0 {
            return Err(EntityNameError::Empty);
        }
        if len > MAX_ENTITY_NAME_LEN {
            return Err(EntityNameError::TooLong {
                len,
                max: MAX_ENTITY_NAME_LEN,
            });
        }
        if !bytes.is_ascii() {
            return Err(EntityNameError::NonAscii);
        }
        if name.contains(Self::KEY_SEPARATOR) {
            return Err(EntityNameError::ReservedChar(Self::KEY_SEPARATOR));
        }

        // Phase 2: write into fixed-size canonical storage.
        let mut out = [0u8; MAX_ENTITY_NAME_LEN];
        out[..len].copy_from_slice(bytes);

        Ok(Self {
            len: len as u8,
            bytes: out,
        })
    }

    #[must_use]
    /// Return the stored entity-name length.
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[must_use]
    /// Return whether the stored entity-name length is zero.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    /// Borrow raw identity bytes excluding trailing fixed-buffer padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    #[must_use]
    /// Borrow the entity name as UTF-8 text.
    pub fn as_str(&self) -> &str {
        // Invariant: construction enforces ASCII-only storage,
        // so UTF-8 decoding cannot fail.
        std::str::from_utf8(self.as_bytes()).expect("EntityName invariant: ASCII-only storage")
    }
}

impl Ord for EntityName {
    fn cmp(&self, other: &Self) -> Ordering {
        // Length prefix first, then padded bytes.
        self.len.cmp(&other.len).then(self.bytes.cmp(&other.bytes))
    }
}

impl PartialOrd for EntityName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityName({})", self.as_str())
    }
}

impl TryFrom<&str> for EntityName {
    type Error = EntityNameError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::try_from_str(name)
    }
}
