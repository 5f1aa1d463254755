mod tag;


use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

// re-exports
pub use tag::ValueTag;

///
/// Value
///
/// Primitive scalar carried on both sides of a converter: application values
/// on entity slots and storage values in rows and bound parameters.
///
/// Null → the column (or slot) holds SQL NULL.
///

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Value {
    Blob(Vec<u8>),
    Bool(bool),
    Int(i64),
    Null,
    Text(String),
    Uint(u64),
}

impl Value {
    /// Build a text value.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Stable canonical variant tag.
    #[must_use]
    pub const fn tag(&self) -> ValueTag {
        tag::canonical_tag(self)
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text payload, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Append this value's canonical identity-key fragment.
    ///
    /// Fragments are tag-qualified and variable-length payloads are
    /// length-prefixed, so concatenated fragments never collide.
    pub fn write_canonical(&self, out: &mut String) {
        out.push(self.tag().key_prefix());

        // Writing into a String cannot fail.
        let _ = match self {
            Self::Blob(bytes) => {
                let _ = write!(out, "{}:", bytes.len());
                bytes.iter().try_for_each(|b| write!(out, "{b:02x}"))
            }
            Self::Bool(v) => write!(out, "{}", u8::from(*v)),
            Self::Int(v) => write!(out, "{v}"),
            Self::Null => Ok(()),
            Self::Text(text) => write!(out, "{}:{text}", text.len()),
            Self::Uint(v) => write!(out, "{v}"),
        };
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blob(bytes) => write!(f, "blob({} bytes)", bytes.len()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Null => f.write_str("NULL"),
            Self::Text(text) => write!(f, "'{text}'"),
            Self::Uint(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Uint(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
