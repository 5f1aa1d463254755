use crate::value::Value;

///
/// ValueTag
///
/// Stable canonical value-variant tag used by identity keys and diagnostics.
///
/// IMPORTANT:
/// Tag values are part of the canonical identity-key format and must remain fixed.
///
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueTag {
    Blob = 1,
    Bool = 2,
    Int = 3,
    Null = 4,
    Text = 5,
    Uint = 6,
}

impl ValueTag {
    /// Stable byte tag for this variant.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Stable human-readable value kind label for diagnostics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Blob => "Blob",
            Self::Bool => "Bool",
            Self::Int => "Int",
            Self::Null => "Null",
            Self::Text => "Text",
            Self::Uint => "Uint",
        }
    }

    /// Single-letter prefix used in canonical identity-key fragments.
    pub(super) const fn key_prefix(self) -> char {
        match self {
            Self::Blob => 'x',
            Self::Bool => 'b',
            Self::Int => 'i',
            Self::Null => 'n',
            Self::Text => 't',
            Self::Uint => 'u',
        }
    }
}

/// Stable canonical variant tag for one value.
#[must_use]
pub(super) const fn canonical_tag(value: &Value) -> ValueTag {
    match value {
        Value::Blob(_) => ValueTag::Blob,
        Value::Bool(_) => ValueTag::Bool,
        Value::Int(_) => ValueTag::Int,
        Value::Null => ValueTag::Null,
        Value::Text(_) => ValueTag::Text,
        Value::Uint(_) => ValueTag::Uint,
    }
}
