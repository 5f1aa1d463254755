//! Module: convert
//! Responsibility: pure, bidirectional scalar transforms between application
//! values and storage values.
//! Does not own: identifier layout or column ordering (see `db::identifier`).
//!
//! Invariants:
//! - `to_application(to_storage(v)) == v` for every `v` in a converter's domain.
//! - `to_storage(to_application(s)) == s` for every `s` produced by `to_storage`.
//! - `Value::Null` passes through both directions unchanged.

mod registry;
mod rotation;


use crate::{
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    value::{Value, ValueTag},
};
use thiserror::Error as ThisError;

// re-exports
pub use registry::{ConverterRegistry, ConverterRegistryError};
pub use rotation::RotationConverter;

///
/// ConvertDirection
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConvertDirection {
    ToStorage,
    ToApplication,
}

impl ConvertDirection {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ToStorage => "to_storage",
            Self::ToApplication => "to_application",
        }
    }
}

///
/// ConvertError
///

#[derive(Debug, ThisError)]
pub enum ConvertError {
    #[error(
        "converter '{converter}' cannot {} a {} value: {reason}",
        direction.label(),
        tag.label()
    )]
    OutOfDomain {
        converter: String,
        direction: ConvertDirection,
        tag: ValueTag,
        reason: String,
    },
}

impl ConvertError {
    pub(crate) fn out_of_domain(
        converter: &str,
        direction: ConvertDirection,
        value: &Value,
        reason: impl Into<String>,
    ) -> Self {
        Self::OutOfDomain {
            converter: converter.to_string(),
            direction,
            tag: value.tag(),
            reason: reason.into(),
        }
    }

    /// Report the failure under the name the converter was registered as.
    pub(crate) fn renamed(mut self, name: &str) -> Self {
        let Self::OutOfDomain { converter, .. } = &mut self;
        name.clone_into(converter);
        self
    }
}

impl From<ConvertError> for InternalError {
    fn from(err: ConvertError) -> Self {
        Self::with_detail(
            ErrorClass::Unsupported,
            ErrorOrigin::Convert,
            ErrorDetail::Convert(Box::new(err)),
        )
    }
}

///
/// ValueConverter
///
/// Bidirectional scalar transform applied at every storage boundary.
/// Implementations must be pure and side-effect free.
///

pub trait ValueConverter: Send + Sync {
    /// Registry name used by descriptors to reference this converter.
    fn name(&self) -> &str;

    /// Convert an application value into its storage representation.
    fn to_storage(&self, value: &Value) -> Result<Value, ConvertError>;

    /// Convert a storage value back into its application representation.
    fn to_application(&self, value: &Value) -> Result<Value, ConvertError>;
}

///
/// PassthroughConverter
///

#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughConverter;

impl PassthroughConverter {
    pub const NAME: &'static str = "passthrough";
}

impl ValueConverter for PassthroughConverter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn to_storage(&self, value: &Value) -> Result<Value, ConvertError> {
        Ok(value.clone())
    }

    fn to_application(&self, value: &Value) -> Result<Value, ConvertError> {
        Ok(value.clone())
    }
}

///
/// UintTextConverter
///
/// Stores unsigned integers as canonical decimal text.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct UintTextConverter;

impl UintTextConverter {
    pub const NAME: &'static str = "uint_text";
}

impl ValueConverter for UintTextConverter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn to_storage(&self, value: &Value) -> Result<Value, ConvertError> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Uint(v) => Ok(Value::Text(v.to_string())),
            other => Err(ConvertError::out_of_domain(
                Self::NAME,
                ConvertDirection::ToStorage,
                other,
                "expected an unsigned integer",
            )),
        }
    }

    fn to_application(&self, value: &Value) -> Result<Value, ConvertError> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(text) => {
                // Only canonical decimal text round-trips; "007" or "+7" would not.
                let parsed = text.parse::<u64>().ok().filter(|n| n.to_string() == *text);

                parsed.map(Value::Uint).ok_or_else(|| {
                    ConvertError::out_of_domain(
                        Self::NAME,
                        ConvertDirection::ToApplication,
                        value,
                        format!("'{text}' is not canonical decimal text"),
                    )
                })
            }
            other => Err(ConvertError::out_of_domain(
                Self::NAME,
                ConvertDirection::ToApplication,
                other,
                "expected decimal text",
            )),
        }
    }
}
