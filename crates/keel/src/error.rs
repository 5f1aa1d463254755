use derive_more::Display;
use keel_core::error::{ErrorClass, ErrorOrigin as CoreErrorOrigin, InternalError};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// Error
/// Public error type with a stable kind + origin taxonomy.
///

#[derive(Debug, Deserialize, Serialize, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Self {
        Self::new(err.class.into(), err.origin.into(), err.message)
    }
}

///
/// ErrorKind
/// Public error taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[remain::sorted]
pub enum ErrorKind {
    /// Two instances or registrations claim the same name or identity.
    Conflict,

    /// Stored data does not match the mapped layout.
    Corruption,

    /// The caller cannot remediate this.
    Internal,

    /// The request breaks a mapping or identifier rule.
    Invalid,

    /// No such entity, converter, row, or field.
    NotFound,

    /// Valid request for something the mapper does not do.
    Unsupported,
}

impl From<ErrorClass> for ErrorKind {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Conflict => Self::Conflict,
            ErrorClass::Corruption => Self::Corruption,
            ErrorClass::Internal => Self::Internal,
            ErrorClass::InvariantViolation => Self::Invalid,
            ErrorClass::NotFound => Self::NotFound,
            ErrorClass::Unsupported => Self::Unsupported,
        }
    }
}

///
/// ErrorOrigin
/// Public origin taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[remain::sorted]
pub enum ErrorOrigin {
    Config,
    Convert,
    Identifier,
    IdentityMap,
    Metadata,
    Session,
    Storage,
    UnitOfWork,
}

impl From<CoreErrorOrigin> for ErrorOrigin {
    fn from(origin: CoreErrorOrigin) -> Self {
        match origin {
            CoreErrorOrigin::Config => Self::Config,
            CoreErrorOrigin::Convert => Self::Convert,
            CoreErrorOrigin::Identifier => Self::Identifier,
            CoreErrorOrigin::IdentityMap => Self::IdentityMap,
            CoreErrorOrigin::Metadata => Self::Metadata,
            CoreErrorOrigin::Session => Self::Session,
            CoreErrorOrigin::Storage => Self::Storage,
            CoreErrorOrigin::UnitOfWork => Self::UnitOfWork,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_maps_class_and_origin() {
        let err: Error = InternalError::new(
            ErrorClass::InvariantViolation,
            CoreErrorOrigin::Identifier,
            "identifier of 'owning' is missing 'id2'",
        )
        .into();

        assert_eq!(err.kind, ErrorKind::Invalid);
        assert_eq!(err.origin, ErrorOrigin::Identifier);
        assert_eq!(err.to_string(), "identifier of 'owning' is missing 'id2'");
    }

    #[test]
    fn error_round_trips_through_json() {
        let err = Error::new(ErrorKind::Conflict, ErrorOrigin::UnitOfWork, "duplicate");

        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"Conflict","origin":"UnitOfWork","message":"duplicate"}"#
        );

        let back: Error = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, ErrorKind::Conflict);
        assert_eq!(back.origin.to_string(), "UnitOfWork");
    }
}
