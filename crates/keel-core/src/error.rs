use crate::{
    config::ConfigError,
    convert::{ConvertError, ConverterRegistryError},
    db::{
        identifier::IdentifierError, session::SessionError, storage::StorageError,
        unit_of_work::FlushError,
    },
    metadata::MetadataError,
};
use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable internal classification.
/// Not a stable API; the facade maps it onto the public taxonomy.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    /// The variant (if present) must correspond to `origin`.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    /// Construct an InternalError without a typed detail payload.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct an error that carries its typed detail.
    pub(crate) fn with_detail(class: ErrorClass, origin: ErrorOrigin, detail: ErrorDetail) -> Self {
        Self {
            class,
            origin,
            message: detail.to_string(),
            detail: Some(detail),
        }
    }

    /// Construct a session-origin invariant violation.
    pub(crate) fn session_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Session,
            message.into(),
        )
    }

    /// Construct a unit-of-work-origin invariant violation.
    pub(crate) fn uow_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::UnitOfWork,
            message.into(),
        )
    }

    /// Construct an identity-map conflict.
    pub(crate) fn identity_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, ErrorOrigin::IdentityMap, message.into())
    }

    /// Construct a storage-origin corruption error (row shape drifted from metadata).
    pub(crate) fn storage_corruption(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Corruption, ErrorOrigin::Storage, message.into())
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.class, ErrorClass::NotFound)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }

    /// Borrow the identifier detail, if this error came from the codec.
    #[must_use]
    pub fn identifier_error(&self) -> Option<&IdentifierError> {
        match &self.detail {
            Some(ErrorDetail::Identifier(err)) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Borrow the flush detail, if this error came from the unit of work.
    #[must_use]
    pub fn flush_error(&self) -> Option<&FlushError> {
        match &self.detail {
            Some(ErrorDetail::Flush(err)) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Borrow the session detail, if this error came from a session.
    #[must_use]
    pub fn session_error(&self) -> Option<&SessionError> {
        match &self.detail {
            Some(ErrorDetail::Session(err)) => Some(err.as_ref()),
            _ => None,
        }
    }
}

///
/// ErrorDetail
///
/// Structured, origin-specific error detail carried by [`InternalError`].
/// Multi-field leaf errors are boxed to keep `Result` small.
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Config(Box<ConfigError>),

    #[error("{0}")]
    Convert(Box<ConvertError>),

    #[error("{0}")]
    ConverterRegistry(ConverterRegistryError),

    #[error("{0}")]
    Flush(Box<FlushError>),

    #[error("{0}")]
    Identifier(Box<IdentifierError>),

    #[error("{0}")]
    Metadata(Box<MetadataError>),

    #[error("{0}")]
    Session(Box<SessionError>),

    #[error("{0}")]
    Storage(StorageError),
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
/// Not a stable API; may change without notice.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Corruption,
    NotFound,
    Internal,
    Conflict,
    Unsupported,
    InvariantViolation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Corruption => "corruption",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
            Self::Conflict => "conflict",
            Self::Unsupported => "unsupported",
            Self::InvariantViolation => "invariant_violation",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
/// Not a stable API; may change without notice.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Config => "config",
            Self::Convert => "convert",
            Self::Identifier => "identifier",
            Self::IdentityMap => "identity_map",
            Self::Metadata => "metadata",
            Self::Session => "session",
            Self::Storage => "storage",
            Self::UnitOfWork => "unit_of_work",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_class_prefixes_origin_and_class() {
        let err = InternalError::new(ErrorClass::Conflict, ErrorOrigin::IdentityMap, "dup");

        assert_eq!(err.display_with_class(), "identity_map:conflict: dup");
        assert!(err.detail.is_none());
    }

    #[test]
    fn with_detail_uses_detail_text_as_message() {
        let err = InternalError::with_detail(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Identifier,
            ErrorDetail::Identifier(Box::new(IdentifierError::IncompleteIdentifier {
                entity: "owning".to_string(),
                field: "id2".to_string(),
            })),
        );

        assert!(err.message.contains("id2"), "unexpected error: {err:?}");
        assert!(matches!(
            err.identifier_error(),
            Some(IdentifierError::IncompleteIdentifier { .. })
        ));
        assert!(err.flush_error().is_none());
        assert!(err.session_error().is_none());
    }

    #[test]
    fn boxed_detail_keeps_the_error_small() {
        // Largest inline payload is a single-String storage error.
        assert!(std::mem::size_of::<ErrorDetail>() <= 5 * std::mem::size_of::<usize>());
    }
}
