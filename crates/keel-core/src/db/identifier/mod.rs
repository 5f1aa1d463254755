//! Module: db::identifier
//! Responsibility: application-side identifiers, their flat storage form, and
//! the codec converting between the two.
//! Does not own: instance lookup or placeholder construction; decode hands
//! nested references to a caller-supplied `ReferenceResolver`.
//!
//! Invariants:
//! - Storage column order follows identifier declaration order, with foreign
//!   components flattened in place.
//! - Only the codec builds a `StorageIdentifier` from application values.
//! - Dual-mode foreign inputs are normalized in exactly one place
//!   (`IdentifierCodec::normalize_reference`).

mod codec;


use crate::{
    db::entity::EntityHandle,
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    value::Value,
};
use derive_more::{Deref, IntoIterator};
use thiserror::Error as ThisError;

// re-exports
pub use codec::{IdentifierCodec, RawReferences, ReferenceResolver};

/// Separator between value fragments in a canonical identity key.
const KEY_FRAGMENT_SEPARATOR: char = '|';

///
/// IdentifierError
///

#[derive(Debug, ThisError)]
pub enum IdentifierError {
    #[error(
        "entity '{entity}' declares {arity} identifier fields; a single value cannot address it"
    )]
    ExpectedComposite { entity: String, arity: usize },

    #[error("identifier for '{entity}' is missing field '{field}'")]
    IncompleteIdentifier { entity: String, field: String },

    #[error("row for '{entity}' has {found} columns, identifier needs {expected}")]
    MalformedRow {
        entity: String,
        expected: usize,
        found: usize,
    },

    #[error("identifier field '{entity}.{field}' holds a reference where a scalar is required")]
    NotAScalar { entity: String, field: String },

    #[error(
        "identifier field '{entity}.{field}' expects '{expected}', got an instance of '{found}'"
    )]
    ReferenceTargetMismatch {
        entity: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("identifier for '{entity}' has undeclared field '{field}'")]
    UnknownIdentifierField { entity: String, field: String },

    #[error(
        "identifier field '{entity}.{field}' holds neither an instance nor a usable raw identifier"
    )]
    UnresolvedReference { entity: String, field: String },
}

impl IdentifierError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::MalformedRow { .. } => ErrorClass::Corruption,
            _ => ErrorClass::InvariantViolation,
        }
    }
}

impl From<IdentifierError> for InternalError {
    fn from(err: IdentifierError) -> Self {
        Self::with_detail(
            err.class(),
            ErrorOrigin::Identifier,
            ErrorDetail::Identifier(Box::new(err)),
        )
    }
}

///
/// IdValue
///
/// One identifier component: a raw scalar, a referenced instance, or the
/// referenced entity's own (raw) identifier.
///

#[derive(Clone, Debug)]
pub enum IdValue {
    Scalar(Value),
    Entity(EntityHandle),
    Identifier(Identifier),
}

impl IdValue {
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_entity(&self) -> Option<&EntityHandle> {
        match self {
            Self::Entity(handle) => Some(handle),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_identifier(&self) -> Option<&Identifier> {
        match self {
            Self::Identifier(identifier) => Some(identifier),
            _ => None,
        }
    }
}

impl PartialEq for IdValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => a.ptr_eq(b),
            (Self::Identifier(a), Self::Identifier(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for IdValue {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

impl From<&str> for IdValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<String> for IdValue {
    fn from(value: String) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<u64> for IdValue {
    fn from(value: u64) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<i64> for IdValue {
    fn from(value: i64) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<EntityHandle> for IdValue {
    fn from(handle: EntityHandle) -> Self {
        Self::Entity(handle)
    }
}

impl From<&EntityHandle> for IdValue {
    fn from(handle: &EntityHandle) -> Self {
        Self::Entity(handle.clone())
    }
}

impl From<Identifier> for IdValue {
    fn from(identifier: Identifier) -> Self {
        Self::Identifier(identifier)
    }
}

///
/// Identifier
///
/// Ordered field name → component mapping. Order of insertion is kept for
/// display only; encoding always walks the declared field order.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Identifier {
    fields: Vec<(String, IdValue)>,
}

impl Identifier {
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Builder-style insert; replaces an existing component of the same name.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<IdValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: &str, value: impl Into<IdValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((field.to_string(), value)),
        }
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&IdValue> {
        self.fields
            .iter()
            .find_map(|(name, value)| (name == field).then_some(value))
    }

    /// Scalar component shortcut.
    #[must_use]
    pub fn scalar(&self, field: &str) -> Option<&Value> {
        self.get(field).and_then(IdValue::as_scalar)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IdValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

///
/// IdentifierInput
///
/// Lookup input: a bare value for single-field identifiers or a full
/// composite identifier.
///

#[derive(Clone, Debug)]
pub enum IdentifierInput {
    Single(IdValue),
    Composite(Identifier),
}

impl From<Identifier> for IdentifierInput {
    fn from(identifier: Identifier) -> Self {
        Self::Composite(identifier)
    }
}

impl From<IdValue> for IdentifierInput {
    fn from(value: IdValue) -> Self {
        Self::Single(value)
    }
}

impl From<Value> for IdentifierInput {
    fn from(value: Value) -> Self {
        Self::Single(IdValue::Scalar(value))
    }
}

impl From<&str> for IdentifierInput {
    fn from(value: &str) -> Self {
        Self::Single(value.into())
    }
}

impl From<String> for IdentifierInput {
    fn from(value: String) -> Self {
        Self::Single(value.into())
    }
}

impl From<u64> for IdentifierInput {
    fn from(value: u64) -> Self {
        Self::Single(value.into())
    }
}

impl From<&EntityHandle> for IdentifierInput {
    fn from(handle: &EntityHandle) -> Self {
        Self::Single(handle.into())
    }
}

///
/// StorageIdentifier
///
/// Flat, fully converted identifier columns in declaration order.
///

#[derive(Clone, Debug, Deref, Eq, Hash, IntoIterator, Ord, PartialEq, PartialOrd)]
#[into_iterator(owned, ref)]
pub struct StorageIdentifier(Vec<Value>);

impl StorageIdentifier {
    /// Wrap already-converted storage values (rows read back from storage).
    pub(crate) const fn from_storage(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Stable string form used as the identity-map key.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let mut out = String::new();
        for (index, value) in self.0.iter().enumerate() {
            if index > 0 {
                out.push(KEY_FRAGMENT_SEPARATOR);
            }
            value.write_canonical(&mut out);
        }

        out
    }
}
