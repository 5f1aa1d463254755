use crate::db::identity::EntityName;

///
/// FetchMode
///
/// How a reference is materialized on hydration.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FetchMode {
    /// Hand out a placeholder that loads on first non-identifier access.
    #[default]
    Lazy,
    /// Load the referenced row immediately through the identity map.
    Eager,
}

///
/// IdentifierField
/// One component of an entity identifier, in declaration order.
///

#[derive(Clone, Debug)]
pub struct IdentifierField {
    pub name: String,
    pub kind: IdentifierFieldKind,
}

///
/// IdentifierFieldKind
///
/// Closed set of identifier component shapes. Foreign references are
/// flattened in place into the target's identifier columns.
///

#[derive(Clone, Debug)]
pub enum IdentifierFieldKind {
    Scalar {
        column: String,
        converter: String,
    },
    ForeignReference {
        target: EntityName,
        /// One column per flattened target identifier column.
        /// Empty means `<field>_<target column>`, resolved at metadata build.
        join_columns: Vec<String>,
        fetch: FetchMode,
    },
}

impl IdentifierFieldKind {
    #[must_use]
    pub const fn target(&self) -> Option<EntityName> {
        match self {
            Self::Scalar { .. } => None,
            Self::ForeignReference { target, .. } => Some(*target),
        }
    }
}

///
/// FieldModel
/// Non-identifier attribute metadata.
///

#[derive(Clone, Debug)]
pub struct FieldModel {
    pub name: String,
    pub kind: FieldKind,
}

///
/// FieldKind
///

#[derive(Clone, Debug)]
pub enum FieldKind {
    /// Plain column, optionally passed through a named converter.
    Scalar {
        column: String,
        converter: Option<String>,
    },
    /// Owning side of a to-one association; the foreign key lives in this table.
    ToOne {
        target: EntityName,
        join_columns: Vec<String>,
        fetch: FetchMode,
    },
    /// Inverse side of a one-to-one association. Always eager: the owning
    /// table must be queried to know whether a counterpart exists.
    InverseToOne {
        target: EntityName,
        mapped_by: String,
    },
}

impl FieldKind {
    #[must_use]
    pub const fn target(&self) -> Option<EntityName> {
        match self {
            Self::Scalar { .. } => None,
            Self::ToOne { target, .. } | Self::InverseToOne { target, .. } => Some(*target),
        }
    }

    #[must_use]
    pub const fn is_reference(&self) -> bool {
        !matches!(self, Self::Scalar { .. })
    }
}
