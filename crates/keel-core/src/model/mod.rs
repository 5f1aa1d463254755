pub mod entity;
pub mod field;

// re-exports
pub use entity::{EntityDescriptor, EntityDescriptorBuilder};
pub use field::{FetchMode, FieldKind, FieldModel, IdentifierField, IdentifierFieldKind};
