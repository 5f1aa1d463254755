use crate::{
    db::identity::EntityName,
    metadata::MetadataError,
    model::field::{FetchMode, FieldKind, FieldModel, IdentifierField, IdentifierFieldKind},
};

///
/// EntityDescriptor
///
/// Runtime mapping of one entity type onto its table: ordered identifier
/// components followed by ordered non-identifier fields.
///

#[derive(Clone, Debug)]
pub struct EntityDescriptor {
    /// Stable external name used in identity keys and routing.
    pub name: EntityName,
    /// Backing table.
    pub table: String,
    /// Identifier components (order is significant and total).
    pub identifier: Vec<IdentifierField>,
    /// Non-identifier fields in declaration order.
    pub fields: Vec<FieldModel>,
}

impl EntityDescriptor {
    /// Start describing an entity stored in `table`.
    pub fn builder(name: &str, table: &str) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            name: name.to_string(),
            table: table.to_string(),
            identifier: Vec::new(),
            fields: Vec::new(),
            error: None,
        }
    }

    /// Look up one identifier component by name.
    #[must_use]
    pub fn identifier_field(&self, name: &str) -> Option<&IdentifierField> {
        self.identifier.iter().find(|field| field.name == name)
    }

    /// Look up one non-identifier field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldModel> {
        self.fields.iter().find(|field| field.name == name)
    }

    #[must_use]
    pub fn is_identifier_field(&self, name: &str) -> bool {
        self.identifier_field(name).is_some()
    }
}

///
/// EntityDescriptorBuilder
///
/// Collects fields in declaration order; name validation errors are deferred
/// to `build`.
///

pub struct EntityDescriptorBuilder {
    name: String,
    table: String,
    identifier: Vec<IdentifierField>,
    fields: Vec<FieldModel>,
    error: Option<MetadataError>,
}

impl EntityDescriptorBuilder {
    /// Scalar identifier component stored in `column` through `converter`.
    #[must_use]
    pub fn scalar_id(mut self, name: &str, column: &str, converter: &str) -> Self {
        self.identifier.push(IdentifierField {
            name: name.to_string(),
            kind: IdentifierFieldKind::Scalar {
                column: column.to_string(),
                converter: converter.to_string(),
            },
        });
        self
    }

    /// Identifier component that references another entity; join columns derived.
    #[must_use]
    pub fn foreign_id(self, name: &str, target: &str, fetch: FetchMode) -> Self {
        self.foreign_id_with_columns(name, target, &[], fetch)
    }

    /// Identifier component that references another entity through explicit join columns.
    #[must_use]
    pub fn foreign_id_with_columns(
        mut self,
        name: &str,
        target: &str,
        join_columns: &[&str],
        fetch: FetchMode,
    ) -> Self {
        if let Some(target) = self.target_name(name, target) {
            self.identifier.push(IdentifierField {
                name: name.to_string(),
                kind: IdentifierFieldKind::ForeignReference {
                    target,
                    join_columns: owned(join_columns),
                    fetch,
                },
            });
        }
        self
    }

    /// Plain attribute column with an optional converter.
    #[must_use]
    pub fn scalar(mut self, name: &str, column: &str, converter: Option<&str>) -> Self {
        self.fields.push(FieldModel {
            name: name.to_string(),
            kind: FieldKind::Scalar {
                column: column.to_string(),
                converter: converter.map(str::to_string),
            },
        });
        self
    }

    /// Owning side of a to-one association; empty `join_columns` are derived.
    #[must_use]
    pub fn to_one(
        mut self,
        name: &str,
        target: &str,
        join_columns: &[&str],
        fetch: FetchMode,
    ) -> Self {
        if let Some(target) = self.target_name(name, target) {
            self.fields.push(FieldModel {
                name: name.to_string(),
                kind: FieldKind::ToOne {
                    target,
                    join_columns: owned(join_columns),
                    fetch,
                },
            });
        }
        self
    }

    /// Inverse side of a one-to-one association mapped by `mapped_by` on `target`.
    #[must_use]
    pub fn inverse_to_one(mut self, name: &str, target: &str, mapped_by: &str) -> Self {
        if let Some(target) = self.target_name(name, target) {
            self.fields.push(FieldModel {
                name: name.to_string(),
                kind: FieldKind::InverseToOne {
                    target,
                    mapped_by: mapped_by.to_string(),
                },
            });
        }
        self
    }

    /// Finish the descriptor, surfacing the first deferred error.
    pub fn build(self) -> Result<EntityDescriptor, MetadataError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let name = EntityName::try_from_str(&self.name).map_err(|source| {
            MetadataError::InvalidEntityName {
                name: self.name.clone(),
                source,
            }
        })?;

        Ok(EntityDescriptor {
            name,
            table: self.table,
            identifier: self.identifier,
            fields: self.fields,
        })
    }

    // Validate a reference target, remembering the first failure.
    fn target_name(&mut self, field: &str, target: &str) -> Option<EntityName> {
        match EntityName::try_from_str(target) {
            Ok(name) => Some(name),
            Err(source) => {
                self.error.get_or_insert(MetadataError::InvalidTargetName {
                    entity: self.name.clone(),
                    field: field.to_string(),
                    target: target.to_string(),
                    source,
                });
                None
            }
        }
    }
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|column| (*column).to_string()).collect()
}
