//! Module: metadata
//! Responsibility: validated, immutable entity layouts plus the converter
//! registry, shared read-only by every session.
//! Does not own: identifier values or session state.
//!
//! Invariants:
//! - Built once; never mutated afterwards.
//! - Identifier columns flatten foreign references in declaration order.
//! - No entity embeds itself through its identifier chain.
//! - Process-wide installation happens at most once (`OnceLock` barrier).

#[cfg(test)]
mod tests;

use crate::{
    convert::{ConverterRegistry, ValueConverter},
    db::identity::{EntityName, EntityNameError},
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    model::{EntityDescriptor, FieldKind, FieldModel, IdentifierField, IdentifierFieldKind},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
    sync::{Arc, OnceLock},
};
use thiserror::Error as ThisError;
use tracing::info;

static GLOBAL_METADATA: OnceLock<Arc<Metadata>> = OnceLock::new();

///
/// MetadataError
///

#[derive(Debug, ThisError)]
pub enum MetadataError {
    #[error("metadata already installed for this process")]
    AlreadyInstalled,

    #[error("entity '{0}' declared twice")]
    DuplicateEntity(EntityName),

    #[error("entity '{entity}' maps column '{column}' twice")]
    DuplicateColumn { entity: EntityName, column: String },

    #[error("entity '{entity}' declares field '{field}' twice")]
    DuplicateField { entity: EntityName, field: String },

    #[error("entity '{0}' has no identifier fields")]
    EmptyIdentifier(EntityName),

    #[error("invalid entity name '{name}': {source}")]
    InvalidEntityName {
        name: String,
        source: EntityNameError,
    },

    #[error("field '{entity}.{field}' names an invalid target '{target}': {source}")]
    InvalidTargetName {
        entity: String,
        field: String,
        target: String,
        source: EntityNameError,
    },

    #[error(
        "field '{entity}.{field}' is mapped by '{target}.{mapped_by}', which is not a to-one reference back to '{entity}'"
    )]
    InvalidMappedBy {
        entity: EntityName,
        field: String,
        target: EntityName,
        mapped_by: String,
    },

    #[error(
        "field '{entity}.{field}' declares {found} join columns, target identifier has {expected}"
    )]
    JoinColumnArity {
        entity: EntityName,
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("identifier embeds itself: {path}")]
    RecursiveIdentifier { path: String },

    #[error("field '{entity}.{field}' uses unknown converter '{converter}'")]
    UnknownConverter {
        entity: EntityName,
        field: String,
        converter: String,
    },

    #[error("entity '{0}' is not mapped")]
    UnknownEntity(String),

    #[error("field '{entity}.{field}' references unmapped entity '{target}'")]
    UnknownTarget {
        entity: EntityName,
        field: String,
        target: EntityName,
    },
}

impl MetadataError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyInstalled => ErrorClass::Conflict,
            Self::UnknownEntity(_) => ErrorClass::NotFound,
            _ => ErrorClass::InvariantViolation,
        }
    }
}

impl From<MetadataError> for InternalError {
    fn from(err: MetadataError) -> Self {
        Self::with_detail(err.class(), ErrorOrigin::Metadata, ErrorDetail::Metadata(Box::new(err)))
    }
}

///
/// EntityMetadata
///
/// One validated entity layout. Join columns are resolved; select columns are
/// the flattened identifier columns followed by every column-backed field.
///

#[derive(Debug)]
pub struct EntityMetadata {
    descriptor: EntityDescriptor,
    identifier_columns: Vec<String>,
    select_columns: Vec<String>,
    field_ranges: Vec<Range<usize>>,
}

impl EntityMetadata {
    #[must_use]
    pub const fn name(&self) -> EntityName {
        self.descriptor.name
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.descriptor.table
    }

    #[must_use]
    pub const fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn identifier_fields(&self) -> &[IdentifierField] {
        &self.descriptor.identifier
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldModel] {
        &self.descriptor.fields
    }

    /// Flattened identifier columns in declaration order.
    #[must_use]
    pub fn identifier_columns(&self) -> &[String] {
        &self.identifier_columns
    }

    /// Number of storage values in a full identifier.
    #[must_use]
    pub const fn identifier_arity(&self) -> usize {
        self.identifier_columns.len()
    }

    /// Every column read on hydration, identifier columns first.
    #[must_use]
    pub fn select_columns(&self) -> &[String] {
        &self.select_columns
    }

    /// Non-identifier fields paired with their column range in a select row.
    pub fn field_layouts(&self) -> impl Iterator<Item = (&FieldModel, Range<usize>)> {
        self.descriptor
            .fields
            .iter()
            .zip(self.field_ranges.iter().cloned())
    }

    /// Columns written by an INSERT (same as the select list).
    #[must_use]
    pub fn insert_columns(&self) -> &[String] {
        &self.select_columns
    }
}

///
/// Metadata
///
/// Converter registry plus every entity layout. Shared read-only through `Arc`.
///

#[derive(Debug)]
pub struct Metadata {
    converters: ConverterRegistry,
    entities: BTreeMap<EntityName, EntityMetadata>,
}

impl Metadata {
    /// Start assembling metadata over a converter registry.
    #[must_use]
    pub const fn builder(converters: ConverterRegistry) -> MetadataBuilder {
        MetadataBuilder {
            converters,
            descriptors: Vec::new(),
        }
    }

    /// Install this metadata as the process-wide instance.
    ///
    /// Must complete before any concurrent reader calls [`Metadata::global`];
    /// a second install fails.
    pub fn install(self) -> Result<Arc<Self>, InternalError> {
        let metadata = Arc::new(self);
        GLOBAL_METADATA
            .set(Arc::clone(&metadata))
            .map_err(|_| MetadataError::AlreadyInstalled)?;

        info!(
            target: "keel::metadata",
            entities = metadata.entities.len(),
            "metadata installed"
        );

        Ok(metadata)
    }

    /// The process-wide metadata, if installed.
    #[must_use]
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL_METADATA.get().cloned()
    }

    /// Look up one entity layout.
    pub fn entity(&self, name: EntityName) -> Result<&EntityMetadata, InternalError> {
        self.entities
            .get(&name)
            .ok_or_else(|| MetadataError::UnknownEntity(name.to_string()).into())
    }

    /// Look up one entity layout by its external name.
    pub fn entity_by_name(&self, name: &str) -> Result<&EntityMetadata, InternalError> {
        EntityName::try_from_str(name)
            .ok()
            .and_then(|name| self.entities.get(&name))
            .ok_or_else(|| MetadataError::UnknownEntity(name.to_string()).into())
    }

    /// Look up a converter by name.
    pub fn converter(&self, name: &str) -> Result<&dyn ValueConverter, InternalError> {
        Ok(self.converters.get(name)?)
    }

    #[must_use]
    pub const fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    /// Every entity layout in name order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entities.values()
    }
}

///
/// MetadataBuilder
///

pub struct MetadataBuilder {
    converters: ConverterRegistry,
    descriptors: Vec<EntityDescriptor>,
}

impl MetadataBuilder {
    #[must_use]
    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    #[must_use]
    pub fn entities(mut self, descriptors: impl IntoIterator<Item = EntityDescriptor>) -> Self {
        self.descriptors.extend(descriptors);
        self
    }

    /// Validate every descriptor and resolve column layouts.
    pub fn build(self) -> Result<Metadata, InternalError> {
        // Phase 1: index descriptors by name.
        let mut descriptors = BTreeMap::new();
        for descriptor in self.descriptors {
            let name = descriptor.name;
            if descriptors.insert(name, descriptor).is_some() {
                return Err(MetadataError::DuplicateEntity(name).into());
            }
        }

        // Phase 2: local validation (fields, converters, targets).
        for descriptor in descriptors.values() {
            validate_descriptor(descriptor, &descriptors, &self.converters)?;
        }

        // Phase 3: flatten identifier columns; rejects recursive embedding.
        let mut identifier_columns = BTreeMap::new();
        for name in descriptors.keys() {
            resolve_identifier_columns(
                *name,
                &descriptors,
                &mut identifier_columns,
                &mut Vec::new(),
            )?;
        }

        // Phase 4: resolve join columns and select layouts.
        let mut entities = BTreeMap::new();
        for descriptor in descriptors.values() {
            let entity = layout_entity(descriptor, &identifier_columns)?;
            entities.insert(descriptor.name, entity);
        }

        // Phase 5: inverse sides must point at a to-one back-reference.
        for descriptor in descriptors.values() {
            validate_inverse_sides(descriptor, &descriptors)?;
        }

        Ok(Metadata {
            converters: self.converters,
            entities,
        })
    }
}

fn validate_descriptor(
    descriptor: &EntityDescriptor,
    descriptors: &BTreeMap<EntityName, EntityDescriptor>,
    converters: &ConverterRegistry,
) -> Result<(), MetadataError> {
    let entity = descriptor.name;
    if descriptor.identifier.is_empty() {
        return Err(MetadataError::EmptyIdentifier(entity));
    }

    let mut names = BTreeSet::new();
    let all_names = descriptor
        .identifier
        .iter()
        .map(|field| field.name.as_str())
        .chain(descriptor.fields.iter().map(|field| field.name.as_str()));
    for name in all_names {
        if !names.insert(name) {
            return Err(MetadataError::DuplicateField {
                entity,
                field: name.to_string(),
            });
        }
    }

    let check_converter = |field: &str, converter: &str| {
        if converters.contains(converter) {
            Ok(())
        } else {
            Err(MetadataError::UnknownConverter {
                entity,
                field: field.to_string(),
                converter: converter.to_string(),
            })
        }
    };
    let check_target = |field: &str, target: EntityName| {
        if descriptors.contains_key(&target) {
            Ok(())
        } else {
            Err(MetadataError::UnknownTarget {
                entity,
                field: field.to_string(),
                target,
            })
        }
    };

    for field in &descriptor.identifier {
        match &field.kind {
            IdentifierFieldKind::Scalar { converter, .. } => {
                check_converter(&field.name, converter)?;
            }
            IdentifierFieldKind::ForeignReference { target, .. } => {
                check_target(&field.name, *target)?;
            }
        }
    }

    for field in &descriptor.fields {
        match &field.kind {
            FieldKind::Scalar {
                converter: Some(converter),
                ..
            } => check_converter(&field.name, converter)?,
            FieldKind::Scalar { converter: None, .. } => {}
            FieldKind::ToOne { target, .. } | FieldKind::InverseToOne { target, .. } => {
                check_target(&field.name, *target)?;
            }
        }
    }

    Ok(())
}

// Depth-first flattening with an explicit stack for cycle reporting.
fn resolve_identifier_columns(
    name: EntityName,
    descriptors: &BTreeMap<EntityName, EntityDescriptor>,
    resolved: &mut BTreeMap<EntityName, Vec<String>>,
    stack: &mut Vec<EntityName>,
) -> Result<Vec<String>, MetadataError> {
    if let Some(columns) = resolved.get(&name) {
        return Ok(columns.clone());
    }
    if let Some(start) = stack.iter().position(|entry| *entry == name) {
        let path = stack[start..]
            .iter()
            .chain(std::iter::once(&name))
            .map(EntityName::as_str)
            .collect::<Vec<_>>()
            .join(" -> ");

        return Err(MetadataError::RecursiveIdentifier { path });
    }

    let descriptor = descriptors
        .get(&name)
        .ok_or_else(|| MetadataError::UnknownEntity(name.to_string()))?;

    stack.push(name);
    let mut columns = Vec::new();
    for field in &descriptor.identifier {
        match &field.kind {
            IdentifierFieldKind::Scalar { column, .. } => columns.push(column.clone()),
            IdentifierFieldKind::ForeignReference {
                target,
                join_columns,
                ..
            } => {
                let target_columns =
                    resolve_identifier_columns(*target, descriptors, resolved, stack)?;
                columns.extend(resolve_join_columns(
                    name,
                    &field.name,
                    join_columns,
                    &target_columns,
                )?);
            }
        }
    }
    stack.pop();

    resolved.insert(name, columns.clone());

    Ok(columns)
}

fn resolve_join_columns(
    entity: EntityName,
    field: &str,
    join_columns: &[String],
    target_columns: &[String],
) -> Result<Vec<String>, MetadataError> {
    if join_columns.is_empty() {
        return Ok(target_columns
            .iter()
            .map(|column| format!("{field}_{column}"))
            .collect());
    }

    if join_columns.len() != target_columns.len() {
        return Err(MetadataError::JoinColumnArity {
            entity,
            field: field.to_string(),
            expected: target_columns.len(),
            found: join_columns.len(),
        });
    }

    Ok(join_columns.to_vec())
}

fn layout_entity(
    descriptor: &EntityDescriptor,
    identifier_columns: &BTreeMap<EntityName, Vec<String>>,
) -> Result<EntityMetadata, MetadataError> {
    let target_columns = |target: &EntityName| {
        identifier_columns
            .get(target)
            .map(Vec::as_slice)
            .ok_or_else(|| MetadataError::UnknownEntity(target.to_string()))
    };

    let mut descriptor = descriptor.clone();
    let entity = descriptor.name;

    for field in &mut descriptor.identifier {
        if let IdentifierFieldKind::ForeignReference {
            target,
            join_columns,
            ..
        } = &mut field.kind
        {
            *join_columns = resolve_join_columns(
                entity,
                &field.name,
                join_columns,
                target_columns(target)?,
            )?;
        }
    }

    let own_identifier = target_columns(&entity)?.to_vec();
    let mut select_columns = own_identifier.clone();
    let mut field_ranges = Vec::with_capacity(descriptor.fields.len());

    for field in &mut descriptor.fields {
        let start = select_columns.len();
        match &mut field.kind {
            FieldKind::Scalar { column, .. } => select_columns.push(column.clone()),
            FieldKind::ToOne {
                target,
                join_columns,
                ..
            } => {
                *join_columns = resolve_join_columns(
                    entity,
                    &field.name,
                    join_columns,
                    target_columns(target)?,
                )?;
                select_columns.extend(join_columns.iter().cloned());
            }
            FieldKind::InverseToOne { .. } => {}
        }
        field_ranges.push(start..select_columns.len());
    }

    let mut seen = BTreeSet::new();
    for column in &select_columns {
        if !seen.insert(column.as_str()) {
            return Err(MetadataError::DuplicateColumn {
                entity,
                column: column.clone(),
            });
        }
    }

    Ok(EntityMetadata {
        descriptor,
        identifier_columns: own_identifier,
        select_columns,
        field_ranges,
    })
}

fn validate_inverse_sides(
    descriptor: &EntityDescriptor,
    descriptors: &BTreeMap<EntityName, EntityDescriptor>,
) -> Result<(), MetadataError> {
    for field in &descriptor.fields {
        let FieldKind::InverseToOne { target, mapped_by } = &field.kind else {
            continue;
        };

        let points_back = descriptors
            .get(target)
            .and_then(|owning| owning.field(mapped_by))
            .is_some_and(|owning_field| {
                matches!(
                    &owning_field.kind,
                    FieldKind::ToOne { target: back, .. } if *back == descriptor.name
                )
            });

        if !points_back {
            return Err(MetadataError::InvalidMappedBy {
                entity: descriptor.name,
                field: field.name.clone(),
                target: *target,
                mapped_by: mapped_by.clone(),
            });
        }
    }

    Ok(())
}
