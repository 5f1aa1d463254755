use crate::{
    db::{
        entity::{EntityHandle, Slot},
        identifier::{IdValue, Identifier, IdentifierError, IdentifierInput, StorageIdentifier},
        identity::EntityName,
    },
    error::InternalError,
    metadata::{EntityMetadata, Metadata},
    model::{FetchMode, IdentifierFieldKind},
    obs::sink::{self, MetricsEvent},
    value::Value,
};

///
/// ReferenceResolver
///
/// Decode hands every foreign identifier component to a resolver, which
/// returns either a lazy placeholder or an eagerly loaded instance.
///

pub trait ReferenceResolver {
    fn resolve_reference(
        &mut self,
        target: EntityName,
        fetch: FetchMode,
        storage: StorageIdentifier,
        identifier: Identifier,
    ) -> Result<IdValue, InternalError>;
}

///
/// RawReferences
/// Keeps nested identifiers as raw `IdValue::Identifier` components.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct RawReferences;

impl ReferenceResolver for RawReferences {
    fn resolve_reference(
        &mut self,
        _target: EntityName,
        _fetch: FetchMode,
        _storage: StorageIdentifier,
        identifier: Identifier,
    ) -> Result<IdValue, InternalError> {
        Ok(IdValue::Identifier(identifier))
    }
}

///
/// IdentifierCodec
///
/// Converts identifiers between application form and flat storage form by
/// recursive descent over the declared identifier fields.
///

#[derive(Clone, Copy, Debug)]
pub struct IdentifierCodec<'a> {
    metadata: &'a Metadata,
}

impl<'a> IdentifierCodec<'a> {
    #[must_use]
    pub const fn new(metadata: &'a Metadata) -> Self {
        Self { metadata }
    }

    // ------------------------------------------------------------------
    // Encode
    // ------------------------------------------------------------------

    /// Encode a full identifier into storage columns.
    pub fn encode(
        &self,
        entity: EntityName,
        identifier: &Identifier,
    ) -> Result<StorageIdentifier, InternalError> {
        let layout = self.metadata.entity(entity)?;
        let mut out = Vec::with_capacity(layout.identifier_arity());
        self.encode_into(layout, identifier, &mut out)?;

        sink::record(MetricsEvent::Conversion {
            entity: layout.name(),
            values: out.len() as u64,
        });

        Ok(StorageIdentifier(out))
    }

    /// Encode the identifier an instance currently carries.
    pub fn encode_handle(&self, handle: &EntityHandle) -> Result<StorageIdentifier, InternalError> {
        let identifier = self.identifier_of(handle)?;

        self.encode(handle.entity(), &identifier)
    }

    /// Encode a reference held by `entity.field` into the target's columns.
    pub fn encode_reference(
        &self,
        entity: EntityName,
        field: &str,
        target: EntityName,
        value: &IdValue,
    ) -> Result<StorageIdentifier, InternalError> {
        let identifier = self.normalize_reference(entity, field, target, value)?;

        self.encode(target, &identifier)
    }

    fn encode_into(
        &self,
        layout: &EntityMetadata,
        identifier: &Identifier,
        out: &mut Vec<Value>,
    ) -> Result<(), InternalError> {
        let entity = layout.name();

        // Phase 1: reject components the entity does not declare.
        if let Some((field, _)) = identifier
            .iter()
            .find(|(field, _)| layout.descriptor().identifier_field(field).is_none())
        {
            return Err(IdentifierError::UnknownIdentifierField {
                entity: entity.to_string(),
                field: field.to_string(),
            }
            .into());
        }

        // Phase 2: walk declared fields in order.
        for field in layout.identifier_fields() {
            let value = identifier
                .get(&field.name)
                .ok_or_else(|| incomplete(entity, &field.name))?;

            match &field.kind {
                IdentifierFieldKind::Scalar { converter, .. } => {
                    let value = match value {
                        IdValue::Scalar(Value::Null) => {
                            return Err(incomplete(entity, &field.name));
                        }
                        IdValue::Scalar(value) => value,
                        IdValue::Entity(_) | IdValue::Identifier(_) => {
                            return Err(IdentifierError::NotAScalar {
                                entity: entity.to_string(),
                                field: field.name.clone(),
                            }
                            .into());
                        }
                    };

                    out.push(self.metadata.converter(converter)?.to_storage(value)?);
                }
                IdentifierFieldKind::ForeignReference { target, .. } => {
                    let nested = self.normalize_reference(entity, &field.name, *target, value)?;
                    let target_layout = self.metadata.entity(*target)?;

                    self.encode_into(target_layout, &nested, out)?;
                }
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Normalization
    // ------------------------------------------------------------------

    /// The single normalization point for foreign identifier components.
    ///
    /// - instance → its current identifier (target type checked)
    /// - scalar → single-field identifier of the target
    /// - nested identifier → itself
    pub fn normalize_reference(
        &self,
        entity: EntityName,
        field: &str,
        target: EntityName,
        value: &IdValue,
    ) -> Result<Identifier, InternalError> {
        match value {
            IdValue::Entity(handle) => {
                let found = handle.entity();
                if found != target {
                    return Err(IdentifierError::ReferenceTargetMismatch {
                        entity: entity.to_string(),
                        field: field.to_string(),
                        expected: target.to_string(),
                        found: found.to_string(),
                    }
                    .into());
                }

                self.identifier_of(handle)
            }
            IdValue::Identifier(identifier) => Ok(identifier.clone()),
            IdValue::Scalar(Value::Null) => Err(unresolved(entity, field)),
            IdValue::Scalar(raw) => {
                let target_layout = self.metadata.entity(target)?;
                match target_layout.identifier_fields() {
                    [only] => Ok(Identifier::new().with(&only.name, raw.clone())),
                    _ => Err(unresolved(entity, field)),
                }
            }
        }
    }

    /// Turn lookup input into a full identifier of `entity`.
    pub fn normalize_input(
        &self,
        entity: EntityName,
        input: IdentifierInput,
    ) -> Result<Identifier, InternalError> {
        match input {
            IdentifierInput::Composite(identifier) => Ok(identifier),
            IdentifierInput::Single(value) => {
                let layout = self.metadata.entity(entity)?;
                match layout.identifier_fields() {
                    [only] => Ok(Identifier::new().with(&only.name, value)),
                    fields => Err(IdentifierError::ExpectedComposite {
                        entity: entity.to_string(),
                        arity: fields.len(),
                    }
                    .into()),
                }
            }
        }
    }

    /// Read the identifier components an instance currently holds.
    ///
    /// Only identifier slots are read, so placeholders stay unresolved.
    pub fn identifier_of(&self, handle: &EntityHandle) -> Result<Identifier, InternalError> {
        let entity = handle.entity();
        let layout = self.metadata.entity(entity)?;
        let mut identifier = Identifier::new();

        for field in layout.identifier_fields() {
            let value = match handle.peek(&field.name) {
                None | Some(Slot::Value(Value::Null)) => match field.kind {
                    IdentifierFieldKind::Scalar { .. } => {
                        return Err(incomplete(entity, &field.name));
                    }
                    IdentifierFieldKind::ForeignReference { .. } => {
                        return Err(unresolved(entity, &field.name));
                    }
                },
                Some(Slot::Reference(None)) => return Err(unresolved(entity, &field.name)),
                Some(Slot::Reference(Some(target))) => IdValue::Entity(target),
                Some(Slot::Value(value)) => IdValue::Scalar(value),
            };

            identifier.insert(&field.name, value);
        }

        Ok(identifier)
    }

    // ------------------------------------------------------------------
    // Decode
    // ------------------------------------------------------------------

    /// Decode the leading identifier columns of a storage row.
    ///
    /// Returns the application identifier and the raw storage slice it came from.
    pub fn decode(
        &self,
        entity: EntityName,
        row: &[Value],
        resolver: &mut impl ReferenceResolver,
    ) -> Result<(Identifier, StorageIdentifier), InternalError> {
        let layout = self.metadata.entity(entity)?;
        let arity = layout.identifier_arity();
        if row.len() < arity {
            return Err(IdentifierError::MalformedRow {
                entity: entity.to_string(),
                expected: arity,
                found: row.len(),
            }
            .into());
        }

        let columns = &row[..arity];
        let identifier = self.decode_fields(layout, columns, resolver)?;

        sink::record(MetricsEvent::Conversion {
            entity: layout.name(),
            values: arity as u64,
        });

        Ok((identifier, StorageIdentifier(columns.to_vec())))
    }

    fn decode_fields(
        &self,
        layout: &EntityMetadata,
        columns: &[Value],
        resolver: &mut impl ReferenceResolver,
    ) -> Result<Identifier, InternalError> {
        let mut identifier = Identifier::new();
        let mut offset = 0;

        for field in layout.identifier_fields() {
            match &field.kind {
                IdentifierFieldKind::Scalar { converter, .. } => {
                    let value = self
                        .metadata
                        .converter(converter)?
                        .to_application(&columns[offset])?;
                    identifier.insert(&field.name, value);
                    offset += 1;
                }
                IdentifierFieldKind::ForeignReference { target, fetch, .. } => {
                    let target_layout = self.metadata.entity(*target)?;
                    let sub = &columns[offset..offset + target_layout.identifier_arity()];
                    let nested = self.decode_fields(target_layout, sub, resolver)?;
                    let value = resolver.resolve_reference(
                        *target,
                        *fetch,
                        StorageIdentifier(sub.to_vec()),
                        nested,
                    )?;

                    identifier.insert(&field.name, value);
                    offset += sub.len();
                }
            }
        }

        Ok(identifier)
    }
}

fn incomplete(entity: EntityName, field: &str) -> InternalError {
    IdentifierError::IncompleteIdentifier {
        entity: entity.to_string(),
        field: field.to_string(),
    }
    .into()
}

fn unresolved(entity: EntityName, field: &str) -> InternalError {
    IdentifierError::UnresolvedReference {
        entity: entity.to_string(),
        field: field.to_string(),
    }
    .into()
}
