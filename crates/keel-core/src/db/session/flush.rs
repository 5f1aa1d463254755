use super::{SessionCore, SessionError};
use crate::{
    db::{
        entity::{EntityHandle, Lazy, Lifecycle, Slot},
        identifier::{IdValue, IdentifierCodec, StorageIdentifier},
        identity_map::IdentityKey,
        storage::{Statement, StorageExecutor},
        unit_of_work::{DependencyGraph, EdgeKind, FlushError, FlushReport},
    },
    error::InternalError,
    metadata::{EntityMetadata, Metadata},
    model::{FieldKind, IdentifierFieldKind},
    obs::sink::{self, MetricsEvent, WriteKind},
    value::Value,
};
use std::{
    collections::{BTreeSet, VecDeque},
    sync::Arc,
};
use tracing::{debug, info, warn};

///
/// PendingWrite
///
/// One planned statement plus the bookkeeping applied once it succeeds.
///

struct PendingWrite {
    kind: WriteKind,
    handle: EntityHandle,
    storage: StorageIdentifier,
    row: Vec<Value>,
    statement: Statement,
}

impl<S: StorageExecutor + 'static> SessionCore<S> {
    /// Validate and order every pending change, then execute it.
    ///
    /// Validation failures leave the session usable; a storage failure marks
    /// it failed until cleared.
    pub(super) fn flush(&mut self) -> Result<FlushReport, InternalError> {
        self.uow.begin_flush()?;

        let writes = match self.plan_flush() {
            Ok(writes) => writes,
            Err(err) => {
                self.uow.abort_flush();
                debug!(target: "keel::uow", error = %err, "flush rejected");
                return Err(err);
            }
        };

        match self.execute_writes(writes) {
            Ok(report) => {
                self.uow.finish_flush();
                sink::record(MetricsEvent::FlushFinish { failed: false });
                info!(
                    target: "keel::uow",
                    inserted = report.inserted,
                    updated = report.updated,
                    extra_updates = report.extra_updates,
                    deleted = report.deleted,
                    "flush complete"
                );

                Ok(report)
            }
            Err(err) => {
                self.uow.fail();
                sink::record(MetricsEvent::FlushFinish { failed: true });
                warn!(target: "keel::uow", error = %err, "flush failed; session must be cleared");

                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    fn plan_flush(&mut self) -> Result<Vec<PendingWrite>, InternalError> {
        let metadata = Arc::clone(&self.metadata);
        let codec = IdentifierCodec::new(&metadata);

        // Phase 1: collect inserts, following references to new instances.
        let inserts = self.collect_inserts(&metadata)?;

        // Phase 2: order inserts before encoding; hard edges for identifier embedding,
        // soft edges for nullable foreign keys.
        let graph = dependency_graph(&metadata, &inserts)?;
        let plan = graph.plan().map_err(|cycle| FlushError::CircularIdentifierDependency {
            cycle: cycle
                .iter()
                .map(|node| inserts[*node].entity().to_string())
                .collect::<Vec<_>>()
                .join(" -> "),
        })?;

        // Phase 3: encode identities and rows; reject duplicates.
        let mut encoded = Vec::with_capacity(inserts.len());
        let mut seen = BTreeSet::new();
        for handle in &inserts {
            let layout = metadata.entity(handle.entity())?;
            check_fields(handle, layout)?;

            let storage = codec.encode_handle(handle)?;
            let key = IdentityKey::new(handle.entity(), &storage);
            let taken = self
                .identity_map
                .get(handle.entity(), &storage)
                .is_some_and(|live| !live.ptr_eq(handle));
            if taken || !seen.insert(key.clone()) {
                return Err(FlushError::DuplicateIdentity {
                    key: key.to_string(),
                }
                .into());
            }

            let row = storage_row(&metadata, &codec, layout, handle, &storage)?;
            encoded.push((layout, storage, row));
        }

        let mut writes = Vec::new();
        let mut follow_ups = Vec::new();
        for &node in &plan.order {
            let handle = &inserts[node];
            let (layout, storage, row) = &encoded[node];

            let deferred: Vec<&EntityHandle> = plan
                .deferred
                .iter()
                .filter(|(dependent, _)| *dependent == node)
                .map(|(_, prerequisite)| &inserts[*prerequisite])
                .collect();
            let deferred_columns = reference_columns(layout, handle, &deferred);

            let mut insert_row = row.clone();
            for column in &deferred_columns {
                insert_row[*column] = Value::Null;
            }

            writes.push(PendingWrite {
                kind: WriteKind::Insert,
                handle: handle.clone(),
                storage: storage.clone(),
                row: row.clone(),
                statement: Statement::Insert {
                    table: layout.table().to_string(),
                    columns: layout.insert_columns().to_vec(),
                    params: insert_row,
                },
            });

            if !deferred_columns.is_empty() {
                let values = deferred_columns.iter().map(|column| row[*column].clone());
                follow_ups.push(PendingWrite {
                    kind: WriteKind::ExtraUpdate,
                    handle: handle.clone(),
                    storage: storage.clone(),
                    row: row.clone(),
                    statement: update(layout, &deferred_columns, values, storage),
                });
            }
        }
        writes.extend(follow_ups);

        // Phase 4: changes to managed, resolved instances.
        for (_, handle) in self.identity_map.iter() {
            if handle.state() != Lifecycle::Managed
                || !handle.is_resolved()
                || inserts.iter().any(|insert| insert.ptr_eq(handle))
            {
                continue;
            }
            let (Some(snapshot), Some(current)) = (handle.snapshot(), handle.storage_identifier())
            else {
                continue;
            };

            let layout = metadata.entity(handle.entity())?;
            check_fields(handle, layout)?;

            let storage = codec.encode_handle(handle)?;
            if storage != current {
                return Err(FlushError::IdentifierChanged {
                    entity: handle.entity().to_string(),
                    key: current.canonical_key(),
                }
                .into());
            }

            let row = storage_row(&metadata, &codec, layout, handle, &storage)?;
            let changed: Vec<usize> = (layout.identifier_arity()..row.len())
                .filter(|column| snapshot.get(*column) != row.get(*column))
                .collect();
            if changed.is_empty() {
                continue;
            }

            let values = changed.iter().map(|column| row[*column].clone());
            writes.push(PendingWrite {
                kind: WriteKind::Update,
                handle: handle.clone(),
                storage: storage.clone(),
                statement: update(layout, &changed, values, &storage),
                row,
            });
        }

        // Phase 5: deletes, dependents first; soft cycles are broken by
        // nulling the dependent's foreign key before either row goes.
        let deletes = self.uow.deletes().to_vec();
        let graph = dependency_graph(&metadata, &deletes)?;
        let plan = graph.plan().map_err(|cycle| FlushError::CircularIdentifierDependency {
            cycle: cycle
                .iter()
                .map(|node| deletes[*node].entity().to_string())
                .collect::<Vec<_>>()
                .join(" -> "),
        })?;

        let mut removals = Vec::with_capacity(deletes.len());
        for &node in plan.order.iter().rev() {
            let handle = &deletes[node];
            let layout = metadata.entity(handle.entity())?;
            let storage = handle.storage_identifier().ok_or_else(|| {
                InternalError::uow_invariant(format!(
                    "removed '{}' has no storage identifier",
                    handle.entity()
                ))
            })?;

            let blocking: Vec<&EntityHandle> = plan
                .deferred
                .iter()
                .filter(|(dependent, _)| *dependent == node)
                .map(|(_, prerequisite)| &deletes[*prerequisite])
                .collect();
            let nulled = reference_columns(layout, handle, &blocking);
            if !nulled.is_empty() {
                let values = nulled.iter().map(|_| Value::Null);
                writes.push(PendingWrite {
                    kind: WriteKind::ExtraUpdate,
                    handle: handle.clone(),
                    storage: storage.clone(),
                    row: Vec::new(),
                    statement: update(layout, &nulled, values, &storage),
                });
            }

            removals.push(PendingWrite {
                kind: WriteKind::Delete,
                handle: handle.clone(),
                statement: Statement::Delete {
                    table: layout.table().to_string(),
                    filter: layout.identifier_columns().to_vec(),
                    params: storage.values().to_vec(),
                },
                storage,
                row: Vec::new(),
            });
        }
        writes.extend(removals);

        debug!(
            target: "keel::uow",
            inserts = inserts.len(),
            deletes = deletes.len(),
            statements = writes.len(),
            "flush planned"
        );

        Ok(writes)
    }

    /// Scheduled inserts plus, under cascade, every new instance reachable
    /// from a flushed one. Without cascade such a reference is an error.
    fn collect_inserts(&mut self, metadata: &Metadata) -> Result<Vec<EntityHandle>, InternalError> {
        let mut inserts = self.uow.inserts().to_vec();
        let mut queue: VecDeque<EntityHandle> = inserts.iter().cloned().collect();
        queue.extend(
            self.identity_map
                .iter()
                .map(|(_, handle)| handle.clone())
                .filter(|handle| handle.state() == Lifecycle::Managed && handle.is_resolved()),
        );

        while let Some(handle) = queue.pop_front() {
            let layout = metadata.entity(handle.entity())?;

            for (field, target) in references(layout, &handle) {
                if target.state() != Lifecycle::New
                    || inserts.iter().any(|insert| insert.ptr_eq(&target))
                {
                    continue;
                }
                if !self.config.cascade_persist {
                    return Err(FlushError::UnpersistedReference {
                        entity: handle.entity().to_string(),
                        field: field.to_string(),
                        target: target.entity().to_string(),
                    }
                    .into());
                }

                self.uow.schedule_insert(&target);
                inserts.push(target.clone());
                queue.push_back(target);
            }
        }

        Ok(inserts)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    fn execute_writes(&mut self, writes: Vec<PendingWrite>) -> Result<FlushReport, InternalError> {
        let mut report = FlushReport::default();

        for write in writes {
            let entity = write.handle.entity();
            let rows = self.storage.execute_statement(&write.statement)?;
            sink::record(MetricsEvent::Write {
                kind: write.kind,
                entity,
                rows,
            });

            match write.kind {
                WriteKind::Insert => {
                    // Registered before any dependent row is written.
                    write.handle.set_state(Lifecycle::Managed);
                    write.handle.set_storage_identifier(Some(write.storage.clone()));
                    self.identity_map
                        .register(entity, &write.storage, write.handle.clone())?;
                    write.handle.set_snapshot(Some(write.row));
                    report.inserted += 1;
                }
                WriteKind::ExtraUpdate => report.extra_updates += 1,
                WriteKind::Update => {
                    write.handle.set_snapshot(Some(write.row));
                    report.updated += 1;
                }
                WriteKind::Delete => {
                    self.identity_map.remove(entity, &write.storage);
                    write.handle.set_state(Lifecycle::Detached);
                    write.handle.set_storage_identifier(None);
                    write.handle.set_snapshot(None);
                    report.deleted += 1;
                }
            }

            debug!(
                target: "keel::uow",
                entity = %entity,
                sql = %write.statement.sql(),
                rows,
                "statement executed"
            );
        }

        Ok(report)
    }
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

/// Every slot must belong to a declared field.
fn check_fields(handle: &EntityHandle, layout: &EntityMetadata) -> Result<(), InternalError> {
    let descriptor = layout.descriptor();

    match handle
        .slot_names()
        .into_iter()
        .find(|name| !descriptor.is_identifier_field(name) && descriptor.field(name).is_none())
    {
        Some(field) => Err(SessionError::UnknownField {
            entity: handle.entity().to_string(),
            field,
        }
        .into()),
        None => Ok(()),
    }
}

/// Full insert row: storage identifier, then every column-backed field.
fn storage_row(
    metadata: &Metadata,
    codec: &IdentifierCodec<'_>,
    layout: &EntityMetadata,
    handle: &EntityHandle,
    storage: &StorageIdentifier,
) -> Result<Vec<Value>, InternalError> {
    let entity = layout.name();
    let mut row = storage.values().to_vec();

    for (field, range) in layout.field_layouts() {
        let slot = handle.peek(&field.name);

        match &field.kind {
            FieldKind::Scalar { converter, .. } => {
                let value = match slot {
                    None => Value::Null,
                    Some(Slot::Value(value)) => value,
                    Some(Slot::Reference(_)) => {
                        return Err(kind_mismatch(handle, &field.name, "a reference"));
                    }
                };
                let value = match converter {
                    Some(converter) => metadata.converter(converter)?.to_storage(&value)?,
                    None => value,
                };

                row.push(value);
            }
            FieldKind::ToOne { target, .. } => {
                let reference = match slot {
                    None | Some(Slot::Reference(None) | Slot::Value(Value::Null)) => None,
                    Some(Slot::Reference(Some(target))) => Some(IdValue::Entity(target)),
                    // A raw foreign key value for a single-column target.
                    Some(Slot::Value(raw)) => Some(IdValue::Scalar(raw)),
                };

                match reference {
                    Some(reference) => row.extend(
                        codec
                            .encode_reference(entity, &field.name, *target, &reference)?
                            .into_values(),
                    ),
                    None => row.extend(std::iter::repeat_n(Value::Null, range.len())),
                }
            }
            FieldKind::InverseToOne { .. } => {}
        }
    }

    Ok(row)
}

/// References held by an instance: identifier components and to-one fields.
fn references(layout: &EntityMetadata, handle: &EntityHandle) -> Vec<(String, EntityHandle)> {
    let identifier = layout
        .identifier_fields()
        .iter()
        .filter(|field| matches!(field.kind, IdentifierFieldKind::ForeignReference { .. }))
        .map(|field| &field.name);
    let fields = layout
        .fields()
        .iter()
        .filter(|field| field.kind.is_reference())
        .map(|field| &field.name);

    identifier
        .chain(fields)
        .filter_map(|name| match handle.peek(name) {
            Some(Slot::Reference(Some(target))) => Some((name.clone(), target)),
            _ => None,
        })
        .collect()
}

/// Edges between the given instances: hard through identifiers, soft through
/// to-one foreign keys. Inverse sides own no columns and add no edge.
fn dependency_graph(
    metadata: &Metadata,
    nodes: &[EntityHandle],
) -> Result<DependencyGraph, InternalError> {
    let mut graph = DependencyGraph::new(nodes.len());
    let position = |target: &EntityHandle| nodes.iter().position(|node| node.ptr_eq(target));

    for (dependent, handle) in nodes.iter().enumerate() {
        let layout = metadata.entity(handle.entity())?;

        for field in layout.identifier_fields() {
            if let IdentifierFieldKind::ForeignReference { .. } = field.kind
                && let Some(Slot::Reference(Some(target))) = handle.peek(&field.name)
                && let Some(prerequisite) = position(&target)
            {
                graph.add_edge(dependent, prerequisite, EdgeKind::Hard);
            }
        }

        for field in layout.fields() {
            if let FieldKind::ToOne { .. } = field.kind
                && let Some(Slot::Reference(Some(target))) = handle.peek(&field.name)
                && let Some(prerequisite) = position(&target)
                && prerequisite != dependent
            {
                graph.add_edge(dependent, prerequisite, EdgeKind::Soft);
            }
        }
    }

    Ok(graph)
}

/// Row positions of the to-one columns of `handle` that point at any of `targets`.
fn reference_columns(
    layout: &EntityMetadata,
    handle: &EntityHandle,
    targets: &[&EntityHandle],
) -> Vec<usize> {
    if targets.is_empty() {
        return Vec::new();
    }

    layout
        .field_layouts()
        .filter(|(field, _)| matches!(field.kind, FieldKind::ToOne { .. }))
        .filter(|(field, _)| match handle.peek(&field.name) {
            Some(Slot::Reference(Some(target))) => targets.iter().any(|t| t.ptr_eq(&target)),
            _ => false,
        })
        .flat_map(|(_, range)| range)
        .collect()
}

/// UPDATE of the given row positions, filtered by storage identifier.
fn update(
    layout: &EntityMetadata,
    columns: &[usize],
    values: impl Iterator<Item = Value>,
    storage: &StorageIdentifier,
) -> Statement {
    let select = layout.select_columns();
    let mut params: Vec<Value> = values.collect();
    params.extend(storage.values().iter().cloned());

    Statement::Update {
        table: layout.table().to_string(),
        set_columns: columns.iter().map(|column| select[*column].clone()).collect(),
        filter: layout.identifier_columns().to_vec(),
        params,
    }
}

fn kind_mismatch(handle: &EntityHandle, field: &str, found: &'static str) -> InternalError {
    SessionError::FieldKindMismatch {
        entity: handle.entity().to_string(),
        field: field.to_string(),
        found,
    }
    .into()
}
