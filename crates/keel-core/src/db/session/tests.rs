use super::*;
use crate::{
    convert::ConverterRegistry,
    db::{
        identifier::Identifier,
        storage::{MemoryStorage, Statement},
        unit_of_work::FlushError,
    },
    error::ErrorClass,
    model::{EntityDescriptor, FetchMode},
    obs::{MetricsEvent, MetricsSink, with_metrics_sink},
    test_fixtures::{
        AUXILIARY, AUXILIARY_TABLE, INVERSED, INVERSED_TABLE, OWNING, OWNING_TABLE,
        chain_metadata, name, scenario_metadata,
    },
    value::Value,
};
use std::cell::RefCell;

// ----------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------

fn storage_with(tables: &[&str]) -> MemoryStorage {
    let mut storage = MemoryStorage::new();
    for table in tables {
        storage.create_table(table);
    }
    storage
}

fn scenario_session(config: SessionConfig) -> Session<MemoryStorage> {
    Session::new(
        scenario_metadata(),
        storage_with(&[AUXILIARY_TABLE, INVERSED_TABLE, OWNING_TABLE]),
        config,
    )
}

/// Persist and flush the auxiliary/inversed/owning triple, then clear.
fn seeded_session(config: SessionConfig) -> Session<MemoryStorage> {
    let session = scenario_session(config);
    let auxiliary = EntityHandle::new(name(AUXILIARY)).with("id4", "abc");
    let inversed = EntityHandle::new(name(INVERSED))
        .with("id1", "def")
        .with_reference("foreignEntity", &auxiliary)
        .with("someProperty", "some value to be loaded");
    let owning = EntityHandle::new(name(OWNING))
        .with("id2", "ghi")
        .with_reference("associatedEntity", &inversed);

    session.persist(&auxiliary).unwrap();
    session.persist(&inversed).unwrap();
    session.persist(&owning).unwrap();
    session.flush().unwrap();
    session.clear().unwrap();
    session.storage_mut().clear_log();

    session
}

fn inversed_id() -> Identifier {
    Identifier::new()
        .with("id1", "def")
        .with("foreignEntity", "abc")
}

fn inserted_tables(session: &Session<MemoryStorage>) -> Vec<String> {
    session
        .storage()
        .statements()
        .iter()
        .filter(|statement| matches!(statement, Statement::Insert { .. }))
        .map(|statement| statement.table().to_string())
        .collect()
}

#[derive(Default)]
struct CountingSink {
    proxies_created: RefCell<u64>,
    proxies_initialized: RefCell<u64>,
}

impl MetricsSink for CountingSink {
    fn record(&self, event: MetricsEvent) {
        match event {
            MetricsEvent::ProxyCreated { .. } => *self.proxies_created.borrow_mut() += 1,
            MetricsEvent::ProxyInitialized { .. } => *self.proxies_initialized.borrow_mut() += 1,
            _ => {}
        }
    }
}

// ----------------------------------------------------------------------
// Persist and flush
// ----------------------------------------------------------------------

#[test]
fn flush_writes_converted_identifiers_in_dependency_order() {
    let session = scenario_session(SessionConfig::default());
    let auxiliary = EntityHandle::new(name(AUXILIARY)).with("id4", "abc");
    let inversed = EntityHandle::new(name(INVERSED))
        .with("id1", "def")
        .with_reference("foreignEntity", &auxiliary)
        .with("someProperty", "some value to be loaded");
    let owning = EntityHandle::new(name(OWNING))
        .with("id2", "ghi")
        .with_reference("associatedEntity", &inversed);

    // Scheduled dependents first; ordering must still put prerequisites first.
    session.persist(&owning).unwrap();
    session.persist(&inversed).unwrap();
    session.persist(&auxiliary).unwrap();
    assert_eq!(session.state(), FlushState::Scheduled);

    let report = session.flush().unwrap();

    assert_eq!(report.inserted, 3);
    assert_eq!(report.extra_updates, 0);
    assert_eq!(
        inserted_tables(&session),
        [AUXILIARY_TABLE, INVERSED_TABLE, OWNING_TABLE]
    );

    let storage = session.storage();
    assert_eq!(storage.fetch_one(AUXILIARY_TABLE, "id4"), Some(Value::text("nop")));
    assert_eq!(storage.fetch_one(INVERSED_TABLE, "id1"), Some(Value::text("qrs")));
    assert_eq!(storage.fetch_one(INVERSED_TABLE, "foreign_id"), Some(Value::text("nop")));
    assert_eq!(storage.fetch_one(OWNING_TABLE, "id2"), Some(Value::text("tuv")));
    assert_eq!(storage.fetch_one(OWNING_TABLE, "associated_id"), Some(Value::text("qrs")));
    assert_eq!(
        storage.fetch_one(OWNING_TABLE, "associated_foreign_id"),
        Some(Value::text("nop"))
    );
    drop(storage);

    assert_eq!(owning.state(), Lifecycle::Managed);
    assert!(session.contains(&owning).unwrap());
    assert_eq!(session.identity_map_len(), 3);
    assert_eq!(session.state(), FlushState::Clean);
}

#[test]
fn flush_with_nothing_scheduled_writes_nothing() {
    let session = seeded_session(SessionConfig::default());

    let report = session.flush().unwrap();

    assert_eq!(report.statements(), 0);
    assert!(session.storage().statements().is_empty());
}

#[test]
fn unpersisted_reference_fails_without_cascade() {
    let session = scenario_session(SessionConfig::default());
    let auxiliary = EntityHandle::new(name(AUXILIARY)).with("id4", "abc");
    let inversed = EntityHandle::new(name(INVERSED))
        .with("id1", "def")
        .with_reference("foreignEntity", &auxiliary);

    session.persist(&inversed).unwrap();
    let err = session.flush().unwrap_err();

    assert!(matches!(
        err.flush_error(),
        Some(FlushError::UnpersistedReference { field, .. }) if field == "foreignEntity"
    ));
    assert!(session.storage().statements().is_empty());
    // Validation failures leave the session usable.
    assert_eq!(session.state(), FlushState::Scheduled);
}

#[test]
fn cascade_persists_reachable_new_instances() {
    let session = scenario_session(SessionConfig {
        cascade_persist: true,
        ..SessionConfig::default()
    });
    let auxiliary = EntityHandle::new(name(AUXILIARY)).with("id4", "abc");
    let inversed = EntityHandle::new(name(INVERSED))
        .with("id1", "def")
        .with_reference("foreignEntity", &auxiliary);

    session.persist(&inversed).unwrap();
    let report = session.flush().unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(inserted_tables(&session), [AUXILIARY_TABLE, INVERSED_TABLE]);
    assert_eq!(auxiliary.state(), Lifecycle::Managed);
}

#[test]
fn duplicate_identity_is_a_conflict() {
    let session = scenario_session(SessionConfig::default());
    let first = EntityHandle::new(name(AUXILIARY)).with("id4", "abc");
    let second = EntityHandle::new(name(AUXILIARY)).with("id4", "abc");

    session.persist(&first).unwrap();
    session.persist(&second).unwrap();
    let err = session.flush().unwrap_err();

    assert_eq!(err.class, ErrorClass::Conflict);
    assert!(matches!(
        err.flush_error(),
        Some(FlushError::DuplicateIdentity { key }) if key == "auxiliary#t3:nop"
    ));
}

#[test]
fn unknown_field_is_rejected_before_any_write() {
    let session = scenario_session(SessionConfig::default());
    let auxiliary = EntityHandle::new(name(AUXILIARY))
        .with("id4", "abc")
        .with("colour", "red");

    session.persist(&auxiliary).unwrap();
    let err = session.flush().unwrap_err();

    assert!(matches!(
        err.session_error(),
        Some(SessionError::UnknownField { .. })
    ));
    assert!(session.storage().statements().is_empty());
}

// ----------------------------------------------------------------------
// Lookup and hydration
// ----------------------------------------------------------------------

#[test]
fn find_by_single_value_and_composite_identifier() {
    let session = seeded_session(SessionConfig::default());

    let auxiliary = session.find(AUXILIARY, "abc").unwrap().unwrap();
    assert_eq!(auxiliary.get("id4").unwrap(), Value::text("abc"));

    let inversed = session.find(INVERSED, inversed_id()).unwrap().unwrap();
    assert_eq!(inversed.get("id1").unwrap(), Value::text("def"));
    assert_eq!(
        inversed.get("someProperty").unwrap(),
        Value::text("some value to be loaded")
    );

    // Lazy reference reuses the instance already in the identity map.
    let foreign = inversed.reference("foreignEntity").unwrap().unwrap();
    assert!(foreign.ptr_eq(&auxiliary));
}

#[test]
fn find_accepts_an_instance_as_a_foreign_component() {
    let session = seeded_session(SessionConfig::default());
    let auxiliary = session.find(AUXILIARY, "abc").unwrap().unwrap();

    let by_instance = Identifier::new()
        .with("id1", "def")
        .with("foreignEntity", &auxiliary);
    let found = session.find(INVERSED, by_instance).unwrap().unwrap();

    assert!(found.ptr_eq(&session.find(INVERSED, inversed_id()).unwrap().unwrap()));
}

#[test]
fn repeated_find_returns_the_same_instance() {
    let session = seeded_session(SessionConfig::default());

    let first = session.find(AUXILIARY, "abc").unwrap().unwrap();
    let reads = session.storage().statements().len();
    let second = session.find(AUXILIARY, "abc").unwrap().unwrap();

    assert!(first.ptr_eq(&second));
    assert_eq!(session.storage().statements().len(), reads);
}

#[test]
fn find_of_missing_row_is_none() {
    let session = seeded_session(SessionConfig::default());

    assert!(session.find(AUXILIARY, "zzz").unwrap().is_none());
    assert!(session.find("nonexistent", "abc").is_err());
}

#[test]
fn lazy_foreign_component_is_a_placeholder_until_read() {
    let session = seeded_session(SessionConfig::default());
    let sink = Rc::new(CountingSink::default());

    let inversed = with_metrics_sink(sink.clone(), || {
        session.find(INVERSED, inversed_id()).unwrap().unwrap()
    });
    let foreign = inversed.reference("foreignEntity").unwrap().unwrap();

    assert_eq!(*sink.proxies_created.borrow(), 1);
    assert!(!foreign.is_resolved());
    // Identifier slots are available without touching storage.
    let reads = session.storage().statements().len();
    assert_eq!(foreign.get("id4").unwrap(), Value::text("abc"));
    assert_eq!(session.storage().statements().len(), reads);

    with_metrics_sink(sink.clone(), || session.resolve(&foreign).unwrap());
    assert!(foreign.is_resolved());
    assert_eq!(*sink.proxies_initialized.borrow(), 1);
    assert_eq!(session.storage().statements().len(), reads + 1);
}

#[test]
fn owning_side_recovers_nested_identifiers_and_lazy_target() {
    let session = seeded_session(SessionConfig::default());

    let owning = session.find(OWNING, "ghi").unwrap().unwrap();
    let inversed = owning.reference("associatedEntity").unwrap().unwrap();

    assert!(!inversed.is_resolved());
    assert_eq!(inversed.get("id1").unwrap(), Value::text("def"));
    let foreign = inversed.reference("foreignEntity").unwrap().unwrap();
    assert_eq!(foreign.get("id4").unwrap(), Value::text("abc"));

    // Reading a non-identifier field resolves the placeholder.
    assert_eq!(
        inversed.get("someProperty").unwrap(),
        Value::text("some value to be loaded")
    );
    assert!(inversed.is_resolved());
}

#[test]
fn inverse_side_is_loaded_eagerly_and_shares_identity() {
    let session = seeded_session(SessionConfig::default());

    let inversed = session.find(INVERSED, inversed_id()).unwrap().unwrap();
    let owning = inversed.reference("associatedEntity").unwrap().unwrap();

    assert!(owning.is_resolved());
    assert_eq!(owning.get("id2").unwrap(), Value::text("ghi"));
    let back = owning.reference("associatedEntity").unwrap().unwrap();
    assert!(back.ptr_eq(&inversed));
    assert!(owning.ptr_eq(&session.find(OWNING, "ghi").unwrap().unwrap()));
}

#[test]
fn force_eager_loads_references_immediately() {
    let session = seeded_session(SessionConfig {
        force_eager: true,
        ..SessionConfig::default()
    });

    let owning = session.find(OWNING, "ghi").unwrap().unwrap();
    let inversed = owning.reference("associatedEntity").unwrap().unwrap();

    assert!(inversed.is_resolved());
    assert!(
        inversed
            .reference("foreignEntity")
            .unwrap()
            .unwrap()
            .is_resolved()
    );
}

#[test]
fn placeholder_from_before_clear_is_detached() {
    let session = seeded_session(SessionConfig::default());
    let inversed = session.find(INVERSED, inversed_id()).unwrap().unwrap();
    let foreign = inversed.reference("foreignEntity").unwrap().unwrap();

    session.clear().unwrap();
    let err = foreign.resolve().unwrap_err();

    assert!(matches!(
        err.session_error(),
        Some(SessionError::Detached { .. })
    ));
    assert_eq!(inversed.state(), Lifecycle::Detached);
    assert_eq!(session.identity_map_len(), 0);
}

#[test]
fn placeholder_outliving_its_session_is_detached() {
    let session = seeded_session(SessionConfig::default());
    let owning = session.find(OWNING, "ghi").unwrap().unwrap();
    let inversed = owning.reference("associatedEntity").unwrap().unwrap();

    drop(session);

    assert!(inversed.get("someProperty").is_err());
    // Identifier reads never needed the session.
    assert_eq!(inversed.get("id1").unwrap(), Value::text("def"));
}

// ----------------------------------------------------------------------
// Updates and deletes
// ----------------------------------------------------------------------

#[test]
fn changed_field_is_written_as_a_narrow_update() {
    let session = seeded_session(SessionConfig::default());
    let inversed = session.find(INVERSED, inversed_id()).unwrap().unwrap();
    session.storage_mut().clear_log();

    inversed.set("someProperty", "changed").unwrap();
    let report = session.flush().unwrap();

    assert_eq!(report.updated, 1);
    let storage = session.storage();
    let Some(Statement::Update { set_columns, .. }) = storage.statements().first() else {
        panic!("expected an update");
    };
    assert_eq!(set_columns, &["some_property".to_string()]);
    assert_eq!(
        storage.fetch_one(INVERSED_TABLE, "some_property"),
        Some(Value::text("changed"))
    );
}

#[test]
fn changing_a_managed_identifier_is_unsupported() {
    let session = seeded_session(SessionConfig::default());
    let auxiliary = session.find(AUXILIARY, "abc").unwrap().unwrap();

    auxiliary.set("id4", "xyz").unwrap();
    let err = session.flush().unwrap_err();

    assert_eq!(err.class, ErrorClass::Unsupported);
    assert!(matches!(
        err.flush_error(),
        Some(FlushError::IdentifierChanged { .. })
    ));
}

#[test]
fn removed_instance_is_deleted_and_detached() {
    let session = seeded_session(SessionConfig::default());
    let owning = session.find(OWNING, "ghi").unwrap().unwrap();

    session.remove(&owning).unwrap();
    assert!(session.find(OWNING, "ghi").unwrap().is_none());

    let report = session.flush().unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(owning.state(), Lifecycle::Detached);
    assert_eq!(session.storage().row_count(OWNING_TABLE), 0);
    assert!(session.find(OWNING, "ghi").unwrap().is_none());
}

#[test]
fn persist_after_remove_cancels_the_delete() {
    let session = seeded_session(SessionConfig::default());
    let auxiliary = session.find(AUXILIARY, "abc").unwrap().unwrap();

    session.remove(&auxiliary).unwrap();
    session.persist(&auxiliary).unwrap();
    let report = session.flush().unwrap();

    assert_eq!(report.deleted, 0);
    assert_eq!(auxiliary.state(), Lifecycle::Managed);
}

#[test]
fn detached_instance_cannot_be_persisted() {
    let session = seeded_session(SessionConfig::default());
    let auxiliary = session.find(AUXILIARY, "abc").unwrap().unwrap();

    session.detach(&auxiliary).unwrap();

    assert!(!session.contains(&auxiliary).unwrap());
    assert!(session.persist(&auxiliary).is_err());
    // The identity is free again: a fresh find loads a new instance.
    let reloaded = session.find(AUXILIARY, "abc").unwrap().unwrap();
    assert!(!reloaded.ptr_eq(&auxiliary));
}

// ----------------------------------------------------------------------
// Failure and ordering
// ----------------------------------------------------------------------

#[test]
fn storage_failure_marks_the_session_failed_until_cleared() {
    let session = scenario_session(SessionConfig::default());
    let auxiliary = EntityHandle::new(name(AUXILIARY)).with("id4", "abc");
    session.persist(&auxiliary).unwrap();
    session.storage_mut().fail_next("disk full");

    let err = session.flush().unwrap_err();
    assert_eq!(err.class, ErrorClass::Internal);
    assert_eq!(session.state(), FlushState::Failed);

    let err = session.flush().unwrap_err();
    assert!(matches!(err.flush_error(), Some(FlushError::SessionFailed)));

    session.clear().unwrap();
    assert_eq!(session.state(), FlushState::Clean);
}

#[test]
fn identifier_chain_inserts_innermost_first() {
    let session = Session::new(
        chain_metadata(),
        storage_with(&["chain_a", "chain_b", "chain_c"]),
        SessionConfig::default(),
    );

    let c = EntityHandle::new(name("c")).with("code", "z").with("label", "leaf");
    let b = EntityHandle::new(name("b"))
        .with_reference("c", &c)
        .with("code", "y");
    let a = EntityHandle::new(name("a"))
        .with("code", "x")
        .with_reference("b", &b);

    session.persist(&a).unwrap();
    session.persist(&b).unwrap();
    session.persist(&c).unwrap();
    session.flush().unwrap();

    assert_eq!(inserted_tables(&session), ["chain_c", "chain_b", "chain_a"]);
    let storage = session.storage();
    assert_eq!(storage.fetch_one("chain_a", "b_c_code"), Some(Value::text("z")));
    assert_eq!(storage.fetch_one("chain_a", "b_code"), Some(Value::text("y")));
}

#[test]
fn eager_foreign_component_loads_on_hydration() {
    let session = Session::new(
        chain_metadata(),
        storage_with(&["chain_a", "chain_b", "chain_c"]),
        SessionConfig::default(),
    );
    let c = EntityHandle::new(name("c")).with("code", "z").with("label", "leaf");
    let b = EntityHandle::new(name("b"))
        .with_reference("c", &c)
        .with("code", "y");
    session.persist(&c).unwrap();
    session.persist(&b).unwrap();
    session.flush().unwrap();
    session.clear().unwrap();

    let found = session
        .find(
            "b",
            Identifier::new().with("c", "z").with("code", "y"),
        )
        .unwrap()
        .unwrap();
    let c = found.reference("c").unwrap().unwrap();

    assert!(c.is_resolved());
    assert_eq!(c.get("label").unwrap(), Value::text("leaf"));
}

fn partner_metadata() -> Arc<Metadata> {
    let descriptors = ["left", "right"].map(|entity| {
        let other = if entity == "left" { "right" } else { "left" };
        EntityDescriptor::builder(entity, entity)
            .scalar_id("code", "code", "passthrough")
            .to_one("partner", other, &[], FetchMode::Lazy)
            .build()
            .unwrap()
    });

    Arc::new(
        Metadata::builder(ConverterRegistry::with_builtins())
            .entities(descriptors)
            .build()
            .unwrap(),
    )
}

#[test]
fn foreign_key_cycle_is_broken_with_an_extra_update() {
    let session = Session::new(
        partner_metadata(),
        storage_with(&["left", "right"]),
        SessionConfig::default(),
    );
    let left = EntityHandle::new(name("left")).with("code", "l");
    let right = EntityHandle::new(name("right"))
        .with("code", "r")
        .with_reference("partner", &left);
    left.set_reference("partner", Some(&right)).unwrap();

    session.persist(&left).unwrap();
    session.persist(&right).unwrap();
    let report = session.flush().unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.extra_updates, 1);
    let storage = session.storage();
    assert_eq!(storage.fetch_one("left", "partner_code"), Some(Value::text("r")));
    assert_eq!(storage.fetch_one("right", "partner_code"), Some(Value::text("l")));
    let Some(Statement::Insert { params, .. }) = storage.statements().first() else {
        panic!("expected an insert first");
    };
    assert_eq!(params[1], Value::Null);
    drop(storage);

    session.remove(&left).unwrap();
    session.remove(&right).unwrap();
    let report = session.flush().unwrap();

    assert_eq!(report.deleted, 2);
    assert_eq!(report.extra_updates, 1);
    assert_eq!(session.storage().row_count("left"), 0);
    assert_eq!(session.storage().row_count("right"), 0);
}

#[test]
fn session_error_classes() {
    assert_eq!(SessionError::Busy.class(), ErrorClass::Conflict);
    assert_eq!(
        SessionError::EntityNotFound {
            entity: "a".to_string(),
            key: "k".to_string(),
        }
        .class(),
        ErrorClass::NotFound
    );
    let err: InternalError = SessionError::Detached {
        entity: "a".to_string(),
    }
    .into();
    assert_eq!(err.origin, ErrorOrigin::Session);
    assert_eq!(err.class, ErrorClass::InvariantViolation);
}

// ----------------------------------------------------------------------
// Undecodable rows
// ----------------------------------------------------------------------

/// `item.qty` is stored as decimal text; `holder.item` is a lazy reference.
fn stock_session() -> Session<MemoryStorage> {
    let metadata = Metadata::builder(ConverterRegistry::with_builtins())
        .entity(
            EntityDescriptor::builder("item", "items")
                .scalar_id("key", "key", "passthrough")
                .scalar("qty", "qty", Some("uint_text"))
                .build()
                .unwrap(),
        )
        .entity(
            EntityDescriptor::builder("holder", "holders")
                .scalar_id("key", "key", "passthrough")
                .to_one("item", "item", &["item_key"], FetchMode::Lazy)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    Session::new(
        Arc::new(metadata),
        storage_with(&["items", "holders"]),
        SessionConfig::default(),
    )
}

fn seed_row(session: &Session<MemoryStorage>, table: &str, columns: &[&str], params: Vec<Value>) {
    let statement = Statement::Insert {
        table: table.to_string(),
        columns: columns.iter().map(ToString::to_string).collect(),
        params,
    };
    session.storage_mut().execute_statement(&statement).unwrap();
}

#[test]
fn undecodable_row_fails_every_find() {
    let session = stock_session();
    seed_row(
        &session,
        "items",
        &["key", "qty"],
        vec![Value::text("k"), Value::text("oops")],
    );

    for _ in 0..2 {
        let err = session.find("item", "k").unwrap_err();
        assert_eq!(err.origin, ErrorOrigin::Convert);
        assert_eq!(session.identity_map_len(), 0);
    }
}

#[test]
fn failed_resolution_keeps_the_placeholder_loadable() {
    let session = stock_session();
    seed_row(
        &session,
        "items",
        &["key", "qty"],
        vec![Value::text("k"), Value::text("oops")],
    );
    seed_row(
        &session,
        "holders",
        &["key", "item_key"],
        vec![Value::text("h"), Value::text("k")],
    );

    let holder = session.find("holder", "h").unwrap().unwrap();
    let item = holder.reference("item").unwrap().unwrap();

    for _ in 0..2 {
        assert!(item.get("qty").is_err());
        assert!(!item.is_resolved());
    }

    let repair = Statement::Update {
        table: "items".to_string(),
        set_columns: vec!["qty".to_string()],
        filter: vec!["key".to_string()],
        params: vec![Value::text("7"), Value::text("k")],
    };
    session.storage_mut().execute_statement(&repair).unwrap();

    assert_eq!(item.get("qty").unwrap(), Value::Uint(7));
    assert!(item.is_resolved());
    assert!(session.find("item", "k").unwrap().unwrap().ptr_eq(&item));
}

#[test]
fn partially_null_foreign_key_is_corruption() {
    let session = scenario_session(SessionConfig::default());
    seed_row(
        &session,
        OWNING_TABLE,
        &["id2", "associated_id", "associated_foreign_id"],
        vec![Value::text("tuv"), Value::text("qrs"), Value::Null],
    );

    let err = session.find(OWNING, "ghi").unwrap_err();

    assert_eq!(err.class, ErrorClass::Corruption);
    assert_eq!(err.origin, ErrorOrigin::Storage);
    assert_eq!(session.identity_map_len(), 0);
}
