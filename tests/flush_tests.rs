/// Flush tests
///
/// Scheduling, ordering and execution of entity actions through a session.
/// Run with: cargo test --test flush_tests
use memodb_flush::event::{PreUpdateEvent, PreUpdateEventListener};
use memodb_flush::{
    ActionQueue, DbError, EngineSettings, MemoryCollectionPersister, MemoryDatabase,
    MemoryEntityPersister, PersistentCollection, SessionFactory, Value,
};
use std::sync::Arc;

fn factory(db: &MemoryDatabase, settings: EngineSettings) -> Arc<SessionFactory> {
    let builder = SessionFactory::builder(settings);
    let item = MemoryEntityPersister::builder("Item", db.clone())
        .properties(&["name", "version"])
        .version_property("version")
        .build()
        .unwrap();
    let order = MemoryEntityPersister::builder("Order", db.clone())
        .properties(&["customer", "version"])
        .version_property("version")
        .build()
        .unwrap();
    let lines = MemoryCollectionPersister::builder("Order.lines", "Order", db.clone()).build();

    builder
        .entity_persister(Arc::new(item))
        .unwrap()
        .entity_persister(Arc::new(order))
        .unwrap()
        .collection_persister(Arc::new(lines))
        .unwrap()
        .build()
        .unwrap()
}

fn item(name: &str, version: i64) -> Vec<Value> {
    vec![Value::from(name), Value::Integer(version)]
}

#[test]
fn test_persist_writes_on_flush() {
    let db = MemoryDatabase::new();
    let factory = factory(&db, EngineSettings::new());
    let mut session = factory.open_session();

    session.persist("Item", Value::Integer(1), item("pen", 0)).unwrap();
    session.persist("Item", Value::Integer(2), item("ink", 0)).unwrap();

    assert_eq!(session.action_queue().number_of_insertions(), 2);
    assert_eq!(db.row_count("item").unwrap(), 0);

    session.flush().unwrap();
    assert_eq!(db.row_count("item").unwrap(), 2);
    assert!(!session.action_queue().has_any_queued_actions());

    session.commit().unwrap();
}

#[test]
fn test_flush_with_nothing_queued_issues_no_statements() {
    let db = MemoryDatabase::new();
    let factory = factory(&db, EngineSettings::new());
    let mut session = factory.open_session();

    session.flush().unwrap();
    session.commit().unwrap();
    assert_eq!(db.statement_count(), 0);
}

#[test]
fn test_updates_sorted_by_entity_name_then_id() {
    let db = MemoryDatabase::new();
    let factory = factory(&db, EngineSettings::new().order_updates(true));
    let mut session = factory.open_session();

    let order = session
        .track_loaded("Order", Value::Integer(2), vec![Value::from("acme"), Value::Integer(0)])
        .unwrap();
    let third = session.track_loaded("Item", Value::Integer(3), item("c", 0)).unwrap();
    let first = session.track_loaded("Item", Value::Integer(1), item("a", 0)).unwrap();

    session.update(&order, vec![Value::from("acme ltd"), Value::Integer(0)]).unwrap();
    session.update(&third, item("cc", 0)).unwrap();
    session.update(&first, item("aa", 0)).unwrap();

    let settings = factory.settings().clone();
    session.action_queue_mut().sort_actions(&settings);

    let ctx = session.context();
    let keys: Vec<(String, Value)> = session
        .action_queue()
        .updates()
        .iter()
        .map(|a| (a.base().entity_name().to_string(), a.base().id(ctx).unwrap()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("Item".to_string(), Value::Integer(1)),
            ("Item".to_string(), Value::Integer(3)),
            ("Order".to_string(), Value::Integer(2)),
        ]
    );
}

#[test]
fn test_updates_of_one_entity_follow_the_persister_id_order() {
    let db = MemoryDatabase::new();
    let persister = MemoryEntityPersister::builder("Item", db.clone())
        .properties(&["name", "version"])
        .version_property("version")
        .id_order(|a, b| b.total_cmp(a))
        .build()
        .unwrap();
    let factory = SessionFactory::builder(EngineSettings::new().order_updates(true))
        .entity_persister(Arc::new(persister))
        .unwrap()
        .build()
        .unwrap();
    let mut session = factory.open_session();

    for id in [1, 3, 2] {
        let instance = session
            .track_loaded("Item", Value::Integer(id), item("x", 0))
            .unwrap();
        session.update(&instance, item("y", 0)).unwrap();
    }

    let settings = factory.settings().clone();
    session.action_queue_mut().sort_actions(&settings);

    let ctx = session.context();
    let ids: Vec<Value> = session
        .action_queue()
        .updates()
        .iter()
        .map(|a| a.base().id(ctx).unwrap())
        .collect();
    assert_eq!(ids, vec![Value::Integer(3), Value::Integer(2), Value::Integer(1)]);
}

#[test]
fn test_updates_keep_scheduling_order_by_default() {
    let db = MemoryDatabase::new();
    let factory = factory(&db, EngineSettings::new());
    let mut session = factory.open_session();

    let third = session.track_loaded("Item", Value::Integer(3), item("c", 0)).unwrap();
    let first = session.track_loaded("Item", Value::Integer(1), item("a", 0)).unwrap();
    session.update(&third, item("cc", 0)).unwrap();
    session.update(&first, item("aa", 0)).unwrap();

    let settings = factory.settings().clone();
    session.action_queue_mut().sort_actions(&settings);

    let ctx = session.context();
    let ids: Vec<Value> = session
        .action_queue()
        .updates()
        .iter()
        .map(|a| a.base().id(ctx).unwrap())
        .collect();
    assert_eq!(ids, vec![Value::Integer(3), Value::Integer(1)]);
}

#[test]
fn test_update_increments_version() {
    let db = MemoryDatabase::new();
    db.insert("item", Value::Integer(1), item("pen", 0)).unwrap();
    let factory = factory(&db, EngineSettings::new());

    let mut session = factory.open_session();
    let pen = session.find("Item", &Value::Integer(1)).unwrap().unwrap();
    session.update(&pen, item("fountain pen", 0)).unwrap();
    session.commit().unwrap();

    let row = db.select("item", &Value::Integer(1)).unwrap().unwrap();
    assert_eq!(row, item("fountain pen", 1));
    assert_eq!(pen.state().unwrap()[1], Value::Integer(1));
}

#[test]
fn test_stale_update_fails_the_commit() {
    let db = MemoryDatabase::new();
    db.insert("item", Value::Integer(1), item("pen", 0)).unwrap();
    let factory = factory(&db, EngineSettings::new());

    let mut session = factory.open_session();
    let pen = session.find("Item", &Value::Integer(1)).unwrap().unwrap();

    // a concurrent writer bumps the version underneath the session
    db.increment_version("item", &Value::Integer(1), 1).unwrap();

    session.update(&pen, item("pencil", 0)).unwrap();
    let err = session.commit().unwrap_err();
    assert!(matches!(err, DbError::StaleObjectState { .. }));
    assert!(err.is_business_error());
    assert!(!session.action_queue().has_any_queued_actions());

    let row = db.select("item", &Value::Integer(1)).unwrap().unwrap();
    assert_eq!(row, item("pen", 1));
}

#[test]
fn test_read_only_instance_cannot_be_updated() {
    let db = MemoryDatabase::new();
    let country = MemoryEntityPersister::builder("Country", db.clone())
        .properties(&["name"])
        .immutable()
        .build()
        .unwrap();
    let factory = SessionFactory::builder(EngineSettings::new())
        .entity_persister(Arc::new(country))
        .unwrap()
        .build()
        .unwrap();

    let mut session = factory.open_session();
    let nl = session
        .track_loaded("Country", Value::from("NL"), vec![Value::from("Netherlands")])
        .unwrap();
    let result = session.update(&nl, vec![Value::from("Holland")]);
    assert!(matches!(result, Err(DbError::ExecutionError(_))));
    assert_eq!(session.action_queue().number_of_updates(), 0);
}

#[test]
fn test_delete_and_undelete() {
    let db = MemoryDatabase::new();
    db.insert("item", Value::Integer(1), item("pen", 0)).unwrap();
    db.insert("item", Value::Integer(2), item("ink", 0)).unwrap();
    let factory = factory(&db, EngineSettings::new());
    let mut session = factory.open_session();

    let pen = session.find("Item", &Value::Integer(1)).unwrap().unwrap();
    let ink = session.find("Item", &Value::Integer(2)).unwrap().unwrap();
    session.delete(&pen).unwrap();
    session.delete_orphan(&ink).unwrap();
    assert_eq!(session.action_queue().number_of_deletions(), 2);
    assert!(session.action_queue().are_insertions_or_deletions_queued());

    session.undelete(&pen).unwrap();
    assert_eq!(session.action_queue().number_of_deletions(), 1);

    session.commit().unwrap();
    assert!(db.select("item", &Value::Integer(1)).unwrap().is_some());
    assert!(db.select("item", &Value::Integer(2)).unwrap().is_none());
}

#[test]
fn test_undelete_unscheduled_instance_fails() {
    let db = MemoryDatabase::new();
    let factory = factory(&db, EngineSettings::new());
    let mut session = factory.open_session();

    let pen = session.track_loaded("Item", Value::Integer(1), item("pen", 0)).unwrap();
    let err = session.undelete(&pen).unwrap_err();
    assert!(err.is_assertion_failure());
    assert!(err.to_string().contains("Unable to perform un-delete"));
}

#[test]
fn test_tables_to_be_updated() {
    let db = MemoryDatabase::new();
    let factory = factory(&db, EngineSettings::new());
    let mut session = factory.open_session();
    session.persist("Item", Value::Integer(1), item("pen", 0)).unwrap();

    let queue = session.action_queue_mut();
    assert!(queue.are_tables_to_be_updated(&["item".to_string()].into_iter().collect()));
    assert!(!queue.are_tables_to_be_updated(&["order".to_string()].into_iter().collect()));
    assert!(!queue.are_tables_to_be_updated(&Default::default()));
}

#[test]
fn test_identity_insert_runs_immediately() {
    let db = MemoryDatabase::new();
    let factory = factory(&db, EngineSettings::new());
    let mut session = factory.open_session();

    let (first, id) = session.persist_identity("Item", item("pen", 0), false).unwrap();
    assert_eq!(id, Some(Value::Integer(1)));
    assert_eq!(first.id().unwrap(), Some(Value::Integer(1)));
    assert_eq!(db.row_count("item").unwrap(), 1);
    assert_eq!(session.action_queue().number_of_insertions(), 0);

    let (_, delayed) = session.persist_identity("Item", item("ink", 0), true).unwrap();
    assert_eq!(delayed, None);
    assert_eq!(session.action_queue().number_of_insertions(), 1);
    assert_eq!(db.row_count("item").unwrap(), 1);

    session.commit().unwrap();
    assert_eq!(db.row_count("item").unwrap(), 2);
}

#[test]
fn test_early_identity_insert_flushes_queued_inserts_first() {
    let db = MemoryDatabase::new();
    let factory = factory(&db, EngineSettings::new());
    let mut session = factory.open_session();

    session.persist("Item", Value::Integer(10), item("pen", 0)).unwrap();
    session.persist_identity("Item", item("ink", 0), false).unwrap();

    assert_eq!(db.row_count("item").unwrap(), 2);
    assert_eq!(session.action_queue().number_of_insertions(), 0);
}

#[test]
fn test_vetoed_update_leaves_row_untouched() {
    struct VetoUpdates;

    impl PreUpdateEventListener for VetoUpdates {
        fn on_pre_update(&self, _event: &PreUpdateEvent<'_>) -> bool {
            true
        }
    }

    let db = MemoryDatabase::new();
    db.insert("item", Value::Integer(1), item("pen", 0)).unwrap();

    let mut builder = SessionFactory::builder(EngineSettings::new().statistics(true));
    builder.listeners_mut().append_pre_update(Arc::new(VetoUpdates));
    let persister = MemoryEntityPersister::builder("Item", db.clone())
        .properties(&["name", "version"])
        .version_property("version")
        .build()
        .unwrap();
    let factory = builder.entity_persister(Arc::new(persister)).unwrap().build().unwrap();

    let mut session = factory.open_session();
    let pen = session.find("Item", &Value::Integer(1)).unwrap().unwrap();
    session.update(&pen, item("pencil", 0)).unwrap();
    session.commit().unwrap();

    assert_eq!(db.select("item", &Value::Integer(1)).unwrap().unwrap(), item("pen", 0));
    assert_eq!(factory.statistics().snapshot().entity_updates, 0);
}

#[test]
fn test_queue_serialization_round_trip() {
    let db = MemoryDatabase::new();
    db.insert("item", Value::Integer(1), item("pen", 0)).unwrap();
    db.insert("item", Value::Integer(2), item("ink", 0)).unwrap();
    let factory = factory(&db, EngineSettings::new());
    let mut session = factory.open_session();

    let pen = session.find("Item", &Value::Integer(1)).unwrap().unwrap();
    let ink = session.find("Item", &Value::Integer(2)).unwrap().unwrap();
    session.persist("Item", Value::Integer(3), item("paper", 0)).unwrap();
    session.update(&pen, item("fountain pen", 0)).unwrap();
    session.delete(&ink).unwrap();

    let bytes = session.action_queue().serialize().unwrap();
    let restored = ActionQueue::deserialize(&bytes, session.context()).unwrap();
    assert_eq!(restored.number_of_insertions(), 1);
    assert_eq!(restored.number_of_updates(), 1);
    assert_eq!(restored.number_of_deletions(), 1);

    *session.action_queue_mut() = restored;
    session.commit().unwrap();

    assert_eq!(db.select("item", &Value::Integer(1)).unwrap().unwrap(), item("fountain pen", 1));
    assert!(db.select("item", &Value::Integer(2)).unwrap().is_none());
    assert!(db.select("item", &Value::Integer(3)).unwrap().is_some());
}

#[test]
fn test_serialization_rejects_pending_collection_actions() {
    let db = MemoryDatabase::new();
    let factory = factory(&db, EngineSettings::new());
    let mut session = factory.open_session();

    let order = session
        .track_loaded("Order", Value::Integer(1), vec![Value::from("acme"), Value::Integer(0)])
        .unwrap();
    let lines = PersistentCollection::wrap_new("Order.lines", Some(order), vec![Value::from("pen")]);
    session.track_collection(&lines, Some(Value::Integer(1)));
    session.recreate_collection(&lines).unwrap();

    let result = session.action_queue().serialize();
    assert!(matches!(result, Err(DbError::SerializationError(_))));
}

#[test]
fn test_verify_version_detects_concurrent_change() {
    let db = MemoryDatabase::new();
    db.insert("item", Value::Integer(1), item("pen", 0)).unwrap();
    let factory = factory(&db, EngineSettings::new().statistics(true));

    let mut session = factory.open_session();
    let pen = session.find("Item", &Value::Integer(1)).unwrap().unwrap();
    session.verify_version_on_commit(&pen);
    db.increment_version("item", &Value::Integer(1), 1).unwrap();

    let err = session.commit().unwrap_err();
    match err {
        DbError::OptimisticLock { entity, id, latest } => {
            assert_eq!(entity, "Item");
            assert_eq!(id, "1");
            assert_eq!(latest, "1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(factory.statistics().entity_statistics("Item").optimistic_failures, 1);
}

#[test]
fn test_verify_version_passes_when_unchanged() {
    let db = MemoryDatabase::new();
    db.insert("item", Value::Integer(1), item("pen", 0)).unwrap();
    let factory = factory(&db, EngineSettings::new());

    let mut session = factory.open_session();
    let pen = session.find("Item", &Value::Integer(1)).unwrap().unwrap();
    session.verify_version_on_commit(&pen);
    session.commit().unwrap();
}

#[test]
fn test_increment_version_on_commit() {
    let db = MemoryDatabase::new();
    db.insert("item", Value::Integer(1), item("pen", 4)).unwrap();
    let factory = factory(&db, EngineSettings::new());

    let mut session = factory.open_session();
    let pen = session.find("Item", &Value::Integer(1)).unwrap().unwrap();
    session.increment_version_on_commit(&pen);
    session.commit().unwrap();

    assert_eq!(db.select("item", &Value::Integer(1)).unwrap().unwrap(), item("pen", 5));
    assert_eq!(pen.state().unwrap()[1], Value::Integer(5));
}
