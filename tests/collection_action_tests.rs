/// Collection action tests
///
/// Recreate, update, remove and queued-operation writes of collections,
/// including their soft locks in the collection region.
/// Run with: cargo test --test collection_action_tests
use memodb_flush::cache::{CacheKey, ReadWriteRegion, RegionAccessStrategy};
use memodb_flush::event::{CollectionEvent, CollectionEventKind, CollectionEventListener};
use memodb_flush::{
    CollectionKind, CollectionUpdateAction, DbError, EngineSettings, EntityInstance,
    MemoryCollectionPersister, MemoryDatabase, MemoryEntityPersister, PersistentCollection,
    Session, SessionFactory, Value,
};
use memodb_flush::session::EntityId;
use std::sync::{Arc, Mutex};

struct Fixture {
    db: MemoryDatabase,
    lines: Arc<ReadWriteRegion>,
    factory: Arc<SessionFactory>,
}

#[derive(Default)]
struct RecordingListener {
    seen: Mutex<Vec<(CollectionEventKind, Option<String>, Option<Value>)>>,
}

impl CollectionEventListener for RecordingListener {
    fn on_collection_event(&self, event: &CollectionEvent<'_>) {
        self.seen.lock().unwrap().push((
            event.kind,
            event.affected_owner_entity_name().map(str::to_string),
            event.affected_owner_id.cloned(),
        ));
    }
}

fn fixture_with(listener: Option<Arc<RecordingListener>>) -> Fixture {
    let db = MemoryDatabase::new();
    let lines = Arc::new(ReadWriteRegion::new("Order.lines", 64, 60_000).unwrap());

    let mut builder = SessionFactory::builder(EngineSettings::new().statistics(true));
    if let Some(listener) = listener {
        for kind in [CollectionEventKind::PreRecreate, CollectionEventKind::PostRecreate] {
            builder
                .listeners_mut()
                .append_collection(kind, Arc::clone(&listener) as Arc<dyn CollectionEventListener>);
        }
    }

    let order = MemoryEntityPersister::builder("Order", db.clone())
        .properties(&["customer", "version"])
        .version_property("version")
        .build()
        .unwrap();
    let order_lines = MemoryCollectionPersister::builder("Order.lines", "Order", db.clone())
        .kind(CollectionKind::Set)
        .cache(Some(Arc::clone(&lines) as Arc<dyn RegionAccessStrategy>))
        .build();
    let tags = MemoryCollectionPersister::builder("Order.tags", "Order", db.clone())
        .kind(CollectionKind::Bag)
        .filter("active")
        .build();

    let factory = builder
        .entity_persister(Arc::new(order))
        .unwrap()
        .collection_persister(Arc::new(order_lines))
        .unwrap()
        .collection_persister(Arc::new(tags))
        .unwrap()
        .build()
        .unwrap();
    Fixture { db, lines, factory }
}

fn fixture() -> Fixture {
    fixture_with(None)
}

fn order_state() -> Vec<Value> {
    vec![Value::from("acme"), Value::Integer(0)]
}

fn texts(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

fn lines_key() -> CacheKey {
    CacheKey::new("Order.lines", Value::Integer(1))
}

/// Order#1 in the database and tracked by `session`.
fn load_order(f: &Fixture, session: &mut Session) -> EntityInstance {
    f.db.insert("order", Value::Integer(1), order_state()).unwrap();
    session.find("Order", &Value::Integer(1)).unwrap().unwrap()
}

/// Order#1 with the given lines stored and loaded.
fn load_lines(f: &Fixture, session: &mut Session, stored: &[&str]) -> PersistentCollection {
    let order = load_order(f, session);
    for line in texts(stored) {
        f.db.insert_collection_row("order_lines", &Value::Integer(1), line).unwrap();
    }
    let lines = PersistentCollection::loaded("Order.lines", Some(order), texts(stored));
    session.track_collection(&lines, Some(Value::Integer(1)));
    lines
}

fn stored_lines(f: &Fixture) -> Vec<Value> {
    f.db.collection_elements("order_lines", &Value::Integer(1)).unwrap()
}

#[test]
fn test_recreate_writes_every_element() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let order = load_order(&f, &mut session);

    let lines = PersistentCollection::wrap_new("Order.lines", Some(order), texts(&["pen", "ink"]));
    session.track_collection(&lines, Some(Value::Integer(1)));
    session.recreate_collection(&lines).unwrap();
    assert_eq!(session.action_queue().number_of_collection_creations(), 1);

    session.flush().unwrap();
    assert!(f.lines.is_locked(&lines_key()));
    assert!(!lines.is_dirty().unwrap());
    assert_eq!(lines.snapshot().unwrap(), texts(&["pen", "ink"]));

    session.commit().unwrap();
    assert!(!f.lines.is_locked(&lines_key()));
    assert_eq!(stored_lines(&f), texts(&["pen", "ink"]));
    assert_eq!(f.factory.statistics().collection_statistics("Order.lines").recreates, 1);
}

#[test]
fn test_update_writes_only_the_difference() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let lines = load_lines(&f, &mut session, &["pen", "ink"]);

    lines.remove(&Value::from("pen")).unwrap();
    lines.add(Value::from("paper")).unwrap();
    session.update_collection(&lines).unwrap();
    assert_eq!(session.action_queue().number_of_collection_updates(), 1);

    session.commit().unwrap();
    assert_eq!(stored_lines(&f), texts(&["ink", "paper"]));
    assert_eq!(lines.snapshot().unwrap(), texts(&["ink", "paper"]));
    assert!(!f.lines.is_locked(&lines_key()));
}

#[test]
fn test_update_of_emptied_collection_removes_rows() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let lines = load_lines(&f, &mut session, &["pen", "ink"]);

    lines.clear().unwrap();
    session.update_collection(&lines).unwrap();
    session.commit().unwrap();

    assert!(stored_lines(&f).is_empty());
}

#[test]
fn test_remove_deletes_every_row() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let lines = load_lines(&f, &mut session, &["pen", "ink"]);

    session.remove_collection(&lines).unwrap();
    assert_eq!(session.action_queue().number_of_collection_removals(), 1);
    session.commit().unwrap();

    assert!(stored_lines(&f).is_empty());
    assert_eq!(f.factory.statistics().collection_statistics("Order.lines").removes, 1);
}

#[test]
fn test_remove_of_empty_snapshot_issues_no_statement() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let lines = load_lines(&f, &mut session, &[]);
    let statements = f.db.statement_count();

    session.remove_collection(&lines).unwrap();
    session.commit().unwrap();

    assert_eq!(f.db.statement_count(), statements);
    assert_eq!(f.factory.statistics().collection_statistics("Order.lines").removes, 1);
}

#[test]
fn test_remove_unloaded_collection() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let order = load_order(&f, &mut session);
    f.db.insert_collection_row("order_lines", &Value::Integer(1), Value::from("pen")).unwrap();

    session.remove_unloaded_collection(&order, "Order.lines").unwrap();
    session.commit().unwrap();

    assert!(stored_lines(&f).is_empty());
    assert!(!f.lines.is_locked(&lines_key()));
}

#[test]
fn test_uninitialized_collection_without_queued_operations_is_a_bug() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let order = load_order(&f, &mut session);

    let lines = PersistentCollection::uninitialized("Order.lines", Some(order));
    session.track_collection(&lines, Some(Value::Integer(1)));
    session.update_collection(&lines).unwrap();

    let err = session.commit().unwrap_err();
    assert!(err.is_assertion_failure());
    assert!(!f.lines.is_locked(&lines_key()));
}

#[test]
fn test_update_of_uninitialized_collection_issues_no_statement() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let order = load_order(&f, &mut session);

    let lines = PersistentCollection::uninitialized("Order.lines", Some(order));
    lines.add(Value::from("pen")).unwrap();
    session.track_collection(&lines, Some(Value::Integer(1)));

    let persister = Arc::clone(f.factory.metamodel().collection_persister("Order.lines").unwrap());
    let (ctx, queue) = session.split_mut();
    let action = CollectionUpdateAction::new(lines.clone(), persister, EntityId::Known(Value::Integer(1)), false, ctx);
    queue.add_collection_update(action);

    let statements = f.db.statement_count();
    session.commit().unwrap();

    assert_eq!(f.db.statement_count(), statements);
    assert!(stored_lines(&f).is_empty());
    assert!(!f.lines.is_locked(&lines_key()));
}

#[test]
fn test_queued_operations_are_written_without_loading() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let order = load_order(&f, &mut session);
    f.db.insert_collection_row("order_lines", &Value::Integer(1), Value::from("pen")).unwrap();

    let lines = PersistentCollection::uninitialized("Order.lines", Some(order));
    lines.add(Value::from("ink")).unwrap();
    lines.remove(&Value::from("pen")).unwrap();
    session.track_collection(&lines, Some(Value::Integer(1)));
    session.update_collection(&lines).unwrap();

    assert_eq!(session.action_queue().number_of_queued_operations(), 1);
    assert_eq!(session.action_queue().number_of_collection_updates(), 0);

    session.commit().unwrap();
    assert_eq!(stored_lines(&f), texts(&["ink"]));
    assert!(!lines.has_queued_operations().unwrap());
    assert!(!lines.was_initialized().unwrap());
}

#[test]
fn test_filtered_bag_cannot_be_recreated() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let order = load_order(&f, &mut session);
    f.db.insert_collection_row("order_tags", &Value::Integer(1), Value::from("new")).unwrap();

    let tags = PersistentCollection::loaded("Order.tags", Some(order), texts(&["new"]));
    session.track_collection(&tags, Some(Value::Integer(1)));
    tags.add(Value::from("urgent")).unwrap();

    session.enable_filter("active");
    session.update_collection(&tags).unwrap();

    match session.commit().unwrap_err() {
        DbError::FilteredCollectionRecreate(what) => assert_eq!(what, "Order.tags#1"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_bag_is_recreated_when_unfiltered() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let order = load_order(&f, &mut session);
    f.db.insert_collection_row("order_tags", &Value::Integer(1), Value::from("new")).unwrap();

    let tags = PersistentCollection::loaded("Order.tags", Some(order), texts(&["new"]));
    session.track_collection(&tags, Some(Value::Integer(1)));
    tags.add(Value::from("urgent")).unwrap();
    session.update_collection(&tags).unwrap();
    session.commit().unwrap();

    assert_eq!(
        f.db.collection_elements("order_tags", &Value::Integer(1)).unwrap(),
        texts(&["new", "urgent"])
    );
}

#[test]
fn test_failed_flush_releases_collection_locks() {
    let f = fixture();
    let mut session = f.factory.open_session();
    let lines = load_lines(&f, &mut session, &["pen"]);
    let order = lines.owner().unwrap().unwrap();

    // updates run before collection actions; this one hits a stale row
    f.db.increment_version("order", &Value::Integer(1), 1).unwrap();
    session.update(&order, vec![Value::from("acme ltd"), Value::Integer(0)]).unwrap();
    lines.add(Value::from("ink")).unwrap();
    session.update_collection(&lines).unwrap();

    let err = session.commit().unwrap_err();
    assert!(matches!(err, DbError::StaleObjectState { .. }));
    assert!(!f.lines.is_locked(&lines_key()));
    assert_eq!(stored_lines(&f), texts(&["pen"]));
}

#[test]
fn test_collection_of_delayed_owner_waits_for_its_key() {
    let f = fixture();
    let mut session = f.factory.open_session();

    let (order, id) = session.persist_identity("Order", order_state(), true).unwrap();
    assert!(id.is_none());
    let lines = PersistentCollection::wrap_new("Order.lines", Some(order.clone()), texts(&["pen"]));
    session.track_collection(&lines, None);
    session.recreate_collection(&lines).unwrap();
    session.commit().unwrap();

    let generated = order.id().unwrap().unwrap();
    assert_eq!(
        f.db.collection_elements("order_lines", &generated).unwrap(),
        texts(&["pen"])
    );
}

#[test]
fn test_recreate_notifies_collection_listeners() {
    let listener = Arc::new(RecordingListener::default());
    let f = fixture_with(Some(Arc::clone(&listener)));
    let mut session = f.factory.open_session();
    let order = load_order(&f, &mut session);

    let lines = PersistentCollection::wrap_new("Order.lines", Some(order), texts(&["pen"]));
    session.track_collection(&lines, Some(Value::Integer(1)));
    session.recreate_collection(&lines).unwrap();
    session.commit().unwrap();

    let seen = listener.seen.lock().unwrap();
    let expected: Vec<(CollectionEventKind, Option<String>, Option<Value>)> = vec![
        (CollectionEventKind::PreRecreate, Some("Order".to_string()), Some(Value::Integer(1))),
        (CollectionEventKind::PostRecreate, Some("Order".to_string()), Some(Value::Integer(1))),
    ];
    assert_eq!(*seen, expected);
}
