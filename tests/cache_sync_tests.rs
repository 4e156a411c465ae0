/// Second-level cache synchronization tests
///
/// Soft locks taken by write actions, values published at commit and
/// region eviction around bulk statements.
/// Run with: cargo test --test cache_sync_tests
use anyhow::Result;
use memodb_flush::cache::{CacheKey, ReadWriteRegion, RegionAccessStrategy};
use memodb_flush::event::{PreUpdateEvent, PreUpdateEventListener};
use memodb_flush::persister::MemoryEntityPersisterBuilder;
use memodb_flush::{
    BulkOperationCleanupAction, CacheMode, EngineSettings, MemoryCollectionPersister,
    MemoryDatabase, MemoryEntityPersister, SessionFactory, Value,
};
use std::collections::HashSet;
use std::sync::Arc;

struct Fixture {
    db: MemoryDatabase,
    items: Arc<ReadWriteRegion>,
    factory: Arc<SessionFactory>,
}

fn region(name: &str) -> Arc<ReadWriteRegion> {
    Arc::new(ReadWriteRegion::new(name, 128, 60_000).unwrap())
}

fn as_access(region: &Arc<ReadWriteRegion>) -> Option<Arc<dyn RegionAccessStrategy>> {
    Some(Arc::clone(region) as Arc<dyn RegionAccessStrategy>)
}

fn fixture_with(settings: EngineSettings, veto_updates: bool) -> Fixture {
    custom_fixture(settings, veto_updates, |builder| builder)
}

fn custom_fixture(
    settings: EngineSettings,
    veto_updates: bool,
    customize: impl FnOnce(MemoryEntityPersisterBuilder) -> MemoryEntityPersisterBuilder,
) -> Fixture {
    struct VetoUpdates;

    impl PreUpdateEventListener for VetoUpdates {
        fn on_pre_update(&self, _event: &PreUpdateEvent<'_>) -> bool {
            true
        }
    }

    let db = MemoryDatabase::new();
    let items = region("Item");
    let mut builder = SessionFactory::builder(settings);
    if veto_updates {
        builder.listeners_mut().append_pre_update(Arc::new(VetoUpdates));
    }
    let persister = customize(
        MemoryEntityPersister::builder("Item", db.clone())
            .properties(&["name", "version"])
            .version_property("version")
            .cache(as_access(&items)),
    )
    .build()
    .unwrap();
    let factory = builder.entity_persister(Arc::new(persister)).unwrap().build().unwrap();
    Fixture { db, items, factory }
}

fn fixture() -> Fixture {
    fixture_with(EngineSettings::new().statistics(true), false)
}

fn item(name: &str, version: i64) -> Vec<Value> {
    vec![Value::from(name), Value::Integer(version)]
}

fn key(id: i64) -> CacheKey {
    CacheKey::new("Item", Value::Integer(id))
}

/// Insert `Item#1` and commit so that it is cached.
fn seed(f: &Fixture) -> Result<()> {
    let mut session = f.factory.open_session();
    session.persist("Item", Value::Integer(1), item("pen", 0))?;
    session.commit()?;
    Ok(())
}

#[test]
fn test_insert_is_cached_only_after_commit() -> Result<()> {
    let f = fixture();
    let mut session = f.factory.open_session();
    session.persist("Item", Value::Integer(1), item("pen", 0))?;
    session.flush()?;

    assert_eq!(f.db.row_count("item")?, 1);
    assert!(f.items.peek(&key(1)).is_none());

    session.commit()?;
    assert!(f.items.peek(&key(1)).is_some());
    Ok(())
}

#[test]
fn test_rolled_back_insert_is_never_cached() -> Result<()> {
    let f = fixture();
    let mut session = f.factory.open_session();
    session.persist("Item", Value::Integer(1), item("pen", 0))?;
    session.flush()?;
    session.rollback()?;

    assert!(f.items.is_empty());
    Ok(())
}

#[test]
fn test_committed_entity_is_read_from_cache() -> Result<()> {
    let f = fixture();
    seed(&f)?;
    let statements = f.db.statement_count();

    let mut session = f.factory.open_session();
    let pen = session.find("Item", &Value::Integer(1))?.expect("cached entity");
    assert_eq!(pen.state()?, item("pen", 0));
    assert_eq!(f.db.statement_count(), statements);
    assert_eq!(f.factory.statistics().region_statistics("Item").hits, 1);
    Ok(())
}

#[test]
fn test_update_lock_released_on_commit() -> Result<()> {
    let f = fixture();
    seed(&f)?;

    let mut session = f.factory.open_session();
    let pen = session.find("Item", &Value::Integer(1))?.expect("pen");
    session.update(&pen, item("pencil", 0))?;
    session.flush()?;

    assert!(f.items.is_locked(&key(1)));
    session.commit()?;
    assert!(!f.items.is_locked(&key(1)));

    let mut reader = f.factory.open_session();
    let cached = reader.find("Item", &Value::Integer(1))?.expect("pen");
    assert_eq!(cached.state()?, item("pencil", 1));
    Ok(())
}

#[test]
fn test_update_lock_released_on_rollback() -> Result<()> {
    let f = fixture();
    seed(&f)?;

    let mut session = f.factory.open_session();
    let pen = session.find("Item", &Value::Integer(1))?.expect("pen");
    session.update(&pen, item("pencil", 0))?;
    session.flush()?;
    session.rollback()?;

    assert!(!f.items.is_locked(&key(1)));
    // the staged value must not be published
    assert!(f.items.peek(&key(1)).is_none());
    Ok(())
}

#[test]
fn test_update_lock_released_when_execution_fails() -> Result<()> {
    let f = fixture();
    seed(&f)?;

    let mut session = f.factory.open_session();
    let pen = session.find("Item", &Value::Integer(1))?.expect("pen");
    f.db.increment_version("item", &Value::Integer(1), 1)?;

    session.update(&pen, item("pencil", 0))?;
    assert!(session.commit().is_err());

    assert!(!f.items.is_locked(&key(1)));
    assert!(f.items.peek(&key(1)).is_none());
    assert!(!session.action_queue().has_after_transaction_actions());
    Ok(())
}

#[test]
fn test_vetoed_update_releases_lock_without_caching() -> Result<()> {
    let f = fixture_with(EngineSettings::new(), true);
    seed(&f)?;

    let mut session = f.factory.open_session();
    let pen = session.find("Item", &Value::Integer(1))?.expect("pen");
    session.update(&pen, item("pencil", 0))?;
    session.commit()?;

    assert!(!f.items.is_locked(&key(1)));
    assert!(f.items.peek(&key(1)).is_none());
    assert_eq!(f.db.select("item", &Value::Integer(1))?, Some(item("pen", 0)));
    Ok(())
}

#[test]
fn test_double_update_in_one_flush_caches_latest_version() -> Result<()> {
    let f = fixture();
    seed(&f)?;

    let mut session = f.factory.open_session();
    let pen = session.find("Item", &Value::Integer(1))?.expect("pen");
    session.update(&pen, item("pencil", 0))?;
    session.update(&pen, item("crayon", 0))?;
    assert_eq!(session.action_queue().number_of_updates(), 2);
    session.commit()?;

    assert!(!f.items.is_locked(&key(1)));
    assert_eq!(f.db.select("item", &Value::Integer(1))?, Some(item("crayon", 2)));

    let mut reader = f.factory.open_session();
    let cached = reader.find("Item", &Value::Integer(1))?.expect("pen");
    assert_eq!(cached.state()?, item("crayon", 2));
    Ok(())
}

#[test]
fn test_generated_version_update_reads_version_from_instance() -> Result<()> {
    let f = custom_fixture(EngineSettings::new(), false, |b| b.generated_version(true));
    let mut session = f.factory.open_session();
    session.persist("Item", Value::Integer(1), vec![Value::from("a"), Value::Null])?;
    session.commit()?;
    assert_eq!(f.db.select("item", &Value::Integer(1))?, Some(item("a", 0)));

    // the version slot is assigned by the write, callers may leave it empty
    let mut session = f.factory.open_session();
    let pen = session.find("Item", &Value::Integer(1))?.expect("pen");
    session.update(&pen, vec![Value::from("b"), Value::Null])?;
    session.update(&pen, vec![Value::from("c"), Value::Null])?;
    session.commit()?;

    assert_eq!(f.db.select("item", &Value::Integer(1))?, Some(item("c", 2)));
    assert_eq!(pen.state()?, item("c", 2));
    assert!(!f.items.is_locked(&key(1)));

    let mut reader = f.factory.open_session();
    let cached = reader.find("Item", &Value::Integer(1))?.expect("pen");
    assert_eq!(cached.state()?, item("c", 2));
    Ok(())
}

#[test]
fn test_update_invalidates_when_cache_invalidation_required() -> Result<()> {
    let f = custom_fixture(EngineSettings::new(), false, |b| b.invalidate_cache_on_write(true));
    seed(&f)?;

    let mut session = f.factory.open_session();
    let pen = session.find("Item", &Value::Integer(1))?.expect("pen");
    assert!(f.items.peek(&key(1)).is_some());

    session.update(&pen, item("pencil", 0))?;
    session.commit()?;

    assert!(!f.items.is_locked(&key(1)));
    assert!(f.items.peek(&key(1)).is_none());
    assert_eq!(f.db.select("item", &Value::Integer(1))?, Some(item("pencil", 1)));
    Ok(())
}

#[test]
fn test_update_with_cache_mode_ignore_does_not_publish() -> Result<()> {
    let f = fixture();
    seed(&f)?;

    let mut session = f.factory.open_session();
    session.set_cache_mode(CacheMode::Ignore);
    let pen = session.find("Item", &Value::Integer(1))?.expect("pen");
    session.update(&pen, item("pencil", 0))?;
    session.commit()?;

    assert!(!f.items.is_locked(&key(1)));
    assert!(f.items.peek(&key(1)).is_none());
    assert_eq!(f.db.select("item", &Value::Integer(1))?, Some(item("pencil", 1)));
    Ok(())
}

#[test]
fn test_delete_evicts_on_commit() -> Result<()> {
    let f = fixture();
    seed(&f)?;

    let mut session = f.factory.open_session();
    let pen = session.find("Item", &Value::Integer(1))?.expect("pen");
    session.delete(&pen)?;
    session.flush()?;
    assert!(f.items.is_locked(&key(1)));
    session.commit()?;

    assert!(!f.items.is_locked(&key(1)));
    let mut reader = f.factory.open_session();
    assert!(reader.find("Item", &Value::Integer(1))?.is_none());
    Ok(())
}

#[test]
fn test_identity_insert_is_not_cached_after_rollback() -> Result<()> {
    let f = fixture();
    let mut session = f.factory.open_session();
    let (_, id) = session.persist_identity("Item", item("pen", 0), false)?;
    assert_eq!(id, Some(Value::Integer(1)));
    session.rollback()?;

    assert!(f.items.is_empty());
    Ok(())
}

#[test]
fn test_bulk_delete_is_not_served_from_cache() -> Result<()> {
    let f = fixture();
    seed(&f)?;
    assert!(f.items.peek(&key(1)).is_some());

    let mut session = f.factory.open_session();
    let db = f.db.clone();
    let spaces: HashSet<String> = ["item".to_string()].into_iter().collect();
    let deleted = session.execute_bulk_operation(&spaces, move |_| db.delete_where("item", |_, _| true))?;
    assert_eq!(deleted, 1);
    assert!(f.items.is_empty());

    assert!(session.find("Item", &Value::Integer(1))?.is_none());
    session.commit()?;
    Ok(())
}

#[test]
fn test_bulk_operation_flushes_pending_writes_to_its_tables() -> Result<()> {
    let f = fixture();
    let mut session = f.factory.open_session();
    session.persist("Item", Value::Integer(1), item("pen", 0))?;

    let db = f.db.clone();
    let spaces: HashSet<String> = ["item".to_string()].into_iter().collect();
    let updated = session.execute_bulk_operation(&spaces, move |_| {
        db.update_where("item", |_, row| {
            row[0] = Value::from("marker");
            true
        })
    })?;
    assert_eq!(updated, 1);
    session.commit()?;

    assert_eq!(f.db.select("item", &Value::Integer(1))?, Some(item("marker", 0)));
    // the insert published "pen" at completion; the cleanup ran after it
    assert!(f.items.peek(&key(1)).is_none());
    Ok(())
}

#[test]
fn test_bulk_cleanup_affected_types() -> Result<()> {
    let db = MemoryDatabase::new();
    let builder = SessionFactory::builder(EngineSettings::new());
    let item = MemoryEntityPersister::builder("Item", db.clone())
        .properties(&["name"])
        .cache(as_access(&region("Item")))
        .build()?;
    let order = MemoryEntityPersister::builder("Order", db.clone())
        .properties(&["customer"])
        .cache(as_access(&region("Order")))
        .build()?;
    let note = MemoryEntityPersister::builder("Note", db.clone())
        .properties(&["text"])
        .build()?;
    let lines = MemoryCollectionPersister::builder("Order.lines", "Order", db.clone())
        .element_entity("Item")
        .cache(as_access(&region("Order.lines")))
        .build();
    let factory = builder
        .entity_persister(Arc::new(item))?
        .entity_persister(Arc::new(order))?
        .entity_persister(Arc::new(note))?
        .collection_persister(Arc::new(lines))?
        .build()?;
    let session = factory.open_session();
    let ctx = session.context();

    let everything = BulkOperationCleanupAction::from_spaces(ctx, Some(&HashSet::new()));
    assert_eq!(
        everything.affected_entity_names().iter().collect::<Vec<_>>(),
        vec!["Item", "Order"]
    );
    assert_eq!(
        everything.affected_collection_roles().iter().collect::<Vec<_>>(),
        vec!["Order.lines"]
    );
    assert_eq!(
        BulkOperationCleanupAction::from_spaces(ctx, None).affected_entity_names(),
        everything.affected_entity_names()
    );

    let unrelated: HashSet<String> = ["audit_log".to_string()].into_iter().collect();
    let nothing = BulkOperationCleanupAction::from_spaces(ctx, Some(&unrelated));
    assert!(nothing.affected_entity_names().is_empty());
    assert!(nothing.affected_collection_roles().is_empty());

    let items: HashSet<String> = ["item".to_string()].into_iter().collect();
    let item_only = BulkOperationCleanupAction::from_spaces(ctx, Some(&items));
    assert_eq!(
        item_only.affected_entity_names().iter().collect::<Vec<_>>(),
        vec!["Item"]
    );
    // Item participates in Order.lines as element type
    assert_eq!(
        item_only.affected_collection_roles().iter().collect::<Vec<_>>(),
        vec!["Order.lines"]
    );
    assert_eq!(item_only.spaces(), &["item".to_string()]);
    Ok(())
}

#[test]
fn test_query_spaces_invalidated_after_commit() -> Result<()> {
    let f = fixture_with(EngineSettings::new().query_cache(true), false);
    let mut session = f.factory.open_session();
    session.persist("Item", Value::Integer(1), item("pen", 0))?;
    let before = session.context().timestamp();
    session.flush()?;

    let timestamps = f.factory.timestamps();
    assert!(!timestamps.is_up_to_date(&["item"], before)?);

    session.commit()?;
    let last = timestamps.last_update("item").expect("invalidated");
    assert!(last > before);
    Ok(())
}
