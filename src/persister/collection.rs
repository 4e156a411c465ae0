use std::cmp::Ordering;
use std::sync::Arc;

use crate::cache::{CacheKey, RegionAccessStrategy};
use crate::core::{Result, Value};
use crate::session::{CollectionKind, PersistentCollection, SessionContext};

/// Per-collection-role persistence strategy
pub trait CollectionPersister: Send + Sync {
    fn role(&self) -> &str;

    fn owner_entity_name(&self) -> &str;

    /// Entity type of the elements, if they are entities
    fn element_entity_name(&self) -> Option<&str> {
        None
    }

    fn kind(&self) -> CollectionKind;

    fn is_one_to_many(&self) -> bool {
        false
    }

    /// Storage regions (tables) written by this persister
    fn collection_spaces(&self) -> &[String];

    fn cache_access(&self) -> Option<&Arc<dyn RegionAccessStrategy>> {
        None
    }

    fn has_cache(&self) -> bool {
        self.cache_access().is_some()
    }

    /// Names of the session filters that restrict this collection
    fn filter_names(&self) -> &[String] {
        &[]
    }

    fn is_affected_by_enabled_filters(&self, session: &SessionContext) -> bool {
        self.filter_names()
            .iter()
            .any(|name| session.is_filter_enabled(name))
    }

    fn compare_keys(&self, a: &Value, b: &Value) -> Ordering {
        a.total_cmp(b)
    }

    /// Whether a dirty collection must be rewritten as a whole
    fn needs_recreate(&self, _collection: &PersistentCollection) -> bool {
        self.kind() == CollectionKind::Bag && !self.is_one_to_many()
    }

    fn cache_key(&self, key: &Value) -> CacheKey {
        CacheKey::new(self.role(), key.clone())
    }

    /// Write every element as a new row.
    fn recreate(&self, collection: &PersistentCollection, key: &Value, session: &SessionContext) -> Result<()>;

    /// Delete every row of the collection.
    fn remove(&self, key: &Value, session: &SessionContext) -> Result<()>;

    fn delete_rows(&self, collection: &PersistentCollection, key: &Value, session: &SessionContext) -> Result<()>;

    fn update_rows(&self, collection: &PersistentCollection, key: &Value, session: &SessionContext) -> Result<()>;

    fn insert_rows(&self, collection: &PersistentCollection, key: &Value, session: &SessionContext) -> Result<()>;

    /// Apply operations queued on an unloaded collection.
    fn process_queued_ops(
        &self,
        collection: &PersistentCollection,
        key: &Value,
        session: &SessionContext,
    ) -> Result<()>;
}
