// ============================================================================
// Region Access Strategy
// ============================================================================
//
// Contract between the write actions and a shared cache region. Regions are
// read concurrently by every session of a factory; writers fence their
// database mutation with a soft lock on the key:
//
//   lock_item ──(db write)──> after_update   (commit path, releases the lock)
//                        └──> unlock_item    (failure path)
//
// Exactly one of the two release calls is made per lock_item.
//
// ============================================================================

use std::fmt;
use super::{CacheKey, CacheValue};
use crate::core::{Result, Value};

/// Identity of a lock holder. Sessions use their session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner(pub u64);

/// Token returned by `lock_item`, needed to release the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftLock {
    id: u64,
}

impl SoftLock {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for SoftLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock_{}", self.id)
    }
}

/// Access strategy of one cache region
///
/// Every method may fail with `DbError::Cache`; callers never use such a
/// failure to undo a database write.
pub trait RegionAccessStrategy: Send + Sync {
    fn region_name(&self) -> &str;

    /// Read a value. `tx_timestamp` is the reader's transaction start; values
    /// written later, and locked keys, are not returned.
    fn get(&self, key: &CacheKey, tx_timestamp: i64) -> Result<Option<CacheValue>>;

    /// Populate after a database load. Refused while the key is locked.
    fn put_from_load(
        &self,
        key: &CacheKey,
        value: CacheValue,
        tx_timestamp: i64,
        version: Option<&Value>,
    ) -> Result<bool>;

    /// Acquire a soft lock before the database write. `version` is the
    /// pre-write version used as fencing token.
    fn lock_item(&self, key: &CacheKey, version: Option<&Value>, owner: LockOwner) -> Result<SoftLock>;

    /// Release a soft lock without applying a value.
    fn unlock_item(&self, key: &CacheKey, lock: SoftLock) -> Result<()>;

    /// Transactional insert hook, called during execution.
    fn insert(&self, key: &CacheKey, value: &CacheValue, version: Option<&Value>) -> Result<bool>;

    /// Insert hook called after a successful commit.
    fn after_insert(&self, key: &CacheKey, value: CacheValue, version: Option<&Value>) -> Result<bool>;

    /// Transactional update hook, called during execution while locked.
    fn update(
        &self,
        key: &CacheKey,
        value: &CacheValue,
        current_version: Option<&Value>,
        previous_version: Option<&Value>,
    ) -> Result<bool>;

    /// Apply the committed value and release `lock`.
    fn after_update(
        &self,
        key: &CacheKey,
        value: CacheValue,
        current_version: Option<&Value>,
        previous_version: Option<&Value>,
        lock: SoftLock,
    ) -> Result<bool>;

    /// Invalidate one key as part of a write.
    fn remove(&self, key: &CacheKey) -> Result<()>;

    /// Invalidate the whole region as part of a write.
    fn remove_all(&self) -> Result<()>;

    /// Drop one key regardless of locks (administrative).
    fn evict(&self, key: &CacheKey) -> Result<()>;

    /// Drop every key regardless of locks (administrative).
    fn evict_all(&self) -> Result<()>;
}
