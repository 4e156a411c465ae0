//! Read-write cache region with soft locks, bounded by an LRU.

use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use log::{debug, warn};
use lru::LruCache;

use super::access::{LockOwner, RegionAccessStrategy, SoftLock};
use super::timestamper::{millis_to_timestamp_units, next_timestamp};
use super::{CacheKey, CacheValue};
use crate::core::{DbError, Result, Value};

/// Committed value
#[derive(Debug, Clone)]
struct Item {
    value: CacheValue,
    version: Option<Value>,
    timestamp: i64,
}

impl Item {
    fn is_readable(&self, tx_timestamp: i64) -> bool {
        tx_timestamp > self.timestamp
    }

    fn is_writeable(&self, new_version: Option<&Value>) -> bool {
        match (&self.version, new_version) {
            (Some(current), Some(new)) => current.total_cmp(new) == Ordering::Less,
            _ => false,
        }
    }
}

/// Soft lock record. While `multiplicity > 0` the key is being written.
#[derive(Debug, Clone)]
struct Lock {
    id: u64,
    owner: LockOwner,
    version: Option<Value>,
    timeout: i64,
    multiplicity: u32,
    concurrent: bool,
    unlock_timestamp: i64,
}

impl Lock {
    fn new(id: u64, owner: LockOwner, version: Option<Value>, timeout: i64) -> Self {
        Self {
            id,
            owner,
            version,
            timeout,
            multiplicity: 1,
            concurrent: false,
            unlock_timestamp: -1,
        }
    }

    fn is_writeable(&self, tx_timestamp: i64, new_version: Option<&Value>) -> bool {
        if tx_timestamp > self.timeout {
            return true;
        }
        if self.multiplicity > 0 {
            return false;
        }
        match (&self.version, new_version) {
            (Some(current), Some(new)) => current.total_cmp(new) == Ordering::Less,
            _ => tx_timestamp > self.unlock_timestamp,
        }
    }

    fn is_unlockable(&self, lock: SoftLock) -> bool {
        self.id == lock.id()
    }

    /// Re-lock an already locked key. The same owner re-enters; a different
    /// owner makes the lock concurrent, after which no holder commits.
    fn relock(&mut self, owner: LockOwner, timeout: i64) {
        if owner != self.owner || self.multiplicity == 0 {
            self.concurrent = true;
        }
        self.multiplicity += 1;
        self.timeout = timeout;
    }

    fn unlock(&mut self, timestamp: i64) {
        self.multiplicity = self.multiplicity.saturating_sub(1);
        if self.multiplicity == 0 {
            self.unlock_timestamp = timestamp;
        }
    }
}

#[derive(Debug, Clone)]
enum Lockable {
    Item(Item),
    Lock(Lock),
}

/// In-memory read-write region
///
/// Readers observing a lock fall back to the database; loads never
/// repopulate a locked key. Capacity should comfortably exceed the number of
/// keys locked at the same time: evicting a lock record drops its fencing.
pub struct ReadWriteRegion {
    name: String,
    entries: Mutex<LruCache<CacheKey, Lockable>>,
    lock_timeout: i64,
    next_lock_id: AtomicU64,
}

impl ReadWriteRegion {
    pub fn new(name: impl Into<String>, capacity: usize, lock_timeout_ms: u64) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| DbError::ConfigError("region capacity must be > 0".to_string()))?;
        Ok(Self {
            name: name.into(),
            entries: Mutex::new(LruCache::new(capacity)),
            lock_timeout: millis_to_timestamp_units(lock_timeout_ms),
            next_lock_id: AtomicU64::new(1),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a write is in flight for `key`.
    pub fn is_locked(&self, key: &CacheKey) -> bool {
        match self.entries.lock() {
            Ok(entries) => matches!(entries.peek(key), Some(Lockable::Lock(l)) if l.multiplicity > 0),
            Err(_) => false,
        }
    }

    /// Committed value for `key`, ignoring reader timestamps.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheValue> {
        let entries = self.entries.lock().ok()?;
        match entries.peek(key) {
            Some(Lockable::Item(item)) => Some(item.value.clone()),
            _ => None,
        }
    }

    fn next_lock_id(&self) -> u64 {
        self.next_lock_id.fetch_add(1, AtomicOrdering::SeqCst)
    }

    fn put(&self, entries: &mut LruCache<CacheKey, Lockable>, key: CacheKey, value: Lockable) {
        if let Some((evicted_key, Lockable::Lock(_))) = entries.push(key.clone(), value) {
            if evicted_key != key {
                warn!("Region {} evicted the soft lock of {}", self.name, evicted_key);
            }
        }
    }

    /// Make the key unwriteable until the lock timeout has passed.
    fn handle_lock_expiry(&self, entries: &mut LruCache<CacheKey, Lockable>, key: &CacheKey) {
        warn!("Cache {} key {} lock expired or was lost", self.name, key);
        let ts = next_timestamp() + self.lock_timeout;
        let mut lock = Lock::new(self.next_lock_id(), LockOwner(0), None, ts);
        lock.unlock(ts);
        self.put(entries, key.clone(), Lockable::Lock(lock));
    }

    fn decrement_lock(&self, entries: &mut LruCache<CacheKey, Lockable>, key: &CacheKey, mut lock: Lock) {
        lock.unlock(next_timestamp());
        self.put(entries, key.clone(), Lockable::Lock(lock));
    }
}

impl RegionAccessStrategy for ReadWriteRegion {
    fn region_name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &CacheKey, tx_timestamp: i64) -> Result<Option<CacheValue>> {
        let mut entries = self.entries.lock()?;
        match entries.get(key) {
            Some(Lockable::Item(item)) if item.is_readable(tx_timestamp) => {
                debug!("Cache hit: {}", key);
                Ok(Some(item.value.clone()))
            }
            Some(_) => {
                debug!("Cached item was locked or too new: {}", key);
                Ok(None)
            }
            None => {
                debug!("Cache miss: {}", key);
                Ok(None)
            }
        }
    }

    fn put_from_load(
        &self,
        key: &CacheKey,
        value: CacheValue,
        tx_timestamp: i64,
        version: Option<&Value>,
    ) -> Result<bool> {
        let mut entries = self.entries.lock()?;
        let writeable = match entries.peek(key) {
            None => true,
            Some(Lockable::Item(item)) => item.is_writeable(version),
            Some(Lockable::Lock(lock)) => lock.is_writeable(tx_timestamp, version),
        };

        if !writeable {
            debug!("Item already cached or locked: {}", key);
            return Ok(false);
        }

        let item = Item {
            value,
            version: version.cloned(),
            timestamp: next_timestamp(),
        };
        self.put(&mut entries, key.clone(), Lockable::Item(item));
        Ok(true)
    }

    fn lock_item(&self, key: &CacheKey, version: Option<&Value>, owner: LockOwner) -> Result<SoftLock> {
        let mut entries = self.entries.lock()?;
        let timeout = next_timestamp() + self.lock_timeout;

        let lock = match entries.peek(key).cloned() {
            Some(Lockable::Lock(mut existing)) => {
                existing.relock(owner, timeout);
                existing
            }
            Some(Lockable::Item(item)) => {
                Lock::new(self.next_lock_id(), owner, item.version.or_else(|| version.cloned()), timeout)
            }
            None => Lock::new(self.next_lock_id(), owner, version.cloned(), timeout),
        };

        let soft_lock = SoftLock::new(lock.id);
        debug!("Locking {} with {} (multiplicity {})", key, soft_lock, lock.multiplicity);
        self.put(&mut entries, key.clone(), Lockable::Lock(lock));
        Ok(soft_lock)
    }

    fn unlock_item(&self, key: &CacheKey, lock: SoftLock) -> Result<()> {
        let mut entries = self.entries.lock()?;
        match entries.peek(key).cloned() {
            Some(Lockable::Lock(existing)) if existing.is_unlockable(lock) => {
                debug!("Releasing {} on {}", lock, key);
                self.decrement_lock(&mut entries, key, existing);
            }
            _ => self.handle_lock_expiry(&mut entries, key),
        }
        Ok(())
    }

    fn insert(&self, _key: &CacheKey, _value: &CacheValue, _version: Option<&Value>) -> Result<bool> {
        Ok(false)
    }

    fn after_insert(&self, key: &CacheKey, value: CacheValue, version: Option<&Value>) -> Result<bool> {
        let mut entries = self.entries.lock()?;
        if entries.peek(key).is_some() {
            return Ok(false);
        }
        let item = Item {
            value,
            version: version.cloned(),
            timestamp: next_timestamp(),
        };
        self.put(&mut entries, key.clone(), Lockable::Item(item));
        Ok(true)
    }

    fn update(
        &self,
        _key: &CacheKey,
        _value: &CacheValue,
        _current_version: Option<&Value>,
        _previous_version: Option<&Value>,
    ) -> Result<bool> {
        Ok(false)
    }

    fn after_update(
        &self,
        key: &CacheKey,
        value: CacheValue,
        current_version: Option<&Value>,
        _previous_version: Option<&Value>,
        lock: SoftLock,
    ) -> Result<bool> {
        let mut entries = self.entries.lock()?;
        match entries.peek(key).cloned() {
            Some(Lockable::Lock(existing)) if existing.is_unlockable(lock) => {
                if existing.concurrent || existing.multiplicity > 1 {
                    self.decrement_lock(&mut entries, key, existing);
                    Ok(false)
                } else {
                    let item = Item {
                        value,
                        version: current_version.cloned(),
                        timestamp: next_timestamp(),
                    };
                    self.put(&mut entries, key.clone(), Lockable::Item(item));
                    Ok(true)
                }
            }
            _ => {
                self.handle_lock_expiry(&mut entries, key);
                Ok(false)
            }
        }
    }

    fn remove(&self, key: &CacheKey) -> Result<()> {
        let mut entries = self.entries.lock()?;
        if let Some(Lockable::Item(_)) = entries.peek(key) {
            entries.pop(key);
        }
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        self.evict_all()
    }

    fn evict(&self, key: &CacheKey) -> Result<()> {
        self.entries.lock()?.pop(key);
        Ok(())
    }

    fn evict_all(&self) -> Result<()> {
        debug!("Evicting region {}", self.name);
        self.entries.lock()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CollectionCacheEntry;

    fn region() -> ReadWriteRegion {
        ReadWriteRegion::new("Item", 16, 60_000).unwrap()
    }

    fn value(n: i64) -> CacheValue {
        CacheValue::Collection(CollectionCacheEntry::new(vec![Value::Integer(n)]))
    }

    fn key() -> CacheKey {
        CacheKey::new("Item", Value::Integer(1))
    }

    #[test]
    fn test_put_from_load_then_get() {
        let region = region();
        let start = next_timestamp();
        assert!(region.put_from_load(&key(), value(1), start, Some(&Value::Integer(0))).unwrap());
        assert_eq!(region.get(&key(), next_timestamp()).unwrap(), Some(value(1)));
        // a transaction that started before the put cannot see it
        assert_eq!(region.get(&key(), start).unwrap(), None);
    }

    #[test]
    fn test_locked_key_is_not_readable_nor_loadable() {
        let region = region();
        region.put_from_load(&key(), value(1), next_timestamp(), Some(&Value::Integer(0))).unwrap();

        let lock = region.lock_item(&key(), Some(&Value::Integer(0)), LockOwner(1)).unwrap();
        assert!(region.is_locked(&key()));
        assert_eq!(region.get(&key(), next_timestamp()).unwrap(), None);
        assert!(!region.put_from_load(&key(), value(9), next_timestamp(), Some(&Value::Integer(5))).unwrap());

        region.unlock_item(&key(), lock).unwrap();
        assert!(!region.is_locked(&key()));
    }

    #[test]
    fn test_after_update_commits_and_releases() {
        let region = region();
        let lock = region.lock_item(&key(), Some(&Value::Integer(0)), LockOwner(1)).unwrap();
        assert!(region
            .after_update(&key(), value(2), Some(&Value::Integer(1)), Some(&Value::Integer(0)), lock)
            .unwrap());
        assert!(!region.is_locked(&key()));
        assert_eq!(region.peek(&key()), Some(value(2)));
    }

    #[test]
    fn test_reentrant_lock_commits_from_last_holder() {
        let region = region();
        let first = region.lock_item(&key(), Some(&Value::Integer(0)), LockOwner(1)).unwrap();
        let second = region.lock_item(&key(), Some(&Value::Integer(1)), LockOwner(1)).unwrap();
        assert_eq!(first, second);

        assert!(!region
            .after_update(&key(), value(1), Some(&Value::Integer(1)), Some(&Value::Integer(0)), first)
            .unwrap());
        assert!(region.is_locked(&key()));
        assert!(region
            .after_update(&key(), value(2), Some(&Value::Integer(2)), Some(&Value::Integer(1)), second)
            .unwrap());
        assert_eq!(region.peek(&key()), Some(value(2)));
    }

    #[test]
    fn test_concurrent_lock_never_commits() {
        let region = region();
        let mine = region.lock_item(&key(), Some(&Value::Integer(0)), LockOwner(1)).unwrap();
        let theirs = region.lock_item(&key(), Some(&Value::Integer(0)), LockOwner(2)).unwrap();

        assert!(!region
            .after_update(&key(), value(1), Some(&Value::Integer(1)), None, mine)
            .unwrap());
        assert!(!region
            .after_update(&key(), value(1), Some(&Value::Integer(1)), None, theirs)
            .unwrap());
        assert_eq!(region.peek(&key()), None);
    }

    #[test]
    fn test_mismatched_unlock_expires_lock() {
        let region = region();
        region.lock_item(&key(), None, LockOwner(1)).unwrap();
        region.unlock_item(&key(), SoftLock::new(999)).unwrap();
        // the key stays unwriteable for loads that started before the timeout
        assert!(!region.put_from_load(&key(), value(1), next_timestamp(), None).unwrap());
    }

    #[test]
    fn test_remove_keeps_locks() {
        let region = region();
        region.lock_item(&key(), None, LockOwner(1)).unwrap();
        region.remove(&key()).unwrap();
        assert!(region.is_locked(&key()));

        region.evict_all().unwrap();
        assert!(region.is_empty());
    }
}
