use std::collections::HashMap;
use std::sync::Mutex;
use log::{debug, trace};

use super::timestamper::{millis_to_timestamp_units, next_timestamp};
use crate::core::Result;

/// Last-update timestamps per query space
///
/// Cached query results remember when they were computed; a result is stale
/// once any of its spaces was updated at or after that moment. Spaces touched
/// by an in-flight transaction are pre-invalidated into the future so that no
/// query result is trusted until the transaction has completed.
pub struct UpdateTimestampsCache {
    spaces: Mutex<HashMap<String, i64>>,
    lock_timeout: i64,
}

impl UpdateTimestampsCache {
    pub fn new(lock_timeout_ms: u64) -> Self {
        Self {
            spaces: Mutex::new(HashMap::new()),
            lock_timeout: millis_to_timestamp_units(lock_timeout_ms),
        }
    }

    pub fn pre_invalidate<S: AsRef<str>>(&self, spaces: &[S]) -> Result<()> {
        let ts = next_timestamp() + self.lock_timeout;
        let mut map = self.spaces.lock()?;
        for space in spaces {
            debug!("Pre-invalidating space [{}], timestamp: {}", space.as_ref(), ts);
            map.insert(space.as_ref().to_string(), ts);
        }
        Ok(())
    }

    pub fn invalidate<S: AsRef<str>>(&self, spaces: &[S]) -> Result<()> {
        let ts = next_timestamp();
        let mut map = self.spaces.lock()?;
        for space in spaces {
            debug!("Invalidating space [{}], timestamp: {}", space.as_ref(), ts);
            map.insert(space.as_ref().to_string(), ts);
        }
        Ok(())
    }

    /// Whether a result computed at `timestamp` over `spaces` is still valid.
    pub fn is_up_to_date<S: AsRef<str>>(&self, spaces: &[S], timestamp: i64) -> Result<bool> {
        let map = self.spaces.lock()?;
        for space in spaces {
            // never updated since startup (or the timestamp was lost)
            let Some(last_update) = map.get(space.as_ref()) else {
                continue;
            };
            if *last_update >= timestamp {
                trace!("[{}] last update timestamp: {}, result set timestamp: {}", space.as_ref(), last_update, timestamp);
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn last_update(&self, space: &str) -> Option<i64> {
        self.spaces.lock().ok()?.get(space).copied()
    }

    pub fn clear(&self) -> Result<()> {
        self.spaces.lock()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_invalidated_space_is_stale_until_invalidated() {
        let cache = UpdateTimestampsCache::new(60_000);
        let query_ts = next_timestamp();
        assert!(cache.is_up_to_date(&["items"], query_ts).unwrap());

        cache.pre_invalidate(&["items"]).unwrap();
        // even a query computed after the pre-invalidation is stale
        assert!(!cache.is_up_to_date(&["items"], next_timestamp()).unwrap());

        cache.invalidate(&["items"]).unwrap();
        assert!(!cache.is_up_to_date(&["items"], query_ts).unwrap());
        assert!(cache.is_up_to_date(&["items"], next_timestamp()).unwrap());
    }

    #[test]
    fn test_unrelated_spaces_unaffected() {
        let cache = UpdateTimestampsCache::new(60_000);
        cache.pre_invalidate(&["orders"]).unwrap();
        assert!(cache.is_up_to_date(&["items"], next_timestamp()).unwrap());
    }
}
