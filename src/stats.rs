use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Per-entity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityStatistics {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub optimistic_failures: u64,
}

/// Per-collection-role counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStatistics {
    pub recreates: u64,
    pub removes: u64,
    pub updates: u64,
}

/// Per-cache-region counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionStatistics {
    pub puts: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Factory-wide statistics collector
///
/// Counting is a no-op while disabled, so actions call it unconditionally.
#[derive(Debug, Default)]
pub struct Statistics {
    enabled: AtomicBool,
    entity_inserts: AtomicU64,
    entity_updates: AtomicU64,
    entity_deletes: AtomicU64,
    optimistic_failures: AtomicU64,
    collection_recreates: AtomicU64,
    collection_removes: AtomicU64,
    collection_updates: AtomicU64,
    cache_puts: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    entities: Mutex<HashMap<String, EntityStatistics>>,
    collections: Mutex<HashMap<String, CollectionStatistics>>,
    regions: Mutex<HashMap<String, RegionStatistics>>,
}

impl Statistics {
    pub fn new(enabled: bool) -> Self {
        let stats = Self::default();
        stats.enabled.store(enabled, Ordering::Relaxed);
        stats
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn entity(&self, name: &str, f: impl FnOnce(&mut EntityStatistics)) {
        if let Ok(mut map) = self.entities.lock() {
            f(map.entry(name.to_string()).or_default());
        }
    }

    fn collection(&self, role: &str, f: impl FnOnce(&mut CollectionStatistics)) {
        if let Ok(mut map) = self.collections.lock() {
            f(map.entry(role.to_string()).or_default());
        }
    }

    fn region(&self, name: &str, f: impl FnOnce(&mut RegionStatistics)) {
        if let Ok(mut map) = self.regions.lock() {
            f(map.entry(name.to_string()).or_default());
        }
    }

    pub fn on_entity_insert(&self, entity_name: &str) {
        if !self.is_enabled() {
            return;
        }
        self.entity_inserts.fetch_add(1, Ordering::Relaxed);
        self.entity(entity_name, |s| s.inserts += 1);
    }

    pub fn on_entity_update(&self, entity_name: &str) {
        if !self.is_enabled() {
            return;
        }
        self.entity_updates.fetch_add(1, Ordering::Relaxed);
        self.entity(entity_name, |s| s.updates += 1);
    }

    pub fn on_entity_delete(&self, entity_name: &str) {
        if !self.is_enabled() {
            return;
        }
        self.entity_deletes.fetch_add(1, Ordering::Relaxed);
        self.entity(entity_name, |s| s.deletes += 1);
    }

    pub fn on_optimistic_failure(&self, entity_name: &str) {
        if !self.is_enabled() {
            return;
        }
        self.optimistic_failures.fetch_add(1, Ordering::Relaxed);
        self.entity(entity_name, |s| s.optimistic_failures += 1);
    }

    pub fn on_collection_recreate(&self, role: &str) {
        if !self.is_enabled() {
            return;
        }
        self.collection_recreates.fetch_add(1, Ordering::Relaxed);
        self.collection(role, |s| s.recreates += 1);
    }

    pub fn on_collection_remove(&self, role: &str) {
        if !self.is_enabled() {
            return;
        }
        self.collection_removes.fetch_add(1, Ordering::Relaxed);
        self.collection(role, |s| s.removes += 1);
    }

    pub fn on_collection_update(&self, role: &str) {
        if !self.is_enabled() {
            return;
        }
        self.collection_updates.fetch_add(1, Ordering::Relaxed);
        self.collection(role, |s| s.updates += 1);
    }

    pub fn on_cache_put(&self, region: &str) {
        if !self.is_enabled() {
            return;
        }
        self.cache_puts.fetch_add(1, Ordering::Relaxed);
        self.region(region, |s| s.puts += 1);
    }

    pub fn on_cache_hit(&self, region: &str) {
        if !self.is_enabled() {
            return;
        }
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.region(region, |s| s.hits += 1);
    }

    pub fn on_cache_miss(&self, region: &str) {
        if !self.is_enabled() {
            return;
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.region(region, |s| s.misses += 1);
    }

    pub fn entity_statistics(&self, entity_name: &str) -> EntityStatistics {
        self.entities
            .lock()
            .ok()
            .and_then(|map| map.get(entity_name).copied())
            .unwrap_or_default()
    }

    pub fn collection_statistics(&self, role: &str) -> CollectionStatistics {
        self.collections
            .lock()
            .ok()
            .and_then(|map| map.get(role).copied())
            .unwrap_or_default()
    }

    pub fn region_statistics(&self, region: &str) -> RegionStatistics {
        self.regions
            .lock()
            .ok()
            .and_then(|map| map.get(region).copied())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            entity_inserts: self.entity_inserts.load(Ordering::Relaxed),
            entity_updates: self.entity_updates.load(Ordering::Relaxed),
            entity_deletes: self.entity_deletes.load(Ordering::Relaxed),
            optimistic_failures: self.optimistic_failures.load(Ordering::Relaxed),
            collection_recreates: self.collection_recreates.load(Ordering::Relaxed),
            collection_removes: self.collection_removes.load(Ordering::Relaxed),
            collection_updates: self.collection_updates.load(Ordering::Relaxed),
            cache_puts: self.cache_puts.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        for counter in [
            &self.entity_inserts,
            &self.entity_updates,
            &self.entity_deletes,
            &self.optimistic_failures,
            &self.collection_recreates,
            &self.collection_removes,
            &self.collection_updates,
            &self.cache_puts,
            &self.cache_hits,
            &self.cache_misses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut map) = self.entities.lock() {
            map.clear();
        }
        if let Ok(mut map) = self.collections.lock() {
            map.clear();
        }
        if let Ok(mut map) = self.regions.lock() {
            map.clear();
        }
    }
}

/// Point-in-time totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub entity_inserts: u64,
    pub entity_updates: u64,
    pub entity_deletes: u64,
    pub optimistic_failures: u64,
    pub collection_recreates: u64,
    pub collection_removes: u64,
    pub collection_updates: u64,
    pub cache_puts: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Entities: {} inserted, {} updated, {} deleted, {} optimistic failures; \
             Collections: {} recreated, {} removed, {} updated; \
             Cache: {} puts, {} hits, {} misses",
            self.entity_inserts,
            self.entity_updates,
            self.entity_deletes,
            self.optimistic_failures,
            self.collection_recreates,
            self.collection_removes,
            self.collection_updates,
            self.cache_puts,
            self.cache_hits,
            self.cache_misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_statistics_count_nothing() {
        let stats = Statistics::new(false);
        stats.on_entity_insert("Item");
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn test_counters_per_entity_and_total() {
        let stats = Statistics::new(true);
        stats.on_entity_update("Item");
        stats.on_entity_update("Item");
        stats.on_entity_update("Order");
        stats.on_collection_remove("Order.lines");

        assert_eq!(stats.snapshot().entity_updates, 3);
        assert_eq!(stats.entity_statistics("Item").updates, 2);
        assert_eq!(stats.collection_statistics("Order.lines").removes, 1);

        stats.clear();
        assert_eq!(stats.snapshot().entity_updates, 0);
        assert_eq!(stats.entity_statistics("Item"), EntityStatistics::default());
    }
}
