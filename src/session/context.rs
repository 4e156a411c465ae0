use std::collections::HashSet;
use std::sync::Arc;

use super::{PersistenceContext, SessionId};
use crate::cache::{next_timestamp, LockOwner};
use crate::factory::SessionFactory;

/// How a session interacts with the second-level cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from and write to the cache
    #[default]
    Normal,
    /// Read only, never populate
    Get,
    /// Populate only, never read
    Put,
    /// Populate without reading, overwriting what is there
    Refresh,
    /// Bypass the cache apart from invalidation
    Ignore,
}

impl CacheMode {
    pub fn is_get_enabled(&self) -> bool {
        matches!(self, CacheMode::Normal | CacheMode::Get)
    }

    pub fn is_put_enabled(&self) -> bool {
        matches!(self, CacheMode::Normal | CacheMode::Put | CacheMode::Refresh)
    }
}

/// Everything an action may touch while it runs: the factory, the first-level
/// cache and the session's own settings. Kept apart from the action queue so
/// that executing actions can borrow it mutably.
pub struct SessionContext {
    id: SessionId,
    factory: Arc<SessionFactory>,
    persistence: PersistenceContext,
    enabled_filters: HashSet<String>,
    cache_mode: CacheMode,
    timestamp: i64,
}

impl SessionContext {
    pub fn new(factory: Arc<SessionFactory>) -> Self {
        Self {
            id: SessionId::new(),
            factory,
            persistence: PersistenceContext::new(),
            enabled_filters: HashSet::new(),
            cache_mode: CacheMode::default(),
            timestamp: next_timestamp(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn factory(&self) -> &Arc<SessionFactory> {
        &self.factory
    }

    pub fn persistence(&self) -> &PersistenceContext {
        &self.persistence
    }

    pub fn persistence_mut(&mut self) -> &mut PersistenceContext {
        &mut self.persistence
    }

    /// Soft locks taken by this session are owned by its id.
    pub fn lock_owner(&self) -> LockOwner {
        LockOwner(self.id.as_u64())
    }

    /// Start of the current transaction, in cache timestamp units
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub(crate) fn reset_timestamp(&mut self) {
        self.timestamp = next_timestamp();
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    pub fn set_cache_mode(&mut self, mode: CacheMode) {
        self.cache_mode = mode;
    }

    pub fn enable_filter(&mut self, name: impl Into<String>) {
        self.enabled_filters.insert(name.into());
    }

    pub fn disable_filter(&mut self, name: &str) -> bool {
        self.enabled_filters.remove(name)
    }

    pub fn is_filter_enabled(&self, name: &str) -> bool {
        self.enabled_filters.contains(name)
    }

    pub fn enabled_filters(&self) -> &HashSet<String> {
        &self.enabled_filters
    }
}
