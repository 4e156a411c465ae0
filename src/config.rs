use std::collections::HashMap;
use std::time::Duration;
use crate::core::{DbError, Result};

pub const USE_SECOND_LEVEL_CACHE: &str = "memodb.cache.use_second_level_cache";
pub const USE_QUERY_CACHE: &str = "memodb.cache.use_query_cache";
pub const CACHE_LOCK_TIMEOUT_MS: &str = "memodb.cache.lock_timeout_ms";
pub const CACHE_REGION_CAPACITY: &str = "memodb.cache.region_capacity";
pub const ORDER_UPDATES: &str = "memodb.order_updates";
pub const ORDER_INSERTS: &str = "memodb.order_inserts";
pub const GENERATE_STATISTICS: &str = "memodb.generate_statistics";

/// Engine settings shared by every session of a factory
///
/// Built either with the builder methods or from a flat property map
/// (`memodb.*` keys).
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Whether cacheable persisters may use their regions at all
    pub second_level_cache_enabled: bool,

    /// Whether query spaces are tracked in the update-timestamps cache
    pub query_cache_enabled: bool,

    /// Sort entity updates (and collection actions) before execution
    pub order_updates: bool,

    /// Sort entity inserts before execution
    pub order_inserts: bool,

    /// Collect per-entity and per-role counters
    pub statistics_enabled: bool,

    /// How long a soft lock stays authoritative in a cache region
    pub cache_lock_timeout: Duration,

    /// Maximum number of keys held by one cache region
    pub cache_region_capacity: usize,
}

impl EngineSettings {
    pub fn new() -> Self {
        Self {
            second_level_cache_enabled: true,
            query_cache_enabled: false,
            order_updates: false,
            order_inserts: false,
            statistics_enabled: false,
            cache_lock_timeout: Duration::from_secs(60),
            cache_region_capacity: 10_000,
        }
    }

    pub fn second_level_cache(mut self, enabled: bool) -> Self {
        self.second_level_cache_enabled = enabled;
        self
    }

    pub fn query_cache(mut self, enabled: bool) -> Self {
        self.query_cache_enabled = enabled;
        self
    }

    pub fn order_updates(mut self, enabled: bool) -> Self {
        self.order_updates = enabled;
        self
    }

    pub fn order_inserts(mut self, enabled: bool) -> Self {
        self.order_inserts = enabled;
        self
    }

    pub fn statistics(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }

    pub fn cache_lock_timeout(mut self, timeout: Duration) -> Self {
        self.cache_lock_timeout = timeout;
        self
    }

    pub fn cache_region_capacity(mut self, capacity: usize) -> Self {
        self.cache_region_capacity = capacity;
        self
    }

    /// Parse from a flat property map
    ///
    /// Unknown keys are ignored; malformed values are a configuration error.
    ///
    /// ```ignore
    /// let mut props = HashMap::new();
    /// props.insert("memodb.order_updates".to_string(), "true".to_string());
    /// let settings = EngineSettings::from_properties(&props)?;
    /// ```
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut settings = Self::new();

        if let Some(v) = props.get(USE_SECOND_LEVEL_CACHE) {
            settings.second_level_cache_enabled = parse_bool(USE_SECOND_LEVEL_CACHE, v)?;
        }
        if let Some(v) = props.get(USE_QUERY_CACHE) {
            settings.query_cache_enabled = parse_bool(USE_QUERY_CACHE, v)?;
        }
        if let Some(v) = props.get(ORDER_UPDATES) {
            settings.order_updates = parse_bool(ORDER_UPDATES, v)?;
        }
        if let Some(v) = props.get(ORDER_INSERTS) {
            settings.order_inserts = parse_bool(ORDER_INSERTS, v)?;
        }
        if let Some(v) = props.get(GENERATE_STATISTICS) {
            settings.statistics_enabled = parse_bool(GENERATE_STATISTICS, v)?;
        }
        if let Some(v) = props.get(CACHE_LOCK_TIMEOUT_MS) {
            let ms: u64 = v.trim().parse().map_err(|_| {
                DbError::ConfigError(format!("{} must be an integer, got '{}'", CACHE_LOCK_TIMEOUT_MS, v))
            })?;
            settings.cache_lock_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = props.get(CACHE_REGION_CAPACITY) {
            settings.cache_region_capacity = v.trim().parse().map_err(|_| {
                DbError::ConfigError(format!("{} must be an integer, got '{}'", CACHE_REGION_CAPACITY, v))
            })?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_region_capacity == 0 {
            return Err(DbError::ConfigError("cache_region_capacity must be > 0".to_string()));
        }

        if self.cache_lock_timeout.is_zero() {
            return Err(DbError::ConfigError("cache_lock_timeout must be > 0".to_string()));
        }

        if self.query_cache_enabled && !self.second_level_cache_enabled {
            return Err(DbError::ConfigError(
                "query cache requires the second-level cache".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(DbError::ConfigError(format!(
            "{} must be a boolean, got '{}'",
            key, raw
        ))),
    }
}
