// ============================================================================
// Session Factory
// ============================================================================
//
// Immutable, shared state of every session: settings, the persister
// metamodel, listeners, statistics and the update-timestamps cache.
//
// ============================================================================

pub mod metamodel;

pub use metamodel::Metamodel;

use std::sync::Arc;
use tracing::info;

use crate::cache::{ReadWriteRegion, RegionAccessStrategy, UpdateTimestampsCache};
use crate::config::EngineSettings;
use crate::core::Result;
use crate::event::EventListenerRegistry;
use crate::persister::{CollectionPersister, EntityPersister};
use crate::session::Session;
use crate::stats::Statistics;

pub struct SessionFactory {
    settings: EngineSettings,
    metamodel: Metamodel,
    listeners: EventListenerRegistry,
    statistics: Statistics,
    timestamps: UpdateTimestampsCache,
}

impl SessionFactory {
    pub fn builder(settings: EngineSettings) -> SessionFactoryBuilder {
        SessionFactoryBuilder::new(settings)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn metamodel(&self) -> &Metamodel {
        &self.metamodel
    }

    pub fn listeners(&self) -> &EventListenerRegistry {
        &self.listeners
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn timestamps(&self) -> &UpdateTimestampsCache {
        &self.timestamps
    }

    pub fn open_session(self: &Arc<Self>) -> Session {
        Session::open(Arc::clone(self))
    }

    pub fn evict_entity_region(&self, entity_name: &str) -> Result<()> {
        self.metamodel.evict_entity_region(entity_name)
    }

    pub fn evict_collection_region(&self, role: &str) -> Result<()> {
        self.metamodel.evict_collection_region(role)
    }
}

/// Assembles a `SessionFactory`
///
/// ```ignore
/// let db = MemoryDatabase::new();
/// let builder = SessionFactory::builder(EngineSettings::new().statistics(true));
/// let region = builder.new_region("Item")?;
/// let items = MemoryEntityPersister::builder("Item", db.clone())
///     .properties(&["name", "version"])
///     .version_property("version")
///     .cache(region)
///     .build()?;
/// let factory = builder.entity_persister(Arc::new(items))?.build()?;
/// ```
pub struct SessionFactoryBuilder {
    settings: EngineSettings,
    metamodel: Metamodel,
    listeners: EventListenerRegistry,
}

impl SessionFactoryBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            metamodel: Metamodel::new(),
            listeners: EventListenerRegistry::new(),
        }
    }

    /// A read-write region sized per the settings, or `None` when the
    /// second-level cache is disabled.
    pub fn new_region(&self, name: &str) -> Result<Option<Arc<dyn RegionAccessStrategy>>> {
        if !self.settings.second_level_cache_enabled {
            return Ok(None);
        }
        let region = ReadWriteRegion::new(
            name,
            self.settings.cache_region_capacity,
            self.settings.cache_lock_timeout.as_millis() as u64,
        )?;
        Ok(Some(Arc::new(region)))
    }

    pub fn entity_persister(mut self, persister: Arc<dyn EntityPersister>) -> Result<Self> {
        self.metamodel = self.metamodel.with_entity_persister(persister)?;
        Ok(self)
    }

    pub fn collection_persister(mut self, persister: Arc<dyn CollectionPersister>) -> Result<Self> {
        self.metamodel = self.metamodel.with_collection_persister(persister)?;
        Ok(self)
    }

    pub fn listeners(mut self, listeners: EventListenerRegistry) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn listeners_mut(&mut self) -> &mut EventListenerRegistry {
        &mut self.listeners
    }

    pub fn build(self) -> Result<Arc<SessionFactory>> {
        self.settings.validate()?;
        self.metamodel.validate()?;

        info!(
            entities = self.metamodel.entity_persisters().count(),
            collections = self.metamodel.collection_persisters().count(),
            "Building session factory"
        );

        let timestamps =
            UpdateTimestampsCache::new(self.settings.cache_lock_timeout.as_millis() as u64);
        let statistics = Statistics::new(self.settings.statistics_enabled);

        Ok(Arc::new(SessionFactory {
            settings: self.settings,
            metamodel: self.metamodel,
            listeners: self.listeners,
            statistics,
            timestamps,
        }))
    }
}
