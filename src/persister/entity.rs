use std::cmp::Ordering;
use std::sync::Arc;

use crate::cache::{CacheEntry, CacheKey, CacheValue, RegionAccessStrategy};
use crate::core::{DbError, Result, State, Value};
use crate::session::{EntityInstance, SessionContext};

/// Arguments of a row update
pub struct EntityUpdate<'a> {
    pub id: &'a Value,
    pub state: &'a [Value],
    pub dirty_fields: Option<&'a [usize]>,
    pub has_dirty_collection: bool,
    pub previous_state: Option<&'a [Value]>,
    pub previous_version: Option<&'a Value>,
    pub instance: &'a EntityInstance,
    pub row_id: Option<&'a Value>,
}

/// Per-entity-type persistence strategy
///
/// Implementations own the SQL side (statements, identifier generation,
/// version checks) and expose the metadata the actions need: query spaces,
/// cache region, generated-property flags.
pub trait EntityPersister: Send + Sync {
    fn entity_name(&self) -> &str;

    fn property_names(&self) -> &[String];

    /// Storage regions (tables) written by this persister
    fn property_spaces(&self) -> &[String];

    fn is_mutable(&self) -> bool {
        true
    }

    fn version_property_index(&self) -> Option<usize> {
        None
    }

    fn is_versioned(&self) -> bool {
        self.version_property_index().is_some()
    }

    fn is_version_property_generated(&self) -> bool {
        false
    }

    fn has_insert_generated_properties(&self) -> bool {
        false
    }

    fn has_update_generated_properties(&self) -> bool {
        false
    }

    fn cache_access(&self) -> Option<&Arc<dyn RegionAccessStrategy>> {
        None
    }

    fn has_cache(&self) -> bool {
        self.cache_access().is_some()
    }

    /// Invalidate rather than update cached state on writes
    fn is_cache_invalidation_required(&self) -> bool {
        false
    }

    fn use_structured_cache_entries(&self) -> bool {
        false
    }

    fn compare_ids(&self, a: &Value, b: &Value) -> Ordering {
        a.total_cmp(b)
    }

    fn insert(
        &self,
        id: &Value,
        state: &[Value],
        instance: &EntityInstance,
        session: &SessionContext,
    ) -> Result<()>;

    /// Insert and let the database generate the identifier.
    fn insert_generated(
        &self,
        state: &[Value],
        instance: &EntityInstance,
        session: &SessionContext,
    ) -> Result<Value>;

    /// Fails with `StaleObjectState` when the version check matches no row.
    fn update(&self, update: EntityUpdate<'_>, session: &SessionContext) -> Result<()>;

    fn delete(
        &self,
        id: &Value,
        version: Option<&Value>,
        instance: &EntityInstance,
        session: &SessionContext,
    ) -> Result<()>;

    /// Re-read database-generated values into `state` and the instance.
    fn process_insert_generated_properties(
        &self,
        _id: &Value,
        _instance: &EntityInstance,
        _state: &mut State,
        _session: &SessionContext,
    ) -> Result<()> {
        Ok(())
    }

    fn process_update_generated_properties(
        &self,
        _id: &Value,
        _instance: &EntityInstance,
        _state: &mut State,
        _session: &SessionContext,
    ) -> Result<()> {
        Ok(())
    }

    /// Version currently stored in the database, `None` if the row is gone
    fn current_version(&self, id: &Value, session: &SessionContext) -> Result<Option<Value>>;

    /// Bump the stored version, returning the new one.
    fn force_version_increment(
        &self,
        id: &Value,
        current_version: Option<&Value>,
        session: &SessionContext,
    ) -> Result<Value>;

    fn load(&self, id: &Value, session: &SessionContext) -> Result<Option<State>>;

    fn version(&self, instance: &EntityInstance) -> Result<Option<Value>> {
        match self.version_property_index() {
            Some(index) => Ok(Some(instance.property(index)?)),
            None => Ok(None),
        }
    }

    fn version_from_state(&self, state: &[Value]) -> Option<Value> {
        self.version_property_index()
            .and_then(|index| state.get(index).cloned())
    }

    fn set_identifier(&self, instance: &EntityInstance, id: &Value) -> Result<()> {
        instance.set_id(id.clone())
    }

    fn cache_key(&self, id: &Value) -> CacheKey {
        CacheKey::new(self.entity_name(), id.clone())
    }

    fn build_cache_entry(&self, state: &[Value], version: Option<&Value>) -> CacheEntry {
        CacheEntry::new(state, self.entity_name(), version.cloned(), false)
    }

    /// Convert an entry to the form stored in the region.
    fn structure_cache_entry(&self, entry: CacheEntry) -> Result<CacheValue> {
        if self.use_structured_cache_entries() {
            Ok(CacheValue::StructuredEntity(entry.structure(self.property_names())?))
        } else {
            Ok(CacheValue::Entity(entry))
        }
    }

    fn assemble_cache_value(&self, value: &CacheValue) -> Result<CacheEntry> {
        match value {
            CacheValue::Entity(entry) => Ok(entry.clone()),
            CacheValue::StructuredEntity(json) => CacheEntry::destructure(json, self.property_names()),
            CacheValue::Collection(_) => Err(DbError::Cache(format!(
                "collection entry found in entity region of {}",
                self.entity_name()
            ))),
        }
    }
}
