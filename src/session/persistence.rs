use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use log::debug;

use super::{
    CollectionEntry, CollectionHandle, EntityEntry, EntityId, EntityInstance, EntityKey,
    EntityStatus, InstanceHandle, PersistentCollection,
};
use crate::core::{DbError, Result, Value};
use crate::persister::EntityPersister;

/// First-level cache of one session: every tracked entity and collection
#[derive(Default)]
pub struct PersistenceContext {
    entries: HashMap<InstanceHandle, EntityEntry>,
    entities: HashMap<EntityKey, EntityInstance>,
    collection_entries: HashMap<CollectionHandle, CollectionEntry>,
    collections: HashMap<CollectionHandle, PersistentCollection>,
    inserted_keys: HashMap<String, HashSet<Value>>,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `instance` under `key`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_entity(
        &mut self,
        instance: &EntityInstance,
        status: EntityStatus,
        state: &[Value],
        key: EntityKey,
        version: Option<Value>,
        exists_in_database: bool,
        persister: Arc<dyn EntityPersister>,
    ) -> Result<&mut EntityEntry> {
        self.check_uniqueness(&key, instance)?;
        let entry = EntityEntry::new(
            status,
            key.id().clone(),
            Some(state.to_vec()),
            version,
            exists_in_database,
            persister,
        );
        self.entities.insert(key, instance.clone());
        self.entries.insert(instance.handle(), entry);
        self.entries
            .get_mut(&instance.handle())
            .ok_or_else(|| DbError::AssertionFailure("entity entry vanished".into()))
    }

    pub fn entry(&self, instance: &EntityInstance) -> Option<&EntityEntry> {
        self.entries.get(&instance.handle())
    }

    pub fn entry_mut(&mut self, instance: &EntityInstance) -> Option<&mut EntityEntry> {
        self.entries.get_mut(&instance.handle())
    }

    pub fn remove_entry(&mut self, instance: &EntityInstance) -> Option<EntityEntry> {
        self.entries.remove(&instance.handle())
    }

    pub fn contains(&self, instance: &EntityInstance) -> bool {
        self.entries.contains_key(&instance.handle())
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&EntityInstance> {
        self.entities.get(key)
    }

    pub fn remove_entity(&mut self, key: &EntityKey) -> Option<EntityInstance> {
        self.entities.remove(key)
    }

    /// Fail if a different instance is already tracked under `key`.
    pub fn check_uniqueness(&self, key: &EntityKey, instance: &EntityInstance) -> Result<()> {
        match self.entities.get(key) {
            Some(existing) if !existing.same_instance(instance) => {
                Err(DbError::NonUniqueObject(key.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Re-key an entity inserted under a delayed identifier once the
    /// database has generated its real one.
    pub fn replace_delayed_entity_identity_insert_keys(
        &mut self,
        old_key: &EntityKey,
        generated_id: Value,
    ) -> Result<()> {
        let instance = self.entities.remove(old_key).ok_or_else(|| {
            DbError::AssertionFailure(format!("no entity tracked under delayed key {}", old_key))
        })?;
        let new_key = EntityKey::known(old_key.entity_name(), generated_id.clone());
        debug!("Replacing delayed key {} with {}", old_key, new_key);
        if let Some(entry) = self.entries.get_mut(&instance.handle()) {
            entry.set_id(EntityId::Known(generated_id));
        }
        self.entities.insert(new_key, instance);
        Ok(())
    }

    pub fn register_inserted_key(&mut self, entity_name: &str, id: &Value) {
        self.inserted_keys
            .entry(entity_name.to_string())
            .or_default()
            .insert(id.clone());
    }

    pub fn was_inserted_during_transaction(&self, entity_name: &str, id: &Value) -> bool {
        self.inserted_keys
            .get(entity_name)
            .is_some_and(|ids| ids.contains(id))
    }

    pub fn clear_inserted_keys(&mut self) {
        self.inserted_keys.clear();
    }

    pub fn add_collection(&mut self, collection: &PersistentCollection, key: Option<Value>) {
        self.collection_entries
            .insert(collection.handle(), CollectionEntry::new(collection.role(), key));
        self.collections.insert(collection.handle(), collection.clone());
    }

    pub fn collection_entry(&self, collection: &PersistentCollection) -> Option<&CollectionEntry> {
        self.collection_entries.get(&collection.handle())
    }

    pub fn collection_entry_mut(
        &mut self,
        collection: &PersistentCollection,
    ) -> Option<&mut CollectionEntry> {
        self.collection_entries.get_mut(&collection.handle())
    }

    pub fn remove_collection(&mut self, collection: &PersistentCollection) -> Option<CollectionEntry> {
        self.collections.remove(&collection.handle());
        self.collection_entries.remove(&collection.handle())
    }

    /// Owner of a loaded collection, as recorded on the wrapper.
    pub fn loaded_collection_owner(
        &self,
        collection: &PersistentCollection,
    ) -> Result<Option<EntityInstance>> {
        collection.owner()
    }

    pub fn entity_count(&self) -> usize {
        self.entries.len()
    }

    pub fn collection_count(&self) -> usize {
        self.collection_entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.entities.clear();
        self.collection_entries.clear();
        self.collections.clear();
        self.inserted_keys.clear();
    }
}
