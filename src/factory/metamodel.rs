use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use crate::core::{DbError, Result};
use crate::persister::{CollectionPersister, EntityPersister};

/// Registry of entity and collection persisters
///
/// Immutable once built; `with_*` returns a NEW Metamodel (copy-on-write),
/// so a factory can hand it out without locking.
#[derive(Clone, Default)]
pub struct Metamodel {
    entities: Arc<HashMap<String, Arc<dyn EntityPersister>>>,
    collections: Arc<HashMap<String, Arc<dyn CollectionPersister>>>,
    /// entity name -> roles of collections whose elements are that entity
    roles_by_entity_participant: Arc<HashMap<String, BTreeSet<String>>>,
}

impl Metamodel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity_persister(self, persister: Arc<dyn EntityPersister>) -> Result<Self> {
        let name = persister.entity_name().to_string();
        if self.entities.contains_key(&name) {
            return Err(DbError::ConfigError(format!(
                "Entity '{}' is already mapped",
                name
            )));
        }

        let mut entities = (*self.entities).clone();
        entities.insert(name, persister);

        Ok(Self {
            entities: Arc::new(entities),
            ..self
        })
    }

    pub fn with_collection_persister(self, persister: Arc<dyn CollectionPersister>) -> Result<Self> {
        let role = persister.role().to_string();
        if self.collections.contains_key(&role) {
            return Err(DbError::ConfigError(format!(
                "Collection role '{}' is already mapped",
                role
            )));
        }

        let mut roles = (*self.roles_by_entity_participant).clone();
        if let Some(element) = persister.element_entity_name() {
            roles
                .entry(element.to_string())
                .or_default()
                .insert(role.clone());
        }

        let mut collections = (*self.collections).clone();
        collections.insert(role, persister);

        Ok(Self {
            entities: self.entities,
            collections: Arc::new(collections),
            roles_by_entity_participant: Arc::new(roles),
        })
    }

    pub fn entity_persister(&self, entity_name: &str) -> Result<&Arc<dyn EntityPersister>> {
        self.entities
            .get(entity_name)
            .ok_or_else(|| DbError::UnknownEntity(entity_name.to_string()))
    }

    pub fn collection_persister(&self, role: &str) -> Result<&Arc<dyn CollectionPersister>> {
        self.collections
            .get(role)
            .ok_or_else(|| DbError::UnknownCollectionRole(role.to_string()))
    }

    pub fn entity_persisters(&self) -> impl Iterator<Item = &Arc<dyn EntityPersister>> {
        self.entities.values()
    }

    pub fn collection_persisters(&self) -> impl Iterator<Item = &Arc<dyn CollectionPersister>> {
        self.collections.values()
    }

    /// Roles of collections whose elements are instances of `entity_name`
    pub fn collection_roles_by_entity_participant(&self, entity_name: &str) -> Option<&BTreeSet<String>> {
        self.roles_by_entity_participant.get(entity_name)
    }

    /// Check that every collection's owner is mapped.
    pub fn validate(&self) -> Result<()> {
        for persister in self.collections.values() {
            if !self.entities.contains_key(persister.owner_entity_name()) {
                return Err(DbError::ConfigError(format!(
                    "Collection role '{}' is owned by unmapped entity '{}'",
                    persister.role(),
                    persister.owner_entity_name()
                )));
            }
        }
        Ok(())
    }

    pub fn evict_entity_region(&self, entity_name: &str) -> Result<()> {
        let persister = self.entity_persister(entity_name)?;
        if let Some(cache) = persister.cache_access() {
            log::debug!("Evicting second-level cache: {}", entity_name);
            cache.evict_all()?;
        }
        Ok(())
    }

    pub fn evict_collection_region(&self, role: &str) -> Result<()> {
        let persister = self.collection_persister(role)?;
        if let Some(cache) = persister.cache_access() {
            log::debug!("Evicting second-level cache: {}", role);
            cache.evict_all()?;
        }
        Ok(())
    }
}
