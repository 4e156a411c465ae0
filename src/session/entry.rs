use std::fmt;
use std::sync::Arc;

use super::{EntityId, EntityInstance, EntityKey, PersistentCollection};
use crate::core::{Result, State, Value};
use crate::persister::EntityPersister;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    Managed,
    ReadOnly,
    Deleted,
    Gone,
    Loading,
    Saving,
}

/// Per-instance tracking record of the persistence context
pub struct EntityEntry {
    status: EntityStatus,
    id: EntityId,
    version: Option<Value>,
    loaded_state: Option<State>,
    row_id: Option<Value>,
    exists_in_database: bool,
    persister: Arc<dyn EntityPersister>,
}

impl EntityEntry {
    pub fn new(
        status: EntityStatus,
        id: EntityId,
        loaded_state: Option<State>,
        version: Option<Value>,
        exists_in_database: bool,
        persister: Arc<dyn EntityPersister>,
    ) -> Self {
        Self {
            status,
            id,
            version,
            loaded_state,
            row_id: None,
            exists_in_database,
            persister,
        }
    }

    pub fn status(&self) -> EntityStatus {
        self.status
    }

    pub fn set_status(&mut self, status: EntityStatus) {
        self.status = status;
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    pub fn version(&self) -> Option<&Value> {
        self.version.as_ref()
    }

    pub fn loaded_state(&self) -> Option<&[Value]> {
        self.loaded_state.as_deref()
    }

    pub fn row_id(&self) -> Option<&Value> {
        self.row_id.as_ref()
    }

    pub fn set_row_id(&mut self, row_id: Option<Value>) {
        self.row_id = row_id;
    }

    pub fn exists_in_database(&self) -> bool {
        self.exists_in_database
    }

    pub fn persister(&self) -> &Arc<dyn EntityPersister> {
        &self.persister
    }

    pub fn entity_name(&self) -> &str {
        self.persister.entity_name()
    }

    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.persister.entity_name(), self.id.clone())
    }

    /// Record a successful update: the written state becomes the loaded
    /// state and the version moves to `next_version`, on the instance too.
    pub fn post_update(
        &mut self,
        instance: &EntityInstance,
        updated_state: &[Value],
        next_version: Option<Value>,
    ) -> Result<()> {
        self.loaded_state = Some(updated_state.to_vec());
        self.set_version(instance, next_version)
    }

    pub fn post_insert(&mut self, inserted_state: &[Value]) {
        self.exists_in_database = true;
        self.loaded_state = Some(inserted_state.to_vec());
    }

    pub fn post_delete(&mut self) {
        self.status = EntityStatus::Gone;
        self.exists_in_database = false;
    }

    /// Adopt a version bumped outside the normal update path.
    pub fn force_locked(&mut self, instance: &EntityInstance, next_version: Value) -> Result<()> {
        self.set_version(instance, Some(next_version))
    }

    fn set_version(&mut self, instance: &EntityInstance, version: Option<Value>) -> Result<()> {
        if let (Some(index), Some(v)) = (self.persister.version_property_index(), version.as_ref()) {
            instance.set_property(index, v.clone())?;
            if let Some(state) = self.loaded_state.as_mut() {
                if let Some(slot) = state.get_mut(index) {
                    *slot = v.clone();
                }
            }
        }
        self.version = version;
        Ok(())
    }
}

impl fmt::Debug for EntityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityEntry")
            .field("entity", &self.persister.entity_name())
            .field("status", &self.status)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("exists_in_database", &self.exists_in_database)
            .finish()
    }
}

/// Per-collection tracking record of the persistence context
#[derive(Debug, Clone)]
pub struct CollectionEntry {
    role: String,
    loaded_key: Option<Value>,
    current_key: Option<Value>,
    do_update: bool,
    do_remove: bool,
    do_recreate: bool,
}

impl CollectionEntry {
    pub fn new(role: impl Into<String>, key: Option<Value>) -> Self {
        Self {
            role: role.into(),
            loaded_key: key.clone(),
            current_key: key,
            do_update: false,
            do_remove: false,
            do_recreate: false,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn loaded_key(&self) -> Option<&Value> {
        self.loaded_key.as_ref()
    }

    pub fn current_key(&self) -> Option<&Value> {
        self.current_key.as_ref()
    }

    /// Point the collection at a new owner key, or at none when dereferenced.
    pub fn set_current_key(&mut self, key: Option<Value>) {
        self.current_key = key;
    }

    pub fn is_do_update(&self) -> bool {
        self.do_update
    }

    pub fn is_do_remove(&self) -> bool {
        self.do_remove
    }

    pub fn is_do_recreate(&self) -> bool {
        self.do_recreate
    }

    pub fn set_do_update(&mut self, value: bool) {
        self.do_update = value;
    }

    pub fn set_do_remove(&mut self, value: bool) {
        self.do_remove = value;
    }

    pub fn set_do_recreate(&mut self, value: bool) {
        self.do_recreate = value;
    }

    /// Whether an update, removal or recreation is scheduled this flush
    pub fn has_pending_action(&self) -> bool {
        self.do_update || self.do_remove || self.do_recreate
    }

    /// Bookkeeping after a collection action ran: the database now holds the
    /// current elements under the current key.
    pub fn after_action(&mut self, collection: &PersistentCollection) -> Result<()> {
        self.do_update = false;
        self.do_remove = false;
        self.do_recreate = false;
        self.loaded_key = self.current_key.clone();
        collection.resnapshot()?;
        collection.post_action()
    }
}
