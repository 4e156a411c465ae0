//! Serializable images of queued entity actions.
//!
//! An action refers to live session objects (instance handles, persisters),
//! so it is written out as plain data and relinked against a session's
//! metamodel and persistence context when read back.

use serde::{Deserialize, Serialize};

use crate::core::{Result, State, Value};
use crate::session::{EntityId, EntityInstance, EntityKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub entity_name: String,
    pub id: Option<Value>,
    pub state: State,
}

impl InstanceSnapshot {
    pub fn of(instance: &EntityInstance) -> Result<Self> {
        Ok(Self {
            entity_name: instance.entity_name().to_string(),
            id: instance.id()?,
            state: instance.state()?,
        })
    }

    pub fn into_instance(self) -> EntityInstance {
        match self.id {
            Some(id) => EntityInstance::with_id(&self.entity_name, id, self.state),
            None => EntityInstance::new(&self.entity_name, self.state),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityActionSnapshot {
    pub entity_name: String,
    pub id: Option<EntityId>,
    pub instance: InstanceSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityInsertSnapshot {
    pub base: EntityActionSnapshot,
    pub state: State,
    pub version: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityIdentityInsertSnapshot {
    pub base: EntityActionSnapshot,
    pub state: State,
    pub is_delayed: bool,
    pub delayed_entity_key: Option<EntityKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InsertSnapshot {
    Assigned(EntityInsertSnapshot),
    Identity(EntityIdentityInsertSnapshot),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityUpdateSnapshot {
    pub base: EntityActionSnapshot,
    pub state: State,
    pub previous_state: Option<State>,
    pub previous_version: Option<Value>,
    pub next_version: Option<Value>,
    pub dirty_fields: Option<Vec<usize>>,
    pub has_dirty_collection: bool,
    pub row_id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDeleteSnapshot {
    pub base: EntityActionSnapshot,
    pub version: Option<Value>,
    pub state: Option<State>,
    pub is_cascade_delete_enabled: bool,
    pub is_orphan_removal: bool,
}

/// Pending entity work of an action queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionQueueSnapshot {
    pub insertions: Vec<InsertSnapshot>,
    pub updates: Vec<EntityUpdateSnapshot>,
    pub deletions: Vec<EntityDeleteSnapshot>,
    pub orphan_removals: Vec<EntityDeleteSnapshot>,
}
