use crate::core::Value;
use crate::persister::{CollectionPersister, EntityPersister};
use crate::session::{EntityInstance, PersistentCollection, SessionContext};

pub struct PreInsertEvent<'a> {
    pub entity: &'a EntityInstance,
    /// `None` while the database has not generated the identifier yet
    pub id: Option<&'a Value>,
    pub state: &'a [Value],
    pub persister: &'a dyn EntityPersister,
    pub session: &'a SessionContext,
}

pub struct PostInsertEvent<'a> {
    pub entity: &'a EntityInstance,
    pub id: Option<&'a Value>,
    pub state: &'a [Value],
    pub persister: &'a dyn EntityPersister,
    pub session: &'a SessionContext,
}

pub struct PreUpdateEvent<'a> {
    pub entity: &'a EntityInstance,
    pub id: &'a Value,
    pub state: &'a [Value],
    pub old_state: Option<&'a [Value]>,
    pub persister: &'a dyn EntityPersister,
    pub session: &'a SessionContext,
}

pub struct PostUpdateEvent<'a> {
    pub entity: &'a EntityInstance,
    pub id: &'a Value,
    pub state: &'a [Value],
    pub old_state: Option<&'a [Value]>,
    pub dirty_properties: Option<&'a [usize]>,
    pub persister: &'a dyn EntityPersister,
    pub session: &'a SessionContext,
}

pub struct PreDeleteEvent<'a> {
    pub entity: &'a EntityInstance,
    pub id: &'a Value,
    pub deleted_state: Option<&'a [Value]>,
    pub persister: &'a dyn EntityPersister,
    pub session: &'a SessionContext,
}

pub struct PostDeleteEvent<'a> {
    pub entity: &'a EntityInstance,
    pub id: &'a Value,
    pub deleted_state: Option<&'a [Value]>,
    pub persister: &'a dyn EntityPersister,
    pub session: &'a SessionContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionEventKind {
    PreRecreate,
    PostRecreate,
    PreRemove,
    PostRemove,
    PreUpdate,
    PostUpdate,
}

pub struct CollectionEvent<'a> {
    pub kind: CollectionEventKind,
    /// `None` for a removal scheduled from the owner alone
    pub collection: Option<&'a PersistentCollection>,
    pub affected_owner: Option<&'a EntityInstance>,
    pub affected_owner_id: Option<&'a Value>,
    pub persister: &'a dyn CollectionPersister,
    pub session: &'a SessionContext,
}

impl CollectionEvent<'_> {
    pub fn affected_owner_entity_name(&self) -> Option<&str> {
        self.affected_owner.map(EntityInstance::entity_name)
    }
}

/// Returning `true` vetoes the insert.
pub trait PreInsertEventListener: Send + Sync {
    fn on_pre_insert(&self, event: &PreInsertEvent<'_>) -> bool;
}

pub trait PostInsertEventListener: Send + Sync {
    fn on_post_insert(&self, event: &PostInsertEvent<'_>);

    /// Called instead of `on_post_insert` when registered as post-commit
    /// listener and the transaction did not commit.
    fn on_post_insert_commit_failed(&self, _event: &PostInsertEvent<'_>) {}

    fn requires_post_commit_handling(&self, _persister: &dyn EntityPersister) -> bool {
        true
    }
}

/// Returning `true` vetoes the update.
pub trait PreUpdateEventListener: Send + Sync {
    fn on_pre_update(&self, event: &PreUpdateEvent<'_>) -> bool;
}

pub trait PostUpdateEventListener: Send + Sync {
    fn on_post_update(&self, event: &PostUpdateEvent<'_>);

    fn on_post_update_commit_failed(&self, _event: &PostUpdateEvent<'_>) {}

    fn requires_post_commit_handling(&self, _persister: &dyn EntityPersister) -> bool {
        true
    }
}

/// Returning `true` vetoes the delete.
pub trait PreDeleteEventListener: Send + Sync {
    fn on_pre_delete(&self, event: &PreDeleteEvent<'_>) -> bool;
}

pub trait PostDeleteEventListener: Send + Sync {
    fn on_post_delete(&self, event: &PostDeleteEvent<'_>);

    fn on_post_delete_commit_failed(&self, _event: &PostDeleteEvent<'_>) {}

    fn requires_post_commit_handling(&self, _persister: &dyn EntityPersister) -> bool {
        true
    }
}

pub trait CollectionEventListener: Send + Sync {
    fn on_collection_event(&self, event: &CollectionEvent<'_>);
}
