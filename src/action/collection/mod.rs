pub mod queued;
pub mod recreate;
pub mod remove;
pub mod update;

pub use queued::QueuedOperationCollectionAction;
pub use recreate::CollectionRecreateAction;
pub use remove::CollectionRemoveAction;
pub use update::CollectionUpdateAction;

use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::cache::{CacheKey, SoftLock};
use crate::core::{DbError, Result, Value};
use crate::event::{CollectionEvent, CollectionEventKind};
use crate::persister::CollectionPersister;
use crate::session::{
    CollectionEntry, EntityId, EntityInstance, PersistentCollection, SessionContext, SessionId,
};

/// State shared by the collection actions
///
/// Unlike entity actions, collection actions take their cache soft lock
/// during `before_executions`, ahead of every other action of the flush, and
/// hold it until the transaction completes. The cached collection is simply
/// dropped on write; it is rebuilt on the next load.
pub struct CollectionActionBase {
    persister: Arc<dyn CollectionPersister>,
    collection: Option<PersistentCollection>,
    key: EntityId,
    affected_owner: Option<EntityInstance>,
    session_id: SessionId,
    cache_key: Option<CacheKey>,
    lock: Option<SoftLock>,
}

impl CollectionActionBase {
    pub fn new(
        persister: Arc<dyn CollectionPersister>,
        collection: Option<PersistentCollection>,
        key: EntityId,
        session: &SessionContext,
    ) -> Self {
        Self {
            persister,
            collection,
            key,
            affected_owner: None,
            session_id: session.id(),
            cache_key: None,
            lock: None,
        }
    }

    pub(crate) fn with_affected_owner(mut self, owner: Option<EntityInstance>) -> Self {
        self.affected_owner = owner;
        self
    }

    pub fn role(&self) -> &str {
        self.persister.role()
    }

    pub fn persister(&self) -> &Arc<dyn CollectionPersister> {
        &self.persister
    }

    pub fn collection(&self) -> Option<&PersistentCollection> {
        self.collection.as_ref()
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn holds_cache_lock(&self) -> bool {
        self.lock.is_some()
    }

    /// Owner of the collection: the one captured at construction, or the
    /// one recorded on the collection itself.
    pub fn affected_owner(&self) -> Result<Option<EntityInstance>> {
        if self.affected_owner.is_some() {
            return Ok(self.affected_owner.clone());
        }
        match &self.collection {
            Some(collection) => collection.owner(),
            None => Ok(None),
        }
    }

    /// The owner key. An owner still under a delayed identifier is resolved
    /// through its entry, which carries the generated id once inserted.
    pub fn key(&self, session: &SessionContext) -> Result<Value> {
        match &self.key {
            EntityId::Known(key) => Ok(key.clone()),
            EntityId::Delayed(_) => {
                let owner = self.affected_owner()?.ok_or_else(|| {
                    DbError::AssertionFailure(format!(
                        "collection {} keyed by a delayed identifier has no owner",
                        self.role()
                    ))
                })?;
                session
                    .persistence()
                    .entry(&owner)
                    .and_then(|entry| entry.id().known().cloned())
                    .ok_or_else(|| {
                        DbError::AssertionFailure(format!(
                            "owner key of collection {} was never resolved",
                            self.role()
                        ))
                    })
            }
        }
    }

    pub fn property_spaces(&self) -> &[String] {
        self.persister.collection_spaces()
    }

    pub fn before_executions(&mut self, session: &mut SessionContext) -> Result<()> {
        // a new owner's key does not exist yet; nothing is cached under it
        if self.key.is_delayed() {
            return Ok(());
        }
        if let Some(cache) = self.persister.cache_access() {
            let key = self.persister.cache_key(&self.key(session)?);
            let lock = cache.lock_item(&key, None, session.lock_owner())?;
            trace!(%key, %lock, "Locked collection cache item");
            self.cache_key = Some(key);
            self.lock = Some(lock);
        }
        Ok(())
    }

    /// Drop the cached collection as part of the write.
    pub fn evict(&self, session: &SessionContext) -> Result<()> {
        if let Some(cache) = self.persister.cache_access() {
            let key = self.persister.cache_key(&self.key(session)?);
            if let Err(e) = cache.remove(&key) {
                warn!(%key, error = %e, "Unable to evict collection cache entry");
            }
        }
        Ok(())
    }

    pub fn has_after_transaction_completion(&self) -> bool {
        self.persister.has_cache()
    }

    pub fn after_transaction_completion(&mut self, _success: bool) -> Result<()> {
        if let (Some(cache), Some(key), Some(lock)) = (
            self.persister.cache_access(),
            self.cache_key.take(),
            self.lock.take(),
        ) {
            cache.unlock_item(&key, lock)?;
        }
        Ok(())
    }

    /// Record the scheduled action on the collection entry, if the
    /// collection is tracked.
    pub(crate) fn mark_entry(&self, session: &mut SessionContext, mark: impl FnOnce(&mut CollectionEntry)) {
        if let Some(collection) = &self.collection
            && let Some(entry) = session.persistence_mut().collection_entry_mut(collection)
        {
            mark(entry);
        }
    }

    pub(crate) fn require_collection(&self) -> Result<PersistentCollection> {
        self.collection.clone().ok_or_else(|| {
            DbError::AssertionFailure(format!("no collection instance for {}", self.role()))
        })
    }

    /// Collection entry bookkeeping once the rows are written.
    pub(crate) fn after_action(&self, session: &mut SessionContext) -> Result<()> {
        let Some(collection) = &self.collection else {
            return Ok(());
        };
        let entry = session
            .persistence_mut()
            .collection_entry_mut(collection)
            .ok_or_else(|| {
                DbError::AssertionFailure(format!(
                    "collection {} is not tracked by the session",
                    self.role()
                ))
            })?;
        entry.after_action(collection)
    }

    pub(crate) fn fire(&self, kind: CollectionEventKind, session: &SessionContext) -> Result<()> {
        let listeners = session.factory().listeners().collection(kind);
        if listeners.is_empty() {
            return Ok(());
        }

        let owner = self.affected_owner()?;
        let owner_id = match &owner {
            Some(owner) => session
                .persistence()
                .entry(owner)
                .and_then(|entry| entry.id().known().cloned()),
            None => None,
        };
        let event = CollectionEvent {
            kind,
            collection: self.collection.as_ref(),
            affected_owner: owner.as_ref(),
            affected_owner_id: owner_id.as_ref(),
            persister: self.persister.as_ref(),
            session,
        };
        for listener in listeners {
            listener.on_collection_event(&event);
        }
        Ok(())
    }
}

/// Order collection actions by role, then owner key.
pub fn compare_collection_actions(a: &CollectionActionBase, b: &CollectionActionBase) -> Ordering {
    a.role().cmp(b.role()).then_with(|| match (&a.key, &b.key) {
        (EntityId::Known(x), EntityId::Known(y)) => a.persister.compare_keys(x, y),
        (EntityId::Known(_), EntityId::Delayed(_)) => Ordering::Less,
        (EntityId::Delayed(_), EntityId::Known(_)) => Ordering::Greater,
        (EntityId::Delayed(x), EntityId::Delayed(y)) => x.cmp(y),
    })
}
