use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::base::{compare_entity_actions, EntityActionBase};
use super::snapshot::EntityDeleteSnapshot;
use super::{ActionOrder, AfterTransactionCompletionProcess, Executable};
use crate::cache::{CacheKey, SoftLock};
use crate::core::{DbError, Result, State, Value};
use crate::event::{PostDeleteEvent, PreDeleteEvent};
use crate::persister::EntityPersister;
use crate::session::{EntityId, EntityInstance, SessionContext};

/// Deletes an entity row and stops tracking the instance
pub struct EntityDeleteAction {
    base: EntityActionBase,
    version: Option<Value>,
    state: Option<State>,
    is_cascade_delete_enabled: bool,
    is_orphan_removal: bool,
    cache_key: Option<CacheKey>,
    lock: Option<SoftLock>,
}

impl EntityDeleteAction {
    pub fn new(
        id: Value,
        state: Option<State>,
        version: Option<Value>,
        instance: EntityInstance,
        persister: Arc<dyn EntityPersister>,
        is_cascade_delete_enabled: bool,
        session: &SessionContext,
    ) -> Self {
        Self {
            base: EntityActionBase::new(Some(EntityId::Known(id)), instance, persister, session),
            version,
            state,
            is_cascade_delete_enabled,
            is_orphan_removal: false,
            cache_key: None,
            lock: None,
        }
    }

    /// Mark the delete as removal of an orphaned child, run ahead of inserts.
    pub fn orphan_removal(mut self) -> Self {
        self.is_orphan_removal = true;
        self
    }

    pub fn base(&self) -> &EntityActionBase {
        &self.base
    }

    pub fn instance(&self) -> &EntityInstance {
        self.base.instance()
    }

    pub fn is_orphan_removal(&self) -> bool {
        self.is_orphan_removal
    }

    pub fn holds_cache_lock(&self) -> bool {
        self.lock.is_some()
    }

    fn pre_delete(&self, id: &Value, session: &SessionContext) -> bool {
        let listeners = session.factory().listeners().pre_delete();
        if listeners.is_empty() {
            return false;
        }

        let event = PreDeleteEvent {
            entity: self.base.instance(),
            id,
            deleted_state: self.state.as_deref(),
            persister: self.base.persister().as_ref(),
            session,
        };
        let mut veto = false;
        for listener in listeners {
            veto |= listener.on_pre_delete(&event);
        }
        veto
    }

    fn post_delete(&self, id: &Value, session: &SessionContext) {
        let listeners = session.factory().listeners().post_delete();
        if listeners.is_empty() {
            return;
        }

        let event = self.post_event(id, session);
        for listener in listeners {
            listener.on_post_delete(&event);
        }
    }

    fn post_commit_delete(&self, success: bool, id: &Value, session: &SessionContext) {
        let listeners = session.factory().listeners().post_commit_delete();
        if listeners.is_empty() {
            return;
        }

        let event = self.post_event(id, session);
        for listener in listeners {
            if success {
                listener.on_post_delete(&event);
            } else {
                listener.on_post_delete_commit_failed(&event);
            }
        }
    }

    fn post_event<'a>(&'a self, id: &'a Value, session: &'a SessionContext) -> PostDeleteEvent<'a> {
        PostDeleteEvent {
            entity: self.base.instance(),
            id,
            deleted_state: self.state.as_deref(),
            persister: self.base.persister().as_ref(),
            session,
        }
    }

    pub(crate) fn snapshot(&self) -> Result<EntityDeleteSnapshot> {
        Ok(EntityDeleteSnapshot {
            base: self.base.snapshot()?,
            version: self.version.clone(),
            state: self.state.clone(),
            is_cascade_delete_enabled: self.is_cascade_delete_enabled,
            is_orphan_removal: self.is_orphan_removal,
        })
    }

    pub(crate) fn rehydrate(snapshot: EntityDeleteSnapshot, session: &SessionContext) -> Result<Self> {
        Ok(Self {
            base: EntityActionBase::rehydrate(snapshot.base, session)?,
            version: snapshot.version,
            state: snapshot.state,
            is_cascade_delete_enabled: snapshot.is_cascade_delete_enabled,
            is_orphan_removal: snapshot.is_orphan_removal,
            cache_key: None,
            lock: None,
        })
    }
}

impl Executable for EntityDeleteAction {
    fn name(&self) -> &'static str {
        "EntityDeleteAction"
    }

    fn property_spaces(&self) -> &[String] {
        self.base.property_spaces()
    }

    fn before_executions(&mut self, _session: &mut SessionContext) -> Result<()> {
        self.base.reject_before_executions()
    }

    fn execute(&mut self, session: &mut SessionContext) -> Result<()> {
        let id = self.base.id(session)?;
        let persister = Arc::clone(self.base.persister());
        let instance = self.base.instance().clone();

        let veto = self.pre_delete(&id, session);
        if veto {
            debug!(entity = %self.base.entity_name(), %id, "Delete vetoed by listener");
        }

        let version = if persister.is_version_property_generated() {
            persister.version(&instance)?
        } else {
            self.version.clone()
        };

        if let Some(cache) = persister.cache_access() {
            let key = persister.cache_key(&id);
            let lock = cache.lock_item(&key, version.as_ref(), session.lock_owner())?;
            trace!(%key, %lock, "Locked cache item before delete");
            self.cache_key = Some(key);
            self.lock = Some(lock);
        }

        // with cascade delete the database removes the row itself
        if !self.is_cascade_delete_enabled && !veto {
            persister.delete(&id, version.as_ref(), &instance, session)?;
        }

        let persistence = session.persistence_mut();
        let mut entry = persistence.remove_entry(&instance).ok_or_else(|| {
            DbError::AssertionFailure("possible non-threadsafe access to session".into())
        })?;
        entry.post_delete();
        persistence.remove_entity(&entry.entity_key());

        if let (Some(cache), Some(key)) = (persister.cache_access(), self.cache_key.as_ref()) {
            if let Err(e) = cache.remove(key) {
                warn!(%key, error = %e, "Unable to invalidate cache entry after delete");
            }
        }

        self.post_delete(&id, session);

        if !veto {
            session
                .factory()
                .statistics()
                .on_entity_delete(self.base.entity_name());
        }
        Ok(())
    }

    fn has_after_transaction_completion(&self, session: &SessionContext) -> bool {
        let persister = self.base.persister().as_ref();
        persister.has_cache()
            || session
                .factory()
                .listeners()
                .post_commit_delete()
                .iter()
                .any(|l| l.requires_post_commit_handling(persister))
    }
}

impl AfterTransactionCompletionProcess for EntityDeleteAction {
    fn after_transaction_completion(&mut self, success: bool, session: &mut SessionContext) -> Result<()> {
        let persister = Arc::clone(self.base.persister());
        let mut outcome = Ok(());
        if let (Some(cache), Some(key), Some(lock)) =
            (persister.cache_access(), self.cache_key.take(), self.lock.take())
        {
            outcome = cache.unlock_item(&key, lock);
        }

        if let Some(id) = self.base.raw_id().and_then(EntityId::known) {
            let id = id.clone();
            self.post_commit_delete(success, &id, session);
        }
        outcome
    }
}

impl ActionOrder for EntityDeleteAction {
    fn compare(&self, other: &Self) -> Ordering {
        compare_entity_actions(&self.base, &other.base)
    }
}
