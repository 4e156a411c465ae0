use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::base::{compare_entity_actions, EntityActionBase};
use super::snapshot::EntityUpdateSnapshot;
use super::{ActionOrder, AfterTransactionCompletionProcess, Executable};
use crate::cache::{CacheKey, CacheValue, RegionAccessStrategy, SoftLock};
use crate::core::{DbError, Result, State, Value};
use crate::event::{PostUpdateEvent, PreUpdateEvent};
use crate::persister::{EntityPersister, EntityUpdate};
use crate::session::{EntityId, EntityInstance, EntityStatus, SessionContext};

/// Writes the changed state of a managed entity
///
/// When the entity type is cached, the key is soft-locked before the write
/// and the new state is staged; the staged value reaches the region only
/// once the transaction commits.
pub struct EntityUpdateAction {
    base: EntityActionBase,
    state: State,
    previous_state: Option<State>,
    previous_version: Option<Value>,
    next_version: Option<Value>,
    dirty_fields: Option<Vec<usize>>,
    has_dirty_collection: bool,
    row_id: Option<Value>,
    cache_key: Option<CacheKey>,
    cache_entry: Option<CacheValue>,
    lock: Option<SoftLock>,
    locked_version: Option<Value>,
}

impl EntityUpdateAction {
    pub fn new(
        id: Value,
        state: State,
        instance: EntityInstance,
        persister: Arc<dyn EntityPersister>,
        session: &SessionContext,
    ) -> Self {
        Self {
            base: EntityActionBase::new(Some(EntityId::Known(id)), instance, persister, session),
            state,
            previous_state: None,
            previous_version: None,
            next_version: None,
            dirty_fields: None,
            has_dirty_collection: false,
            row_id: None,
            cache_key: None,
            cache_entry: None,
            lock: None,
            locked_version: None,
        }
    }

    pub fn previous_state(mut self, state: State) -> Self {
        self.previous_state = Some(state);
        self
    }

    /// Version before this update and the version it writes
    pub fn versions(mut self, previous: Option<Value>, next: Option<Value>) -> Self {
        self.previous_version = previous;
        self.next_version = next;
        self
    }

    pub fn dirty_fields(mut self, fields: Vec<usize>) -> Self {
        self.dirty_fields = Some(fields);
        self
    }

    pub fn dirty_collection(mut self, dirty: bool) -> Self {
        self.has_dirty_collection = dirty;
        self
    }

    pub fn row_id(mut self, row_id: Value) -> Self {
        self.row_id = Some(row_id);
        self
    }

    pub fn base(&self) -> &EntityActionBase {
        &self.base
    }

    pub fn state(&self) -> &[Value] {
        &self.state
    }

    pub fn next_version(&self) -> Option<&Value> {
        self.next_version.as_ref()
    }

    /// Whether a cache value waits for the commit
    pub fn has_staged_cache_entry(&self) -> bool {
        self.cache_entry.is_some()
    }

    pub fn holds_cache_lock(&self) -> bool {
        self.lock.is_some()
    }

    fn pre_update(&self, id: &Value, session: &SessionContext) -> bool {
        let listeners = session.factory().listeners().pre_update();
        if listeners.is_empty() {
            return false;
        }

        let event = PreUpdateEvent {
            entity: self.base.instance(),
            id,
            state: &self.state,
            old_state: self.previous_state.as_deref(),
            persister: self.base.persister().as_ref(),
            session,
        };
        let mut veto = false;
        for listener in listeners {
            veto |= listener.on_pre_update(&event);
        }
        veto
    }

    fn post_update(&self, id: &Value, session: &SessionContext) {
        let listeners = session.factory().listeners().post_update();
        if listeners.is_empty() {
            return;
        }

        let event = self.post_event(id, session);
        for listener in listeners {
            listener.on_post_update(&event);
        }
    }

    fn post_commit_update(&self, success: bool, id: &Value, session: &SessionContext) {
        let listeners = session.factory().listeners().post_commit_update();
        if listeners.is_empty() {
            return;
        }

        let event = self.post_event(id, session);
        for listener in listeners {
            if success {
                listener.on_post_update(&event);
            } else {
                listener.on_post_update_commit_failed(&event);
            }
        }
    }

    fn post_event<'a>(&'a self, id: &'a Value, session: &'a SessionContext) -> PostUpdateEvent<'a> {
        PostUpdateEvent {
            entity: self.base.instance(),
            id,
            state: &self.state,
            old_state: self.previous_state.as_deref(),
            dirty_properties: self.dirty_fields.as_deref(),
            persister: self.base.persister().as_ref(),
            session,
        }
    }

    fn has_post_commit_listeners(&self, session: &SessionContext) -> bool {
        let persister = self.base.persister().as_ref();
        session
            .factory()
            .listeners()
            .post_commit_update()
            .iter()
            .any(|l| l.requires_post_commit_handling(persister))
    }

    /// Build the cache value for the new state and hand it to the
    /// transactional update hook; the value is kept for `after_update`.
    fn stage_cache_entry(
        &mut self,
        key: &CacheKey,
        cache: &dyn RegionAccessStrategy,
        previous_version: Option<&Value>,
        session: &SessionContext,
    ) -> Result<()> {
        let persister = Arc::clone(self.base.persister());
        let entry = persister.build_cache_entry(&self.state, self.next_version.as_ref());
        let value = persister.structure_cache_entry(entry)?;
        if cache.update(key, &value, self.next_version.as_ref(), previous_version)? {
            session.factory().statistics().on_cache_put(cache.region_name());
        }
        self.cache_entry = Some(value);
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Result<EntityUpdateSnapshot> {
        Ok(EntityUpdateSnapshot {
            base: self.base.snapshot()?,
            state: self.state.clone(),
            previous_state: self.previous_state.clone(),
            previous_version: self.previous_version.clone(),
            next_version: self.next_version.clone(),
            dirty_fields: self.dirty_fields.clone(),
            has_dirty_collection: self.has_dirty_collection,
            row_id: self.row_id.clone(),
        })
    }

    pub(crate) fn rehydrate(snapshot: EntityUpdateSnapshot, session: &SessionContext) -> Result<Self> {
        Ok(Self {
            base: EntityActionBase::rehydrate(snapshot.base, session)?,
            state: snapshot.state,
            previous_state: snapshot.previous_state,
            previous_version: snapshot.previous_version,
            next_version: snapshot.next_version,
            dirty_fields: snapshot.dirty_fields,
            has_dirty_collection: snapshot.has_dirty_collection,
            row_id: snapshot.row_id,
            cache_key: None,
            cache_entry: None,
            lock: None,
            locked_version: None,
        })
    }
}

impl Executable for EntityUpdateAction {
    fn name(&self) -> &'static str {
        "EntityUpdateAction"
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

        let veto = self.pre_update(&id, session);
        if veto {
            debug!(entity = %self.base.entity_name(), %id, "Update vetoed by listener");
        }

        let previous_version = if persister.is_version_property_generated() {
            // the database assigned the version on the last write; the
            // instance carries it, the flush snapshot may not
            persister.version(&instance)?
        } else {
            self.previous_version.clone()
        };

        if let Some(cache) = persister.cache_access() {
            let key = persister.cache_key(&id);
            let lock = cache.lock_item(&key, previous_version.as_ref(), session.lock_owner())?;
            trace!(%key, %lock, "Locked cache item before update");
            self.cache_key = Some(key);
            self.lock = Some(lock);
        }
        self.locked_version = previous_version.clone();

        if !veto {
            persister.update(
                EntityUpdate {
                    id: &id,
                    state: &self.state,
                    dirty_fields: self.dirty_fields.as_deref(),
                    has_dirty_collection: self.has_dirty_collection,
                    previous_state: self.previous_state.as_deref(),
                    previous_version: previous_version.as_ref(),
                    instance: &instance,
                    row_id: self.row_id.as_ref(),
                },
                session,
            )?;
        }

        let status = session
            .persistence()
            .entry(&instance)
            .map(|entry| entry.status())
            .ok_or_else(|| {
                DbError::AssertionFailure("possible non-threadsafe access to session".into())
            })?;

        if status == EntityStatus::Managed || persister.is_version_property_generated() {
            if persister.has_update_generated_properties() && !veto {
                persister.process_update_generated_properties(&id, &instance, &mut self.state, session)?;
                if persister.is_version_property_generated() {
                    self.next_version = persister.version_from_state(&self.state);
                }
            }
            let entry = session.persistence_mut().entry_mut(&instance).ok_or_else(|| {
                DbError::AssertionFailure("possible non-threadsafe access to session".into())
            })?;
            entry.post_update(&instance, &self.state, self.next_version.clone())?;
        }

        if let (Some(cache), Some(key)) = (persister.cache_access(), self.cache_key.clone()) {
            if persister.is_cache_invalidation_required()
                || status != EntityStatus::Managed
                || veto
                || !session.cache_mode().is_put_enabled()
            {
                if let Err(e) = cache.remove(&key) {
                    warn!(%key, error = %e, "Unable to invalidate cache entry after update");
                }
            } else if let Err(e) =
                self.stage_cache_entry(&key, cache.as_ref(), previous_version.as_ref(), session)
            {
                warn!(%key, error = %e, "Unable to stage cache entry after update");
            }
        }

        self.post_update(&id, session);

        if !veto {
            session
                .factory()
                .statistics()
                .on_entity_update(self.base.entity_name());
        }
        Ok(())
    }

    fn has_after_transaction_completion(&self, session: &SessionContext) -> bool {
        self.base.persister().has_cache() || self.has_post_commit_listeners(session)
    }
}

impl AfterTransactionCompletionProcess for EntityUpdateAction {
    fn after_transaction_completion(&mut self, success: bool, session: &mut SessionContext) -> Result<()> {
        let persister = Arc::clone(self.base.persister());
        let mut outcome = Ok(());

        if let (Some(cache), Some(key)) = (persister.cache_access(), self.cache_key.take()) {
            outcome = match (self.lock.take(), self.cache_entry.take()) {
                (Some(lock), Some(value)) if success => cache
                    .after_update(&key, value, self.next_version.as_ref(), self.locked_version.as_ref(), lock)
                    .map(|put| {
                        if put {
                            session.factory().statistics().on_cache_put(cache.region_name());
                        }
                    }),
                (Some(lock), _) => cache.unlock_item(&key, lock),
                // execution failed before the lock was taken
                (None, _) => Ok(()),
            };
        }

        if let Ok(id) = self.base.id(session) {
            self.post_commit_update(success, &id, session);
        }
        outcome
    }
}

impl ActionOrder for EntityUpdateAction {
    fn compare(&self, other: &Self) -> Ordering {
        compare_entity_actions(&self.base, &other.base)
    }
}
