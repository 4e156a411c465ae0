use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use super::base::{compare_entity_actions, EntityActionBase};
use super::snapshot::EntityInsertSnapshot;
use super::{ActionOrder, AfterTransactionCompletionProcess, Executable};
use crate::cache::CacheValue;
use crate::core::{DbError, Result, State, Value};
use crate::event::{PostInsertEvent, PreInsertEvent};
use crate::persister::EntityPersister;
use crate::session::{EntityId, EntityInstance, EntityKey, EntityStatus, SessionContext};

/// Inserts an entity whose identifier is known up front
pub struct EntityInsertAction {
    base: EntityActionBase,
    state: State,
    version: Option<Value>,
    cache_entry: Option<CacheValue>,
    executed: bool,
}

impl EntityInsertAction {
    pub fn new(
        id: Value,
        state: State,
        instance: EntityInstance,
        version: Option<Value>,
        persister: Arc<dyn EntityPersister>,
        session: &SessionContext,
    ) -> Self {
        Self {
            base: EntityActionBase::new(Some(EntityId::Known(id)), instance, persister, session),
            state,
            version,
            cache_entry: None,
            executed: false,
        }
    }

    pub fn base(&self) -> &EntityActionBase {
        &self.base
    }

    pub fn state(&self) -> &[Value] {
        &self.state
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Start tracking the instance as managed, not yet in the database.
    pub fn make_entity_managed(&self, session: &mut SessionContext) -> Result<()> {
        let id = self.base.id(session)?;
        let persister = Arc::clone(self.base.persister());
        let status = if persister.is_mutable() {
            EntityStatus::Managed
        } else {
            EntityStatus::ReadOnly
        };
        session.persistence_mut().add_entity(
            self.base.instance(),
            status,
            &self.state,
            EntityKey::known(self.base.entity_name(), id),
            self.version.clone(),
            false,
            persister,
        )?;
        Ok(())
    }

    fn is_cache_put_enabled(&self, session: &SessionContext) -> bool {
        let persister = self.base.persister();
        persister.has_cache()
            && !persister.is_cache_invalidation_required()
            && session.cache_mode().is_put_enabled()
    }

    fn pre_insert(&self, id: &Value, session: &SessionContext) -> bool {
        let listeners = session.factory().listeners().pre_insert();
        if listeners.is_empty() {
            return false;
        }

        let event = PreInsertEvent {
            entity: self.base.instance(),
            id: Some(id),
            state: &self.state,
            persister: self.base.persister().as_ref(),
            session,
        };
        let mut veto = false;
        for listener in listeners {
            veto |= listener.on_pre_insert(&event);
        }
        veto
    }

    fn post_insert(&self, id: &Value, session: &SessionContext) {
        let listeners = session.factory().listeners().post_insert();
        if listeners.is_empty() {
            return;
        }

        let event = self.post_event(id, session);
        for listener in listeners {
            listener.on_post_insert(&event);
        }
    }

    fn post_commit_insert(&self, success: bool, id: &Value, session: &SessionContext) {
        let listeners = session.factory().listeners().post_commit_insert();
        if listeners.is_empty() {
            return;
        }

        let event = self.post_event(id, session);
        for listener in listeners {
            if success {
                listener.on_post_insert(&event);
            } else {
                listener.on_post_insert_commit_failed(&event);
            }
        }
    }

    fn post_event<'a>(&'a self, id: &'a Value, session: &'a SessionContext) -> PostInsertEvent<'a> {
        PostInsertEvent {
            entity: self.base.instance(),
            id: Some(id),
            state: &self.state,
            persister: self.base.persister().as_ref(),
            session,
        }
    }

    fn put_cache_entry(&mut self, id: &Value, session: &SessionContext) -> Result<()> {
        let persister = Arc::clone(self.base.persister());
        let Some(cache) = persister.cache_access() else {
            return Ok(());
        };
        let entry = persister.build_cache_entry(&self.state, self.version.as_ref());
        let value = persister.structure_cache_entry(entry)?;
        let key = persister.cache_key(id);
        if cache.insert(&key, &value, self.version.as_ref())? {
            session.factory().statistics().on_cache_put(cache.region_name());
        }
        self.cache_entry = Some(value);
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Result<EntityInsertSnapshot> {
        Ok(EntityInsertSnapshot {
            base: self.base.snapshot()?,
            state: self.state.clone(),
            version: self.version.clone(),
        })
    }

    pub(crate) fn rehydrate(snapshot: EntityInsertSnapshot, session: &SessionContext) -> Result<Self> {
        Ok(Self {
            base: EntityActionBase::rehydrate(snapshot.base, session)?,
            state: snapshot.state,
            version: snapshot.version,
            cache_entry: None,
            executed: false,
        })
    }
}

impl Executable for EntityInsertAction {
    fn name(&self) -> &'static str {
        "EntityInsertAction"
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

        let veto = self.pre_insert(&id, session);
        if veto {
            debug!(entity = %self.base.entity_name(), %id, "Insert vetoed by listener");
        } else {
            persister.insert(&id, &self.state, &instance, session)?;

            let missing_entry =
                || DbError::AssertionFailure("possible non-threadsafe access to session".into());
            session
                .persistence_mut()
                .entry_mut(&instance)
                .ok_or_else(missing_entry)?
                .post_insert(&self.state);

            if persister.has_insert_generated_properties() {
                persister.process_insert_generated_properties(&id, &instance, &mut self.state, session)?;
                if persister.is_version_property_generated() {
                    self.version = persister.version_from_state(&self.state);
                }
                session
                    .persistence_mut()
                    .entry_mut(&instance)
                    .ok_or_else(missing_entry)?
                    .post_update(&instance, &self.state, self.version.clone())?;
            }

            session
                .persistence_mut()
                .register_inserted_key(self.base.entity_name(), &id);
        }

        if !veto && self.is_cache_put_enabled(session) {
            if let Err(e) = self.put_cache_entry(&id, session) {
                warn!(entity = %self.base.entity_name(), %id, error = %e, "Unable to cache inserted entity");
            }
        }

        self.post_insert(&id, session);

        if !veto {
            session
                .factory()
                .statistics()
                .on_entity_insert(self.base.entity_name());
        }
        self.executed = true;
        Ok(())
    }

    fn has_after_transaction_completion(&self, session: &SessionContext) -> bool {
        let persister = self.base.persister().as_ref();
        self.is_cache_put_enabled(session)
            || session
                .factory()
                .listeners()
                .post_commit_insert()
                .iter()
                .any(|l| l.requires_post_commit_handling(persister))
    }
}

impl AfterTransactionCompletionProcess for EntityInsertAction {
    fn after_transaction_completion(&mut self, success: bool, session: &mut SessionContext) -> Result<()> {
        let persister = Arc::clone(self.base.persister());
        let id = self.base.id(session)?;
        let mut outcome = Ok(());

        if let (true, Some(cache), Some(value)) =
            (success, persister.cache_access(), self.cache_entry.take())
        {
            let key = persister.cache_key(&id);
            outcome = cache.after_insert(&key, value, self.version.as_ref()).map(|put| {
                if put {
                    session.factory().statistics().on_cache_put(cache.region_name());
                }
            });
        }
        // a rolled-back insert leaves nothing behind in the region
        self.cache_entry = None;

        self.post_commit_insert(success, &id, session);
        outcome
    }
}

impl ActionOrder for EntityInsertAction {
    fn compare(&self, other: &Self) -> Ordering {
        compare_entity_actions(&self.base, &other.base)
    }
}
