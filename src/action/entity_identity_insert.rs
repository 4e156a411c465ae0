use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use super::base::{compare_entity_actions, EntityActionBase};
use super::snapshot::EntityIdentityInsertSnapshot;
use super::{ActionOrder, AfterTransactionCompletionProcess, Executable};
use crate::core::{DbError, Result, State, Value};
use crate::event::{PostInsertEvent, PreInsertEvent};
use crate::persister::EntityPersister;
use crate::session::{
    DelayedPostInsertIdentifier, EntityId, EntityInstance, EntityKey, EntityStatus, SessionContext,
};

/// Inserts an entity whose identifier the database generates
///
/// A non-delayed insert runs as soon as it is scheduled, since the caller
/// needs the identifier right away. A delayed insert is queued like any other
/// insert and tracked under a placeholder identifier until it runs. The
/// second-level cache is never populated from here: the row may not survive
/// the transaction, and there is no lock fencing the key.
pub struct EntityIdentityInsertAction {
    base: EntityActionBase,
    state: State,
    is_delayed: bool,
    delayed_entity_key: Option<EntityKey>,
    generated_id: Option<Value>,
    entity_key: Option<EntityKey>,
    executed: bool,
}

impl EntityIdentityInsertAction {
    pub fn new(
        state: State,
        instance: EntityInstance,
        persister: Arc<dyn EntityPersister>,
        is_delayed: bool,
        session: &SessionContext,
    ) -> Self {
        let delayed = is_delayed.then(|| EntityId::Delayed(DelayedPostInsertIdentifier::new()));
        let delayed_entity_key = delayed
            .clone()
            .map(|id| EntityKey::new(persister.entity_name(), id));
        Self {
            base: EntityActionBase::new(delayed, instance, persister, session),
            state,
            is_delayed,
            delayed_entity_key,
            generated_id: None,
            entity_key: None,
            executed: false,
        }
    }

    pub fn base(&self) -> &EntityActionBase {
        &self.base
    }

    pub fn is_delayed(&self) -> bool {
        self.is_delayed
    }

    /// Non-delayed inserts run immediately when scheduled.
    pub fn is_early_insert(&self) -> bool {
        !self.is_delayed
    }

    pub fn delayed_entity_key(&self) -> Option<&EntityKey> {
        self.delayed_entity_key.as_ref()
    }

    pub fn generated_id(&self) -> Option<&Value> {
        self.generated_id.as_ref()
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Start tracking the instance: under the placeholder key when delayed,
    /// under the generated key once executed.
    pub fn make_entity_managed(&self, session: &mut SessionContext) -> Result<()> {
        let key = match (&self.delayed_entity_key, &self.entity_key) {
            (_, Some(key)) if self.executed => key.clone(),
            (Some(key), _) => key.clone(),
            _ => {
                return Err(DbError::AssertionFailure(format!(
                    "identity insert of {} has neither a generated nor a delayed key",
                    self.base.entity_name()
                )));
            }
        };
        let persister = Arc::clone(self.base.persister());
        let status = if persister.is_mutable() {
            EntityStatus::Managed
        } else {
            EntityStatus::ReadOnly
        };
        let version = persister.version_from_state(&self.state);
        session.persistence_mut().add_entity(
            self.base.instance(),
            status,
            &self.state,
            key,
            version,
            self.executed,
            persister,
        )?;
        Ok(())
    }

    fn pre_insert(&self, session: &SessionContext) -> bool {
        let listeners = session.factory().listeners().pre_insert();
        if listeners.is_empty() {
            return false;
        }

        let event = PreInsertEvent {
            entity: self.base.instance(),
            id: None,
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

    fn post_insert(&self, session: &SessionContext) {
        let listeners = session.factory().listeners().post_insert();
        if listeners.is_empty() {
            return;
        }

        let event = self.post_event(session);
        for listener in listeners {
            listener.on_post_insert(&event);
        }
    }

    fn post_commit_insert(&self, success: bool, session: &SessionContext) {
        let listeners = session.factory().listeners().post_commit_insert();
        if listeners.is_empty() {
            return;
        }

        let event = self.post_event(session);
        for listener in listeners {
            if success {
                listener.on_post_insert(&event);
            } else {
                listener.on_post_insert_commit_failed(&event);
            }
        }
    }

    fn post_event<'a>(&'a self, session: &'a SessionContext) -> PostInsertEvent<'a> {
        PostInsertEvent {
            entity: self.base.instance(),
            id: self.generated_id.as_ref(),
            state: &self.state,
            persister: self.base.persister().as_ref(),
            session,
        }
    }

    pub(crate) fn snapshot(&self) -> Result<EntityIdentityInsertSnapshot> {
        if self.executed {
            return Err(DbError::SerializationError(format!(
                "identity insert of {} already executed",
                self.base.entity_name()
            )));
        }
        Ok(EntityIdentityInsertSnapshot {
            base: self.base.snapshot()?,
            state: self.state.clone(),
            is_delayed: self.is_delayed,
            delayed_entity_key: self.delayed_entity_key.clone(),
        })
    }

    pub(crate) fn rehydrate(
        snapshot: EntityIdentityInsertSnapshot,
        session: &SessionContext,
    ) -> Result<Self> {
        Ok(Self {
            base: EntityActionBase::rehydrate(snapshot.base, session)?,
            state: snapshot.state,
            is_delayed: snapshot.is_delayed,
            delayed_entity_key: snapshot.delayed_entity_key,
            generated_id: None,
            entity_key: None,
            executed: false,
        })
    }
}

impl Executable for EntityIdentityInsertAction {
    fn name(&self) -> &'static str {
        "EntityIdentityInsertAction"
    }

    fn property_spaces(&self) -> &[String] {
        self.base.property_spaces()
    }

    fn before_executions(&mut self, _session: &mut SessionContext) -> Result<()> {
        self.base.reject_before_executions()
    }

    fn execute(&mut self, session: &mut SessionContext) -> Result<()> {
        let persister = Arc::clone(self.base.persister());
        let instance = self.base.instance().clone();

        let veto = self.pre_insert(session);
        if veto {
            debug!(entity = %self.base.entity_name(), "Identity insert vetoed by listener");
        } else {
            let id = persister.insert_generated(&self.state, &instance, session)?;
            if persister.has_insert_generated_properties() {
                persister.process_insert_generated_properties(&id, &instance, &mut self.state, session)?;
            }
            persister.set_identifier(&instance, &id)?;
            session
                .persistence_mut()
                .register_inserted_key(self.base.entity_name(), &id);

            let key = EntityKey::known(self.base.entity_name(), id.clone());
            session.persistence().check_uniqueness(&key, &instance)?;
            debug!(%key, "Generated identifier");

            if !self.is_delayed {
                self.base.set_id(EntityId::Known(id.clone()));
            }
            self.generated_id = Some(id);
            self.entity_key = Some(key);
        }

        // re-key the placeholder entry now that the real id exists
        if let (Some(delayed_key), Some(id)) = (&self.delayed_entity_key, &self.generated_id) {
            session
                .persistence_mut()
                .replace_delayed_entity_identity_insert_keys(delayed_key, id.clone())?;
        }
        if let Some(entry) = session.persistence_mut().entry_mut(&instance) {
            if !veto {
                entry.post_insert(&self.state);
            }
        }

        self.post_insert(session);

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
        session
            .factory()
            .listeners()
            .post_commit_insert()
            .iter()
            .any(|l| l.requires_post_commit_handling(persister))
    }
}

impl AfterTransactionCompletionProcess for EntityIdentityInsertAction {
    fn after_transaction_completion(&mut self, success: bool, session: &mut SessionContext) -> Result<()> {
        self.post_commit_insert(success, session);
        Ok(())
    }
}

impl ActionOrder for EntityIdentityInsertAction {
    fn compare(&self, other: &Self) -> Ordering {
        compare_entity_actions(&self.base, &other.base)
    }
}
