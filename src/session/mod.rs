// ============================================================================
// Session
// ============================================================================
//
// A session is one unit of work: it tracks the instances it loaded or
// persisted (first-level state), queues the writes decided on for them and
// runs the queue on flush. Completion hooks keep the shared second-level
// cache consistent with the transaction outcome.
//
// ============================================================================

pub mod collection;
pub mod context;
pub mod entry;
pub mod identifier;
pub mod instance;
pub mod persistence;

pub use collection::{CollectionDiff, CollectionHandle, CollectionKind, PersistentCollection, QueuedOperation};
pub use context::{CacheMode, SessionContext};
pub use entry::{CollectionEntry, EntityEntry, EntityStatus};
pub use identifier::{DelayedPostInsertIdentifier, EntityId, EntityKey, SessionId};
pub use instance::{EntityInstance, InstanceHandle};
pub use persistence::PersistenceContext;

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::action::{
    ActionQueue, BulkOperationCleanupAction, CollectionRecreateAction, CollectionRemoveAction,
    CollectionUpdateAction, EntityDeleteAction, EntityIdentityInsertAction,
    EntityIncrementVersionProcess, EntityInsertAction, EntityUpdateAction,
    EntityVerifyVersionProcess, QueuedOperationCollectionAction,
};
use crate::core::{DbError, Result, State, Value};
use crate::factory::SessionFactory;
use crate::persister::EntityPersister;

pub struct Session {
    context: SessionContext,
    actions: ActionQueue,
}

impl Session {
    pub fn open(factory: Arc<SessionFactory>) -> Self {
        let context = SessionContext::new(factory);
        debug!(session = %context.id(), "Opened session");
        Self {
            context,
            actions: ActionQueue::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.context.id()
    }

    pub fn factory(&self) -> &Arc<SessionFactory> {
        self.context.factory()
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.context
    }

    pub fn action_queue(&self) -> &ActionQueue {
        &self.actions
    }

    pub fn action_queue_mut(&mut self) -> &mut ActionQueue {
        &mut self.actions
    }

    /// Borrow the context and the queue at once, to build an action against
    /// the context and queue it.
    pub fn split_mut(&mut self) -> (&mut SessionContext, &mut ActionQueue) {
        (&mut self.context, &mut self.actions)
    }

    pub fn enable_filter(&mut self, name: impl Into<String>) {
        self.context.enable_filter(name);
    }

    pub fn disable_filter(&mut self, name: &str) -> bool {
        self.context.disable_filter(name)
    }

    pub fn set_cache_mode(&mut self, mode: CacheMode) {
        self.context.set_cache_mode(mode);
    }

    fn entity_persister(&self, entity_name: &str) -> Result<Arc<dyn EntityPersister>> {
        Ok(Arc::clone(
            self.context.factory().metamodel().entity_persister(entity_name)?,
        ))
    }

    fn tracked_entry(&self, instance: &EntityInstance) -> Result<&EntityEntry> {
        self.context.persistence().entry(instance).ok_or_else(|| {
            DbError::AssertionFailure(format!(
                "instance of {} is not associated with the session",
                instance.entity_name()
            ))
        })
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    /// Make a new instance persistent under an assigned identifier. The row
    /// is written on flush.
    pub fn persist(&mut self, entity_name: &str, id: Value, state: State) -> Result<EntityInstance> {
        let persister = self.entity_persister(entity_name)?;
        let version = persister.version_from_state(&state);
        let instance = EntityInstance::with_id(entity_name, id.clone(), state.clone());
        let action = EntityInsertAction::new(id, state, instance.clone(), version, persister, &self.context);
        self.actions.add_insert(action, &mut self.context)?;
        Ok(instance)
    }

    /// Make a new instance persistent under a database-generated identifier.
    ///
    /// Without `delayed` the row is written right away and the generated id
    /// returned; with it the insert waits for the flush.
    pub fn persist_identity(
        &mut self,
        entity_name: &str,
        state: State,
        delayed: bool,
    ) -> Result<(EntityInstance, Option<Value>)> {
        let persister = self.entity_persister(entity_name)?;
        let instance = EntityInstance::new(entity_name, state.clone());
        let action = EntityIdentityInsertAction::new(state, instance.clone(), persister, delayed, &self.context);
        let id = self.actions.add_identity_insert(action, &mut self.context)?;
        Ok((instance, id))
    }

    /// Start tracking an instance read from the database.
    pub fn track_loaded(&mut self, entity_name: &str, id: Value, state: State) -> Result<EntityInstance> {
        let persister = self.entity_persister(entity_name)?;
        let key = EntityKey::known(entity_name, id.clone());
        if let Some(instance) = self.context.persistence().entity(&key) {
            return Ok(instance.clone());
        }

        let status = if persister.is_mutable() {
            EntityStatus::Managed
        } else {
            EntityStatus::ReadOnly
        };
        let version = persister.version_from_state(&state);
        let instance = EntityInstance::with_id(entity_name, id, state.clone());
        self.context
            .persistence_mut()
            .add_entity(&instance, status, &state, key, version, true, persister)?;
        Ok(instance)
    }

    /// Queue an update of a managed instance to `state`.
    ///
    /// The version is taken from the instance as it is now and incremented
    /// unless the database generates it, so consecutive updates within one
    /// flush chain their versions.
    pub fn update(&mut self, instance: &EntityInstance, mut state: State) -> Result<()> {
        let entry = self.tracked_entry(instance)?;
        let persister = Arc::clone(entry.persister());
        let id = entry.id().known().cloned().ok_or_else(|| {
            DbError::AssertionFailure(format!(
                "update of {} before its identifier was generated",
                instance.entity_name()
            ))
        })?;
        if entry.status() == EntityStatus::ReadOnly {
            return Err(DbError::ExecutionError(format!(
                "{} instance [{}] is read-only",
                instance.entity_name(),
                id
            )));
        }

        let previous_state = instance.state()?;
        let previous_version = persister.version(instance)?;
        let next_version = match (persister.version_property_index(), &previous_version) {
            (Some(index), Some(previous)) => {
                // a generated version is assigned by the write; keep the current one until then
                let next = if persister.is_version_property_generated() {
                    previous.clone()
                } else {
                    previous.next_version()?
                };
                if let Some(slot) = state.get_mut(index) {
                    *slot = next.clone();
                }
                Some(next)
            }
            _ => previous_version.clone(),
        };
        let dirty_fields: Vec<usize> = state
            .iter()
            .enumerate()
            .filter(|(i, value)| previous_state.get(*i) != Some(*value))
            .map(|(i, _)| i)
            .collect();

        instance.set_state(state.clone())?;
        let action = EntityUpdateAction::new(id, state, instance.clone(), persister, &self.context)
            .previous_state(previous_state)
            .versions(previous_version, next_version)
            .dirty_fields(dirty_fields);
        self.actions.add_update(action);
        Ok(())
    }

    /// Queue the deletion of a managed instance.
    pub fn delete(&mut self, instance: &EntityInstance) -> Result<()> {
        self.schedule_delete(instance, false)
    }

    /// Queue the deletion of an orphaned child, ahead of every insert.
    pub fn delete_orphan(&mut self, instance: &EntityInstance) -> Result<()> {
        self.schedule_delete(instance, true)
    }

    fn schedule_delete(&mut self, instance: &EntityInstance, orphan: bool) -> Result<()> {
        let entry = self.tracked_entry(instance)?;
        let persister = Arc::clone(entry.persister());
        let id = entry.id().known().cloned().ok_or_else(|| {
            DbError::AssertionFailure(format!(
                "delete of {} before its identifier was generated",
                instance.entity_name()
            ))
        })?;
        let version = persister.version(instance)?;
        let state = entry.loaded_state().map(<[Value]>::to_vec);

        if let Some(entry) = self.context.persistence_mut().entry_mut(instance) {
            entry.set_status(EntityStatus::Deleted);
        }
        let action = EntityDeleteAction::new(id, state, version, instance.clone(), persister, false, &self.context);
        if orphan {
            self.actions.add_orphan_removal(action);
        } else {
            self.actions.add_delete(action);
        }
        Ok(())
    }

    /// Take back a queued delete.
    pub fn undelete(&mut self, instance: &EntityInstance) -> Result<()> {
        self.actions.unschedule_deletion(instance)?;
        if let Some(entry) = self.context.persistence_mut().entry_mut(instance) {
            entry.set_status(EntityStatus::Managed);
        }
        Ok(())
    }

    /// Start tracking a collection under the key of its owner.
    pub fn track_collection(&mut self, collection: &PersistentCollection, key: Option<Value>) {
        self.context.persistence_mut().add_collection(collection, key);
    }

    /// Owner key of a tracked collection: the current key, or the owner's
    /// identifier, which may still be a delayed one.
    fn collection_key(&self, collection: &PersistentCollection) -> Result<EntityId> {
        if let Some(key) = self
            .context
            .persistence()
            .collection_entry(collection)
            .and_then(|entry| entry.current_key())
        {
            return Ok(EntityId::Known(key.clone()));
        }
        if let Some(owner) = collection.owner()?
            && let Some(entry) = self.context.persistence().entry(&owner)
        {
            return Ok(entry.id().clone());
        }
        Err(DbError::AssertionFailure(format!(
            "no owner key for collection {}",
            collection.role()
        )))
    }

    /// Queue writing every element of a collection that was null before.
    pub fn recreate_collection(&mut self, collection: &PersistentCollection) -> Result<()> {
        let persister = Arc::clone(self.context.factory().metamodel().collection_persister(collection.role())?);
        let key = self.collection_key(collection)?;
        let action = CollectionRecreateAction::new(collection.clone(), persister, key, &self.context);
        self.actions.add_collection_recreate(action);
        Ok(())
    }

    /// Queue the removal of every row of a collection.
    pub fn remove_collection(&mut self, collection: &PersistentCollection) -> Result<()> {
        let persister = Arc::clone(self.context.factory().metamodel().collection_persister(collection.role())?);
        let key = self.collection_key(collection)?;
        let empty_snapshot = collection.was_initialized()? && collection.snapshot()?.is_empty();
        let action =
            CollectionRemoveAction::from_collection(collection.clone(), persister, key, empty_snapshot, &self.context)?;
        self.actions.add_collection_remove(action);
        Ok(())
    }

    /// Queue the removal of a collection the session never loaded.
    pub fn remove_unloaded_collection(&mut self, owner: &EntityInstance, role: &str) -> Result<()> {
        let persister = Arc::clone(self.context.factory().metamodel().collection_persister(role)?);
        let key = self.tracked_entry(owner)?.id().clone();
        let action = CollectionRemoveAction::from_owner(owner.clone(), persister, key, false, &self.context);
        self.actions.add_collection_remove(action);
        Ok(())
    }

    /// Queue the write of a dirty collection. Operations queued on a
    /// collection that was never loaded are written as they are.
    pub fn update_collection(&mut self, collection: &PersistentCollection) -> Result<()> {
        let persister = Arc::clone(self.context.factory().metamodel().collection_persister(collection.role())?);
        let key = self.collection_key(collection)?;
        if !collection.was_initialized()? && collection.has_queued_operations()? {
            let action = QueuedOperationCollectionAction::new(collection.clone(), persister, key, &self.context);
            self.actions.add_queued_operation(action);
            return Ok(());
        }
        let empty_snapshot = collection.snapshot()?.is_empty();
        let action = CollectionUpdateAction::new(collection.clone(), persister, key, empty_snapshot, &self.context);
        self.actions.add_collection_update(action);
        Ok(())
    }

    /// Check before commit that nobody else bumped the version of `instance`.
    pub fn verify_version_on_commit(&mut self, instance: &EntityInstance) {
        self.actions
            .register_before_process(Box::new(EntityVerifyVersionProcess::new(instance.clone())));
    }

    /// Bump the version of `instance` before commit even if it is unchanged.
    pub fn increment_version_on_commit(&mut self, instance: &EntityInstance) {
        self.actions
            .register_before_process(Box::new(EntityIncrementVersionProcess::new(instance.clone())));
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Look an entity up: first-level state, then the second-level cache as
    /// of this session's transaction start, then the database.
    pub fn find(&mut self, entity_name: &str, id: &Value) -> Result<Option<EntityInstance>> {
        let persister = self.entity_persister(entity_name)?;
        let key = EntityKey::known(entity_name, id.clone());
        if let Some(instance) = self.context.persistence().entity(&key) {
            trace!(%key, "Resolved from persistence context");
            return Ok(Some(instance.clone()));
        }

        let factory = Arc::clone(self.context.factory());
        let statistics = factory.statistics();
        let cache = persister.cache_access().cloned();

        if let Some(cache) = &cache
            && self.context.cache_mode().is_get_enabled()
        {
            let cache_key = persister.cache_key(id);
            match cache.get(&cache_key, self.context.timestamp())? {
                Some(value) => {
                    statistics.on_cache_hit(cache.region_name());
                    let entry = persister.assemble_cache_value(&value)?;
                    trace!(%key, "Resolved from second-level cache");
                    return self
                        .track_loaded(entity_name, id.clone(), entry.disassembled_state().to_vec())
                        .map(Some);
                }
                None => statistics.on_cache_miss(cache.region_name()),
            }
        }

        let Some(state) = persister.load(id, &self.context)? else {
            return Ok(None);
        };

        if let Some(cache) = &cache
            && self.context.cache_mode().is_put_enabled()
        {
            let version = persister.version_from_state(&state);
            let entry = persister.build_cache_entry(&state, version.as_ref());
            let value = persister.structure_cache_entry(entry)?;
            let cache_key = persister.cache_key(id);
            if cache.put_from_load(&cache_key, value, self.context.timestamp(), version.as_ref())? {
                statistics.on_cache_put(cache.region_name());
            }
        }

        self.track_loaded(entity_name, id.clone(), state).map(Some)
    }

    // ------------------------------------------------------------------------
    // Flush and bulk statements
    // ------------------------------------------------------------------------

    /// Run every queued action.
    pub fn flush(&mut self) -> Result<()> {
        if !self.actions.has_any_queued_actions() {
            return Ok(());
        }
        let factory = Arc::clone(self.context.factory());
        self.actions.sort_actions(factory.settings());
        self.actions.sort_collection_actions(factory.settings());
        self.actions.prepare_actions(&mut self.context)?;
        self.actions.execute_actions(&mut self.context)
    }

    /// Run a set-based statement against `spaces`, keeping the second-level
    /// cache clean around it. Pending writes to those tables are flushed
    /// first.
    pub fn execute_bulk_operation<F>(&mut self, spaces: &HashSet<String>, statement: F) -> Result<usize>
    where
        F: FnOnce(&SessionContext) -> Result<usize>,
    {
        if self.actions.are_tables_to_be_updated(spaces) {
            self.flush()?;
        }
        let action = BulkOperationCleanupAction::from_spaces(&self.context, Some(spaces));
        self.actions.add_bulk_cleanup(action, &mut self.context)?;
        let affected = statement(&self.context)?;
        debug!(rows = affected, "Executed bulk operation");
        Ok(affected)
    }

    // ------------------------------------------------------------------------
    // Transaction completion
    // ------------------------------------------------------------------------

    pub fn before_transaction_completion(&mut self) -> Result<()> {
        self.actions.before_transaction_completion(&mut self.context)
    }

    pub fn after_transaction_completion(&mut self, success: bool) -> Result<()> {
        let outcome = self.actions.after_transaction_completion(success, &mut self.context);
        self.context.persistence_mut().clear_inserted_keys();
        self.context.reset_timestamp();
        outcome
    }

    /// Flush, run the before-completion checks and complete the transaction
    /// with their outcome.
    pub fn commit(&mut self) -> Result<()> {
        let outcome = self.flush().and_then(|_| self.before_transaction_completion());
        let completion = self.after_transaction_completion(outcome.is_ok());
        if outcome.is_err() {
            self.actions.clear();
        }
        outcome?;
        completion
    }

    /// Drop pending actions and complete the transaction as failed.
    pub fn rollback(&mut self) -> Result<()> {
        self.actions.clear();
        self.after_transaction_completion(false)
    }
}
