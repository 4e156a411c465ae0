// ============================================================================
// Action Queue
// ============================================================================
//
// Holds the actions scheduled by a flush, grouped by kind, and runs them in a
// fixed order:
//
//   orphan removals, insertions, updates, queued collection operations,
//   collection removals, collection updates, collection creations, deletions
//
// Actions needing work once the transaction completes are kept in the
// after-completion queue after they run.
//
// ============================================================================

use std::collections::HashSet;
use tracing::{debug, trace, warn};

use super::snapshot::ActionQueueSnapshot;
use super::{
    ActionOrder, AfterTransactionCompletionProcess, BeforeTransactionCompletionProcess,
    BulkOperationCleanupAction, CollectionRecreateAction, CollectionRemoveAction,
    CollectionUpdateAction, EntityDeleteAction, EntityIdentityInsertAction, EntityInsertAction,
    EntityUpdateAction, Executable, ExecutableList, InsertAction, QueuedOperationCollectionAction,
};
use crate::config::EngineSettings;
use crate::core::{DbError, Result, Value};
use crate::session::{EntityInstance, SessionContext};

/// Processes run right before the transaction commits
#[derive(Default)]
pub struct BeforeTransactionCompletionProcessQueue {
    processes: Vec<Box<dyn BeforeTransactionCompletionProcess>>,
}

impl BeforeTransactionCompletionProcessQueue {
    pub fn register(&mut self, process: Box<dyn BeforeTransactionCompletionProcess>) {
        self.processes.push(process);
    }

    pub fn has_actions(&self) -> bool {
        !self.processes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Run every process; the first failure aborts the commit.
    pub fn before_transaction_completion(&mut self, session: &mut SessionContext) -> Result<()> {
        for mut process in self.processes.drain(..) {
            process.before_transaction_completion(session)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.processes.clear();
    }
}

/// Processes run once the transaction outcome is known, plus the query
/// spaces written during the transaction
#[derive(Default)]
pub struct AfterTransactionCompletionProcessQueue {
    processes: Vec<Box<dyn AfterTransactionCompletionProcess>>,
    query_spaces_to_invalidate: HashSet<String>,
}

impl AfterTransactionCompletionProcessQueue {
    pub fn register(&mut self, process: Box<dyn AfterTransactionCompletionProcess>) {
        self.processes.push(process);
    }

    pub fn add_spaces_to_invalidate<'a, I>(&mut self, spaces: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        self.query_spaces_to_invalidate.extend(spaces.into_iter().cloned());
    }

    pub fn query_spaces_to_invalidate(&self) -> &HashSet<String> {
        &self.query_spaces_to_invalidate
    }

    pub fn has_actions(&self) -> bool {
        !self.processes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Run every process, then invalidate the written query spaces.
    ///
    /// Cache failures are logged and skipped: the database outcome stands
    /// and the remaining locks must still be released. Any other failure is
    /// reported once every process has run.
    pub fn after_transaction_completion(&mut self, success: bool, session: &mut SessionContext) -> Result<()> {
        let mut failure = None;
        for mut process in self.processes.drain(..) {
            match process.after_transaction_completion(success, session) {
                Ok(()) => {}
                Err(e) if e.is_cache_error() => {
                    warn!(error = %e, "Could not release a second-level cache lock");
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(DbError::AssertionFailure(format!(
                            "Exception releasing cache locks: {}",
                            e
                        )));
                    }
                }
            }
        }

        let spaces: Vec<String> = self.query_spaces_to_invalidate.drain().collect();
        if !spaces.is_empty() && session.factory().settings().query_cache_enabled {
            session.factory().timestamps().invalidate(&spaces)?;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn clear(&mut self) {
        self.processes.clear();
        self.query_spaces_to_invalidate.clear();
    }
}

/// Queue of the actions scheduled by a session
#[derive(Default)]
pub struct ActionQueue {
    orphan_removals: ExecutableList<EntityDeleteAction>,
    insertions: ExecutableList<InsertAction>,
    updates: ExecutableList<EntityUpdateAction>,
    collection_queued_ops: ExecutableList<QueuedOperationCollectionAction>,
    collection_removals: ExecutableList<CollectionRemoveAction>,
    collection_updates: ExecutableList<CollectionUpdateAction>,
    collection_creations: ExecutableList<CollectionRecreateAction>,
    deletions: ExecutableList<EntityDeleteAction>,

    before_completion: BeforeTransactionCompletionProcessQueue,
    after_completion: AfterTransactionCompletionProcessQueue,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    /// Queue an insert with an assigned identifier and start tracking the
    /// instance.
    pub fn add_insert(&mut self, action: EntityInsertAction, session: &mut SessionContext) -> Result<()> {
        action.make_entity_managed(session)?;
        self.insertions.add(InsertAction::Assigned(action));
        Ok(())
    }

    /// Schedule an identity insert.
    ///
    /// A non-delayed insert runs right away, after every insert queued before
    /// it, and the generated identifier is returned. A delayed one is queued
    /// and the instance tracked under its placeholder key.
    pub fn add_identity_insert(
        &mut self,
        mut action: EntityIdentityInsertAction,
        session: &mut SessionContext,
    ) -> Result<Option<Value>> {
        if !action.is_early_insert() {
            action.make_entity_managed(session)?;
            self.insertions.add(InsertAction::Identity(action));
            return Ok(None);
        }

        self.execute_inserts(session)?;

        trace!(entity = %action.base().entity_name(), "Executing identity insert immediately");
        let outcome = action.execute(session);
        let generated = action.generated_id().cloned();
        // a vetoed insert produced no row to track
        let managed = if outcome.is_ok() && generated.is_some() {
            action.make_entity_managed(session)
        } else {
            Ok(())
        };
        self.register_cleanup(action, session)?;
        outcome?;
        managed?;
        Ok(generated)
    }

    pub fn add_update(&mut self, action: EntityUpdateAction) {
        self.updates.add(action);
    }

    pub fn add_delete(&mut self, action: EntityDeleteAction) {
        if action.is_orphan_removal() {
            self.orphan_removals.add(action);
        } else {
            self.deletions.add(action);
        }
    }

    /// Queue the removal of an orphaned child; it runs before any insert so
    /// a replacement with the same unique key can be inserted.
    pub fn add_orphan_removal(&mut self, action: EntityDeleteAction) {
        self.orphan_removals.add(action.orphan_removal());
    }

    pub fn add_collection_recreate(&mut self, action: CollectionRecreateAction) {
        self.collection_creations.add(action);
    }

    pub fn add_collection_remove(&mut self, action: CollectionRemoveAction) {
        self.collection_removals.add(action);
    }

    pub fn add_collection_update(&mut self, action: CollectionUpdateAction) {
        self.collection_updates.add(action);
    }

    pub fn add_queued_operation(&mut self, action: QueuedOperationCollectionAction) {
        self.collection_queued_ops.add(action);
    }

    /// Evict the regions a bulk statement touches and keep the cleanup for
    /// transaction completion.
    pub fn add_bulk_cleanup(&mut self, action: BulkOperationCleanupAction, session: &mut SessionContext) -> Result<()> {
        action.init(session)?;
        self.register_cleanup(action, session)
    }

    pub fn register_before_process(&mut self, process: Box<dyn BeforeTransactionCompletionProcess>) {
        self.before_completion.register(process);
    }

    pub fn register_after_process(&mut self, process: Box<dyn AfterTransactionCompletionProcess>) {
        self.after_completion.register(process);
    }

    fn register_cleanup<E>(&mut self, executable: E, session: &mut SessionContext) -> Result<()>
    where
        E: Executable + 'static,
    {
        if session.factory().settings().query_cache_enabled {
            let spaces = executable.property_spaces();
            session.factory().timestamps().pre_invalidate(spaces)?;
            self.after_completion.add_spaces_to_invalidate(spaces);
        }
        if executable.has_after_transaction_completion(session) {
            self.after_completion.register(Box::new(executable));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Run every queued insert.
    pub fn execute_inserts(&mut self, session: &mut SessionContext) -> Result<()> {
        execute_list(&mut self.insertions, &mut self.after_completion, session)
    }

    /// Run every queued action, list by list.
    pub fn execute_actions(&mut self, session: &mut SessionContext) -> Result<()> {
        debug!(
            session = %session.id(),
            inserts = self.insertions.len(),
            updates = self.updates.len(),
            deletes = self.deletions.len() + self.orphan_removals.len(),
            collections = self.collection_creations.len()
                + self.collection_updates.len()
                + self.collection_removals.len()
                + self.collection_queued_ops.len(),
            "Executing queued actions"
        );
        let outcome = self.execute_lists(session);
        if outcome.is_err() {
            self.abandon_collection_actions(session);
        }
        outcome
    }

    fn execute_lists(&mut self, session: &mut SessionContext) -> Result<()> {
        execute_list(&mut self.orphan_removals, &mut self.after_completion, session)?;
        execute_list(&mut self.insertions, &mut self.after_completion, session)?;
        execute_list(&mut self.updates, &mut self.after_completion, session)?;
        execute_list(&mut self.collection_queued_ops, &mut self.after_completion, session)?;
        execute_list(&mut self.collection_removals, &mut self.after_completion, session)?;
        execute_list(&mut self.collection_updates, &mut self.after_completion, session)?;
        execute_list(&mut self.collection_creations, &mut self.after_completion, session)?;
        execute_list(&mut self.deletions, &mut self.after_completion, session)
    }

    /// Collection actions lock their keys while being prepared; the ones a
    /// failed flush never reached still have to release them.
    fn abandon_collection_actions(&mut self, session: &SessionContext) {
        abandon_list(&mut self.collection_queued_ops, &mut self.after_completion, session);
        abandon_list(&mut self.collection_removals, &mut self.after_completion, session);
        abandon_list(&mut self.collection_updates, &mut self.after_completion, session);
        abandon_list(&mut self.collection_creations, &mut self.after_completion, session);
    }

    /// Let collection actions lock their cache keys before anything runs.
    pub fn prepare_actions(&mut self, session: &mut SessionContext) -> Result<()> {
        let outcome = prepare_list(&mut self.collection_removals, session)
            .and_then(|_| prepare_list(&mut self.collection_updates, session))
            .and_then(|_| prepare_list(&mut self.collection_creations, session))
            .and_then(|_| prepare_list(&mut self.collection_queued_ops, session));
        if outcome.is_err() {
            self.abandon_collection_actions(session);
        }
        outcome
    }

    /// Order entity updates and inserts for statement batching, as enabled
    /// by the settings.
    pub fn sort_actions(&mut self, settings: &EngineSettings) {
        if settings.order_updates {
            self.updates.sort();
        }
        if settings.order_inserts {
            self.insertions.sort();
        }
    }

    pub fn sort_collection_actions(&mut self, settings: &EngineSettings) {
        if settings.order_updates {
            self.collection_creations.sort();
            self.collection_updates.sort();
            self.collection_queued_ops.sort();
            self.collection_removals.sort();
        }
    }

    // ------------------------------------------------------------------------
    // Transaction completion
    // ------------------------------------------------------------------------

    pub fn before_transaction_completion(&mut self, session: &mut SessionContext) -> Result<()> {
        self.before_completion.before_transaction_completion(session)
    }

    pub fn after_transaction_completion(&mut self, success: bool, session: &mut SessionContext) -> Result<()> {
        self.after_completion.after_transaction_completion(success, session)
    }

    pub fn has_before_transaction_actions(&self) -> bool {
        self.before_completion.has_actions()
    }

    pub fn has_after_transaction_actions(&self) -> bool {
        self.after_completion.has_actions()
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Whether any queued action writes one of `tables`.
    pub fn are_tables_to_be_updated(&mut self, tables: &HashSet<String>) -> bool {
        if tables.is_empty() {
            return false;
        }
        fn touches<E: Executable + ActionOrder>(list: &mut ExecutableList<E>, tables: &HashSet<String>) -> bool {
            !list.is_empty() && !list.query_spaces().is_disjoint(tables)
        }
        touches(&mut self.orphan_removals, tables)
            || touches(&mut self.insertions, tables)
            || touches(&mut self.updates, tables)
            || touches(&mut self.collection_queued_ops, tables)
            || touches(&mut self.collection_removals, tables)
            || touches(&mut self.collection_updates, tables)
            || touches(&mut self.collection_creations, tables)
            || touches(&mut self.deletions, tables)
    }

    pub fn are_insertions_or_deletions_queued(&self) -> bool {
        !self.insertions.is_empty() || !self.deletions.is_empty() || !self.orphan_removals.is_empty()
    }

    pub fn has_any_queued_actions(&self) -> bool {
        !self.orphan_removals.is_empty()
            || !self.insertions.is_empty()
            || !self.updates.is_empty()
            || !self.collection_queued_ops.is_empty()
            || !self.collection_removals.is_empty()
            || !self.collection_updates.is_empty()
            || !self.collection_creations.is_empty()
            || !self.deletions.is_empty()
    }

    pub fn number_of_insertions(&self) -> usize {
        self.insertions.len()
    }

    pub fn number_of_updates(&self) -> usize {
        self.updates.len()
    }

    pub fn number_of_deletions(&self) -> usize {
        self.deletions.len() + self.orphan_removals.len()
    }

    pub fn number_of_collection_creations(&self) -> usize {
        self.collection_creations.len()
    }

    pub fn number_of_collection_removals(&self) -> usize {
        self.collection_removals.len()
    }

    pub fn number_of_collection_updates(&self) -> usize {
        self.collection_updates.len()
    }

    pub fn number_of_queued_operations(&self) -> usize {
        self.collection_queued_ops.len()
    }

    pub fn insertions(&self) -> &ExecutableList<InsertAction> {
        &self.insertions
    }

    pub fn updates(&self) -> &ExecutableList<EntityUpdateAction> {
        &self.updates
    }

    pub fn deletions(&self) -> &ExecutableList<EntityDeleteAction> {
        &self.deletions
    }

    // ------------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------------

    /// Drop every queued action. Completion processes are kept.
    pub fn clear(&mut self) {
        self.orphan_removals.clear();
        self.insertions.clear();
        self.updates.clear();
        self.collection_queued_ops.clear();
        self.collection_removals.clear();
        self.collection_updates.clear();
        self.collection_creations.clear();
        self.deletions.clear();
    }

    /// Undo a dry-run flush that only checked whether a flush is needed.
    ///
    /// Collection removals queued before the check are kept: they may
    /// belong to collections the session never loaded.
    pub fn clear_from_flush_needed_check(&mut self, previous_collection_removals: usize) {
        self.collection_creations.clear();
        self.collection_updates.clear();
        self.collection_queued_ops.clear();
        self.updates.clear();
        let added = self
            .collection_removals
            .len()
            .saturating_sub(previous_collection_removals);
        self.collection_removals.remove_last_n(added);
    }

    /// Take back a scheduled delete of an instance that became reachable
    /// again.
    pub fn unschedule_deletion(&mut self, instance: &EntityInstance) -> Result<()> {
        if let Some(index) = self.deletions.position(|a| a.instance().same_instance(instance)) {
            self.deletions.remove(index);
            return Ok(());
        }
        if let Some(index) = self
            .orphan_removals
            .position(|a| a.instance().same_instance(instance))
        {
            self.orphan_removals.remove(index);
            return Ok(());
        }
        Err(DbError::AssertionFailure(format!(
            "Unable to perform un-delete for instance {}",
            instance.entity_name()
        )))
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    /// Write the pending entity actions as MessagePack.
    ///
    /// Collection actions only live within one flush and must not be
    /// pending.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let pending_collections = self.collection_queued_ops.len()
            + self.collection_removals.len()
            + self.collection_updates.len()
            + self.collection_creations.len();
        if pending_collections > 0 {
            return Err(DbError::SerializationError(format!(
                "{} collection actions are still queued",
                pending_collections
            )));
        }

        let snapshot = ActionQueueSnapshot {
            insertions: self.insertions.iter().map(InsertAction::snapshot).collect::<Result<_>>()?,
            updates: self.updates.iter().map(EntityUpdateAction::snapshot).collect::<Result<_>>()?,
            deletions: self.deletions.iter().map(EntityDeleteAction::snapshot).collect::<Result<_>>()?,
            orphan_removals: self
                .orphan_removals
                .iter()
                .map(EntityDeleteAction::snapshot)
                .collect::<Result<_>>()?,
        };
        Ok(rmp_serde::to_vec(&snapshot)?)
    }

    /// Read a queue written by `serialize`, relinking every action against
    /// the given session.
    pub fn deserialize(bytes: &[u8], session: &SessionContext) -> Result<Self> {
        let snapshot: ActionQueueSnapshot = rmp_serde::from_slice(bytes)?;
        let mut queue = Self::new();
        for insert in snapshot.insertions {
            queue.insertions.add(InsertAction::rehydrate(insert, session)?);
        }
        for update in snapshot.updates {
            queue.updates.add(EntityUpdateAction::rehydrate(update, session)?);
        }
        for delete in snapshot.deletions {
            queue.deletions.add(EntityDeleteAction::rehydrate(delete, session)?);
        }
        for delete in snapshot.orphan_removals {
            queue.orphan_removals.add(EntityDeleteAction::rehydrate(delete, session)?);
        }
        Ok(queue)
    }
}

/// Execute every action of a list and empty it.
///
/// An action is kept for transaction completion even when its execution
/// failed, so the cache locks it took are released. The list's spaces are
/// pre-invalidated in either case.
fn execute_list<E>(
    list: &mut ExecutableList<E>,
    after_completion: &mut AfterTransactionCompletionProcessQueue,
    session: &mut SessionContext,
) -> Result<()>
where
    E: Executable + ActionOrder + 'static,
{
    if list.is_empty() {
        return Ok(());
    }

    let spaces: Vec<String> = list.query_spaces().iter().cloned().collect();
    let mut outcome = Ok(());
    for mut executable in list.take_all() {
        trace!(action = executable.name(), "Executing action");
        let result = executable.execute(session);
        if executable.has_after_transaction_completion(session) {
            after_completion.register(Box::new(executable));
        }
        if let Err(e) = result {
            debug!(error = %e, "Action failed, abandoning the rest of the list");
            outcome = Err(e);
            break;
        }
    }

    if session.factory().settings().query_cache_enabled {
        session.factory().timestamps().pre_invalidate(&spaces)?;
        after_completion.add_spaces_to_invalidate(&spaces);
    }
    outcome
}

fn abandon_list<E>(
    list: &mut ExecutableList<E>,
    after_completion: &mut AfterTransactionCompletionProcessQueue,
    session: &SessionContext,
) where
    E: Executable + 'static,
{
    for executable in list.take_all() {
        if executable.has_after_transaction_completion(session) {
            after_completion.register(Box::new(executable));
        }
    }
}

fn prepare_list<E>(list: &mut ExecutableList<E>, session: &mut SessionContext) -> Result<()>
where
    E: Executable + ActionOrder,
{
    for executable in list.iter_mut() {
        executable.before_executions(session)?;
    }
    Ok(())
}
