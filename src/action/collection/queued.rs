use std::cmp::Ordering;
use std::sync::Arc;
use tracing::trace;

use super::{compare_collection_actions, CollectionActionBase};
use crate::action::{ActionOrder, AfterTransactionCompletionProcess, Executable};
use crate::core::Result;
use crate::persister::CollectionPersister;
use crate::session::{EntityId, PersistentCollection, SessionContext};

/// Writes the operations queued on a collection that was never loaded
pub struct QueuedOperationCollectionAction {
    base: CollectionActionBase,
}

impl QueuedOperationCollectionAction {
    pub fn new(
        collection: PersistentCollection,
        persister: Arc<dyn CollectionPersister>,
        key: EntityId,
        session: &SessionContext,
    ) -> Self {
        Self {
            base: CollectionActionBase::new(persister, Some(collection), key, session),
        }
    }

    pub fn base(&self) -> &CollectionActionBase {
        &self.base
    }
}

impl Executable for QueuedOperationCollectionAction {
    fn name(&self) -> &'static str {
        "QueuedOperationCollectionAction"
    }

    fn property_spaces(&self) -> &[String] {
        self.base.property_spaces()
    }

    fn before_executions(&mut self, session: &mut SessionContext) -> Result<()> {
        self.base.before_executions(session)
    }

    fn execute(&mut self, session: &mut SessionContext) -> Result<()> {
        let key = self.base.key(session)?;
        let collection = self.base.require_collection()?;
        let persister = Arc::clone(self.base.persister());

        persister.process_queued_ops(&collection, &key, session)?;
        collection.clear_operation_queue()?;
        trace!(role = %self.base.role(), %key, "Applied queued collection operations");

        // a remove, update or recreate of the same collection finishes the
        // entry bookkeeping itself
        let pending = session
            .persistence()
            .collection_entry(&collection)
            .is_some_and(|entry| entry.has_pending_action());
        if !pending {
            self.base.after_action(session)?;
        }
        self.base.evict(session)
    }

    fn has_after_transaction_completion(&self, _session: &SessionContext) -> bool {
        self.base.has_after_transaction_completion()
    }
}

impl AfterTransactionCompletionProcess for QueuedOperationCollectionAction {
    fn after_transaction_completion(&mut self, success: bool, _session: &mut SessionContext) -> Result<()> {
        self.base.after_transaction_completion(success)
    }
}

impl ActionOrder for QueuedOperationCollectionAction {
    fn compare(&self, other: &Self) -> Ordering {
        compare_collection_actions(&self.base, &other.base)
    }
}
