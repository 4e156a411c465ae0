use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use super::{compare_collection_actions, CollectionActionBase};
use crate::action::{ActionOrder, AfterTransactionCompletionProcess, Executable};
use crate::core::{DbError, Result};
use crate::event::CollectionEventKind;
use crate::persister::CollectionPersister;
use crate::session::{EntityId, EntityInstance, PersistentCollection, SessionContext};

/// Deletes every row of a collection
///
/// The owner is captured when the action is built: once the rows are gone
/// the association can no longer be navigated back to it.
pub struct CollectionRemoveAction {
    base: CollectionActionBase,
    empty_snapshot: bool,
}

impl CollectionRemoveAction {
    /// Removal of a collection the session has loaded or wrapped.
    pub fn from_collection(
        collection: PersistentCollection,
        persister: Arc<dyn CollectionPersister>,
        key: EntityId,
        empty_snapshot: bool,
        session: &SessionContext,
    ) -> Result<Self> {
        let owner = session
            .persistence()
            .loaded_collection_owner(&collection)?
            .ok_or_else(|| missing_owner(persister.role()))?;
        Ok(Self {
            base: CollectionActionBase::new(persister, Some(collection), key, session)
                .with_affected_owner(Some(owner)),
            empty_snapshot,
        })
    }

    /// Removal of a collection that was never loaded, known only through its
    /// owner.
    pub fn from_owner(
        owner: EntityInstance,
        persister: Arc<dyn CollectionPersister>,
        key: EntityId,
        empty_snapshot: bool,
        session: &SessionContext,
    ) -> Self {
        Self {
            base: CollectionActionBase::new(persister, None, key, session).with_affected_owner(Some(owner)),
            empty_snapshot,
        }
    }

    pub fn base(&self) -> &CollectionActionBase {
        &self.base
    }

    pub fn is_empty_snapshot(&self) -> bool {
        self.empty_snapshot
    }
}

fn missing_owner(role: &str) -> DbError {
    DbError::AssertionFailure(format!("no owner for removal of collection {}", role))
}

impl Executable for CollectionRemoveAction {
    fn name(&self) -> &'static str {
        "CollectionRemoveAction"
    }

    fn property_spaces(&self) -> &[String] {
        self.base.property_spaces()
    }

    fn before_executions(&mut self, session: &mut SessionContext) -> Result<()> {
        self.base.before_executions(session)?;
        self.base.mark_entry(session, |entry| entry.set_do_remove(true));
        Ok(())
    }

    fn execute(&mut self, session: &mut SessionContext) -> Result<()> {
        let key = self.base.key(session)?;
        let persister = Arc::clone(self.base.persister());

        self.base.fire(CollectionEventKind::PreRemove, session)?;
        if self.empty_snapshot {
            debug!(role = %self.base.role(), %key, "Collection snapshot already empty, skipping delete");
        } else {
            persister.remove(&key, session)?;
        }
        self.base.after_action(session)?;
        self.base.evict(session)?;
        self.base.fire(CollectionEventKind::PostRemove, session)?;

        session
            .factory()
            .statistics()
            .on_collection_remove(self.base.role());
        Ok(())
    }

    fn has_after_transaction_completion(&self, _session: &SessionContext) -> bool {
        self.base.has_after_transaction_completion()
    }
}

impl AfterTransactionCompletionProcess for CollectionRemoveAction {
    fn after_transaction_completion(&mut self, success: bool, _session: &mut SessionContext) -> Result<()> {
        self.base.after_transaction_completion(success)
    }
}

impl ActionOrder for CollectionRemoveAction {
    fn compare(&self, other: &Self) -> Ordering {
        compare_collection_actions(&self.base, &other.base)
    }
}
