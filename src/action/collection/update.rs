use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use super::{compare_collection_actions, CollectionActionBase};
use crate::action::{ActionOrder, AfterTransactionCompletionProcess, Executable};
use crate::core::{DbError, Result};
use crate::event::CollectionEventKind;
use crate::persister::CollectionPersister;
use crate::session::{EntityId, PersistentCollection, SessionContext};

/// Brings the rows of a dirty collection in line with its elements
///
/// The write strategy is picked at execution time from the collection
/// state:
///
/// - not initialized: only queued operations can be pending, and those are
///   written by the queued-operation action; the cache is still notified
/// - initialized and now empty: delete every row
/// - the persister cannot express the change incrementally: delete every
///   row, then write all elements again
/// - otherwise: delete removed rows, update changed rows, insert new ones
pub struct CollectionUpdateAction {
    base: CollectionActionBase,
    empty_snapshot: bool,
}

impl CollectionUpdateAction {
    pub fn new(
        collection: PersistentCollection,
        persister: Arc<dyn CollectionPersister>,
        key: EntityId,
        empty_snapshot: bool,
        session: &SessionContext,
    ) -> Self {
        Self {
            base: CollectionActionBase::new(persister, Some(collection), key, session),
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

impl Executable for CollectionUpdateAction {
    fn name(&self) -> &'static str {
        "CollectionUpdateAction"
    }

    fn property_spaces(&self) -> &[String] {
        self.base.property_spaces()
    }

    fn before_executions(&mut self, session: &mut SessionContext) -> Result<()> {
        self.base.before_executions(session)?;
        self.base.mark_entry(session, |entry| entry.set_do_update(true));
        Ok(())
    }

    fn execute(&mut self, session: &mut SessionContext) -> Result<()> {
        let key = self.base.key(session)?;
        let collection = self.base.require_collection()?;
        let persister = Arc::clone(self.base.persister());
        let affected_by_filters = persister.is_affected_by_enabled_filters(session);

        self.base.fire(CollectionEventKind::PreUpdate, session)?;

        if !collection.was_initialized()? {
            if !collection.has_queued_operations()? {
                return Err(DbError::AssertionFailure(format!(
                    "collection {}#{} is not initialized and has no queued operations",
                    self.base.role(),
                    key
                )));
            }
            debug!(role = %self.base.role(), %key, "Uninitialized collection, notifying cache only");
        } else if !affected_by_filters && collection.is_empty()? {
            if !self.empty_snapshot {
                persister.remove(&key, session)?;
            }
        } else if persister.needs_recreate(&collection) {
            if affected_by_filters {
                return Err(DbError::FilteredCollectionRecreate(format!(
                    "{}#{}",
                    self.base.role(),
                    key
                )));
            }
            if !self.empty_snapshot {
                persister.remove(&key, session)?;
            }
            persister.recreate(&collection, &key, session)?;
        } else {
            persister.delete_rows(&collection, &key, session)?;
            persister.update_rows(&collection, &key, session)?;
            persister.insert_rows(&collection, &key, session)?;
        }

        self.base.after_action(session)?;
        self.base.evict(session)?;
        self.base.fire(CollectionEventKind::PostUpdate, session)?;

        session
            .factory()
            .statistics()
            .on_collection_update(self.base.role());
        Ok(())
    }

    fn has_after_transaction_completion(&self, _session: &SessionContext) -> bool {
        self.base.has_after_transaction_completion()
    }
}

impl AfterTransactionCompletionProcess for CollectionUpdateAction {
    fn after_transaction_completion(&mut self, success: bool, _session: &mut SessionContext) -> Result<()> {
        self.base.after_transaction_completion(success)
    }
}

impl ActionOrder for CollectionUpdateAction {
    fn compare(&self, other: &Self) -> Ordering {
        compare_collection_actions(&self.base, &other.base)
    }
}
