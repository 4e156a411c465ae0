use std::cmp::Ordering;
use std::sync::Arc;

use super::{compare_collection_actions, CollectionActionBase};
use crate::action::{ActionOrder, AfterTransactionCompletionProcess, Executable};
use crate::core::Result;
use crate::event::CollectionEventKind;
use crate::persister::CollectionPersister;
use crate::session::{EntityId, PersistentCollection, SessionContext};

/// Writes every element of a collection that was null before or moved to a
/// new owner.
pub struct CollectionRecreateAction {
    base: CollectionActionBase,
}

impl CollectionRecreateAction {
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

impl Executable for CollectionRecreateAction {
    fn name(&self) -> &'static str {
        "CollectionRecreateAction"
    }

    fn property_spaces(&self) -> &[String] {
        self.base.property_spaces()
    }

    fn before_executions(&mut self, session: &mut SessionContext) -> Result<()> {
        self.base.before_executions(session)?;
        self.base.mark_entry(session, |entry| entry.set_do_recreate(true));
        Ok(())
    }

    fn execute(&mut self, session: &mut SessionContext) -> Result<()> {
        let key = self.base.key(session)?;
        let collection = self.base.require_collection()?;
        let persister = Arc::clone(self.base.persister());

        self.base.fire(CollectionEventKind::PreRecreate, session)?;
        persister.recreate(&collection, &key, session)?;
        self.base.after_action(session)?;
        self.base.evict(session)?;
        self.base.fire(CollectionEventKind::PostRecreate, session)?;

        session
            .factory()
            .statistics()
            .on_collection_recreate(self.base.role());
        Ok(())
    }

    fn has_after_transaction_completion(&self, _session: &SessionContext) -> bool {
        self.base.has_after_transaction_completion()
    }
}

impl AfterTransactionCompletionProcess for CollectionRecreateAction {
    fn after_transaction_completion(&mut self, success: bool, _session: &mut SessionContext) -> Result<()> {
        self.base.after_transaction_completion(success)
    }
}

impl ActionOrder for CollectionRecreateAction {
    fn compare(&self, other: &Self) -> Ordering {
        compare_collection_actions(&self.base, &other.base)
    }
}
