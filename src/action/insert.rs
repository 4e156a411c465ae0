use std::cmp::Ordering;

use super::base::{compare_entity_actions, EntityActionBase};
use super::snapshot::InsertSnapshot;
use super::{
    ActionOrder, AfterTransactionCompletionProcess, EntityIdentityInsertAction, EntityInsertAction,
    Executable,
};
use crate::core::Result;
use crate::session::{EntityInstance, SessionContext};

/// Entry of the insertions list: assigned-id inserts and delayed identity
/// inserts share one ordering.
pub enum InsertAction {
    Assigned(EntityInsertAction),
    Identity(EntityIdentityInsertAction),
}

impl InsertAction {
    pub fn base(&self) -> &EntityActionBase {
        match self {
            InsertAction::Assigned(a) => a.base(),
            InsertAction::Identity(a) => a.base(),
        }
    }

    pub fn instance(&self) -> &EntityInstance {
        self.base().instance()
    }

    pub(crate) fn snapshot(&self) -> Result<InsertSnapshot> {
        Ok(match self {
            InsertAction::Assigned(a) => InsertSnapshot::Assigned(a.snapshot()?),
            InsertAction::Identity(a) => InsertSnapshot::Identity(a.snapshot()?),
        })
    }

    pub(crate) fn rehydrate(snapshot: InsertSnapshot, session: &SessionContext) -> Result<Self> {
        Ok(match snapshot {
            InsertSnapshot::Assigned(s) => InsertAction::Assigned(EntityInsertAction::rehydrate(s, session)?),
            InsertSnapshot::Identity(s) => {
                InsertAction::Identity(EntityIdentityInsertAction::rehydrate(s, session)?)
            }
        })
    }
}

impl From<EntityInsertAction> for InsertAction {
    fn from(action: EntityInsertAction) -> Self {
        InsertAction::Assigned(action)
    }
}

impl From<EntityIdentityInsertAction> for InsertAction {
    fn from(action: EntityIdentityInsertAction) -> Self {
        InsertAction::Identity(action)
    }
}

impl Executable for InsertAction {
    fn name(&self) -> &'static str {
        match self {
            InsertAction::Assigned(a) => a.name(),
            InsertAction::Identity(a) => a.name(),
        }
    }

    fn property_spaces(&self) -> &[String] {
        self.base().property_spaces()
    }

    fn before_executions(&mut self, session: &mut SessionContext) -> Result<()> {
        match self {
            InsertAction::Assigned(a) => a.before_executions(session),
            InsertAction::Identity(a) => a.before_executions(session),
        }
    }

    fn execute(&mut self, session: &mut SessionContext) -> Result<()> {
        match self {
            InsertAction::Assigned(a) => a.execute(session),
            InsertAction::Identity(a) => a.execute(session),
        }
    }

    fn has_after_transaction_completion(&self, session: &SessionContext) -> bool {
        match self {
            InsertAction::Assigned(a) => a.has_after_transaction_completion(session),
            InsertAction::Identity(a) => a.has_after_transaction_completion(session),
        }
    }
}

impl AfterTransactionCompletionProcess for InsertAction {
    fn after_transaction_completion(&mut self, success: bool, session: &mut SessionContext) -> Result<()> {
        match self {
            InsertAction::Assigned(a) => a.after_transaction_completion(success, session),
            InsertAction::Identity(a) => a.after_transaction_completion(success, session),
        }
    }
}

impl ActionOrder for InsertAction {
    fn compare(&self, other: &Self) -> Ordering {
        compare_entity_actions(self.base(), other.base())
    }
}
