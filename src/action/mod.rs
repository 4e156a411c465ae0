// ============================================================================
// Flush-Time Actions
// ============================================================================
//
// Every database mutation a session decides on during flush is queued as an
// action. Actions run in a fixed order (see `queue`), each one writing its
// rows, keeping the session's first-level state in sync and fencing the
// second-level cache with soft locks that are released once the transaction
// outcome is known.
//
//   prepare (collections lock) ─> execute ─> before completion ─> after completion
//
// ============================================================================

pub mod base;
pub mod bulk_cleanup;
pub mod collection;
pub mod entity_delete;
pub mod entity_identity_insert;
pub mod entity_insert;
pub mod entity_update;
pub mod insert;
pub mod list;
pub mod queue;
pub mod snapshot;
pub mod version_process;

pub use base::{compare_entity_actions, EntityActionBase};
pub use bulk_cleanup::BulkOperationCleanupAction;
pub use collection::{
    compare_collection_actions, CollectionActionBase, CollectionRecreateAction, CollectionRemoveAction,
    CollectionUpdateAction, QueuedOperationCollectionAction,
};
pub use entity_delete::EntityDeleteAction;
pub use entity_identity_insert::EntityIdentityInsertAction;
pub use entity_insert::EntityInsertAction;
pub use entity_update::EntityUpdateAction;
pub use insert::InsertAction;
pub use list::ExecutableList;
pub use queue::{
    ActionQueue, AfterTransactionCompletionProcessQueue, BeforeTransactionCompletionProcessQueue,
};
pub use version_process::{EntityIncrementVersionProcess, EntityVerifyVersionProcess};

use std::cmp::Ordering;

use crate::core::Result;
use crate::session::SessionContext;

/// Work run before the transaction commits; an error aborts the commit.
pub trait BeforeTransactionCompletionProcess: Send {
    fn before_transaction_completion(&mut self, session: &mut SessionContext) -> Result<()>;
}

/// Work run once the transaction outcome is known.
pub trait AfterTransactionCompletionProcess: Send {
    fn after_transaction_completion(&mut self, success: bool, session: &mut SessionContext) -> Result<()>;
}

/// A queued database mutation
///
/// Executed actions that report `has_after_transaction_completion` are kept
/// as their own after-completion process.
pub trait Executable: AfterTransactionCompletionProcess {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Storage regions (query spaces) this action writes to
    fn property_spaces(&self) -> &[String];

    /// Called for every queued collection action before any action runs.
    fn before_executions(&mut self, session: &mut SessionContext) -> Result<()>;

    fn execute(&mut self, session: &mut SessionContext) -> Result<()>;

    fn has_after_transaction_completion(&self, session: &SessionContext) -> bool;
}

/// Execution order of actions of the same kind
pub trait ActionOrder {
    fn compare(&self, other: &Self) -> Ordering;
}
