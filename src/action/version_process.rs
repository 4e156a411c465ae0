use std::sync::Arc;
use tracing::{debug, trace};

use super::BeforeTransactionCompletionProcess;
use crate::core::{DbError, Result};
use crate::session::{EntityInstance, SessionContext};

/// Re-reads the version of an entity right before commit and fails the
/// transaction if another writer bumped it in the meantime.
///
/// Used for versions generated outside the session, which the in-memory
/// state alone cannot vouch for.
pub struct EntityVerifyVersionProcess {
    instance: EntityInstance,
}

impl EntityVerifyVersionProcess {
    pub fn new(instance: EntityInstance) -> Self {
        Self { instance }
    }

    pub fn instance(&self) -> &EntityInstance {
        &self.instance
    }
}

impl BeforeTransactionCompletionProcess for EntityVerifyVersionProcess {
    fn before_transaction_completion(&mut self, session: &mut SessionContext) -> Result<()> {
        // the instance may have been evicted or deleted since
        let Some(entry) = session.persistence().entry(&self.instance) else {
            trace!(entity = %self.instance.entity_name(), "Entity no longer tracked, skipping version check");
            return Ok(());
        };
        let Some(id) = entry.id().known().cloned() else {
            return Ok(());
        };
        let persister = Arc::clone(entry.persister());
        let expected = entry.version().cloned();

        let latest = persister.current_version(&id, session)?;
        if latest != expected {
            session
                .factory()
                .statistics()
                .on_optimistic_failure(persister.entity_name());
            return Err(DbError::OptimisticLock {
                entity: persister.entity_name().to_string(),
                id: id.to_string(),
                latest: latest.map_or_else(|| "null".to_string(), |v| v.to_string()),
            });
        }
        Ok(())
    }
}

/// Forces a version increment of an entity before commit, for pessimistic
/// force-increment locking.
pub struct EntityIncrementVersionProcess {
    instance: EntityInstance,
}

impl EntityIncrementVersionProcess {
    pub fn new(instance: EntityInstance) -> Self {
        Self { instance }
    }

    pub fn instance(&self) -> &EntityInstance {
        &self.instance
    }
}

impl BeforeTransactionCompletionProcess for EntityIncrementVersionProcess {
    fn before_transaction_completion(&mut self, session: &mut SessionContext) -> Result<()> {
        let Some(entry) = session.persistence().entry(&self.instance) else {
            return Ok(());
        };
        let Some(id) = entry.id().known().cloned() else {
            return Ok(());
        };
        // a deleted entity has no row left to lock
        if !entry.exists_in_database() {
            return Ok(());
        }
        let persister = Arc::clone(entry.persister());
        let current = entry.version().cloned();

        let next = persister.force_version_increment(&id, current.as_ref(), session)?;
        debug!(entity = %persister.entity_name(), %id, version = %next, "Forced version increment");

        if let Some(entry) = session.persistence_mut().entry_mut(&self.instance) {
            entry.force_locked(&self.instance, next)?;
        }
        Ok(())
    }
}
