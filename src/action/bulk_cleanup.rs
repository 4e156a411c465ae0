use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::{AfterTransactionCompletionProcess, Executable};
use crate::core::{normalize_spaces, Result};
use crate::factory::Metamodel;
use crate::persister::EntityPersister;
use crate::session::SessionContext;

/// Cache hygiene around a set-based statement
///
/// A bulk update or delete changes rows the session never tracked, so every
/// cached entity type and collection role stored in the touched tables is
/// evicted: once right away, so later reads in the same transaction go to
/// the database, and again when the transaction completes, in case another
/// session refilled the regions in between. The statement itself is run by
/// the caller; `execute` does nothing.
pub struct BulkOperationCleanupAction {
    spaces: Vec<String>,
    affected_entity_names: BTreeSet<String>,
    affected_collection_roles: BTreeSet<String>,
}

impl BulkOperationCleanupAction {
    /// Cleanup for a statement against known entity types.
    pub fn from_persisters(session: &SessionContext, persisters: &[Arc<dyn EntityPersister>]) -> Self {
        let metamodel = session.factory().metamodel();
        let mut action = Self::empty();
        let mut spaces = Vec::new();
        for persister in persisters {
            spaces.extend(persister.property_spaces().iter().cloned());
            action.add_entity(metamodel, persister.as_ref());
        }
        action.spaces = normalize_spaces(spaces);
        action
    }

    /// Cleanup for a statement known only by the tables it touches. An empty
    /// or absent table set affects every cached type.
    pub fn from_spaces(session: &SessionContext, table_spaces: Option<&HashSet<String>>) -> Self {
        let metamodel = session.factory().metamodel();
        let mut action = Self::empty();
        let mut spaces: Vec<String> = table_spaces
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        for persister in metamodel.entity_persisters() {
            if is_affected(table_spaces, persister.property_spaces()) {
                spaces.extend(persister.property_spaces().iter().cloned());
                action.add_entity(metamodel, persister.as_ref());
            }
        }
        for persister in metamodel.collection_persisters() {
            if persister.has_cache() && is_affected(table_spaces, persister.collection_spaces()) {
                spaces.extend(persister.collection_spaces().iter().cloned());
                action
                    .affected_collection_roles
                    .insert(persister.role().to_string());
            }
        }

        action.spaces = normalize_spaces(spaces);
        action
    }

    fn empty() -> Self {
        Self {
            spaces: Vec::new(),
            affected_entity_names: BTreeSet::new(),
            affected_collection_roles: BTreeSet::new(),
        }
    }

    fn add_entity(&mut self, metamodel: &Metamodel, persister: &dyn EntityPersister) {
        if persister.has_cache() {
            self.affected_entity_names
                .insert(persister.entity_name().to_string());
        }
        let Some(roles) = metamodel.collection_roles_by_entity_participant(persister.entity_name()) else {
            return;
        };
        for role in roles {
            if let Ok(collection) = metamodel.collection_persister(role)
                && collection.has_cache()
            {
                self.affected_collection_roles.insert(role.clone());
            }
        }
    }

    pub fn affected_entity_names(&self) -> &BTreeSet<String> {
        &self.affected_entity_names
    }

    pub fn affected_collection_roles(&self) -> &BTreeSet<String> {
        &self.affected_collection_roles
    }

    pub fn spaces(&self) -> &[String] {
        &self.spaces
    }

    /// Evict the affected regions now.
    pub fn init(&self, session: &SessionContext) -> Result<()> {
        self.evict(session)
    }

    fn evict(&self, session: &SessionContext) -> Result<()> {
        let metamodel = session.factory().metamodel();
        for name in &self.affected_entity_names {
            metamodel.evict_entity_region(name)?;
        }
        for role in &self.affected_collection_roles {
            metamodel.evict_collection_region(role)?;
        }
        debug!(
            entities = self.affected_entity_names.len(),
            collections = self.affected_collection_roles.len(),
            "Evicted regions for bulk operation"
        );
        Ok(())
    }
}

fn is_affected(table_spaces: Option<&HashSet<String>>, persister_spaces: &[String]) -> bool {
    match table_spaces {
        None => true,
        Some(set) if set.is_empty() => true,
        Some(set) => persister_spaces.iter().any(|space| set.contains(space)),
    }
}

impl Executable for BulkOperationCleanupAction {
    fn name(&self) -> &'static str {
        "BulkOperationCleanupAction"
    }

    fn property_spaces(&self) -> &[String] {
        &self.spaces
    }

    fn before_executions(&mut self, _session: &mut SessionContext) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, _session: &mut SessionContext) -> Result<()> {
        Ok(())
    }

    fn has_after_transaction_completion(&self, _session: &SessionContext) -> bool {
        true
    }
}

impl AfterTransactionCompletionProcess for BulkOperationCleanupAction {
    fn after_transaction_completion(&mut self, _success: bool, session: &mut SessionContext) -> Result<()> {
        self.evict(session)
    }
}
