use std::cmp::Ordering;
use std::sync::Arc;

use super::snapshot::{EntityActionSnapshot, InstanceSnapshot};
use crate::core::{DbError, Result, Value};
use crate::persister::EntityPersister;
use crate::session::{EntityId, EntityInstance, EntityKey, SessionContext, SessionId};

/// State shared by every entity action: which instance, under which
/// identifier, through which persister, on behalf of which session.
#[derive(Clone)]
pub struct EntityActionBase {
    entity_name: String,
    /// `None` only for an identity insert whose id is not generated yet
    id: Option<EntityId>,
    instance: EntityInstance,
    persister: Arc<dyn EntityPersister>,
    session_id: SessionId,
}

impl EntityActionBase {
    pub fn new(
        id: Option<EntityId>,
        instance: EntityInstance,
        persister: Arc<dyn EntityPersister>,
        session: &SessionContext,
    ) -> Self {
        Self {
            entity_name: persister.entity_name().to_string(),
            id,
            instance,
            persister,
            session_id: session.id(),
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn instance(&self) -> &EntityInstance {
        &self.instance
    }

    pub fn persister(&self) -> &Arc<dyn EntityPersister> {
        &self.persister
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Identifier as originally given to the action
    pub fn raw_id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    pub(crate) fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    /// The real identifier. A delayed placeholder is resolved through the
    /// instance's entry, which carries the generated id once the insert ran.
    pub fn id(&self, session: &SessionContext) -> Result<Value> {
        match &self.id {
            Some(EntityId::Known(id)) => Ok(id.clone()),
            Some(EntityId::Delayed(delayed)) => session
                .persistence()
                .entry(&self.instance)
                .and_then(|entry| entry.id().known().cloned())
                .ok_or_else(|| {
                    DbError::AssertionFailure(format!(
                        "delayed identifier {} of {} was never resolved",
                        delayed.sequence(),
                        self.entity_name
                    ))
                }),
            None => Err(DbError::AssertionFailure(format!(
                "identifier of {} was not generated yet",
                self.entity_name
            ))),
        }
    }

    pub fn entity_key(&self, session: &SessionContext) -> Result<EntityKey> {
        Ok(EntityKey::known(self.entity_name.clone(), self.id(session)?))
    }

    pub fn property_spaces(&self) -> &[String] {
        self.persister.property_spaces()
    }

    pub(crate) fn snapshot(&self) -> Result<EntityActionSnapshot> {
        Ok(EntityActionSnapshot {
            entity_name: self.entity_name.clone(),
            id: self.id.clone(),
            instance: InstanceSnapshot::of(&self.instance)?,
        })
    }

    /// Relink a snapshot to `session`: the persister comes from the
    /// metamodel, the instance from the persistence context when tracked.
    pub(crate) fn rehydrate(snapshot: EntityActionSnapshot, session: &SessionContext) -> Result<Self> {
        let persister = Arc::clone(
            session
                .factory()
                .metamodel()
                .entity_persister(&snapshot.entity_name)?,
        );
        let tracked = snapshot
            .id
            .as_ref()
            .map(|id| EntityKey::new(snapshot.entity_name.clone(), id.clone()))
            .and_then(|key| session.persistence().entity(&key).cloned());
        let instance = match tracked {
            Some(instance) => instance,
            None => snapshot.instance.into_instance(),
        };

        Ok(Self {
            entity_name: snapshot.entity_name,
            id: snapshot.id,
            instance,
            persister,
            session_id: session.id(),
        })
    }

    /// Row-level actions have nothing to prepare; being asked to is a bug.
    pub fn reject_before_executions(&self) -> Result<()> {
        Err(DbError::AssertionFailure(format!(
            "before_executions() called for non-collection action on {}",
            self.entity_name
        )))
    }
}

/// Order entity actions by entity name, then identifier.
///
/// Known identifiers use the persister's comparator and sort ahead of
/// delayed ones, which keep their creation order.
pub fn compare_entity_actions(a: &EntityActionBase, b: &EntityActionBase) -> Ordering {
    a.entity_name.cmp(&b.entity_name).then_with(|| match (&a.id, &b.id) {
        (Some(EntityId::Known(x)), Some(EntityId::Known(y))) => a.persister.compare_ids(x, y),
        (Some(EntityId::Known(_)), _) => Ordering::Less,
        (_, Some(EntityId::Known(_))) => Ordering::Greater,
        (Some(EntityId::Delayed(x)), Some(EntityId::Delayed(y))) => x.cmp(y),
        (Some(EntityId::Delayed(_)), None) => Ordering::Less,
        (None, Some(EntityId::Delayed(_))) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    })
}
