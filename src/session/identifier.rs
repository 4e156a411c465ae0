use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use crate::core::Value;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_DELAYED_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn new() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// Placeholder identity for an entity whose database-generated id is not
/// known yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DelayedPostInsertIdentifier(u64);

impl DelayedPostInsertIdentifier {
    pub fn new() -> Self {
        DelayedPostInsertIdentifier(NEXT_DELAYED_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl Default for DelayedPostInsertIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier as tracked by the session: either the real value or a
/// delayed placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Known(Value),
    Delayed(DelayedPostInsertIdentifier),
}

impl EntityId {
    pub fn known(&self) -> Option<&Value> {
        match self {
            EntityId::Known(v) => Some(v),
            EntityId::Delayed(_) => None,
        }
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self, EntityId::Delayed(_))
    }
}

impl From<Value> for EntityId {
    fn from(value: Value) -> Self {
        EntityId::Known(value)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Known(v) => write!(f, "{}", v),
            EntityId::Delayed(d) => write!(f, "<delayed:{}>", d.0),
        }
    }
}

/// Uniquely identifies an entity within a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    entity_name: String,
    id: EntityId,
}

impl EntityKey {
    pub fn new(entity_name: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_name: entity_name.into(),
            id,
        }
    }

    pub fn known(entity_name: impl Into<String>, id: Value) -> Self {
        Self::new(entity_name, EntityId::Known(id))
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}#{}]", self.entity_name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delayed_identifiers_are_unique() {
        let a = DelayedPostInsertIdentifier::new();
        let b = DelayedPostInsertIdentifier::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_entity_key_display() {
        let key = EntityKey::known("Item", Value::Integer(3));
        assert_eq!(key.to_string(), "[Item#3]");
        assert!(EntityId::Delayed(DelayedPostInsertIdentifier::new()).is_delayed());
    }
}
