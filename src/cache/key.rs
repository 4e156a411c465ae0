use std::fmt;
use serde::{Deserialize, Serialize};
use crate::core::Value;

/// Key of one cached entity or collection
///
/// `role` is the entity name for entity regions and the collection role for
/// collection regions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    role: String,
    id: Value,
}

impl CacheKey {
    pub fn new(role: impl Into<String>, id: Value) -> Self {
        Self {
            role: role.into(),
            id,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn id(&self) -> &Value {
        &self.id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.id)
    }
}
