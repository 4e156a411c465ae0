use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use crate::core::{DbError, Result, State, Value};

const SUBCLASS_KEY: &str = "_subclass";
const VERSION_KEY: &str = "_version";
const LAZY_UNFETCHED_KEY: &str = "_lazyPropertiesUnfetched";

/// Disassembled entity state as stored in a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    disassembled_state: State,
    subclass: String,
    version: Option<Value>,
    lazy_properties_unfetched: bool,
}

impl CacheEntry {
    pub fn new(
        state: &[Value],
        subclass: impl Into<String>,
        version: Option<Value>,
        lazy_properties_unfetched: bool,
    ) -> Self {
        Self {
            disassembled_state: state.to_vec(),
            subclass: subclass.into(),
            version,
            lazy_properties_unfetched,
        }
    }

    pub fn disassembled_state(&self) -> &[Value] {
        &self.disassembled_state
    }

    pub fn subclass(&self) -> &str {
        &self.subclass
    }

    pub fn version(&self) -> Option<&Value> {
        self.version.as_ref()
    }

    pub fn are_lazy_properties_unfetched(&self) -> bool {
        self.lazy_properties_unfetched
    }

    /// Property-name keyed view, readable by other tooling sharing the region.
    pub fn structure(&self, property_names: &[String]) -> Result<JsonValue> {
        if property_names.len() != self.disassembled_state.len() {
            return Err(DbError::Cache(format!(
                "cannot structure entry of {}: {} property names for {} values",
                self.subclass,
                property_names.len(),
                self.disassembled_state.len()
            )));
        }

        let mut map = Map::new();
        for (name, value) in property_names.iter().zip(&self.disassembled_state) {
            map.insert(name.clone(), to_json(value)?);
        }
        map.insert(SUBCLASS_KEY.to_string(), JsonValue::String(self.subclass.clone()));
        if let Some(version) = &self.version {
            map.insert(VERSION_KEY.to_string(), to_json(version)?);
        }
        map.insert(
            LAZY_UNFETCHED_KEY.to_string(),
            JsonValue::Bool(self.lazy_properties_unfetched),
        );
        Ok(JsonValue::Object(map))
    }

    pub fn destructure(structured: &JsonValue, property_names: &[String]) -> Result<Self> {
        let map = structured
            .as_object()
            .ok_or_else(|| DbError::Cache("structured cache entry is not an object".to_string()))?;

        let mut state = Vec::with_capacity(property_names.len());
        for name in property_names {
            let raw = map.get(name).cloned().unwrap_or(JsonValue::Null);
            state.push(from_json(raw)?);
        }

        let subclass = map
            .get(SUBCLASS_KEY)
            .and_then(|v| v.as_str())
            .ok_or_else(|| DbError::Cache("structured cache entry has no subclass".to_string()))?
            .to_string();
        let version = match map.get(VERSION_KEY) {
            Some(raw) => Some(from_json(raw.clone())?),
            None => None,
        };
        let lazy_properties_unfetched = map
            .get(LAZY_UNFETCHED_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(Self {
            disassembled_state: state,
            subclass,
            version,
            lazy_properties_unfetched,
        })
    }
}

fn to_json(value: &Value) -> Result<JsonValue> {
    serde_json::to_value(value).map_err(|e| DbError::Cache(format!("Failed to structure value: {}", e)))
}

fn from_json(raw: JsonValue) -> Result<Value> {
    serde_json::from_value(raw).map_err(|e| DbError::Cache(format!("Failed to read structured value: {}", e)))
}

/// Cached collection elements, keyed by the owner's collection key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionCacheEntry {
    elements: Vec<Value>,
}

impl CollectionCacheEntry {
    pub fn new(elements: Vec<Value>) -> Self {
        Self { elements }
    }

    pub fn elements(&self) -> &[Value] {
        &self.elements
    }
}

/// Anything a region can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    Entity(CacheEntry),
    StructuredEntity(JsonValue),
    Collection(CollectionCacheEntry),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["name".to_string(), "version".to_string()]
    }

    #[test]
    fn test_structured_entry_keeps_property_names() {
        let entry = CacheEntry::new(
            &[Value::Text("widget".into()), Value::Integer(3)],
            "Item",
            Some(Value::Integer(3)),
            false,
        );
        let structured = entry.structure(&names()).unwrap();
        assert_eq!(structured["_subclass"], JsonValue::String("Item".into()));
        assert!(structured.get("name").is_some());

        let back = CacheEntry::destructure(&structured, &names()).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_structure_rejects_arity_mismatch() {
        let entry = CacheEntry::new(&[Value::Integer(1)], "Item", None, false);
        assert!(entry.structure(&names()).is_err());
    }
}
