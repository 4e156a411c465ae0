use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::core::{DbError, Result, State, Value};

/// Rows of one entity table, keyed by identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    name: String,
    rows: HashMap<Value, State>,
    next_identity: i64,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: HashMap::new(),
            next_identity: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn next_identity(&mut self) -> Value {
        let id = self.next_identity;
        self.next_identity += 1;
        Value::Integer(id)
    }

    pub fn insert(&mut self, id: Value, state: State) -> Result<()> {
        if self.rows.contains_key(&id) {
            return Err(DbError::ConstraintViolation(format!(
                "Duplicate key {} in table {}",
                id, self.name
            )));
        }
        self.rows.insert(id, state);
        Ok(())
    }

    pub fn get(&self, id: &Value) -> Option<&State> {
        self.rows.get(id)
    }

    /// Replace the row if it exists and, when `check` is given, its version
    /// column still holds the expected value.
    pub fn update(&mut self, id: &Value, state: State, check: Option<(usize, &Value)>) -> bool {
        match self.rows.get_mut(id) {
            Some(row) if version_matches(row, check) => {
                *row = state;
                true
            }
            _ => false,
        }
    }

    pub fn delete(&mut self, id: &Value, check: Option<(usize, &Value)>) -> bool {
        let matches = self
            .rows
            .get(id)
            .is_some_and(|row| version_matches(row, check));
        if matches {
            self.rows.remove(id);
        }
        matches
    }

    pub fn delete_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Value, &State) -> bool,
    {
        let before = self.rows.len();
        self.rows.retain(|id, row| !predicate(id, row));
        before - self.rows.len()
    }

    pub fn update_where<F>(&mut self, mut apply: F) -> usize
    where
        F: FnMut(&Value, &mut State) -> bool,
    {
        self.rows
            .iter_mut()
            .map(|(id, row)| apply(id, row))
            .filter(|changed| *changed)
            .count()
    }
}

fn version_matches(row: &State, check: Option<(usize, &Value)>) -> bool {
    match check {
        None => true,
        Some((index, expected)) => row.get(index) == Some(expected),
    }
}

/// Element rows of one collection table, grouped by owner key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionTable {
    name: String,
    rows: HashMap<Value, Vec<Value>>,
}

impl CollectionTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elements(&self, key: &Value) -> Vec<Value> {
        self.rows.get(key).cloned().unwrap_or_default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    pub fn push(&mut self, key: &Value, element: Value) {
        self.rows.entry(key.clone()).or_default().push(element);
    }

    /// Delete one row holding `element`.
    pub fn delete_element(&mut self, key: &Value, element: &Value) -> bool {
        let Some(rows) = self.rows.get_mut(key) else {
            return false;
        };
        match rows.iter().position(|e| e == element) {
            Some(pos) => {
                rows.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn set(&mut self, key: &Value, index: usize, element: Value) -> bool {
        match self.rows.get_mut(key).and_then(|rows| rows.get_mut(index)) {
            Some(slot) => {
                *slot = element;
                true
            }
            None => false,
        }
    }

    pub fn truncate(&mut self, key: &Value, len: usize) -> usize {
        match self.rows.get_mut(key) {
            Some(rows) if rows.len() > len => {
                let removed = rows.len() - len;
                rows.truncate(len);
                removed
            }
            _ => 0,
        }
    }

    pub fn remove_all(&mut self, key: &Value) -> usize {
        self.rows.remove(key).map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn delete_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Value, &Value) -> bool,
    {
        let mut removed = 0;
        for (key, rows) in self.rows.iter_mut() {
            let before = rows.len();
            rows.retain(|element| !predicate(key, element));
            removed += before - rows.len();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_update() {
        let mut table = Table::new("item");
        table.insert(Value::Integer(1), vec![Value::Text("a".into()), Value::Integer(0)]).unwrap();

        let stale = table.update(
            &Value::Integer(1),
            vec![Value::Text("b".into()), Value::Integer(1)],
            Some((1, &Value::Integer(5))),
        );
        assert!(!stale);

        let ok = table.update(
            &Value::Integer(1),
            vec![Value::Text("b".into()), Value::Integer(1)],
            Some((1, &Value::Integer(0))),
        );
        assert!(ok);
        assert_eq!(table.get(&Value::Integer(1)).unwrap()[0], Value::Text("b".into()));
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let mut table = Table::new("item");
        table.insert(Value::Integer(1), vec![]).unwrap();
        let err = table.insert(Value::Integer(1), vec![]).unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
    }

    #[test]
    fn test_collection_rows() {
        let mut table = CollectionTable::new("order_lines");
        let key = Value::Integer(1);
        table.push(&key, Value::Integer(10));
        table.push(&key, Value::Integer(20));
        table.push(&key, Value::Integer(30));
        assert!(table.delete_element(&key, &Value::Integer(20)));
        assert_eq!(table.truncate(&key, 1), 1);
        assert_eq!(table.elements(&key), vec![Value::Integer(10)]);
        assert_eq!(table.remove_all(&key), 1);
        assert_eq!(table.row_count(), 0);
    }
}
