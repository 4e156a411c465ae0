use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use log::debug;

use super::{CollectionTable, Table};
use crate::core::{DbError, Result, State, Value};

#[derive(Default)]
struct DatabaseState {
    tables: HashMap<String, Table>,
    collections: HashMap<String, CollectionTable>,
    statements: u64,
}

/// In-memory stand-in for the relational database behind the persisters
///
/// Cloning shares the same tables. Every call counts as one statement so
/// that tests can observe whether (and how much) SQL an action issued.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<RwLock<DatabaseState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statement_count(&self) -> u64 {
        self.inner.read().map(|db| db.statements).unwrap_or(0)
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let db = self.inner.read()?;
        Ok(db.tables.get(table).map(Table::len).unwrap_or(0))
    }

    pub fn collection_row_count(&self, table: &str) -> Result<usize> {
        let db = self.inner.read()?;
        Ok(db.collections.get(table).map(CollectionTable::row_count).unwrap_or(0))
    }

    fn with_table<T>(&self, table: &str, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        let mut db = self.inner.write()?;
        db.statements += 1;
        let entry = db
            .tables
            .entry(table.to_string())
            .or_insert_with(|| Table::new(table));
        f(entry)
    }

    fn with_collection<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut CollectionTable) -> Result<T>,
    ) -> Result<T> {
        let mut db = self.inner.write()?;
        db.statements += 1;
        let entry = db
            .collections
            .entry(table.to_string())
            .or_insert_with(|| CollectionTable::new(table));
        f(entry)
    }

    pub fn insert(&self, table: &str, id: Value, state: State) -> Result<()> {
        debug!("insert into {} ({})", table, id);
        self.with_table(table, |t| t.insert(id, state))
    }

    /// Insert with a database-generated identity, returning it.
    pub fn insert_identity(&self, table: &str, state: State) -> Result<Value> {
        self.with_table(table, |t| {
            let id = t.next_identity();
            debug!("insert into {} with generated id {}", table, id);
            t.insert(id.clone(), state)?;
            Ok(id)
        })
    }

    pub fn select(&self, table: &str, id: &Value) -> Result<Option<State>> {
        self.with_table(table, |t| Ok(t.get(id).cloned()))
    }

    pub fn update(
        &self,
        table: &str,
        id: &Value,
        state: State,
        check: Option<(usize, &Value)>,
    ) -> Result<bool> {
        debug!("update {} ({})", table, id);
        self.with_table(table, |t| Ok(t.update(id, state, check)))
    }

    pub fn delete(&self, table: &str, id: &Value, check: Option<(usize, &Value)>) -> Result<bool> {
        debug!("delete from {} ({})", table, id);
        self.with_table(table, |t| Ok(t.delete(id, check)))
    }

    /// Increment the version column of one row, returning the new version.
    pub fn increment_version(&self, table: &str, id: &Value, index: usize) -> Result<Value> {
        self.with_table(table, |t| {
            let mut state = t
                .get(id)
                .cloned()
                .ok_or_else(|| DbError::ExecutionError(format!("no row {} in {}", id, table)))?;
            let slot = state
                .get_mut(index)
                .ok_or_else(|| DbError::ExecutionError(format!("no version column in {}", table)))?;
            let next = slot.next_version()?;
            *slot = next.clone();
            t.update(id, state, None);
            Ok(next)
        })
    }

    pub fn delete_where<F>(&self, table: &str, predicate: F) -> Result<usize>
    where
        F: FnMut(&Value, &State) -> bool,
    {
        self.with_table(table, |t| Ok(t.delete_where(predicate)))
    }

    pub fn update_where<F>(&self, table: &str, apply: F) -> Result<usize>
    where
        F: FnMut(&Value, &mut State) -> bool,
    {
        self.with_table(table, |t| Ok(t.update_where(apply)))
    }

    pub fn collection_elements(&self, table: &str, key: &Value) -> Result<Vec<Value>> {
        self.with_collection(table, |c| Ok(c.elements(key)))
    }

    pub fn insert_collection_row(&self, table: &str, key: &Value, element: Value) -> Result<()> {
        self.with_collection(table, |c| {
            c.push(key, element);
            Ok(())
        })
    }

    pub fn delete_collection_row(&self, table: &str, key: &Value, element: &Value) -> Result<bool> {
        self.with_collection(table, |c| Ok(c.delete_element(key, element)))
    }

    pub fn update_collection_row(
        &self,
        table: &str,
        key: &Value,
        index: usize,
        element: Value,
    ) -> Result<bool> {
        self.with_collection(table, |c| Ok(c.set(key, index, element)))
    }

    pub fn truncate_collection(&self, table: &str, key: &Value, len: usize) -> Result<usize> {
        self.with_collection(table, |c| Ok(c.truncate(key, len)))
    }

    pub fn remove_collection(&self, table: &str, key: &Value) -> Result<usize> {
        debug!("delete from {} where key = {}", table, key);
        self.with_collection(table, |c| Ok(c.remove_all(key)))
    }

    pub fn delete_collection_rows_where<F>(&self, table: &str, predicate: F) -> Result<usize>
    where
        F: FnMut(&Value, &Value) -> bool,
    {
        self.with_collection(table, |c| Ok(c.delete_where(predicate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_counted() {
        let db = MemoryDatabase::new();
        let id = db.insert_identity("item", vec![Value::Integer(0)]).unwrap();
        assert_eq!(id, Value::Integer(1));
        db.select("item", &id).unwrap();
        assert_eq!(db.statement_count(), 2);
    }

    #[test]
    fn test_increment_version() {
        let db = MemoryDatabase::new();
        db.insert("item", Value::Integer(1), vec![Value::Integer(4)]).unwrap();
        let next = db.increment_version("item", &Value::Integer(1), 0).unwrap();
        assert_eq!(next, Value::Integer(5));
        assert_eq!(db.select("item", &Value::Integer(1)).unwrap().unwrap()[0], Value::Integer(5));
    }

    #[test]
    fn test_clones_share_tables() {
        let db = MemoryDatabase::new();
        let other = db.clone();
        db.insert("item", Value::Integer(1), vec![]).unwrap();
        assert_eq!(other.row_count("item").unwrap(), 1);
    }
}
