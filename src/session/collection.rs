use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use serde::{Deserialize, Serialize};

use super::EntityInstance;
use crate::core::{Result, Value};

static NEXT_COLLECTION_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identity of a persistent collection wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionHandle(u64);

/// Collection semantics, deciding how a diff maps onto row operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    Set,
    Bag,
    List,
}

/// Mutation recorded on a collection that was never loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuedOperation {
    Add(Value),
    Remove(Value),
    Clear,
}

/// Row-level difference between a collection's snapshot and its elements.
/// Each change carries the element position it refers to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionDiff {
    pub deletes: Vec<(usize, Value)>,
    pub updates: Vec<(usize, Value)>,
    pub inserts: Vec<(usize, Value)>,
}

impl CollectionDiff {
    pub fn compute(kind: CollectionKind, snapshot: &[Value], elements: &[Value]) -> Self {
        match kind {
            CollectionKind::List => {
                let common = snapshot.len().min(elements.len());
                let updates = (0..common)
                    .filter(|&i| snapshot[i] != elements[i])
                    .map(|i| (i, elements[i].clone()))
                    .collect();
                let deletes = (common..snapshot.len())
                    .map(|i| (i, snapshot[i].clone()))
                    .collect();
                let inserts = (common..elements.len())
                    .map(|i| (i, elements[i].clone()))
                    .collect();
                Self { deletes, updates, inserts }
            }
            CollectionKind::Set | CollectionKind::Bag => Self {
                deletes: multiset_difference(snapshot, elements),
                updates: Vec::new(),
                inserts: multiset_difference(elements, snapshot),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.updates.is_empty() && self.inserts.is_empty()
    }
}

/// Elements of `from` not matched by an element of `minus`, counting duplicates
fn multiset_difference(from: &[Value], minus: &[Value]) -> Vec<(usize, Value)> {
    let mut remaining: HashMap<&Value, usize> = HashMap::new();
    for value in minus {
        *remaining.entry(value).or_insert(0) += 1;
    }
    let mut result = Vec::new();
    for (i, value) in from.iter().enumerate() {
        match remaining.get_mut(value) {
            Some(count) if *count > 0 => *count -= 1,
            _ => result.push((i, value.clone())),
        }
    }
    result
}

struct CollectionData {
    owner: Option<EntityInstance>,
    initialized: bool,
    elements: Vec<Value>,
    snapshot: Vec<Value>,
    queued: Vec<QueuedOperation>,
    dirty: bool,
}

/// Session-side wrapper of a collection-valued property
///
/// A loaded collection keeps a snapshot of what the database holds so that
/// flushes can write only the difference. An unloaded collection records
/// mutations as queued operations instead.
#[derive(Clone)]
pub struct PersistentCollection {
    handle: CollectionHandle,
    role: Arc<str>,
    inner: Arc<RwLock<CollectionData>>,
}

impl PersistentCollection {
    fn build(role: &str, data: CollectionData) -> Self {
        Self {
            handle: CollectionHandle(NEXT_COLLECTION_HANDLE.fetch_add(1, Ordering::SeqCst)),
            role: Arc::from(role),
            inner: Arc::new(RwLock::new(data)),
        }
    }

    /// A collection loaded from the database; its snapshot equals `elements`.
    pub fn loaded(role: &str, owner: Option<EntityInstance>, elements: Vec<Value>) -> Self {
        let data = CollectionData {
            owner,
            initialized: true,
            snapshot: elements.clone(),
            elements,
            queued: Vec::new(),
            dirty: false,
        };
        Self::build(role, data)
    }

    /// A new collection with nothing in the database yet.
    pub fn wrap_new(role: &str, owner: Option<EntityInstance>, elements: Vec<Value>) -> Self {
        let data = CollectionData {
            owner,
            initialized: true,
            snapshot: Vec::new(),
            elements,
            queued: Vec::new(),
            dirty: true,
        };
        Self::build(role, data)
    }

    /// A lazy collection whose elements were never fetched.
    pub fn uninitialized(role: &str, owner: Option<EntityInstance>) -> Self {
        let data = CollectionData {
            owner,
            initialized: false,
            snapshot: Vec::new(),
            elements: Vec::new(),
            queued: Vec::new(),
            dirty: false,
        };
        Self::build(role, data)
    }

    pub fn handle(&self) -> CollectionHandle {
        self.handle
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn owner(&self) -> Result<Option<EntityInstance>> {
        Ok(self.inner.read()?.owner.clone())
    }

    pub fn set_owner(&self, owner: Option<EntityInstance>) -> Result<()> {
        self.inner.write()?.owner = owner;
        Ok(())
    }

    pub fn was_initialized(&self) -> Result<bool> {
        Ok(self.inner.read()?.initialized)
    }

    pub fn is_dirty(&self) -> Result<bool> {
        Ok(self.inner.read()?.dirty)
    }

    pub fn elements(&self) -> Result<Vec<Value>> {
        Ok(self.inner.read()?.elements.clone())
    }

    pub fn snapshot(&self) -> Result<Vec<Value>> {
        Ok(self.inner.read()?.snapshot.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.read()?.elements.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.inner.read()?.elements.is_empty())
    }

    pub fn add(&self, value: Value) -> Result<()> {
        let mut data = self.inner.write()?;
        if data.initialized {
            data.elements.push(value);
        } else {
            data.queued.push(QueuedOperation::Add(value));
        }
        data.dirty = true;
        Ok(())
    }

    /// Remove the first occurrence of `value`. On an unloaded collection the
    /// removal is queued and reported as applied.
    pub fn remove(&self, value: &Value) -> Result<bool> {
        let mut data = self.inner.write()?;
        if !data.initialized {
            data.queued.push(QueuedOperation::Remove(value.clone()));
            data.dirty = true;
            return Ok(true);
        }
        match data.elements.iter().position(|v| v == value) {
            Some(pos) => {
                data.elements.remove(pos);
                data.dirty = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn set(&self, index: usize, value: Value) -> Result<Option<Value>> {
        let mut data = self.inner.write()?;
        match data.elements.get_mut(index) {
            Some(slot) => {
                let old = std::mem::replace(slot, value);
                data.dirty = true;
                Ok(Some(old))
            }
            None => Ok(None),
        }
    }

    pub fn clear(&self) -> Result<()> {
        let mut data = self.inner.write()?;
        if data.initialized {
            data.elements.clear();
        } else {
            data.queued.push(QueuedOperation::Clear);
        }
        data.dirty = true;
        Ok(())
    }

    pub fn has_queued_operations(&self) -> Result<bool> {
        Ok(!self.inner.read()?.queued.is_empty())
    }

    pub fn queued_operations(&self) -> Result<Vec<QueuedOperation>> {
        Ok(self.inner.read()?.queued.clone())
    }

    pub fn clear_operation_queue(&self) -> Result<()> {
        self.inner.write()?.queued.clear();
        Ok(())
    }

    pub fn diff(&self, kind: CollectionKind) -> Result<CollectionDiff> {
        let data = self.inner.read()?;
        Ok(CollectionDiff::compute(kind, &data.snapshot, &data.elements))
    }

    /// Fill an unloaded collection, replaying queued operations on top.
    pub fn initialize(&self, loaded: Vec<Value>) -> Result<()> {
        let mut data = self.inner.write()?;
        if data.initialized {
            return Ok(());
        }
        let mut elements = loaded.clone();
        for op in &data.queued {
            match op {
                QueuedOperation::Add(v) => elements.push(v.clone()),
                QueuedOperation::Remove(v) => {
                    if let Some(pos) = elements.iter().position(|e| e == v) {
                        elements.remove(pos);
                    }
                }
                QueuedOperation::Clear => elements.clear(),
            }
        }
        data.snapshot = loaded;
        data.elements = elements;
        data.queued.clear();
        data.initialized = true;
        Ok(())
    }

    /// Take the current elements as the new database image.
    pub(crate) fn resnapshot(&self) -> Result<()> {
        let mut data = self.inner.write()?;
        if data.initialized {
            data.snapshot = data.elements.clone();
        }
        Ok(())
    }

    pub(crate) fn post_action(&self) -> Result<()> {
        let mut data = self.inner.write()?;
        data.queued.clear();
        data.dirty = false;
        Ok(())
    }
}

impl PartialEq for PersistentCollection {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for PersistentCollection {}

impl fmt::Debug for PersistentCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentCollection")
            .field("role", &self.role)
            .field("handle", &self.handle.0)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Integer(*v)).collect()
    }

    #[test]
    fn test_list_diff() {
        let diff = CollectionDiff::compute(CollectionKind::List, &ints(&[1, 2, 3]), &ints(&[1, 5]));
        assert_eq!(diff.updates, vec![(1, Value::Integer(5))]);
        assert_eq!(diff.deletes, vec![(2, Value::Integer(3))]);
        assert!(diff.inserts.is_empty());
    }

    #[test]
    fn test_bag_diff_counts_duplicates() {
        let diff = CollectionDiff::compute(CollectionKind::Bag, &ints(&[1, 1, 2]), &ints(&[1, 2, 2]));
        assert_eq!(diff.deletes, vec![(1, Value::Integer(1))]);
        assert_eq!(diff.inserts, vec![(2, Value::Integer(2))]);
        assert!(diff.updates.is_empty());
    }

    #[test]
    fn test_uninitialized_collection_queues_operations() {
        let c = PersistentCollection::uninitialized("Order.lines", None);
        c.add(Value::Integer(7)).unwrap();
        c.remove(&Value::Integer(3)).unwrap();
        assert!(!c.was_initialized().unwrap());
        assert_eq!(
            c.queued_operations().unwrap(),
            vec![
                QueuedOperation::Add(Value::Integer(7)),
                QueuedOperation::Remove(Value::Integer(3))
            ]
        );

        c.initialize(ints(&[3, 4])).unwrap();
        assert_eq!(c.elements().unwrap(), ints(&[4, 7]));
        assert!(!c.has_queued_operations().unwrap());
    }

    #[test]
    fn test_resnapshot_clears_diff() {
        let c = PersistentCollection::loaded("Order.lines", None, ints(&[1]));
        c.add(Value::Integer(2)).unwrap();
        assert!(!c.diff(CollectionKind::Set).unwrap().is_empty());
        c.resnapshot().unwrap();
        c.post_action().unwrap();
        assert!(c.diff(CollectionKind::Set).unwrap().is_empty());
        assert!(!c.is_dirty().unwrap());
    }
}
