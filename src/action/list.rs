use std::collections::HashSet;
use std::slice;

use super::{ActionOrder, Executable};

/// Ordered list of actions of one kind
///
/// Tracks whether appends kept it sorted, so sorting an already ordered list
/// is free, and caches the union of its actions' property spaces. The cache
/// is extended on append and dropped on removal.
pub struct ExecutableList<E> {
    executables: Vec<E>,
    query_spaces: Option<HashSet<String>>,
    sorted: bool,
    requires_sorting: bool,
}

impl<E> Default for ExecutableList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ExecutableList<E> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            executables: Vec::with_capacity(capacity),
            query_spaces: None,
            sorted: true,
            requires_sorting: true,
        }
    }

    /// A list whose insertion order is final; `sort` leaves it alone.
    pub fn without_sorting() -> Self {
        Self {
            requires_sorting: false,
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.executables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executables.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&E> {
        self.executables.get(index)
    }

    pub fn iter(&self) -> slice::Iter<'_, E> {
        self.executables.iter()
    }

    pub fn iter_mut(&mut self) -> slice::IterMut<'_, E> {
        self.executables.iter_mut()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn remove(&mut self, index: usize) -> E {
        // removal may drop the last action touching a space
        self.query_spaces = None;
        self.executables.remove(index)
    }

    pub fn remove_last_n(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let keep = self.executables.len().saturating_sub(n);
        self.executables.truncate(keep);
        self.query_spaces = None;
    }

    pub fn clear(&mut self) {
        self.executables.clear();
        self.query_spaces = None;
        self.sorted = true;
    }

    /// Move every action out, leaving the list empty.
    pub fn take_all(&mut self) -> Vec<E> {
        self.query_spaces = None;
        self.sorted = true;
        std::mem::take(&mut self.executables)
    }
}

impl<E: Executable + ActionOrder> ExecutableList<E> {
    pub fn add(&mut self, executable: E) {
        if self.sorted {
            if let Some(last) = self.executables.last() {
                if last.compare(&executable).is_gt() {
                    self.sorted = false;
                }
            }
        }

        if let Some(spaces) = self.query_spaces.as_mut() {
            spaces.extend(executable.property_spaces().iter().cloned());
        }

        self.executables.push(executable);
    }

    pub fn sort(&mut self) {
        if self.sorted || !self.requires_sorting {
            return;
        }
        self.executables.sort_by(|a, b| a.compare(b));
        self.sorted = true;
    }

    /// Union of the property spaces of every action in the list
    pub fn query_spaces(&mut self) -> &HashSet<String> {
        let executables = &self.executables;
        self.query_spaces.get_or_insert_with(|| {
            executables
                .iter()
                .flat_map(|e| e.property_spaces().iter().cloned())
                .collect()
        })
    }

    /// Same as `query_spaces`, without touching the cache.
    pub fn compute_query_spaces(&self) -> HashSet<String> {
        self.executables
            .iter()
            .flat_map(|e| e.property_spaces().iter().cloned())
            .collect()
    }

    pub fn position<P>(&self, predicate: P) -> Option<usize>
    where
        P: FnMut(&E) -> bool,
    {
        self.executables.iter().position(predicate)
    }
}

impl<'a, E> IntoIterator for &'a ExecutableList<E> {
    type Item = &'a E;
    type IntoIter = slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.executables.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::AfterTransactionCompletionProcess;
    use crate::core::Result;
    use crate::session::SessionContext;
    use std::cmp::Ordering;

    struct Stub {
        order: u32,
        spaces: Vec<String>,
    }

    fn stub(order: u32, spaces: &[&str]) -> Stub {
        Stub {
            order,
            spaces: spaces.iter().map(|s| s.to_string()).collect(),
        }
    }

    impl AfterTransactionCompletionProcess for Stub {
        fn after_transaction_completion(&mut self, _success: bool, _session: &mut SessionContext) -> Result<()> {
            Ok(())
        }
    }

    impl Executable for Stub {
        fn name(&self) -> &'static str {
            "Stub"
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
            false
        }
    }

    impl ActionOrder for Stub {
        fn compare(&self, other: &Self) -> Ordering {
            self.order.cmp(&other.order)
        }
    }

    #[test]
    fn test_sorted_flag_tracks_appends() {
        let mut list = ExecutableList::new();
        list.add(stub(1, &[]));
        list.add(stub(2, &[]));
        assert!(list.is_sorted());

        list.add(stub(0, &[]));
        assert!(!list.is_sorted());

        list.sort();
        assert!(list.is_sorted());
        let order: Vec<u32> = list.iter().map(|p| p.order).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_without_sorting_keeps_insertion_order() {
        let mut list = ExecutableList::without_sorting();
        list.add(stub(2, &[]));
        list.add(stub(1, &[]));
        list.sort();
        let order: Vec<u32> = list.iter().map(|p| p.order).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn test_query_spaces_incremental_equals_recomputed() {
        let mut list = ExecutableList::new();
        list.add(stub(1, &["a"]));
        assert_eq!(list.query_spaces().len(), 1);

        // appended while the cache is populated
        list.add(stub(2, &["b", "c"]));
        list.add(stub(3, &["a"]));
        let expected = list.compute_query_spaces();
        assert_eq!(list.query_spaces(), &expected);

        list.remove(1);
        let expected = list.compute_query_spaces();
        assert_eq!(list.query_spaces(), &expected);
        assert!(!expected.contains("b"));

        list.add(stub(4, &["d"]));
        list.remove_last_n(2);
        let expected = list.compute_query_spaces();
        assert_eq!(list.query_spaces(), &expected);
        assert_eq!(expected.len(), 1);

        list.clear();
        assert!(list.query_spaces().is_empty());
    }

    #[test]
    fn test_take_all_empties_list() {
        let mut list = ExecutableList::new();
        list.add(stub(1, &["a"]));
        list.query_spaces();
        let taken = list.take_all();
        assert_eq!(taken.len(), 1);
        assert!(list.is_empty());
        assert!(list.query_spaces().is_empty());
    }
}
