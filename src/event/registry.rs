use std::collections::HashMap;
use std::sync::Arc;

use super::listeners::*;

/// Kinds of listener slots, for introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    PreInsert,
    PostInsert,
    PostCommitInsert,
    PreUpdate,
    PostUpdate,
    PostCommitUpdate,
    PreDelete,
    PostDelete,
    PostCommitDelete,
    Collection(CollectionEventKind),
}

/// Listeners of a session factory, grouped per event type
///
/// Actions check for an empty slot before building an event, so an
/// unobserved operation costs nothing beyond the length check.
#[derive(Default, Clone)]
pub struct EventListenerRegistry {
    pre_insert: Vec<Arc<dyn PreInsertEventListener>>,
    post_insert: Vec<Arc<dyn PostInsertEventListener>>,
    post_commit_insert: Vec<Arc<dyn PostInsertEventListener>>,
    pre_update: Vec<Arc<dyn PreUpdateEventListener>>,
    post_update: Vec<Arc<dyn PostUpdateEventListener>>,
    post_commit_update: Vec<Arc<dyn PostUpdateEventListener>>,
    pre_delete: Vec<Arc<dyn PreDeleteEventListener>>,
    post_delete: Vec<Arc<dyn PostDeleteEventListener>>,
    post_commit_delete: Vec<Arc<dyn PostDeleteEventListener>>,
    collection: HashMap<CollectionEventKind, Vec<Arc<dyn CollectionEventListener>>>,
}

impl EventListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_pre_insert(&mut self, listener: Arc<dyn PreInsertEventListener>) {
        self.pre_insert.push(listener);
    }

    pub fn append_post_insert(&mut self, listener: Arc<dyn PostInsertEventListener>) {
        self.post_insert.push(listener);
    }

    pub fn append_post_commit_insert(&mut self, listener: Arc<dyn PostInsertEventListener>) {
        self.post_commit_insert.push(listener);
    }

    pub fn append_pre_update(&mut self, listener: Arc<dyn PreUpdateEventListener>) {
        self.pre_update.push(listener);
    }

    pub fn append_post_update(&mut self, listener: Arc<dyn PostUpdateEventListener>) {
        self.post_update.push(listener);
    }

    pub fn append_post_commit_update(&mut self, listener: Arc<dyn PostUpdateEventListener>) {
        self.post_commit_update.push(listener);
    }

    pub fn append_pre_delete(&mut self, listener: Arc<dyn PreDeleteEventListener>) {
        self.pre_delete.push(listener);
    }

    pub fn append_post_delete(&mut self, listener: Arc<dyn PostDeleteEventListener>) {
        self.post_delete.push(listener);
    }

    pub fn append_post_commit_delete(&mut self, listener: Arc<dyn PostDeleteEventListener>) {
        self.post_commit_delete.push(listener);
    }

    pub fn append_collection(
        &mut self,
        kind: CollectionEventKind,
        listener: Arc<dyn CollectionEventListener>,
    ) {
        self.collection.entry(kind).or_default().push(listener);
    }

    pub fn pre_insert(&self) -> &[Arc<dyn PreInsertEventListener>] {
        &self.pre_insert
    }

    pub fn post_insert(&self) -> &[Arc<dyn PostInsertEventListener>] {
        &self.post_insert
    }

    pub fn post_commit_insert(&self) -> &[Arc<dyn PostInsertEventListener>] {
        &self.post_commit_insert
    }

    pub fn pre_update(&self) -> &[Arc<dyn PreUpdateEventListener>] {
        &self.pre_update
    }

    pub fn post_update(&self) -> &[Arc<dyn PostUpdateEventListener>] {
        &self.post_update
    }

    pub fn post_commit_update(&self) -> &[Arc<dyn PostUpdateEventListener>] {
        &self.post_commit_update
    }

    pub fn pre_delete(&self) -> &[Arc<dyn PreDeleteEventListener>] {
        &self.pre_delete
    }

    pub fn post_delete(&self) -> &[Arc<dyn PostDeleteEventListener>] {
        &self.post_delete
    }

    pub fn post_commit_delete(&self) -> &[Arc<dyn PostDeleteEventListener>] {
        &self.post_commit_delete
    }

    pub fn collection(&self, kind: CollectionEventKind) -> &[Arc<dyn CollectionEventListener>] {
        self.collection.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        match event_type {
            EventType::PreInsert => self.pre_insert.len(),
            EventType::PostInsert => self.post_insert.len(),
            EventType::PostCommitInsert => self.post_commit_insert.len(),
            EventType::PreUpdate => self.pre_update.len(),
            EventType::PostUpdate => self.post_update.len(),
            EventType::PostCommitUpdate => self.post_commit_update.len(),
            EventType::PreDelete => self.pre_delete.len(),
            EventType::PostDelete => self.post_delete.len(),
            EventType::PostCommitDelete => self.post_commit_delete.len(),
            EventType::Collection(kind) => self.collection(kind).len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Veto;

    impl PreUpdateEventListener for Veto {
        fn on_pre_update(&self, _event: &PreUpdateEvent<'_>) -> bool {
            true
        }
    }

    struct Noop;

    impl CollectionEventListener for Noop {
        fn on_collection_event(&self, _event: &CollectionEvent<'_>) {}
    }

    #[test]
    fn test_register_and_count() {
        let mut registry = EventListenerRegistry::new();
        assert_eq!(registry.listener_count(EventType::PreUpdate), 0);

        registry.append_pre_update(Arc::new(Veto));
        registry.append_collection(CollectionEventKind::PostRemove, Arc::new(Noop));

        assert_eq!(registry.listener_count(EventType::PreUpdate), 1);
        assert_eq!(
            registry.listener_count(EventType::Collection(CollectionEventKind::PostRemove)),
            1
        );
        assert!(registry.collection(CollectionEventKind::PreRemove).is_empty());
    }
}
