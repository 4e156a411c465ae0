pub mod listeners;
pub mod registry;

pub use listeners::{
    CollectionEvent, CollectionEventKind, CollectionEventListener, PostDeleteEvent,
    PostDeleteEventListener, PostInsertEvent, PostInsertEventListener, PostUpdateEvent,
    PostUpdateEventListener, PreDeleteEvent, PreDeleteEventListener, PreInsertEvent,
    PreInsertEventListener, PreUpdateEvent, PreUpdateEventListener,
};
pub use registry::{EventListenerRegistry, EventType};
