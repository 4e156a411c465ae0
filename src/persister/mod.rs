pub mod collection;
pub mod entity;
pub mod memory;

pub use collection::CollectionPersister;
pub use entity::{EntityPersister, EntityUpdate};
pub use memory::{
    IdOrder, MemoryCollectionPersister, MemoryCollectionPersisterBuilder, MemoryEntityPersister,
    MemoryEntityPersisterBuilder,
};
