//! Flush-time write actions and second-level cache synchronization.
//!
//! # Examples
//!
//! ```
//! use memodb_flush::{EngineSettings, MemoryDatabase, MemoryEntityPersister, SessionFactory, Value};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = MemoryDatabase::new();
//! let builder = SessionFactory::builder(EngineSettings::new());
//! let region = builder.new_region("Item")?;
//! let item = MemoryEntityPersister::builder("Item", db.clone())
//!     .properties(&["name", "version"])
//!     .version_property("version")
//!     .cache(region)
//!     .build()?;
//! let factory = builder.entity_persister(Arc::new(item))?.build()?;
//!
//! let mut session = factory.open_session();
//! session.persist("Item", Value::Integer(1), vec![Value::from("pen"), Value::Integer(0)])?;
//! session.commit()?;
//!
//! assert_eq!(db.row_count("item")?, 1);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod cache;
pub mod config;
pub mod core;
pub mod event;
pub mod factory;
pub mod persister;
pub mod session;
pub mod stats;
pub mod storage;

// Re-export main types for convenience
pub use core::{DbError, Result, State, Value};
pub use config::EngineSettings;
pub use factory::{Metamodel, SessionFactory, SessionFactoryBuilder};
pub use session::{
    CacheMode, CollectionKind, EntityInstance, PersistentCollection, Session, SessionContext,
};
pub use stats::{Statistics, StatisticsSnapshot};

// Re-export the action API
pub use action::{
    ActionQueue, BulkOperationCleanupAction, CollectionRecreateAction, CollectionRemoveAction,
    CollectionUpdateAction, EntityDeleteAction, EntityIdentityInsertAction, EntityInsertAction,
    EntityUpdateAction, EntityVerifyVersionProcess, Executable, ExecutableList,
};

// Re-export the reference persisters
pub use persister::{
    CollectionPersister, EntityPersister, MemoryCollectionPersister, MemoryEntityPersister,
};
pub use storage::MemoryDatabase;
