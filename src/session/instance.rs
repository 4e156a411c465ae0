use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use crate::core::{DbError, Result, State, Value};

static NEXT_INSTANCE_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identity of an entity instance, independent of its identifier value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(u64);

#[derive(Debug)]
struct InstanceData {
    id: Option<Value>,
    state: State,
}

/// Shared handle to one in-memory entity instance
///
/// Clones refer to the same instance; equality is identity, not state.
#[derive(Clone)]
pub struct EntityInstance {
    handle: InstanceHandle,
    entity_name: Arc<str>,
    data: Arc<RwLock<InstanceData>>,
}

impl EntityInstance {
    pub fn new(entity_name: &str, state: State) -> Self {
        Self::build(entity_name, None, state)
    }

    pub fn with_id(entity_name: &str, id: Value, state: State) -> Self {
        Self::build(entity_name, Some(id), state)
    }

    fn build(entity_name: &str, id: Option<Value>, state: State) -> Self {
        Self {
            handle: InstanceHandle(NEXT_INSTANCE_HANDLE.fetch_add(1, Ordering::SeqCst)),
            entity_name: Arc::from(entity_name),
            data: Arc::new(RwLock::new(InstanceData { id, state })),
        }
    }

    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn id(&self) -> Result<Option<Value>> {
        Ok(self.data.read()?.id.clone())
    }

    pub fn set_id(&self, id: Value) -> Result<()> {
        self.data.write()?.id = Some(id);
        Ok(())
    }

    pub fn state(&self) -> Result<State> {
        Ok(self.data.read()?.state.clone())
    }

    pub fn set_state(&self, state: State) -> Result<()> {
        self.data.write()?.state = state;
        Ok(())
    }

    pub fn property(&self, index: usize) -> Result<Value> {
        let data = self.data.read()?;
        data.state.get(index).cloned().ok_or_else(|| {
            DbError::ExecutionError(format!(
                "{} has no property at index {}",
                self.entity_name, index
            ))
        })
    }

    pub fn set_property(&self, index: usize, value: Value) -> Result<()> {
        let mut data = self.data.write()?;
        let slot = data.state.get_mut(index).ok_or_else(|| {
            DbError::ExecutionError(format!(
                "{} has no property at index {}",
                self.entity_name, index
            ))
        })?;
        *slot = value;
        Ok(())
    }

    pub fn same_instance(&self, other: &EntityInstance) -> bool {
        self.handle == other.handle
    }
}

impl PartialEq for EntityInstance {
    fn eq(&self, other: &Self) -> bool {
        self.same_instance(other)
    }
}

impl Eq for EntityInstance {}

impl fmt::Debug for EntityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityInstance")
            .field("entity_name", &self.entity_name)
            .field("handle", &self.handle.0)
            .finish()
    }
}
