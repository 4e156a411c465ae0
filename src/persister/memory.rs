use std::cmp::Ordering;
use std::sync::Arc;
use log::trace;

use super::{CollectionPersister, EntityPersister, EntityUpdate};
use crate::cache::RegionAccessStrategy;
use crate::core::{DbError, Result, State, Value};
use crate::session::{
    CollectionKind, EntityInstance, PersistentCollection, QueuedOperation, SessionContext,
};
use crate::storage::MemoryDatabase;

/// Entity persister over a `MemoryDatabase` table
pub struct MemoryEntityPersister {
    entity_name: String,
    table: String,
    property_names: Vec<String>,
    spaces: Vec<String>,
    version_index: Option<usize>,
    version_generated: bool,
    mutable: bool,
    cache: Option<Arc<dyn RegionAccessStrategy>>,
    invalidate_cache: bool,
    structured_cache: bool,
    id_order: Option<IdOrder>,
    db: MemoryDatabase,
}

/// Identifier comparator used to order actions of one entity type
pub type IdOrder = fn(&Value, &Value) -> Ordering;

impl MemoryEntityPersister {
    pub fn builder(entity_name: &str, db: MemoryDatabase) -> MemoryEntityPersisterBuilder {
        MemoryEntityPersisterBuilder::new(entity_name, db)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    fn version_check<'a>(&self, version: Option<&'a Value>) -> Option<(usize, &'a Value)> {
        match (self.version_index, version) {
            (Some(index), Some(v)) => Some((index, v)),
            _ => None,
        }
    }

    fn stale(&self, id: &Value) -> DbError {
        DbError::StaleObjectState {
            entity: self.entity_name.clone(),
            id: id.to_string(),
        }
    }

    /// Copy the stored version column back into `state` and the instance.
    fn refresh_version(&self, id: &Value, instance: &EntityInstance, state: &mut State) -> Result<()> {
        let Some(index) = self.version_index else {
            return Ok(());
        };
        let row = self.db.select(&self.table, id)?.ok_or_else(|| self.stale(id))?;
        if let (Some(stored), Some(slot)) = (row.get(index), state.get_mut(index)) {
            trace!("{}#{} generated version {}", self.entity_name, id, stored);
            *slot = stored.clone();
            instance.set_property(index, stored.clone())?;
        }
        Ok(())
    }

    /// The row as written: a generated version column is seeded or bumped
    /// by the "database" rather than taken from the instance.
    fn row_for_write(&self, state: &[Value], previous_version: Option<&Value>) -> Result<State> {
        let mut row = state.to_vec();
        if let (true, Some(index)) = (self.version_generated, self.version_index) {
            let next = match previous_version {
                Some(v) => v.next_version()?,
                None => Value::Null.next_version()?,
            };
            if let Some(slot) = row.get_mut(index) {
                *slot = next;
            }
        }
        Ok(row)
    }
}

impl EntityPersister for MemoryEntityPersister {
    fn entity_name(&self) -> &str {
        &self.entity_name
    }

    fn property_names(&self) -> &[String] {
        &self.property_names
    }

    fn property_spaces(&self) -> &[String] {
        &self.spaces
    }

    fn is_mutable(&self) -> bool {
        self.mutable
    }

    fn version_property_index(&self) -> Option<usize> {
        self.version_index
    }

    fn is_version_property_generated(&self) -> bool {
        self.version_generated
    }

    fn has_insert_generated_properties(&self) -> bool {
        self.version_generated
    }

    fn has_update_generated_properties(&self) -> bool {
        self.version_generated
    }

    fn cache_access(&self) -> Option<&Arc<dyn RegionAccessStrategy>> {
        self.cache.as_ref()
    }

    fn is_cache_invalidation_required(&self) -> bool {
        self.invalidate_cache
    }

    fn use_structured_cache_entries(&self) -> bool {
        self.structured_cache
    }

    fn compare_ids(&self, a: &Value, b: &Value) -> Ordering {
        match self.id_order {
            Some(order) => order(a, b),
            None => a.total_cmp(b),
        }
    }

    fn insert(
        &self,
        id: &Value,
        state: &[Value],
        _instance: &EntityInstance,
        _session: &SessionContext,
    ) -> Result<()> {
        let row = self.row_for_write(state, None)?;
        self.db.insert(&self.table, id.clone(), row)
    }

    fn insert_generated(
        &self,
        state: &[Value],
        _instance: &EntityInstance,
        _session: &SessionContext,
    ) -> Result<Value> {
        let row = self.row_for_write(state, None)?;
        self.db.insert_identity(&self.table, row)
    }

    fn update(&self, update: EntityUpdate<'_>, _session: &SessionContext) -> Result<()> {
        if !self.mutable {
            return Err(DbError::ExecutionError(format!(
                "{} is immutable",
                self.entity_name
            )));
        }
        let row = self.row_for_write(update.state, update.previous_version)?;
        let check = self.version_check(update.previous_version);
        if self.db.update(&self.table, update.id, row, check)? {
            Ok(())
        } else {
            Err(self.stale(update.id))
        }
    }

    fn delete(
        &self,
        id: &Value,
        version: Option<&Value>,
        _instance: &EntityInstance,
        _session: &SessionContext,
    ) -> Result<()> {
        if self.db.delete(&self.table, id, self.version_check(version))? {
            Ok(())
        } else {
            Err(self.stale(id))
        }
    }

    fn process_insert_generated_properties(
        &self,
        id: &Value,
        instance: &EntityInstance,
        state: &mut State,
        _session: &SessionContext,
    ) -> Result<()> {
        self.refresh_version(id, instance, state)
    }

    fn process_update_generated_properties(
        &self,
        id: &Value,
        instance: &EntityInstance,
        state: &mut State,
        _session: &SessionContext,
    ) -> Result<()> {
        self.refresh_version(id, instance, state)
    }

    fn current_version(&self, id: &Value, _session: &SessionContext) -> Result<Option<Value>> {
        let Some(index) = self.version_index else {
            return Ok(None);
        };
        Ok(self
            .db
            .select(&self.table, id)?
            .and_then(|row| row.get(index).cloned()))
    }

    fn force_version_increment(
        &self,
        id: &Value,
        current_version: Option<&Value>,
        _session: &SessionContext,
    ) -> Result<Value> {
        let index = self.version_index.ok_or_else(|| {
            DbError::ExecutionError(format!("{} is not versioned", self.entity_name))
        })?;
        let next = self.db.increment_version(&self.table, id, index)?;
        trace!(
            "Forced version increment [{}#{}] {:?} -> {}",
            self.entity_name, id, current_version, next
        );
        Ok(next)
    }

    fn load(&self, id: &Value, _session: &SessionContext) -> Result<Option<State>> {
        self.db.select(&self.table, id)
    }
}

pub struct MemoryEntityPersisterBuilder {
    entity_name: String,
    table: Option<String>,
    property_names: Vec<String>,
    version_property: Option<String>,
    version_generated: bool,
    mutable: bool,
    extra_spaces: Vec<String>,
    cache: Option<Arc<dyn RegionAccessStrategy>>,
    invalidate_cache: bool,
    structured_cache: bool,
    id_order: Option<IdOrder>,
    db: MemoryDatabase,
}

impl MemoryEntityPersisterBuilder {
    pub fn new(entity_name: &str, db: MemoryDatabase) -> Self {
        Self {
            entity_name: entity_name.to_string(),
            table: None,
            property_names: Vec::new(),
            version_property: None,
            version_generated: false,
            mutable: true,
            extra_spaces: Vec::new(),
            cache: None,
            invalidate_cache: false,
            structured_cache: false,
            id_order: None,
            db,
        }
    }

    /// Table name; defaults to the lower-cased entity name
    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn properties(mut self, names: &[&str]) -> Self {
        self.property_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn version_property(mut self, name: &str) -> Self {
        self.version_property = Some(name.to_string());
        self
    }

    /// Let the database assign the version column.
    pub fn generated_version(mut self, generated: bool) -> Self {
        self.version_generated = generated;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    /// Additional tables written by this entity (secondary tables)
    pub fn extra_spaces(mut self, spaces: &[&str]) -> Self {
        self.extra_spaces = spaces.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn cache(mut self, region: Option<Arc<dyn RegionAccessStrategy>>) -> Self {
        self.cache = region;
        self
    }

    pub fn invalidate_cache_on_write(mut self, invalidate: bool) -> Self {
        self.invalidate_cache = invalidate;
        self
    }

    pub fn structured_cache_entries(mut self, structured: bool) -> Self {
        self.structured_cache = structured;
        self
    }

    /// Identifier order; defaults to `Value::total_cmp`
    pub fn id_order(mut self, order: IdOrder) -> Self {
        self.id_order = Some(order);
        self
    }

    pub fn build(self) -> Result<MemoryEntityPersister> {
        let version_index = match &self.version_property {
            Some(name) => Some(
                self.property_names
                    .iter()
                    .position(|p| p == name)
                    .ok_or_else(|| {
                        DbError::ConfigError(format!(
                            "Version property '{}' is not a property of {}",
                            name, self.entity_name
                        ))
                    })?,
            ),
            None => None,
        };
        if self.version_generated && version_index.is_none() {
            return Err(DbError::ConfigError(format!(
                "{} has a generated version but no version property",
                self.entity_name
            )));
        }

        let table = self
            .table
            .unwrap_or_else(|| self.entity_name.to_lowercase());
        let mut spaces = vec![table.clone()];
        spaces.extend(self.extra_spaces);

        Ok(MemoryEntityPersister {
            entity_name: self.entity_name,
            table,
            property_names: self.property_names,
            spaces: crate::core::normalize_spaces(spaces),
            version_index,
            version_generated: self.version_generated,
            mutable: self.mutable,
            cache: self.cache,
            invalidate_cache: self.invalidate_cache,
            structured_cache: self.structured_cache,
            id_order: self.id_order,
            db: self.db,
        })
    }
}

/// Collection persister over a `MemoryDatabase` collection table
pub struct MemoryCollectionPersister {
    role: String,
    owner_entity_name: String,
    element_entity_name: Option<String>,
    table: String,
    kind: CollectionKind,
    one_to_many: bool,
    spaces: Vec<String>,
    filters: Vec<String>,
    cache: Option<Arc<dyn RegionAccessStrategy>>,
    db: MemoryDatabase,
}

impl MemoryCollectionPersister {
    pub fn builder(role: &str, owner_entity_name: &str, db: MemoryDatabase) -> MemoryCollectionPersisterBuilder {
        MemoryCollectionPersisterBuilder::new(role, owner_entity_name, db)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Read the stored elements of one collection.
    pub fn load(&self, key: &Value) -> Result<Vec<Value>> {
        self.db.collection_elements(&self.table, key)
    }
}

impl CollectionPersister for MemoryCollectionPersister {
    fn role(&self) -> &str {
        &self.role
    }

    fn owner_entity_name(&self) -> &str {
        &self.owner_entity_name
    }

    fn element_entity_name(&self) -> Option<&str> {
        self.element_entity_name.as_deref()
    }

    fn kind(&self) -> CollectionKind {
        self.kind
    }

    fn is_one_to_many(&self) -> bool {
        self.one_to_many
    }

    fn collection_spaces(&self) -> &[String] {
        &self.spaces
    }

    fn cache_access(&self) -> Option<&Arc<dyn RegionAccessStrategy>> {
        self.cache.as_ref()
    }

    fn filter_names(&self) -> &[String] {
        &self.filters
    }

    fn recreate(&self, collection: &PersistentCollection, key: &Value, _session: &SessionContext) -> Result<()> {
        for element in collection.elements()? {
            self.db.insert_collection_row(&self.table, key, element)?;
        }
        Ok(())
    }

    fn remove(&self, key: &Value, _session: &SessionContext) -> Result<()> {
        self.db.remove_collection(&self.table, key)?;
        Ok(())
    }

    fn delete_rows(&self, collection: &PersistentCollection, key: &Value, _session: &SessionContext) -> Result<()> {
        let diff = collection.diff(self.kind)?;
        if diff.deletes.is_empty() {
            return Ok(());
        }
        match self.kind {
            CollectionKind::List => {
                let keep = collection.len()?;
                self.db.truncate_collection(&self.table, key, keep)?;
            }
            CollectionKind::Set | CollectionKind::Bag => {
                for (_, element) in &diff.deletes {
                    self.db.delete_collection_row(&self.table, key, element)?;
                }
            }
        }
        Ok(())
    }

    fn update_rows(&self, collection: &PersistentCollection, key: &Value, _session: &SessionContext) -> Result<()> {
        for (index, element) in collection.diff(self.kind)?.updates {
            self.db.update_collection_row(&self.table, key, index, element)?;
        }
        Ok(())
    }

    fn insert_rows(&self, collection: &PersistentCollection, key: &Value, _session: &SessionContext) -> Result<()> {
        for (_, element) in collection.diff(self.kind)?.inserts {
            self.db.insert_collection_row(&self.table, key, element)?;
        }
        Ok(())
    }

    fn process_queued_ops(
        &self,
        collection: &PersistentCollection,
        key: &Value,
        _session: &SessionContext,
    ) -> Result<()> {
        for op in collection.queued_operations()? {
            match op {
                QueuedOperation::Add(element) => {
                    self.db.insert_collection_row(&self.table, key, element)?;
                }
                QueuedOperation::Remove(element) => {
                    self.db.delete_collection_row(&self.table, key, &element)?;
                }
                QueuedOperation::Clear => {
                    self.db.remove_collection(&self.table, key)?;
                }
            }
        }
        Ok(())
    }
}

pub struct MemoryCollectionPersisterBuilder {
    role: String,
    owner_entity_name: String,
    element_entity_name: Option<String>,
    table: Option<String>,
    kind: CollectionKind,
    one_to_many: bool,
    extra_spaces: Vec<String>,
    filters: Vec<String>,
    cache: Option<Arc<dyn RegionAccessStrategy>>,
    db: MemoryDatabase,
}

impl MemoryCollectionPersisterBuilder {
    pub fn new(role: &str, owner_entity_name: &str, db: MemoryDatabase) -> Self {
        Self {
            role: role.to_string(),
            owner_entity_name: owner_entity_name.to_string(),
            element_entity_name: None,
            table: None,
            kind: CollectionKind::Set,
            one_to_many: false,
            extra_spaces: Vec::new(),
            filters: Vec::new(),
            cache: None,
            db,
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn kind(mut self, kind: CollectionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Elements are entities of `entity_name`.
    pub fn element_entity(mut self, entity_name: &str) -> Self {
        self.element_entity_name = Some(entity_name.to_string());
        self
    }

    pub fn one_to_many(mut self, one_to_many: bool) -> Self {
        self.one_to_many = one_to_many;
        self
    }

    pub fn extra_spaces(mut self, spaces: &[&str]) -> Self {
        self.extra_spaces = spaces.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn filter(mut self, name: &str) -> Self {
        self.filters.push(name.to_string());
        self
    }

    pub fn cache(mut self, region: Option<Arc<dyn RegionAccessStrategy>>) -> Self {
        self.cache = region;
        self
    }

    pub fn build(self) -> MemoryCollectionPersister {
        let table = self
            .table
            .unwrap_or_else(|| self.role.to_lowercase().replace('.', "_"));
        let mut spaces = vec![table.clone()];
        spaces.extend(self.extra_spaces);

        MemoryCollectionPersister {
            role: self.role,
            owner_entity_name: self.owner_entity_name,
            element_entity_name: self.element_entity_name,
            table,
            kind: self.kind,
            one_to_many: self.one_to_many,
            spaces: crate::core::normalize_spaces(spaces),
            filters: self.filters,
            cache: self.cache,
            db: self.db,
        }
    }
}
