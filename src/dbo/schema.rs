use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use arrow::datatypes::SchemaRef;
use log::debug;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::dbo::entity::Entity;
use crate::dbo::name::Name;
use crate::errors::{AnubisError, Result};
use crate::locking::lock_mode::LockMode;
use crate::storage::{Storage, StorageMutation};
use crate::transaction::TransactionContext;
use crate::tx::{Tx, TxActions};

/// A named collection of [`Entity`]s.
///
/// The catalogue of a schema is changed through a [`SchemaTx`], which locks the
/// schema itself and, when an entity is dropped, the entity as well.
pub struct Schema {
    name: Name,
    entities: RwLock<HashMap<Name, Arc<Entity>>>,
    storage: Arc<dyn Storage>,
}

impl Schema {
    pub fn new(name: impl Into<String>, storage: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(Self {
            name: Name::schema(name),
            entities: RwLock::new(HashMap::new()),
            storage,
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Opens a new [`Tx`] on this schema within `context`.
    pub fn new_tx(
        self: &Arc<Self>,
        context: Arc<dyn TransactionContext<Name>>,
    ) -> Result<Tx<Name, SchemaTx>> {
        Tx::new(
            self.name.clone(),
            context.clone(),
            SchemaTx {
                schema: self.clone(),
                context,
                created: HashMap::new(),
                dropped: HashSet::new(),
            },
        )
    }

    /// Name of the entity `entity` inside this schema.
    pub fn entity_name(&self, entity: &str) -> Name {
        match &self.name {
            Name::Schema(schema) | Name::Entity { schema, .. } => {
                Name::entity(schema.as_str(), entity)
            }
        }
    }
}

/// The [`TxActions`] of a [`Schema`]: staged entity creations and drops.
pub struct SchemaTx {
    schema: Arc<Schema>,
    context: Arc<dyn TransactionContext<Name>>,
    created: HashMap<Name, SchemaRef>,
    dropped: HashSet<Name>,
}

impl SchemaTx {
    fn check_member(&self, name: &Name) -> Result<()> {
        if name.parent().as_ref() != Some(&self.schema.name) {
            return Err(AnubisError::TxValidation {
                dbo: self.schema.name.to_string(),
                message: format!("{} is not an entity of schema {}", name, self.schema.name),
            });
        }
        Ok(())
    }

    fn exists(&self, name: &Name) -> bool {
        self.created.contains_key(name)
            || (!self.dropped.contains(name) && self.schema.entities.read().contains_key(name))
    }

    fn missing(&self, name: &Name) -> AnubisError {
        AnubisError::TxValidation {
            dbo: self.schema.name.to_string(),
            message: format!("entity {} does not exist", name),
        }
    }

    /// Names of all entities visible to this transaction, in name order.
    pub fn list_entities(&self) -> Vec<Name> {
        let mut names: Vec<Name> = self
            .schema
            .entities
            .read()
            .keys()
            .filter(|name| !self.dropped.contains(*name))
            .chain(self.created.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Looks up a committed entity.
    ///
    /// Entities created by this transaction only come into being on commit.
    pub fn entity(&self, name: &Name) -> Result<Arc<Entity>> {
        self.check_member(name)?;
        if self.dropped.contains(name) {
            return Err(self.missing(name));
        }
        self.schema
            .entities
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| self.missing(name))
    }

    /// Stages the creation of entity `name` with the given Arrow schema.
    pub fn create_entity(&mut self, name: Name, columns: SchemaRef) -> Result<()> {
        self.check_member(&name)?;
        if self.exists(&name) {
            return Err(AnubisError::TxValidation {
                dbo: self.schema.name.to_string(),
                message: format!("entity {} already exists", name),
            });
        }
        self.created.insert(name, columns);
        Ok(())
    }

    /// Stages dropping entity `name`.
    ///
    /// The entity is locked exclusively first, so the drop waits for every
    /// other transaction that uses it.
    pub fn drop_entity(&mut self, name: &Name) -> Result<()> {
        self.check_member(name)?;
        if !self.exists(name) {
            return Err(self.missing(name));
        }
        if !self.context.lock_on(name).covers(LockMode::Exclusive) {
            self.context.request_lock(name, LockMode::Exclusive)?;
        }
        if self.created.remove(name).is_none() {
            self.dropped.insert(name.clone());
        }
        Ok(())
    }
}

impl TxActions for SchemaTx {
    fn perform_commit(&mut self) -> Result<()> {
        let dropped: Vec<Arc<Entity>> = {
            let entities = self.schema.entities.read();
            self.dropped
                .iter()
                .filter_map(|name| entities.get(name).cloned())
                .collect()
        };
        let mutations: Vec<StorageMutation> = dropped
            .iter()
            .flat_map(|entity| {
                entity
                    .row_keys()
                    .into_iter()
                    .map(|key| StorageMutation::Delete(entity.name().clone(), key))
            })
            .collect();
        if !mutations.is_empty() {
            self.schema
                .storage
                .apply_mutations(mutations)
                .map_err(|e| AnubisError::TxStorage {
                    dbo: self.schema.name.to_string(),
                    message: e.to_string(),
                })?;
        }

        let mut entities = self.schema.entities.write();
        for entity in dropped {
            entities.remove(entity.name());
            entity.clear_rows();
            debug!("Dropped entity {}", entity.name());
        }
        for (name, columns) in self.created.drain() {
            debug!("Created entity {}", name);
            let entity = Entity::new(name.clone(), columns, self.schema.storage.clone());
            entities.insert(name, entity);
        }
        self.dropped.clear();
        Ok(())
    }

    fn perform_rollback(&mut self) -> Result<()> {
        self.created.clear();
        self.dropped.clear();
        Ok(())
    }

    fn cleanup(&mut self) {
        self.created.clear();
        self.dropped.clear();
    }
}

impl Tx<Name, SchemaTx> {
    /// Lists the entities of the schema under a shared lock.
    pub fn list_entities(&mut self) -> Result<Vec<Name>> {
        self.with_read_lock(|schema| Ok(schema.list_entities()))
    }

    /// Looks up the entity `name` under a shared lock.
    pub fn entity(&mut self, name: &Name) -> Result<Arc<Entity>> {
        self.with_read_lock(|schema| schema.entity(name))
    }

    /// Stages the creation of an entity under an exclusive lock on the schema.
    pub fn create_entity(&mut self, name: Name, columns: SchemaRef) -> Result<()> {
        self.with_write_lock(|schema| schema.create_entity(name, columns))
    }

    /// Stages dropping an entity under an exclusive lock on the schema and the entity.
    pub fn drop_entity(&mut self, name: &Name) -> Result<()> {
        self.with_write_lock(|schema| schema.drop_entity(name))
    }
}
