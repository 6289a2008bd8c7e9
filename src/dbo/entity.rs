use ahash::AHashMap as HashMap;
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use log::debug;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::dbo::name::Name;
use crate::errors::{AnubisError, Result};
use crate::storage::{Storage, StorageMutation};
use crate::transaction::TransactionContext;
use crate::tx::{Tx, TxActions};

/// An in-memory entity: rows of Arrow data addressed by string keys.
///
/// Committed rows live in the entity and are persisted through a [`Storage`].
/// All access goes through an [`EntityTx`], which stages changes until commit.
pub struct Entity {
    name: Name,
    schema: SchemaRef,
    rows: RwLock<HashMap<String, RecordBatch>>,
    storage: Arc<dyn Storage>,
}

impl Entity {
    pub fn new(name: Name, schema: SchemaRef, storage: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(Self {
            name,
            schema,
            rows: RwLock::new(HashMap::new()),
            storage,
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Keys of all committed rows.
    pub(crate) fn row_keys(&self) -> Vec<String> {
        self.rows.read().keys().cloned().collect()
    }

    pub(crate) fn clear_rows(&self) {
        self.rows.write().clear();
    }

    /// Opens a new [`Tx`] on this entity within `context`.
    ///
    /// A transaction can have only one open `Tx` per entity.
    pub fn new_tx(
        self: &Arc<Self>,
        context: Arc<dyn TransactionContext<Name>>,
    ) -> Result<Tx<Name, EntityTx>> {
        Tx::new(
            self.name.clone(),
            context,
            EntityTx {
                entity: self.clone(),
                write_set: HashMap::new(),
            },
        )
    }
}

/// The [`TxActions`] of an [`Entity`]: a write set that is applied on commit
/// and thrown away on rollback.
pub struct EntityTx {
    entity: Arc<Entity>,
    /// Staged changes; `None` marks a deletion.
    write_set: HashMap<String, Option<RecordBatch>>,
}

impl EntityTx {
    /// Reads a row, seeing this transaction's own staged changes first.
    pub fn read(&self, key: &str) -> Option<RecordBatch> {
        if let Some(change) = self.write_set.get(key) {
            return change.clone();
        }
        self.entity.rows.read().get(key).cloned()
    }

    /// Number of rows as seen by this transaction.
    pub fn count(&self) -> usize {
        let rows = self.entity.rows.read();
        let mut count = rows.len();
        for (key, change) in &self.write_set {
            match (rows.contains_key(key), change.is_some()) {
                (false, true) => count += 1,
                (true, false) => count -= 1,
                _ => {}
            }
        }
        count
    }

    /// All rows visible to this transaction, concatenated in key order.
    pub fn scan(&self) -> Result<RecordBatch> {
        let rows = self.entity.rows.read();
        let mut keys: Vec<&String> = rows
            .keys()
            .filter(|k| !self.write_set.contains_key(*k))
            .chain(self.write_set.iter().filter(|(_, c)| c.is_some()).map(|(k, _)| k))
            .collect();
        keys.sort();

        let batches = keys.into_iter().filter_map(|key| match self.write_set.get(key) {
            Some(change) => change.as_ref(),
            None => rows.get(key),
        });
        concat_batches(&self.entity.schema, batches)
            .map_err(|e| AnubisError::ArrowError(e.to_string()))
    }

    /// Stages an insert or update of `key`.
    ///
    /// # Errors
    ///
    /// [`AnubisError::TxValidation`] if `batch` does not match the entity schema.
    pub fn write(&mut self, key: String, batch: RecordBatch) -> Result<()> {
        if batch.schema().fields() != self.entity.schema.fields() {
            return Err(AnubisError::TxValidation {
                dbo: self.entity.name.to_string(),
                message: format!(
                    "row '{}' does not match the schema of the entity: expected {:?}, got {:?}",
                    key,
                    self.entity.schema.fields(),
                    batch.schema().fields()
                ),
            });
        }
        self.write_set.insert(key, Some(batch));
        Ok(())
    }

    /// Stages the deletion of `key`.
    pub fn delete(&mut self, key: &str) {
        self.write_set.insert(key.to_string(), None);
    }

    /// Number of staged changes.
    pub fn staged(&self) -> usize {
        self.write_set.len()
    }
}

impl TxActions for EntityTx {
    fn perform_commit(&mut self) -> Result<()> {
        let mutations: Vec<StorageMutation> = self
            .write_set
            .iter()
            .map(|(key, change)| match change {
                Some(batch) => {
                    StorageMutation::Insert(self.entity.name.clone(), key.clone(), batch.clone())
                }
                None => StorageMutation::Delete(self.entity.name.clone(), key.clone()),
            })
            .collect();

        self.entity
            .storage
            .apply_mutations(mutations)
            .map_err(|e| AnubisError::TxStorage {
                dbo: self.entity.name.to_string(),
                message: e.to_string(),
            })?;

        let mut rows = self.entity.rows.write();
        for (key, change) in self.write_set.drain() {
            match change {
                Some(batch) => {
                    rows.insert(key, batch);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
        debug!("Applied committed changes to entity {}", self.entity.name);
        Ok(())
    }

    fn perform_rollback(&mut self) -> Result<()> {
        debug!(
            "Discarding {} staged changes to entity {}",
            self.write_set.len(),
            self.entity.name
        );
        self.write_set.clear();
        Ok(())
    }

    fn cleanup(&mut self) {
        self.write_set.clear();
    }
}

impl Tx<Name, EntityTx> {
    /// Reads the row `key` under a shared lock.
    pub fn read(&mut self, key: &str) -> Result<Option<RecordBatch>> {
        self.with_read_lock(|entity| Ok(entity.read(key)))
    }

    /// Counts the rows of the entity under a shared lock.
    pub fn count(&mut self) -> Result<usize> {
        self.with_read_lock(|entity| Ok(entity.count()))
    }

    /// Reads all rows of the entity as one batch under a shared lock.
    pub fn scan(&mut self) -> Result<RecordBatch> {
        self.with_read_lock(|entity| entity.scan())
    }

    /// Stages a write of `key` under an exclusive lock.
    pub fn write(&mut self, key: impl Into<String>, batch: RecordBatch) -> Result<()> {
        let key = key.into();
        self.with_write_lock(|entity| entity.write(key, batch))
    }

    /// Stages the deletion of `key` under an exclusive lock.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.with_write_lock(|entity| {
            entity.delete(key);
            Ok(())
        })
    }
}
