use crate::dbo::name::Name;
use crate::errors::Result;
use arrow::record_batch::RecordBatch;

/// Key of a row inside an entity.
type RowKey = String;

/// Represents a single mutation to be applied to the storage layer.
///
/// `StorageMutation` describes one change to an entity that has to be persisted
/// when the [`Tx`](crate::tx::Tx) that staged it commits.
#[derive(Debug)]
pub enum StorageMutation {
    /// Insert or update the row `key` of entity `Name`.
    Insert(Name, RowKey, RecordBatch),
    /// Delete the row `key` of entity `Name`. Deleting a missing row is a no-op.
    Delete(Name, RowKey),
}

/// Trait for the durable store behind database objects.
///
/// The lock core never touches storage itself; database objects hand their
/// staged changes to a `Storage` from [`TxActions::perform_commit`](crate::tx::TxActions::perform_commit).
/// Implementations must apply a batch of mutations atomically: either all of
/// them are persisted, or none are.
///
/// # Examples
///
/// ```no_run
/// use ::anubis::anubis::prelude::*;
/// use ahash::AHashMap as HashMap;
/// use arrow::record_batch::RecordBatch;
/// use parking_lot::Mutex;
///
/// #[derive(Default)]
/// struct MemoryStorage {
///     data: Mutex<HashMap<(Name, String), RecordBatch>>,
/// }
///
/// impl Storage for MemoryStorage {
///     fn apply_mutations(&self, mutations: Vec<StorageMutation>) -> Result<()> {
///         let mut data = self.data.lock();
///         for mutation in mutations {
///             match mutation {
///                 StorageMutation::Insert(entity, key, batch) => {
///                     data.insert((entity, key), batch);
///                 }
///                 StorageMutation::Delete(entity, key) => {
///                     data.remove(&(entity, key));
///                 }
///             }
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Storage: Send + Sync {
    /// Atomically applies the given mutations.
    ///
    /// # Errors
    ///
    /// Returns [`AnubisError::StorageError`](crate::errors::AnubisError::StorageError)
    /// if the mutations could not be persisted. Nothing must have been applied then.
    fn apply_mutations(&self, mutations: Vec<StorageMutation>) -> Result<()>;
}
