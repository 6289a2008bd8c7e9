use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::errors::{AnubisError, Result};
use crate::locking::lock_holder::LockHolder;
use crate::locking::lock_manager::LockManager;
use crate::locking::lock_mode::LockMode;
use crate::TransactionId;

/// The lock-facing side of a running transaction, as seen by a [`Tx`](crate::tx::Tx).
///
/// Database objects never talk to the [`LockManager`] directly; they ask the
/// context they were opened in, which knows the lock holder and keeps track of
/// what has been locked on its behalf.
pub trait TransactionContext<T>: Send + Sync {
    /// Id of the transaction behind this context.
    fn tx_id(&self) -> TransactionId;

    /// Acquires `mode` on `resource`, blocking until granted.
    fn request_lock(&self, resource: &T, mode: LockMode) -> Result<()>;

    /// The mode in which this context currently holds `resource`.
    fn lock_on(&self, resource: &T) -> LockMode;

    /// Releases the hold on `resource`. Releasing something that is not held is a no-op.
    fn release_lock(&self, resource: &T) -> Result<()>;

    /// Registers a [`Tx`](crate::tx::Tx) on `dbo`. A context allows at most one
    /// open `Tx` per object, since the object's lock is shared by all of them.
    fn open_tx(&self, dbo: &T) -> Result<()>;

    /// Forgets the [`Tx`](crate::tx::Tx) on `dbo` once it is closed.
    fn close_tx(&self, dbo: &T);

    /// True once the transaction has committed or rolled back.
    fn is_finalized(&self) -> bool;
}

/// Whether a [`Transaction`] may change data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionType {
    /// Takes shared locks only; exclusive requests are rejected.
    ReadOnly,
    #[default]
    ReadWrite,
}

/// Status of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Running and able to request locks.
    Ready,
    /// A lock request failed, typically because of a deadlock. Must be rolled back.
    Error,
    /// Committed; all locks have been released.
    Commit,
    /// Rolled back; all locks have been released.
    Rollback,
}

impl TransactionStatus {
    pub fn is_finalized(self) -> bool {
        matches!(self, TransactionStatus::Commit | TransactionStatus::Rollback)
    }

    pub fn can_commit(self) -> bool {
        self == TransactionStatus::Ready
    }

    pub fn can_rollback(self) -> bool {
        matches!(self, TransactionStatus::Ready | TransactionStatus::Error)
    }
}

/// What is kept of a transaction after it has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub tx_id: TransactionId,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    /// Whether the rollback was forced through [`Transaction::kill`].
    pub killed: bool,
    pub created: Instant,
    pub ended: Instant,
}

/// Running transactions, plus a bounded history of finished ones.
pub(crate) struct TransactionRegistry<T>
where
    T: Clone + Eq + Hash + Debug,
{
    active: RwLock<HashMap<TransactionId, Arc<Transaction<T>>>>,
    history: Mutex<VecDeque<TransactionRecord>>,
    history_size: usize,
}

impl<T> TransactionRegistry<T>
where
    T: Clone + Eq + Hash + Debug,
{
    pub(crate) fn new(table_size: usize, history_size: usize) -> Self {
        Self {
            active: RwLock::new(HashMap::with_capacity(table_size)),
            history: Mutex::new(VecDeque::with_capacity(history_size)),
            history_size,
        }
    }

    pub(crate) fn insert(&self, transaction: Arc<Transaction<T>>) {
        self.active
            .write()
            .insert(transaction.holder.tx_id(), transaction);
    }

    pub(crate) fn get(&self, tx_id: TransactionId) -> Option<Arc<Transaction<T>>> {
        self.active.read().get(&tx_id).cloned()
    }

    pub(crate) fn active_ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self.active.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Finished transactions, oldest first.
    pub(crate) fn history(&self) -> Vec<TransactionRecord> {
        self.history.lock().iter().cloned().collect()
    }

    fn finish(&self, record: TransactionRecord) {
        // The removed entry may be the last reference; drop it outside the table lock.
        let removed = self.active.write().remove(&record.tx_id);
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.history_size {
            history.pop_front();
        }
        drop(history);
        drop(removed);
    }
}

/// A logical transaction: one [`LockHolder`] plus the bookkeeping needed to
/// release everything it locked when it ends.
///
/// Each transaction is driven by one thread at a time; [`Transaction::kill`]
/// may be called from any thread. Locks obtained through
/// [`TransactionContext::request_lock`] are kept until they are released by a
/// [`Tx`](crate::tx::Tx) or until the transaction commits or rolls back,
/// whichever comes first.
pub struct Transaction<T>
where
    T: Clone + Eq + Hash + Debug,
{
    holder: LockHolder<T>,
    tx_type: TransactionType,
    lock_manager: Arc<LockManager<T>>,
    status: RwLock<TransactionStatus>,
    /// Objects that currently have an open `Tx` in this transaction.
    open: Mutex<HashSet<T>>,
    created: Instant,
    ended: Mutex<Option<Instant>>,
    registry: Weak<TransactionRegistry<T>>,
}

impl<T> Transaction<T>
where
    T: Clone + Eq + Hash + Debug + Send + Sync,
{
    /// Creates a read-write transaction that is not registered with any engine.
    pub fn new(tx_id: TransactionId, lock_manager: Arc<LockManager<T>>) -> Self {
        Self::with_type(tx_id, TransactionType::ReadWrite, lock_manager)
    }

    /// Creates a transaction of `tx_type` that is not registered with any engine.
    pub fn with_type(
        tx_id: TransactionId,
        tx_type: TransactionType,
        lock_manager: Arc<LockManager<T>>,
    ) -> Self {
        Self::registered(tx_id, tx_type, lock_manager, Weak::new())
    }

    pub(crate) fn registered(
        tx_id: TransactionId,
        tx_type: TransactionType,
        lock_manager: Arc<LockManager<T>>,
        registry: Weak<TransactionRegistry<T>>,
    ) -> Self {
        debug!("Transaction {} ({:?}) started", tx_id, tx_type);
        Self {
            holder: LockHolder::new(tx_id),
            tx_type,
            lock_manager,
            status: RwLock::new(TransactionStatus::Ready),
            open: Mutex::new(HashSet::new()),
            created: Instant::now(),
            ended: Mutex::new(None),
            registry,
        }
    }

    pub fn holder(&self) -> &LockHolder<T> {
        &self.holder
    }

    pub fn tx_type(&self) -> TransactionType {
        self.tx_type
    }

    pub fn status(&self) -> TransactionStatus {
        *self.status.read()
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// When this transaction committed or rolled back.
    pub fn ended(&self) -> Option<Instant> {
        *self.ended.lock()
    }

    /// Commits this transaction and releases every lock it still holds.
    ///
    /// Durable state belongs to the individual [`Tx`](crate::tx::Tx)s, which
    /// must be committed before the transaction that carries them.
    pub fn commit(&self) -> Result<()> {
        let mut status = self.status.write();
        if status.is_finalized() {
            return Err(AnubisError::TransactionFinalized(self.holder.tx_id()));
        }
        if !status.can_commit() {
            return Err(AnubisError::TransactionInError(self.holder.tx_id()));
        }
        self.finalize(&mut status, TransactionStatus::Commit, false)
    }

    /// Rolls this transaction back and releases every lock it still holds.
    pub fn rollback(&self) -> Result<()> {
        let mut status = self.status.write();
        if !status.can_rollback() {
            return Err(AnubisError::TransactionFinalized(self.holder.tx_id()));
        }
        self.finalize(&mut status, TransactionStatus::Rollback, false)
    }

    /// Forcibly rolls this transaction back from another thread.
    ///
    /// Open `Tx`s of the transaction can no longer lock or commit afterwards.
    /// A lock request that is parked when the transaction is killed keeps
    /// waiting; once granted, the lock is given back immediately and the
    /// request fails with [`AnubisError::TransactionFinalized`].
    pub fn kill(&self) -> Result<()> {
        let mut status = self.status.write();
        if !status.can_rollback() {
            return Err(AnubisError::TransactionFinalized(self.holder.tx_id()));
        }
        warn!("Transaction {} killed", self.holder.tx_id());
        self.finalize(&mut status, TransactionStatus::Rollback, true)
    }

    fn finalize(
        &self,
        status: &mut TransactionStatus,
        outcome: TransactionStatus,
        killed: bool,
    ) -> Result<()> {
        let released = self.lock_manager.unlock_all(&self.holder);
        let ended = Instant::now();
        *status = outcome;
        *self.ended.lock() = Some(ended);
        if let Some(registry) = self.registry.upgrade() {
            registry.finish(TransactionRecord {
                tx_id: self.holder.tx_id(),
                tx_type: self.tx_type,
                status: outcome,
                killed,
                created: self.created,
                ended,
            });
        }
        debug!(
            "Transaction {} finished with {:?} after {:?}",
            self.holder.tx_id(),
            outcome,
            self.created.elapsed()
        );
        released
    }
}

impl<T> TransactionContext<T> for Transaction<T>
where
    T: Clone + Eq + Hash + Debug + Send + Sync,
{
    fn tx_id(&self) -> TransactionId {
        self.holder.tx_id()
    }

    fn request_lock(&self, resource: &T, mode: LockMode) -> Result<()> {
        let tx_id = self.holder.tx_id();
        if self.status().is_finalized() {
            return Err(AnubisError::TransactionFinalized(tx_id));
        }
        if mode == LockMode::Exclusive && self.tx_type == TransactionType::ReadOnly {
            return Err(AnubisError::ReadOnlyTransaction(tx_id));
        }

        let result = self.lock_manager.lock(&self.holder, resource.clone(), mode);

        let mut status = self.status.write();
        if status.is_finalized() {
            // Killed while waiting.
            if result.is_ok() && self.holder.holds(resource) {
                if let Err(e) = self.lock_manager.unlock(&self.holder, resource) {
                    warn!(
                        "Failed to give back lock on {:?} of killed transaction {}: {}",
                        resource, tx_id, e
                    );
                }
            }
            return Err(AnubisError::TransactionFinalized(tx_id));
        }
        if let Err(e) = &result {
            if e.is_deadlock() {
                *status = TransactionStatus::Error;
            }
        }
        result
    }

    fn lock_on(&self, resource: &T) -> LockMode {
        self.lock_manager.lock_on(&self.holder, resource)
    }

    fn release_lock(&self, resource: &T) -> Result<()> {
        if !self.holder.holds(resource) {
            return Ok(());
        }
        self.lock_manager.unlock(&self.holder, resource)
    }

    fn open_tx(&self, dbo: &T) -> Result<()> {
        let tx_id = self.holder.tx_id();
        if self.status().is_finalized() {
            return Err(AnubisError::TransactionFinalized(tx_id));
        }
        if !self.open.lock().insert(dbo.clone()) {
            return Err(AnubisError::TxAlreadyOpen {
                tx_id,
                dbo: format!("{:?}", dbo),
            });
        }
        Ok(())
    }

    fn close_tx(&self, dbo: &T) {
        self.open.lock().remove(dbo);
    }

    fn is_finalized(&self) -> bool {
        self.status().is_finalized()
    }
}

impl<T> Drop for Transaction<T>
where
    T: Clone + Eq + Hash + Debug,
{
    fn drop(&mut self) {
        if self.holder.lock_count() > 0 {
            warn!(
                "Transaction {} dropped while holding {} locks; releasing them",
                self.holder.tx_id(),
                self.holder.lock_count()
            );
            if let Err(e) = self.lock_manager.unlock_all(&self.holder) {
                warn!(
                    "Failed to release locks of transaction {}: {}",
                    self.holder.tx_id(),
                    e
                );
            }
        }
    }
}
