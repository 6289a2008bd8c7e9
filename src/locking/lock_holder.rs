use ahash::AHashSet as HashSet;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::TransactionId;

/// A transaction seen as a possible owner of, or waiter for, locks.
///
/// The holder remembers the resources it currently has a hold on. It does not
/// own the [`Lock`](crate::locking::lock::Lock) objects themselves; those live
/// in the [`LockManager`](crate::locking::lock_manager::LockManager) table and are
/// only referenced here by their resource key.
///
/// Equality, ordering and hashing only consider the transaction id.
pub struct LockHolder<T> {
    tx_id: TransactionId,
    locks: Mutex<HashSet<T>>,
}

impl<T> LockHolder<T>
where
    T: Clone + Eq + Hash,
{
    pub fn new(tx_id: TransactionId) -> Self {
        Self {
            tx_id,
            locks: Mutex::new(HashSet::new()),
        }
    }

    pub fn tx_id(&self) -> TransactionId {
        self.tx_id
    }

    /// Returns true if this holder currently has a hold on `resource`.
    pub fn holds(&self, resource: &T) -> bool {
        self.locks.lock().contains(resource)
    }

    /// Snapshot of all resources this holder currently has a hold on.
    pub fn locks(&self) -> Vec<T> {
        self.locks.lock().iter().cloned().collect()
    }

    /// Number of resources this holder currently has a hold on.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    pub(crate) fn add_lock(&self, resource: T) {
        self.locks.lock().insert(resource);
    }

    /// Forgets `resource` and returns the number of holds left.
    pub(crate) fn remove_lock(&self, resource: &T) -> usize {
        let mut locks = self.locks.lock();
        locks.remove(resource);
        locks.len()
    }
}

impl<T> PartialEq for LockHolder<T> {
    fn eq(&self, other: &Self) -> bool {
        self.tx_id == other.tx_id
    }
}

impl<T> Eq for LockHolder<T> {}

impl<T> PartialOrd for LockHolder<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for LockHolder<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tx_id.cmp(&other.tx_id)
    }
}

impl<T> Hash for LockHolder<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tx_id.hash(state);
    }
}

impl<T> fmt::Debug for LockHolder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHolder")
            .field("tx_id", &self.tx_id)
            .finish()
    }
}
