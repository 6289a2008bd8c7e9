use ahash::RandomState;
use dashmap::DashMap;
use log::debug;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::config::AnubisConfig;
use crate::errors::{AnubisError, Result};
use crate::locking::lock::Lock;
use crate::locking::lock_holder::LockHolder;
use crate::locking::lock_mode::LockMode;
use crate::locking::wait_for_graph::WaitForGraph;
use crate::TransactionId;

/// Snapshot of one entry of the lock table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo<T> {
    pub resource: T,
    pub mode: LockMode,
    pub owners: Vec<TransactionId>,
}

/// The table of [`Lock`]s, keyed by the resource they guard.
///
/// A `Lock` is created on the first request for a resource and dropped from
/// the table again as soon as nobody holds it and no request for it is in
/// flight, so the table only ever contains resources that are in use. The table
/// is sharded; requests for different resources only meet on the wait-for graph,
/// and only if they have to wait.
pub struct LockManager<T>
where
    T: Eq + Hash,
{
    locks: DashMap<T, Arc<Lock<T>>, RandomState>,
    graph: Arc<WaitForGraph>,
    writer_preference: bool,
}

impl<T> Default for LockManager<T>
where
    T: Clone + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockManager<T>
where
    T: Clone + Eq + Hash + Debug,
{
    /// Creates a new `LockManager` with the default [`AnubisConfig`].
    pub fn new() -> Self {
        Self::with_config(&AnubisConfig::default())
    }

    pub fn with_config(config: &AnubisConfig) -> Self {
        Self {
            locks: DashMap::with_capacity_and_hasher(
                config.lock_table_capacity,
                RandomState::new(),
            ),
            graph: Arc::new(WaitForGraph::new()),
            writer_preference: config.shared_waits_for_exclusive,
        }
    }

    /// Acquires a hold on `resource` in `mode` for `holder`.
    ///
    /// Blocks until the hold is granted. Requesting `Exclusive` on a resource the
    /// holder already holds in `Shared` mode upgrades the hold.
    ///
    /// # Errors
    ///
    /// * [`AnubisError::InvalidLockMode`] if `mode` is `NoLock`.
    /// * [`AnubisError::Deadlock`] if waiting for the resource would close a
    ///   cycle in the wait-for graph. Nothing has been granted in that case, and
    ///   the caller is expected to roll back its transaction.
    pub fn lock(&self, holder: &LockHolder<T>, resource: T, mode: LockMode) -> Result<()> {
        if mode == LockMode::NoLock {
            return Err(AnubisError::InvalidLockMode(mode));
        }

        let lock = self.enter(&resource);
        let result = lock.acquire(holder, mode);
        lock.leave();

        if result.is_err() {
            self.evict_if_idle(&resource);
        }
        result
    }

    /// Upgrades the shared hold of `holder` on `resource` to exclusive.
    ///
    /// # Errors
    ///
    /// * [`AnubisError::LockNotHeld`] if `holder` has no hold on `resource`.
    /// * [`AnubisError::Deadlock`] if the upgrade would close a wait-for cycle.
    pub fn upgrade(&self, holder: &LockHolder<T>, resource: &T) -> Result<()> {
        let lock = match self.locks.get(resource) {
            Some(entry) => {
                let lock = entry.value().clone();
                lock.enter();
                lock
            }
            None => {
                return Err(AnubisError::LockNotHeld(
                    holder.tx_id(),
                    format!("{:?}", resource),
                ));
            }
        };
        let result = lock.upgrade(holder);
        lock.leave();
        result
    }

    /// Releases the hold of `holder` on `resource`.
    ///
    /// Unlocking a resource that has no entry in the table is a no-op. Unlocking
    /// a resource that is locked, but not by `holder`, fails with
    /// [`AnubisError::LockNotHeld`].
    pub fn unlock(&self, holder: &LockHolder<T>, resource: &T) -> Result<()> {
        let lock = match self.locks.get(resource) {
            Some(entry) => entry.value().clone(),
            None => return Ok(()),
        };
        lock.release(holder)?;
        self.evict_if_idle(resource);
        Ok(())
    }

    /// Releases every hold `holder` still has.
    pub fn unlock_all(&self, holder: &LockHolder<T>) -> Result<()> {
        for resource in holder.locks() {
            self.unlock(holder, &resource)?;
        }
        Ok(())
    }

    /// The mode in which `holder` holds `resource`.
    pub fn lock_on(&self, holder: &LockHolder<T>, resource: &T) -> LockMode {
        self.locks
            .get(resource)
            .map(|entry| entry.value().mode_of(holder.tx_id()))
            .unwrap_or(LockMode::NoLock)
    }

    /// Current mode of the lock on `resource`.
    pub fn mode(&self, resource: &T) -> LockMode {
        self.locks
            .get(resource)
            .map(|entry| entry.value().mode())
            .unwrap_or(LockMode::NoLock)
    }

    /// Transactions currently holding `resource`, in id order.
    pub fn owners(&self, resource: &T) -> Vec<TransactionId> {
        self.locks
            .get(resource)
            .map(|entry| entry.value().owners())
            .unwrap_or_default()
    }

    /// The [`Lock`] for `resource`, if it is currently in the table.
    pub fn get(&self, resource: &T) -> Option<Arc<Lock<T>>> {
        self.locks.get(resource).map(|entry| entry.value().clone())
    }

    /// Snapshot of all locks in the table.
    pub fn all_locks(&self) -> Vec<LockInfo<T>> {
        self.locks
            .iter()
            .map(|entry| LockInfo {
                resource: entry.key().clone(),
                mode: entry.value().mode(),
                owners: entry.value().owners(),
            })
            .collect()
    }

    /// Number of resources that currently have an entry in the table.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// The wait-for graph shared by all locks of this manager.
    pub fn wait_for_graph(&self) -> &WaitForGraph {
        &self.graph
    }

    /// Looks up or creates the lock for `resource` and announces a request on it.
    /// Both happen under the table shard's write lock, so the lock cannot be
    /// evicted until the matching [`Lock::leave`].
    fn enter(&self, resource: &T) -> Arc<Lock<T>> {
        let entry = self.locks.entry(resource.clone()).or_insert_with(|| {
            debug!("Creating lock for {:?}", resource);
            Arc::new(Lock::new(
                resource.clone(),
                self.graph.clone(),
                self.writer_preference,
            ))
        });
        let lock = entry.value().clone();
        lock.enter();
        lock
    }

    fn evict_if_idle(&self, resource: &T) {
        if self
            .locks
            .remove_if(resource, |_, lock| lock.is_idle())
            .is_some()
        {
            debug!("Evicted idle lock for {:?}", resource);
        }
    }
}
