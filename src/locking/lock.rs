use ahash::AHashSet as HashSet;
use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::{AnubisError, Result};
use crate::locking::lock_holder::LockHolder;
use crate::locking::lock_mode::LockMode;
use crate::locking::wait_for_graph::WaitForGraph;
use crate::TransactionId;

#[derive(Debug, Default)]
struct LockState {
    owners: HashSet<TransactionId>,
    shared_count: usize,
    exclusive: bool,
    /// Exclusive requests (fresh ones and upgrades) that are currently parked.
    exclusive_waiters: HashSet<TransactionId>,
    /// Every transaction that is currently parked on this lock.
    waiting: HashSet<TransactionId>,
}

impl LockState {
    fn mode(&self) -> LockMode {
        if self.exclusive {
            LockMode::Exclusive
        } else if self.shared_count > 0 {
            LockMode::Shared
        } else {
            LockMode::NoLock
        }
    }

    fn others(&self, tx_id: TransactionId) -> Vec<TransactionId> {
        self.owners
            .iter()
            .copied()
            .filter(|o| *o != tx_id)
            .collect()
    }
}

/// Lock on a single resource, shared between all transactions that touch it.
///
/// States are `NoLock` (no owners), `Shared(n)` and `Exclusive`. Requests that
/// cannot be granted register wait-for edges, run deadlock detection and park
/// on the lock's condition variable until a release wakes them up. A woken
/// waiter always re-evaluates the state; nothing is handed over directly.
///
/// When `writer_preference` is set, a shared request from a transaction that
/// does not own the lock yet also waits while any exclusive request (including
/// an upgrade) is parked, so a steady stream of readers cannot starve a writer.
///
/// `Lock`s are created and retired by the
/// [`LockManager`](crate::locking::lock_manager::LockManager); only the
/// introspection methods are public.
pub struct Lock<T> {
    resource: T,
    state: Mutex<LockState>,
    waiters: Condvar,
    graph: Arc<WaitForGraph>,
    writer_preference: bool,
    /// Threads that looked this lock up in the table and have not left `acquire` yet.
    active: AtomicUsize,
}

impl<T> Lock<T>
where
    T: Clone + Eq + Hash + Debug,
{
    pub(crate) fn new(resource: T, graph: Arc<WaitForGraph>, writer_preference: bool) -> Self {
        Self {
            resource,
            state: Mutex::new(LockState::default()),
            waiters: Condvar::new(),
            graph,
            writer_preference,
            active: AtomicUsize::new(0),
        }
    }

    /// The resource this lock guards.
    pub fn resource(&self) -> &T {
        &self.resource
    }

    /// Current mode of this lock. The answer may be stale right after it is returned.
    pub fn mode(&self) -> LockMode {
        self.state.lock().mode()
    }

    /// Snapshot of the transactions that currently hold this lock, in id order.
    pub fn owners(&self) -> Vec<TransactionId> {
        let mut owners: Vec<TransactionId> = self.state.lock().owners.iter().copied().collect();
        owners.sort_unstable();
        owners
    }

    /// The mode in which `tx_id` holds this lock.
    pub fn mode_of(&self, tx_id: TransactionId) -> LockMode {
        let state = self.state.lock();
        if state.owners.contains(&tx_id) {
            state.mode()
        } else {
            LockMode::NoLock
        }
    }

    /// Number of transactions parked on this lock.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Acquires a hold in `mode` for `holder`, blocking until it is granted.
    ///
    /// Asking for a mode the holder already covers is a no-op, asking for
    /// `Exclusive` while holding `Shared` upgrades the hold. Fails with
    /// [`AnubisError::Deadlock`] if waiting would close a cycle in the wait-for
    /// graph; in that case the state of the lock is left untouched.
    pub(crate) fn acquire(&self, holder: &LockHolder<T>, mode: LockMode) -> Result<()> {
        if mode == LockMode::NoLock {
            return Err(AnubisError::InvalidLockMode(mode));
        }

        let tx_id = holder.tx_id();
        let mut state = self.state.lock();
        if state.owners.contains(&tx_id) {
            return match mode {
                LockMode::Exclusive => self.upgrade_locked(tx_id, &mut state),
                _ => Ok(()),
            };
        }

        match mode {
            LockMode::Shared => self.acquire_shared(tx_id, &mut state)?,
            _ => self.acquire_exclusive(tx_id, &mut state)?,
        }
        holder.add_lock(self.resource.clone());
        Ok(())
    }

    /// Converts the shared hold of `holder` into an exclusive one.
    pub(crate) fn upgrade(&self, holder: &LockHolder<T>) -> Result<()> {
        let tx_id = holder.tx_id();
        let mut state = self.state.lock();
        if !state.owners.contains(&tx_id) {
            return Err(AnubisError::LockNotHeld(tx_id, format!("{:?}", self.resource)));
        }
        self.upgrade_locked(tx_id, &mut state)
    }

    /// Gives up the hold of `holder` and wakes all parked transactions.
    pub(crate) fn release(&self, holder: &LockHolder<T>) -> Result<()> {
        let tx_id = holder.tx_id();
        let mut state = self.state.lock();
        if !state.owners.remove(&tx_id) {
            return Err(AnubisError::LockNotHeld(tx_id, format!("{:?}", self.resource)));
        }
        if state.exclusive {
            state.exclusive = false;
        } else {
            state.shared_count -= 1;
        }

        if holder.remove_lock(&self.resource) == 0 {
            self.graph.remove(tx_id);
        } else {
            // Waiters of this lock re-register whatever still blocks them once they wake up.
            for waiter in &state.waiting {
                self.graph.remove_edge(*waiter, tx_id);
            }
        }

        debug!(
            "Tx {} released lock on {:?} (now {:?}, {} waiting)",
            tx_id,
            self.resource,
            state.mode(),
            state.waiting.len()
        );
        self.waiters.notify_all();
        Ok(())
    }

    pub(crate) fn enter(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// True if nobody holds this lock and no thread is on its way through `acquire`.
    pub(crate) fn is_idle(&self) -> bool {
        self.active.load(Ordering::SeqCst) == 0 && self.state.lock().owners.is_empty()
    }

    fn acquire_shared(
        &self,
        tx_id: TransactionId,
        state: &mut MutexGuard<'_, LockState>,
    ) -> Result<()> {
        loop {
            let behind_writer = self.writer_preference && !state.exclusive_waiters.is_empty();
            if !state.exclusive && !behind_writer {
                state.shared_count += 1;
                state.owners.insert(tx_id);
                debug!(
                    "Tx {} acquired shared lock on {:?} ({} shared)",
                    tx_id, self.resource, state.shared_count
                );
                return Ok(());
            }

            let mut blockers = state.others(tx_id);
            blockers.extend(state.exclusive_waiters.iter().copied());
            self.park(tx_id, blockers, state)?;
        }
    }

    fn acquire_exclusive(
        &self,
        tx_id: TransactionId,
        state: &mut MutexGuard<'_, LockState>,
    ) -> Result<()> {
        loop {
            if !state.exclusive && state.shared_count == 0 {
                state.exclusive_waiters.remove(&tx_id);
                state.exclusive = true;
                state.owners.insert(tx_id);
                debug!("Tx {} acquired exclusive lock on {:?}", tx_id, self.resource);
                return Ok(());
            }

            state.exclusive_waiters.insert(tx_id);
            let blockers = state.others(tx_id);
            if let Err(e) = self.park(tx_id, blockers, state) {
                self.withdraw_exclusive(tx_id, state);
                return Err(e);
            }
        }
    }

    fn upgrade_locked(
        &self,
        tx_id: TransactionId,
        state: &mut MutexGuard<'_, LockState>,
    ) -> Result<()> {
        if state.exclusive {
            return Ok(());
        }

        loop {
            if state.shared_count == 1 {
                state.exclusive_waiters.remove(&tx_id);
                state.shared_count = 0;
                state.exclusive = true;
                debug!("Tx {} upgraded lock on {:?} to exclusive", tx_id, self.resource);
                return Ok(());
            }

            state.exclusive_waiters.insert(tx_id);
            let blockers = state.others(tx_id);
            if let Err(e) = self.park(tx_id, blockers, state) {
                self.withdraw_exclusive(tx_id, state);
                return Err(e);
            }
        }
    }

    /// Registers the wait in the wait-for graph and blocks until the next release.
    fn park(
        &self,
        tx_id: TransactionId,
        blockers: Vec<TransactionId>,
        state: &mut MutexGuard<'_, LockState>,
    ) -> Result<()> {
        debug!(
            "Tx {} waits for lock on {:?} held by {:?}",
            tx_id, self.resource, blockers
        );
        self.graph.add_and_detect(tx_id, blockers)?;

        state.waiting.insert(tx_id);
        self.waiters.wait(state);
        state.waiting.remove(&tx_id);
        self.graph.remove_edges(tx_id);
        Ok(())
    }

    /// Drops a parked exclusive request. Shared requests queued behind it may now proceed.
    fn withdraw_exclusive(&self, tx_id: TransactionId, state: &mut MutexGuard<'_, LockState>) {
        state.exclusive_waiters.remove(&tx_id);
        if self.writer_preference {
            self.waiters.notify_all();
        }
    }
}

impl<T: Debug> Debug for Lock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Lock")
            .field("resource", &self.resource)
            .field("mode", &state.mode())
            .field("owners", &state.owners)
            .field("waiting", &state.waiting.len())
            .finish()
    }
}
