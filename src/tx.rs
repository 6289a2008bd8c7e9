use log::{debug, warn};
use std::fmt::Debug;
use std::sync::Arc;

use crate::errors::{AnubisError, Result};
use crate::locking::lock_mode::LockMode;
use crate::transaction::TransactionContext;

/// Status of a [`Tx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// No uncommitted changes.
    Clean,
    /// Holds a write lock and possibly uncommitted changes.
    Dirty,
    /// A lock request or a write failed. Only rollback and close are allowed.
    Error,
    /// Closed for good.
    Closed,
}

/// The durable side of a [`Tx`], supplied by the database object it belongs to.
///
/// `Tx` takes care of locking and status bookkeeping and calls into these
/// hooks at the right moments. All hooks default to no-ops, which is what a
/// read-only object needs.
pub trait TxActions {
    /// Makes the changes of this `Tx` durable. Only called when the `Tx` is dirty.
    fn perform_commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Undoes the changes of this `Tx`. Called when the `Tx` is dirty or in error.
    fn perform_rollback(&mut self) -> Result<()> {
        Ok(())
    }

    /// Frees resources once the `Tx` is closed.
    fn cleanup(&mut self) {}
}

/// A transaction on a single database object.
///
/// The `Tx` locks its object through the [`TransactionContext`] it was created
/// in: [`Tx::with_read_lock`] takes a shared lock and [`Tx::with_write_lock`] an
/// exclusive one (upgrading a shared lock taken earlier). Commit and rollback
/// run the object's [`TxActions`] and then release the lock.
///
/// ```text
/// Clean --write--> Dirty --commit/rollback--> Clean
///   |                |
///   |             failure --> Error --rollback--> Clean
///   +------------------ close ------------------> Closed
/// ```
///
/// A `Tx` that is dropped without being closed is closed on drop, so its
/// changes are rolled back and its lock released.
pub struct Tx<T, A>
where
    T: Debug,
    A: TxActions,
{
    dbo: T,
    context: Arc<dyn TransactionContext<T>>,
    status: TxStatus,
    actions: A,
}

impl<T, A> Tx<T, A>
where
    T: Debug,
    A: TxActions,
{
    /// Opens a `Tx` on `dbo` in `context`.
    ///
    /// Fails with [`AnubisError::TxAlreadyOpen`] while another `Tx` on the same
    /// object is open in the same transaction.
    pub fn new(dbo: T, context: Arc<dyn TransactionContext<T>>, actions: A) -> Result<Self> {
        context.open_tx(&dbo)?;
        Ok(Self {
            dbo,
            context,
            status: TxStatus::Clean,
            actions,
        })
    }

    /// The database object this `Tx` works on.
    pub fn dbo(&self) -> &T {
        &self.dbo
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn context(&self) -> &Arc<dyn TransactionContext<T>> {
        &self.context
    }

    /// Runs `block` under a shared lock on the object.
    ///
    /// Errors returned by `block` are passed through and do not change the status.
    pub fn with_read_lock<R, F>(&mut self, block: F) -> Result<R>
    where
        F: FnOnce(&A) -> Result<R>,
    {
        self.check_usable()?;
        self.ensure_lock(LockMode::Shared)?;
        block(&self.actions)
    }

    /// Runs `block` under an exclusive lock on the object and marks the `Tx` dirty.
    ///
    /// Errors returned by `block` are passed through unchanged and leave the
    /// `Tx` in [`TxStatus::Error`]; it has to be rolled back or closed.
    pub fn with_write_lock<R, F>(&mut self, block: F) -> Result<R>
    where
        F: FnOnce(&mut A) -> Result<R>,
    {
        self.check_usable()?;
        self.ensure_lock(LockMode::Exclusive)?;
        self.status = TxStatus::Dirty;
        block(&mut self.actions).inspect_err(|_| self.status = TxStatus::Error)
    }

    /// Commits the changes of this `Tx` and releases its lock.
    ///
    /// If the commit action fails the `Tx` moves to [`TxStatus::Error`] and keeps
    /// its lock until it is rolled back. Once the commit action succeeded the
    /// `Tx` is clean, even if releasing the lock fails afterwards.
    pub fn commit(&mut self) -> Result<()> {
        match self.status {
            TxStatus::Closed => return Err(self.closed()),
            TxStatus::Error => return Err(self.in_error()),
            TxStatus::Dirty => {
                if self.context.is_finalized() {
                    // The transaction ended underneath us and its locks are gone.
                    self.status = TxStatus::Error;
                    return Err(AnubisError::TransactionFinalized(self.context.tx_id()));
                }
                if let Err(e) = self.actions.perform_commit() {
                    self.status = TxStatus::Error;
                    return Err(e);
                }
                self.status = TxStatus::Clean;
            }
            TxStatus::Clean => {}
        }

        self.context.release_lock(&self.dbo)?;
        debug!(
            "Tx for {:?} in transaction {} committed",
            self.dbo,
            self.context.tx_id()
        );
        Ok(())
    }

    /// Undoes the changes of this `Tx` and releases its lock.
    ///
    /// The lock is released even if the undo action fails; the `Tx` then stays
    /// in [`TxStatus::Error`].
    pub fn rollback(&mut self) -> Result<()> {
        let undo = match self.status {
            TxStatus::Closed => return Err(self.closed()),
            TxStatus::Dirty | TxStatus::Error => self.actions.perform_rollback(),
            TxStatus::Clean => Ok(()),
        };
        let release = self.context.release_lock(&self.dbo);

        self.status = if undo.is_ok() {
            TxStatus::Clean
        } else {
            TxStatus::Error
        };
        undo?;
        release?;
        debug!(
            "Tx for {:?} in transaction {} rolled back",
            self.dbo,
            self.context.tx_id()
        );
        Ok(())
    }

    /// Rolls back whatever is uncommitted and closes this `Tx`. Closing a closed `Tx` is a no-op.
    ///
    /// The `Tx` is closed even if the rollback fails; the rollback error is returned.
    pub fn close(&mut self) -> Result<()> {
        if self.status == TxStatus::Closed {
            return Ok(());
        }
        let result = self.rollback();
        self.status = TxStatus::Closed;
        self.actions.cleanup();
        self.context.close_tx(&self.dbo);
        result
    }

    fn check_usable(&self) -> Result<()> {
        match self.status {
            TxStatus::Closed => Err(self.closed()),
            TxStatus::Error => Err(self.in_error()),
            _ => Ok(()),
        }
    }

    fn ensure_lock(&mut self, mode: LockMode) -> Result<()> {
        if self.context.lock_on(&self.dbo).covers(mode) {
            return Ok(());
        }
        self.context
            .request_lock(&self.dbo, mode)
            .inspect_err(|_| self.status = TxStatus::Error)
    }

    fn closed(&self) -> AnubisError {
        AnubisError::TxClosed {
            tx_id: self.context.tx_id(),
            dbo: format!("{:?}", self.dbo),
        }
    }

    fn in_error(&self) -> AnubisError {
        AnubisError::TxInError {
            tx_id: self.context.tx_id(),
            dbo: format!("{:?}", self.dbo),
        }
    }
}

impl<T, A> Drop for Tx<T, A>
where
    T: Debug,
    A: TxActions,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(
                "Failed to close Tx for {:?} in transaction {}: {}",
                self.dbo,
                self.context.tx_id(),
                e
            );
        }
    }
}
