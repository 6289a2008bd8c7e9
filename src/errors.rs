use thiserror::Error;

use crate::locking::lock_mode::LockMode;
use crate::TransactionId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnubisError {
    #[error("Deadlock detected for transaction {holder}, involving transactions {cycle:?}")]
    Deadlock {
        /// The transaction whose request closed the cycle.
        holder: TransactionId,
        /// Transactions on the cycle, in wait-for order.
        cycle: Vec<TransactionId>,
    },

    #[error("Lock mode {0:?} cannot be explicitly acquired")]
    InvalidLockMode(LockMode),

    #[error("Transaction {0} does not hold a lock on {1}")]
    LockNotHeld(TransactionId, String),

    #[error("Tx for {dbo} in transaction {tx_id} has been closed")]
    TxClosed { tx_id: TransactionId, dbo: String },

    #[error("Tx for {dbo} in transaction {tx_id} is in error state and must be rolled back")]
    TxInError { tx_id: TransactionId, dbo: String },

    #[error("Transaction {tx_id} already has an open Tx for {dbo}")]
    TxAlreadyOpen { tx_id: TransactionId, dbo: String },

    #[error("Tx validation failed for {dbo}: {message}")]
    TxValidation { dbo: String, message: String },

    #[error("Tx storage failure for {dbo}: {message}")]
    TxStorage { dbo: String, message: String },

    #[error("Transaction {0} has already been finalized")]
    TransactionFinalized(TransactionId),

    #[error("Transaction {0} is in error state and can only be rolled back")]
    TransactionInError(TransactionId),

    #[error("Transaction {0} is read-only and cannot take exclusive locks")]
    ReadOnlyTransaction(TransactionId),

    #[error("Transaction {0} is not active")]
    UnknownTransaction(TransactionId),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Arrow manipulation error: {0}")]
    ArrowError(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl AnubisError {
    /// Returns true if this error was raised because a wait-for cycle was detected.
    pub fn is_deadlock(&self) -> bool {
        matches!(self, AnubisError::Deadlock { .. })
    }
}

pub type Result<T> = std::result::Result<T, AnubisError>;
