pub mod errors;
pub mod config;
pub mod locking;
pub mod transaction;
pub mod tx;
pub mod anubis;
pub mod storage;
pub mod dbo;

// Re-export key types and structs for easier access
pub use errors::{AnubisError, Result};
pub use config::AnubisConfig;
pub use anubis::Anubis;
pub use locking::lock::Lock;
pub use locking::lock_holder::LockHolder;
pub use locking::lock_manager::{LockInfo, LockManager};
pub use locking::lock_mode::LockMode;
pub use locking::wait_for_graph::WaitForGraph;
pub use transaction::{
    Transaction, TransactionContext, TransactionRecord, TransactionStatus, TransactionType,
};
pub use tx::{Tx, TxActions, TxStatus};
pub use storage::{Storage, StorageMutation};
pub use dbo::entity::{Entity, EntityTx};
pub use dbo::name::Name;
pub use dbo::schema::{Schema, SchemaTx};

/// Identifier of a transaction. Ids are unique and increase monotonically, so
/// they also order transactions by age.
pub type TransactionId = u64;
