use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::AnubisConfig;
use crate::dbo::name::Name;
use crate::locking::lock_manager::LockManager;
use crate::errors::{AnubisError, Result};
use crate::transaction::{Transaction, TransactionRecord, TransactionRegistry, TransactionType};
use crate::TransactionId;

/// Anubis Prelude
pub mod prelude {
    pub use crate::config::*;
    pub use crate::dbo::entity::*;
    pub use crate::dbo::name::*;
    pub use crate::dbo::schema::*;
    pub use crate::errors::*;
    pub use crate::locking::lock::*;
    pub use crate::locking::lock_holder::*;
    pub use crate::locking::lock_manager::*;
    pub use crate::locking::lock_mode::*;
    pub use crate::locking::wait_for_graph::*;
    pub use crate::storage::*;
    pub use crate::transaction::*;
    pub use crate::tx::*;
    pub use crate::*;
}

/// The main entry point: hands out transactions that lock database objects
/// through one shared [`LockManager`].
pub struct Anubis {
    /// The lock table shared by all transactions.
    lock_manager: Arc<LockManager<Name>>,
    /// A globally increasing counter for generating unique transaction IDs.
    transaction_counter: AtomicU64,
    /// Running transactions and the history of finished ones.
    transactions: Arc<TransactionRegistry<Name>>,
    config: AnubisConfig,
}

impl Default for Anubis {
    fn default() -> Self {
        Self::new(AnubisConfig::default())
    }
}

impl Anubis {
    pub fn new(config: AnubisConfig) -> Self {
        Self {
            lock_manager: Arc::new(LockManager::with_config(&config)),
            transaction_counter: AtomicU64::new(1),
            transactions: Arc::new(TransactionRegistry::new(
                config.transaction_table_size,
                config.transaction_history_size,
            )),
            config,
        }
    }

    /// Starts a new read-write transaction. Transaction ids start at 1 and strictly increase.
    pub fn start_transaction(&self) -> Arc<Transaction<Name>> {
        self.start_transaction_with(TransactionType::ReadWrite)
    }

    /// Starts a new transaction of the given type.
    pub fn start_transaction_with(&self, tx_type: TransactionType) -> Arc<Transaction<Name>> {
        let tx_id = self.transaction_counter.fetch_add(1, Ordering::SeqCst);
        let transaction = Arc::new(Transaction::registered(
            tx_id,
            tx_type,
            self.lock_manager.clone(),
            Arc::downgrade(&self.transactions),
        ));
        self.transactions.insert(transaction.clone());
        transaction
    }

    /// Returns the running transaction with id `tx_id`.
    pub fn get(&self, tx_id: TransactionId) -> Option<Arc<Transaction<Name>>> {
        self.transactions.get(tx_id)
    }

    /// Ids of all running transactions, in id order.
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        self.transactions.active_ids()
    }

    /// Forcibly rolls back the running transaction `tx_id`.
    pub fn kill(&self, tx_id: TransactionId) -> Result<()> {
        self.get(tx_id)
            .ok_or(AnubisError::UnknownTransaction(tx_id))?
            .kill()
    }

    /// The most recently finished transactions, oldest first.
    pub fn history(&self) -> Vec<TransactionRecord> {
        self.transactions.history()
    }

    pub fn lock_manager(&self) -> &Arc<LockManager<Name>> {
        &self.lock_manager
    }

    pub fn config(&self) -> &AnubisConfig {
        &self.config
    }
}
