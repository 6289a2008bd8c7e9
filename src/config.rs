use serde::{Deserialize, Serialize};

/// Tuning knobs for the lock table and the transaction layer.
///
/// Every field has a default, so partial configurations deserialize fine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AnubisConfig {
    /// Initial capacity of the resource to lock table.
    pub lock_table_capacity: usize,
    /// If set, new shared requests queue behind parked exclusive requests
    /// (writer preference). If unset, shared requests are granted whenever the
    /// lock is not held exclusively, which can starve writers under heavy read load.
    pub shared_waits_for_exclusive: bool,
    /// Initial capacity of the table of active transactions.
    pub transaction_table_size: usize,
    /// Number of finished transactions kept for inspection; the oldest are dropped first.
    pub transaction_history_size: usize,
}

impl Default for AnubisConfig {
    fn default() -> Self {
        Self {
            lock_table_capacity: 128,
            shared_waits_for_exclusive: true,
            transaction_table_size: 100,
            transaction_history_size: 100,
        }
    }
}
