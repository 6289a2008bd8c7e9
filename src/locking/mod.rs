/// Per-resource lock state machine.
pub mod lock;
/// Transactions as owners and waiters of locks.
pub mod lock_holder;
/// The resource keyed lock table.
pub mod lock_manager;
/// Lock strengths and their compatibility.
pub mod lock_mode;
/// Wait-for graph and deadlock detection.
pub mod wait_for_graph;
