//! Transaction management: hierarchical 2PL locking, deadlock detection,
//! and the transaction lifecycle.

pub mod deadlock;
pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use deadlock::DeadlockDetector;
pub use lock_manager::{LockManager, LockMode, ResourceId};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
pub use transaction_manager::TransactionManager;
