//! `Transaction` — a running unit of work.
//!
//! A monotonic atomic id and a status enum cycling through
//! GROWING/SHRINKING/COMMITTED/ABORTED, plus an isolation level and the
//! lock set 2PL release needs at commit and abort time.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::txn::lock_manager::{LockMode, ResourceId};
use crate::wal::log_record::INVALID_LSN;

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

pub struct Transaction {
    id: u64,
    isolation: IsolationLevel,
    state: Mutex<TransactionState>,
    /// Every lock currently held, by resource, so commit/abort can release
    /// all of them without the lock manager needing a reverse index.
    lock_set: Mutex<HashSet<(ResourceId, LockMode)>>,
    /// LSN of this transaction's most recent log record, the starting point
    /// for its undo chain on abort.
    last_lsn: AtomicU64,
}

impl Transaction {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            id: NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed),
            isolation,
            state: Mutex::new(TransactionState::Growing),
            lock_set: Mutex::new(HashSet::new()),
            last_lsn: AtomicU64::new(INVALID_LSN),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == TransactionState::Aborted
    }

    pub fn last_lsn(&self) -> u64 {
        self.last_lsn.load(Ordering::Relaxed)
    }

    pub fn set_last_lsn(&self, lsn: u64) {
        self.last_lsn.store(lsn, Ordering::Relaxed);
    }

    pub fn record_lock(&self, resource: ResourceId, mode: LockMode) {
        self.lock_set.lock().unwrap().insert((resource, mode));
    }

    pub fn forget_lock(&self, resource: &ResourceId, mode: LockMode) {
        self.lock_set.lock().unwrap().remove(&(resource.clone(), mode));
    }

    pub fn held_locks(&self) -> Vec<(ResourceId, LockMode)> {
        self.lock_set.lock().unwrap().iter().cloned().collect()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonically_increasing() {
        let a = Transaction::new(IsolationLevel::ReadCommitted);
        let b = Transaction::new(IsolationLevel::ReadCommitted);
        assert!(b.id() > a.id());
    }

    #[test]
    fn starts_in_growing_state() {
        let txn = Transaction::new(IsolationLevel::Serializable);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert!(!txn.is_aborted());
    }
}
