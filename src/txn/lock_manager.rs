//! Hierarchical two-phase lock manager.
//!
//! Per-resource grant sets, a hold-set per transaction for bulk release,
//! and wait-for edges feeding a deadlock detector, over the full
//! hierarchical {IS,IX,S,SIX,X} lock set at table and row granularity,
//! with a true FIFO wait queue and a condition variable rather than a
//! polling sleep loop.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};

use log::debug;

use crate::error::{Error, Result};
use crate::rid::Rid;
use crate::txn::transaction::{Transaction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

use LockMode::*;

impl LockMode {
    /// Standard hierarchical-locking compatibility: can a request in `self`
    /// be granted alongside an already-granted lock in `other` on the same
    /// resource.
    pub fn compatible_with(self, other: LockMode) -> bool {
        matches!(
            (self, other),
            (IntentionShared, IntentionShared)
                | (IntentionShared, IntentionExclusive)
                | (IntentionShared, Shared)
                | (IntentionShared, SharedIntentionExclusive)
                | (IntentionExclusive, IntentionShared)
                | (IntentionExclusive, IntentionExclusive)
                | (Shared, IntentionShared)
                | (Shared, Shared)
                | (SharedIntentionExclusive, IntentionShared)
        )
    }

    /// Valid upgrade targets from a currently held mode.
    fn upgrade_allowed(from: LockMode, to: LockMode) -> bool {
        matches!(
            (from, to),
            (IntentionShared, IntentionExclusive)
                | (IntentionShared, Shared)
                | (IntentionShared, SharedIntentionExclusive)
                | (IntentionShared, Exclusive)
                | (IntentionExclusive, SharedIntentionExclusive)
                | (IntentionExclusive, Exclusive)
                | (Shared, SharedIntentionExclusive)
                | (Shared, Exclusive)
                | (SharedIntentionExclusive, Exclusive)
        )
    }

    pub fn is_intent(self) -> bool {
        matches!(self, IntentionShared | IntentionExclusive | SharedIntentionExclusive)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Table(u32),
    Row(u32, Rid),
}

struct LockRequest {
    txn_id: u64,
    mode: LockMode,
    granted: bool,
}

struct Queue {
    requests: VecDeque<LockRequest>,
    /// Set while one request in the queue is an in-place upgrade, enforcing
    /// "only one upgrader per queue".
    upgrading_txn: Option<u64>,
}

impl Queue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            upgrading_txn: None,
        }
    }

    fn granted_modes_excluding(&self, txn_id: u64) -> Vec<LockMode> {
        self.requests
            .iter()
            .filter(|r| r.granted && r.txn_id != txn_id)
            .map(|r| r.mode)
            .collect()
    }

    fn can_grant(&self, txn_id: u64, mode: LockMode) -> bool {
        self.granted_modes_excluding(txn_id)
            .into_iter()
            .all(|held| mode.compatible_with(held))
    }
}

struct QueueHandle {
    queue: Mutex<Queue>,
    condvar: Condvar,
}

impl QueueHandle {
    fn new() -> Self {
        Self {
            queue: Mutex::new(Queue::new()),
            condvar: Condvar::new(),
        }
    }
}

pub struct LockManager {
    resources: Mutex<HashMap<ResourceId, std::sync::Arc<QueueHandle>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
        }
    }

    fn handle_for(&self, resource: &ResourceId) -> std::sync::Arc<QueueHandle> {
        let mut resources = self.resources.lock().unwrap();
        resources
            .entry(resource.clone())
            .or_insert_with(|| std::sync::Arc::new(QueueHandle::new()))
            .clone()
    }

    pub fn lock_table(&self, txn: &Transaction, mode: LockMode, table_oid: u32) -> Result<()> {
        self.acquire(txn, ResourceId::Table(table_oid), mode)
    }

    pub fn unlock_table(&self, txn: &Transaction, table_oid: u32) -> Result<()> {
        self.release(txn, &ResourceId::Table(table_oid))
    }

    pub fn lock_row(&self, txn: &Transaction, mode: LockMode, table_oid: u32, rid: Rid) -> Result<()> {
        let holds_intent = txn.held_locks().iter().any(|(r, m)| {
            *r == ResourceId::Table(table_oid) && (m.is_intent() || matches!(m, Shared | Exclusive))
        });
        if !holds_intent {
            return Err(Error::concurrency(format!(
                "txn {} must hold a table-level intent lock before locking row {:?}",
                txn.id(),
                rid
            )));
        }
        self.acquire(txn, ResourceId::Row(table_oid, rid), mode)
    }

    pub fn unlock_row(&self, txn: &Transaction, table_oid: u32, rid: Rid) -> Result<()> {
        self.release(txn, &ResourceId::Row(table_oid, rid))
    }

    fn acquire(&self, txn: &Transaction, resource: ResourceId, mode: LockMode) -> Result<()> {
        if txn.state() == TransactionState::Shrinking && mode != LockMode::IntentionShared {
            return Err(Error::concurrency("cannot acquire new locks in the shrinking phase"));
        }
        if txn.is_aborted() {
            return Err(Error::concurrency(format!("txn {} is aborted", txn.id())));
        }

        let handle = self.handle_for(&resource);
        let already_held = txn
            .held_locks()
            .into_iter()
            .find(|(r, _)| *r == resource)
            .map(|(_, m)| m);

        let mut queue = handle.queue.lock().unwrap();

        if let Some(held_mode) = already_held {
            if held_mode == mode {
                return Ok(());
            }
            // A table-level Shared/Exclusive lock already licenses row-level
            // locking the way an intent lock would; requesting the weaker
            // intent mode on top (e.g. a SERIALIZABLE scan's table Shared
            // lock, followed by an UPDATE's usual IntentionExclusive
            // request) is already satisfied, not a real upgrade.
            if mode.is_intent() && !held_mode.is_intent() {
                return Ok(());
            }
            if !LockMode::upgrade_allowed(held_mode, mode) {
                return Err(Error::concurrency(format!(
                    "cannot upgrade lock from {:?} to {:?}",
                    held_mode, mode
                )));
            }
            if let Some(upgrader) = queue.upgrading_txn {
                if upgrader != txn.id() {
                    return Err(Error::concurrency(
                        "another transaction is already upgrading this resource",
                    ));
                }
            }
            queue.upgrading_txn = Some(txn.id());
            queue.requests.retain(|r| r.txn_id != txn.id());
            queue.requests.push_front(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
        } else {
            queue.requests.push_back(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
        }

        loop {
            if txn.is_aborted() {
                queue.requests.retain(|r| r.txn_id != txn.id());
                if queue.upgrading_txn == Some(txn.id()) {
                    queue.upgrading_txn = None;
                }
                handle.condvar.notify_all();
                return Err(Error::concurrency(format!("txn {} aborted while waiting for a lock", txn.id())));
            }

            if queue.can_grant(txn.id(), mode) {
                for request in queue.requests.iter_mut() {
                    if request.txn_id == txn.id() {
                        request.granted = true;
                        request.mode = mode;
                    }
                }
                if queue.upgrading_txn == Some(txn.id()) {
                    queue.upgrading_txn = None;
                }
                txn.record_lock(resource.clone(), mode);
                debug!("txn {} granted {:?} on {:?}", txn.id(), mode, resource);
                handle.condvar.notify_all();
                return Ok(());
            }

            queue = handle.condvar.wait(queue).unwrap();
        }
    }

    fn release(&self, txn: &Transaction, resource: &ResourceId) -> Result<()> {
        let handle = self.handle_for(resource);
        {
            let mut queue = handle.queue.lock().unwrap();
            queue.requests.retain(|r| r.txn_id != txn.id());
        }
        handle.condvar.notify_all();
        if let Some((_, mode)) = txn.held_locks().into_iter().find(|(r, _)| r == resource) {
            txn.forget_lock(resource, mode);
        }
        Ok(())
    }

    /// Release every lock a transaction holds, called at commit/abort.
    pub fn release_all(&self, txn: &Transaction) {
        for (resource, _) in txn.held_locks() {
            let _ = self.release(txn, &resource);
        }
    }

    /// A snapshot of `(waiter_txn, holder_txn)` edges, for the deadlock
    /// detector's waits-for graph.
    pub fn waits_for_edges(&self) -> Vec<(u64, u64)> {
        let resources = self.resources.lock().unwrap();
        let mut edges = Vec::new();
        for handle in resources.values() {
            let queue = handle.queue.lock().unwrap();
            let granted: Vec<(u64, LockMode)> = queue
                .requests
                .iter()
                .filter(|r| r.granted)
                .map(|r| (r.txn_id, r.mode))
                .collect();
            for waiter in queue.requests.iter().filter(|r| !r.granted) {
                for &(holder_id, holder_mode) in &granted {
                    if holder_id != waiter.txn_id && !waiter.mode.compatible_with(holder_mode) {
                        edges.push((waiter.txn_id, holder_id));
                    }
                }
            }
        }
        edges
    }

    /// Wake every waiter on every queue; used after a deadlock victim is
    /// marked aborted so its waiters can observe the state change.
    pub fn notify_all(&self) {
        let resources = self.resources.lock().unwrap();
        for handle in resources.values() {
            handle.condvar.notify_all();
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::transaction::IsolationLevel;

    #[test]
    fn shared_locks_on_same_table_are_compatible() {
        let lm = LockManager::new();
        let t1 = Transaction::new(IsolationLevel::ReadCommitted);
        let t2 = Transaction::new(IsolationLevel::ReadCommitted);
        lm.lock_table(&t1, LockMode::Shared, 1).unwrap();
        lm.lock_table(&t2, LockMode::Shared, 1).unwrap();
    }

    #[test]
    fn row_lock_requires_table_intent_lock() {
        let lm = LockManager::new();
        let t1 = Transaction::new(IsolationLevel::ReadCommitted);
        let err = lm.lock_row(&t1, LockMode::Exclusive, 1, Rid::new(1, 0));
        assert!(err.is_err());

        lm.lock_table(&t1, LockMode::IntentionExclusive, 1).unwrap();
        lm.lock_row(&t1, LockMode::Exclusive, 1, Rid::new(1, 0)).unwrap();
    }

    #[test]
    fn upgrade_from_shared_to_exclusive_succeeds() {
        let lm = LockManager::new();
        let t1 = Transaction::new(IsolationLevel::ReadCommitted);
        lm.lock_table(&t1, LockMode::Shared, 1).unwrap();
        lm.lock_table(&t1, LockMode::Exclusive, 1).unwrap();
        assert!(t1.held_locks().contains(&(ResourceId::Table(1), LockMode::Exclusive)));
    }

    #[test]
    fn release_all_clears_every_held_lock() {
        let lm = LockManager::new();
        let t1 = Transaction::new(IsolationLevel::ReadCommitted);
        lm.lock_table(&t1, LockMode::IntentionExclusive, 1).unwrap();
        lm.lock_row(&t1, LockMode::Exclusive, 1, Rid::new(1, 0)).unwrap();
        lm.release_all(&t1);
        assert!(t1.held_locks().is_empty());
    }

    #[test]
    fn incompatible_exclusive_locks_produce_a_waits_for_edge() {
        let lm = std::sync::Arc::new(LockManager::new());
        let t1 = std::sync::Arc::new(Transaction::new(IsolationLevel::ReadCommitted));
        let t2 = std::sync::Arc::new(Transaction::new(IsolationLevel::ReadCommitted));
        lm.lock_table(&t1, LockMode::Exclusive, 1).unwrap();

        let lm2 = lm.clone();
        let t2_clone = t2.clone();
        let handle = std::thread::spawn(move || {
            let _ = lm2.lock_table(&t2_clone, LockMode::Exclusive, 1);
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        let edges = lm.waits_for_edges();
        assert!(edges.contains(&(t2.id(), t1.id())));

        t2.set_state(TransactionState::Aborted);
        lm.notify_all();
        handle.join().unwrap();
    }
}
