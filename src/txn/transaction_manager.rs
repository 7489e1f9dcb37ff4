//! `TransactionManager` — begin/commit/abort lifecycle.
//!
//! A registry of live transactions keyed by id, consulted by the lock
//! manager and by recovery, that drives the WAL directly: `begin` appends
//! a BEGIN
//! record, `commit` appends COMMIT and flushes through its LSN before
//! releasing locks, and `abort` walks the transaction's own undo chain with
//! `wal::undo_one_record` — the same per-record inverse-and-CLR logic crash
//! recovery uses, reused here so a live abort and a crash-recovery abort
//! never drift apart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::error::{Error, Result};
use crate::storage::buffer_pool::BufferPool;
use crate::txn::lock_manager::LockManager;
use crate::txn::transaction::{IsolationLevel, Transaction, TransactionState};
use crate::wal::log_manager::LogManager;
use crate::wal::log_record::{LogRecord, LogRecordBody, INVALID_LSN};
use crate::wal::recovery::undo_one_record;

pub struct TransactionManager {
    buffer_pool: Arc<BufferPool>,
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
    active: Mutex<HashMap<u64, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(
        buffer_pool: Arc<BufferPool>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffer_pool,
            log_manager,
            lock_manager,
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        let txn = Arc::new(Transaction::new(isolation));
        let lsn = self.log_manager.append(txn.id(), INVALID_LSN, LogRecordBody::Begin);
        txn.set_last_lsn(lsn);
        self.active.lock().unwrap().insert(txn.id(), Arc::clone(&txn));
        txn
    }

    pub fn lookup(&self, txn_id: u64) -> Option<Arc<Transaction>> {
        self.active.lock().unwrap().get(&txn_id).cloned()
    }

    /// Flip a transaction to ABORTED without unwinding it. Called by the
    /// deadlock detector on its chosen victim so a blocked lock wait
    /// observes the state change and unwinds itself; the caller that issued
    /// the victim's statement is responsible for calling `abort` to run the
    /// undo chain and release locks.
    pub fn mark_victim(&self, txn_id: u64) {
        if let Some(txn) = self.active.lock().unwrap().get(&txn_id) {
            txn.set_state(TransactionState::Aborted);
        }
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<()> {
        if txn.is_aborted() {
            return Err(Error::concurrency(format!(
                "transaction {} was aborted, cannot commit",
                txn.id()
            )));
        }

        txn.set_state(TransactionState::Shrinking);
        let lsn = self.log_manager.append(txn.id(), txn.last_lsn(), LogRecordBody::Commit);
        txn.set_last_lsn(lsn);
        self.log_manager.flush_up_to(lsn)?;

        self.lock_manager.release_all(txn);
        txn.set_state(TransactionState::Committed);
        self.active.lock().unwrap().remove(&txn.id());
        info!("transaction {} committed", txn.id());
        Ok(())
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        txn.set_state(TransactionState::Shrinking);
        self.undo_chain(txn)?;

        let lsn = self.log_manager.append(txn.id(), txn.last_lsn(), LogRecordBody::Abort);
        self.log_manager.flush_up_to(lsn)?;

        self.lock_manager.release_all(txn);
        txn.set_state(TransactionState::Aborted);
        self.active.lock().unwrap().remove(&txn.id());
        info!("transaction {} aborted", txn.id());
        Ok(())
    }

    /// Walk this transaction's own prev-LSN chain backward, undoing each
    /// data-modifying record and emitting its CLR, exactly as crash recovery
    /// does for a single active transaction — but against the live WAL file
    /// rather than a WAL read at startup.
    fn undo_chain(&self, txn: &Arc<Transaction>) -> Result<()> {
        let records = self.log_manager.read_all_records()?;
        let by_lsn: HashMap<u64, &LogRecord> = records.iter().map(|r| (r.lsn, r)).collect();

        let mut cursor = txn.last_lsn();
        let mut prev_undo_lsn = INVALID_LSN;

        while cursor != INVALID_LSN {
            let record = match by_lsn.get(&cursor) {
                Some(r) => *r,
                None => break,
            };
            if record.is_begin() {
                break;
            }
            if let LogRecordBody::Clr { undone_lsn, .. } = &record.body {
                cursor = *undone_lsn;
                continue;
            }

            prev_undo_lsn =
                undo_one_record(&self.buffer_pool, &self.log_manager, txn.id(), record, prev_undo_lsn)?;
            cursor = record.prev_lsn;
        }

        if prev_undo_lsn != INVALID_LSN {
            txn.set_last_lsn(prev_undo_lsn);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk_manager::DiskManager;
    use crate::storage::table_heap::TableHeap;

    fn harness(dir: &std::path::Path) -> (Arc<BufferPool>, Arc<LogManager>, Arc<LockManager>) {
        let dm = DiskManager::open(dir.join("t.db")).unwrap();
        let pool = Arc::new(BufferPool::new(16, dm));
        let lm = LogManager::open(dir.join("t.wal")).unwrap();
        pool.attach_log_manager(Arc::clone(&lm));
        (pool, lm, Arc::new(LockManager::new()))
    }

    #[test]
    fn commit_releases_locks_and_deregisters() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, lm, lock_mgr) = harness(dir.path());
        let tm = TransactionManager::new(pool, lm, Arc::clone(&lock_mgr));

        let txn = tm.begin(IsolationLevel::ReadCommitted);
        lock_mgr.lock_table(&txn, crate::txn::lock_manager::LockMode::Exclusive, 7).unwrap();

        tm.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.held_locks().is_empty());
        assert!(tm.lookup(txn.id()).is_none());
    }

    #[test]
    fn abort_undoes_uncommitted_insert() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, lm, lock_mgr) = harness(dir.path());
        let tm = TransactionManager::new(Arc::clone(&pool), Arc::clone(&lm), lock_mgr);

        let txn = tm.begin(IsolationLevel::ReadCommitted);
        let heap = TableHeap::create(Arc::clone(&pool)).unwrap();
        let rid = heap.insert(b"scratch").unwrap();
        let ins_lsn = lm.append(
            txn.id(),
            txn.last_lsn(),
            LogRecordBody::Insert { rid, tuple: b"scratch".to_vec() },
        );
        txn.set_last_lsn(ins_lsn);
        {
            let mut guard = pool.fetch_page_write(rid.page_id).unwrap();
            guard.stamp_lsn(ins_lsn);
        }

        tm.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(heap.is_deleted(rid).unwrap());
    }

    #[test]
    fn mark_victim_flips_state_of_active_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, lm, lock_mgr) = harness(dir.path());
        let tm = TransactionManager::new(pool, lm, lock_mgr);

        let txn = tm.begin(IsolationLevel::ReadCommitted);
        tm.mark_victim(txn.id());
        assert!(txn.is_aborted());
    }
}
