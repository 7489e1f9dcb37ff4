//! ARIES three-phase recovery.
//!
//! Builds the active-transaction table and dirty-page table during a
//! forward analysis scan, redoes from the earliest needed LSN, then undoes
//! every loser transaction's effects in reverse, emitting a CLR per undone
//! record so a repeated crash during recovery itself never re-undoes work.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{info, warn};

use crate::error::Result;
use crate::rid::Rid;
use crate::storage::buffer_pool::BufferPool;
use crate::storage::table_page::TablePage;
use crate::wal::log_manager::LogManager;
use crate::wal::log_record::{read_framed, CompensatingAction, LogRecord, LogRecordBody, INVALID_LSN};

struct ActiveTxn {
    last_lsn: u64,
}

/// Read the entire WAL file and run ARIES analysis + redo + undo against
/// `buffer_pool`. Must run before the engine accepts any request; any error
/// here is fatal to startup.
pub fn recover(log_path: &Path, buffer_pool: &BufferPool, log_manager: &LogManager) -> Result<()> {
    let records = read_all(log_path)?;
    if records.is_empty() {
        info!("no WAL records found, skipping recovery");
        return Ok(());
    }

    let (active_txns, dirty_pages) = analyze(&records);
    info!(
        "recovery analysis: {} active transaction(s), {} dirty page(s)",
        active_txns.len(),
        dirty_pages.len()
    );

    redo(&records, buffer_pool, &dirty_pages)?;
    undo(&records, buffer_pool, log_manager, active_txns)?;

    buffer_pool.flush_all_pages()?;
    info!("recovery complete");
    Ok(())
}

fn read_all(log_path: &Path) -> Result<Vec<LogRecord>> {
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(File::open(log_path)?);
    let mut records = Vec::new();
    while let Some(record) = read_framed(&mut reader)? {
        records.push(record);
    }
    Ok(records)
}

/// Reconstruct the active-transaction table and dirty-page table by
/// scanning forward once.
fn analyze(records: &[LogRecord]) -> (HashMap<u64, ActiveTxn>, HashSet<Rid>) {
    let mut active: HashMap<u64, ActiveTxn> = HashMap::new();
    let mut dirty_pages: HashSet<Rid> = HashSet::new();

    for record in records {
        match &record.body {
            LogRecordBody::Begin => {
                active.insert(record.txn_id, ActiveTxn { last_lsn: record.lsn });
            }
            LogRecordBody::Commit | LogRecordBody::Abort | LogRecordBody::End => {
                active.remove(&record.txn_id);
            }
            LogRecordBody::Insert { rid, .. }
            | LogRecordBody::Delete { rid, .. }
            | LogRecordBody::Update { rid, .. } => {
                if let Some(txn) = active.get_mut(&record.txn_id) {
                    txn.last_lsn = record.lsn;
                }
                dirty_pages.insert(*rid);
            }
            LogRecordBody::Clr { rid, .. } => {
                if let Some(txn) = active.get_mut(&record.txn_id) {
                    txn.last_lsn = record.lsn;
                }
                dirty_pages.insert(*rid);
            }
            LogRecordBody::NewPage { .. } => {
                if let Some(txn) = active.get_mut(&record.txn_id) {
                    txn.last_lsn = record.lsn;
                }
            }
        }
    }

    (active, dirty_pages)
}

/// Re-apply every data-modifying record whose target page is stale
/// (page_lsn < record_lsn).
fn redo(records: &[LogRecord], buffer_pool: &BufferPool, dirty_pages: &HashSet<Rid>) -> Result<()> {
    for record in records {
        let rid = match &record.body {
            LogRecordBody::Insert { rid, .. }
            | LogRecordBody::Delete { rid, .. }
            | LogRecordBody::Update { rid, .. }
            | LogRecordBody::Clr { rid, .. } => *rid,
            _ => continue,
        };
        if !dirty_pages.contains(&rid) {
            continue;
        }

        let mut guard = buffer_pool.fetch_page_write(rid.page_id)?;
        if guard.lsn() >= record.lsn {
            continue;
        }

        apply_physiological(&mut guard, rid, &record.body)?;
        guard.stamp_lsn(record.lsn);
    }
    Ok(())
}

/// Apply the forward effect of a data-modifying log record (used by redo
/// directly, and for CLRs the compensating action carries the same shape).
fn apply_physiological(
    guard: &mut crate::storage::page_guard::PageWriteGuard<'_>,
    rid: Rid,
    body: &LogRecordBody,
) -> Result<()> {
    let mut page = TablePage::new(guard.as_mut_slice());
    let slot = rid.slot_num as u16;

    match body {
        LogRecordBody::Insert { tuple, .. } => {
            if slot == page.tuple_count() {
                page.insert(tuple);
            } else {
                let _ = page.try_update_in_place(slot, tuple);
            }
        }
        LogRecordBody::Delete { .. } => {
            let _ = page.mark_deleted(slot);
        }
        LogRecordBody::Update { new_tuple, .. } => {
            let _ = page.try_update_in_place(slot, new_tuple);
        }
        LogRecordBody::Clr { compensating, .. } => match compensating {
            CompensatingAction::Delete { .. } => {
                let _ = page.mark_deleted(slot);
            }
            CompensatingAction::Insert { tuple } => {
                if slot == page.tuple_count() {
                    page.insert(tuple);
                } else {
                    let _ = page.rollback_delete(slot);
                    let _ = page.try_update_in_place(slot, tuple);
                }
            }
            CompensatingAction::Restore { old_tuple } => {
                let _ = page.try_update_in_place(slot, old_tuple);
            }
        },
        _ => {}
    }
    Ok(())
}

/// Apply the inverse of one data-modifying record and append its CLR.
/// Shared between crash recovery's undo pass and an active transaction's
/// explicit abort (`txn::transaction_manager::TransactionManager::abort`).
pub fn undo_one_record(
    buffer_pool: &BufferPool,
    log_manager: &LogManager,
    txn_id: u64,
    record: &LogRecord,
    prev_undo_lsn: u64,
) -> Result<u64> {
    match &record.body {
        LogRecordBody::Insert { rid, .. } => {
            let mut guard = buffer_pool.fetch_page_write(rid.page_id)?;
            let mut page = TablePage::new(guard.as_mut_slice());
            let _ = page.mark_deleted(rid.slot_num as u16);
            drop(page);
            let clr_lsn = log_manager.append(
                txn_id,
                prev_undo_lsn,
                LogRecordBody::Clr {
                    undone_lsn: record.lsn,
                    rid: *rid,
                    compensating: CompensatingAction::Delete { tuple: Vec::new() },
                },
            );
            guard.stamp_lsn(clr_lsn);
            Ok(clr_lsn)
        }
        LogRecordBody::Delete { rid, tuple } => {
            let mut guard = buffer_pool.fetch_page_write(rid.page_id)?;
            let mut page = TablePage::new(guard.as_mut_slice());
            let _ = page.rollback_delete(rid.slot_num as u16);
            drop(page);
            let clr_lsn = log_manager.append(
                txn_id,
                prev_undo_lsn,
                LogRecordBody::Clr {
                    undone_lsn: record.lsn,
                    rid: *rid,
                    compensating: CompensatingAction::Insert { tuple: tuple.clone() },
                },
            );
            guard.stamp_lsn(clr_lsn);
            Ok(clr_lsn)
        }
        LogRecordBody::Update { rid, old_tuple, .. } => {
            let mut guard = buffer_pool.fetch_page_write(rid.page_id)?;
            let mut page = TablePage::new(guard.as_mut_slice());
            let _ = page.try_update_in_place(rid.slot_num as u16, old_tuple);
            drop(page);
            let clr_lsn = log_manager.append(
                txn_id,
                prev_undo_lsn,
                LogRecordBody::Clr {
                    undone_lsn: record.lsn,
                    rid: *rid,
                    compensating: CompensatingAction::Restore { old_tuple: old_tuple.clone() },
                },
            );
            guard.stamp_lsn(clr_lsn);
            Ok(clr_lsn)
        }
        _ => Ok(prev_undo_lsn),
    }
}

/// Undo every transaction still active after analysis, walking its
/// prev-LSN chain and emitting CLRs, ending with an END record.
fn undo(
    records: &[LogRecord],
    buffer_pool: &BufferPool,
    log_manager: &LogManager,
    active_txns: HashMap<u64, ActiveTxn>,
) -> Result<()> {
    if active_txns.is_empty() {
        return Ok(());
    }

    let by_lsn: HashMap<u64, &LogRecord> = records.iter().map(|r| (r.lsn, r)).collect();

    for (txn_id, txn) in active_txns {
        warn!("undoing uncommitted transaction {} during recovery", txn_id);
        let mut cursor = txn.last_lsn;
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

            prev_undo_lsn = undo_one_record(buffer_pool, log_manager, txn_id, record, prev_undo_lsn)?;
            cursor = record.prev_lsn;
        }

        log_manager.append(txn_id, prev_undo_lsn, LogRecordBody::End);
    }

    log_manager.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk_manager::DiskManager;
    use crate::storage::table_heap::TableHeap;
    use std::sync::Arc;

    fn fresh(dir: &std::path::Path) -> (Arc<BufferPool>, Arc<LogManager>) {
        let dm = DiskManager::open(dir.join("t.db")).unwrap();
        let pool = Arc::new(BufferPool::new(16, dm));
        let lm = LogManager::open(dir.join("t.wal")).unwrap();
        pool.attach_log_manager(Arc::clone(&lm));
        (pool, lm)
    }

    #[test]
    fn committed_insert_survives_crash_simulation() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, lm) = fresh(dir.path());
        let heap = TableHeap::create(Arc::clone(&pool)).unwrap();

        let begin = lm.append(1, INVALID_LSN, LogRecordBody::Begin);
        let rid = heap.insert(b"hello").unwrap();
        let ins = lm.append(
            1,
            begin,
            LogRecordBody::Insert { rid, tuple: b"hello".to_vec() },
        );
        {
            let mut guard = pool.fetch_page_write(rid.page_id).unwrap();
            guard.stamp_lsn(ins);
        }
        let commit = lm.append(1, ins, LogRecordBody::Commit);
        lm.flush_up_to(commit).unwrap();
        lm.shutdown();

        // simulate restart: fresh buffer pool/log manager over the same files
        let dm2 = DiskManager::open(dir.path().join("t.db")).unwrap();
        let pool2 = Arc::new(BufferPool::new(16, dm2));
        let lm2 = LogManager::open(dir.path().join("t.wal")).unwrap();
        pool2.attach_log_manager(Arc::clone(&lm2));

        recover(&dir.path().join("t.wal"), &pool2, &lm2).unwrap();

        let heap2 = TableHeap::open(Arc::clone(&pool2), heap.first_page_id());
        assert_eq!(heap2.get(rid).unwrap(), b"hello");
    }

    #[test]
    fn uncommitted_insert_is_undone_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, lm) = fresh(dir.path());
        let heap = TableHeap::create(Arc::clone(&pool)).unwrap();

        let begin = lm.append(2, INVALID_LSN, LogRecordBody::Begin);
        let rid = heap.insert(b"uncommitted").unwrap();
        let ins = lm.append(
            2,
            begin,
            LogRecordBody::Insert { rid, tuple: b"uncommitted".to_vec() },
        );
        {
            let mut guard = pool.fetch_page_write(rid.page_id).unwrap();
            guard.stamp_lsn(ins);
        }
        lm.flush_up_to(ins).unwrap();
        lm.shutdown();
        pool.flush_all_pages().unwrap();

        let dm2 = DiskManager::open(dir.path().join("t.db")).unwrap();
        let pool2 = Arc::new(BufferPool::new(16, dm2));
        let lm2 = LogManager::open(dir.path().join("t.wal")).unwrap();
        pool2.attach_log_manager(Arc::clone(&lm2));

        recover(&dir.path().join("t.wal"), &pool2, &lm2).unwrap();

        let heap2 = TableHeap::open(Arc::clone(&pool2), heap.first_page_id());
        assert!(heap2.is_deleted(rid).unwrap());
    }
}
