//! Log Manager — append-only WAL with a background flusher.
//!
//! Runs a dedicated `std::thread` flusher with a `crossbeam_channel`
//! shutdown signal (the same pattern the deadlock detector uses), woken by
//! a condvar whenever the in-memory buffer exceeds a size threshold, on a
//! timeout, or on an explicit `flush_up_to` wait.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use log::{debug, info};

use crate::error::{Error, Result};
use crate::wal::log_record::{read_framed, write_framed, LogRecord, LogRecordBody, INVALID_LSN};

const FLUSH_BYTE_THRESHOLD: usize = 64 * 1024;
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(25);

struct PendingBuffer {
    records: Vec<LogRecord>,
    bytes: usize,
}

impl PendingBuffer {
    fn new() -> Self {
        Self { records: Vec::new(), bytes: 0 }
    }
}

pub struct LogManager {
    log_path: PathBuf,
    next_lsn: AtomicU64,
    persistent_lsn: AtomicU64,
    pending: Mutex<PendingBuffer>,
    flush_cond: Condvar,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    file: Mutex<BufWriter<File>>,
}

impl LogManager {
    /// Open (creating if absent) the log file and scan it once to discover
    /// the highest LSN already durable, so freshly minted LSNs continue the
    /// sequence across restarts.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let log_path = path.as_ref().to_path_buf();
        let mut max_lsn = INVALID_LSN;

        if log_path.exists() {
            let mut reader = std::io::BufReader::new(File::open(&log_path)?);
            while let Some(record) = read_framed(&mut reader)? {
                if record.lsn > max_lsn {
                    max_lsn = record.lsn;
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let manager = Arc::new(Self {
            log_path,
            next_lsn: AtomicU64::new(max_lsn + 1),
            persistent_lsn: AtomicU64::new(max_lsn),
            pending: Mutex::new(PendingBuffer::new()),
            flush_cond: Condvar::new(),
            shutdown_tx,
            shutdown_rx,
            flusher: Mutex::new(None),
            file: Mutex::new(BufWriter::new(file)),
        });

        manager.spawn_flusher();
        Ok(manager)
    }

    fn spawn_flusher(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = std::thread::spawn(move || manager.flusher_loop());
        *self.flusher.lock().unwrap() = Some(handle);
    }

    fn flusher_loop(self: Arc<Self>) {
        loop {
            match self.shutdown_rx.recv_timeout(FLUSH_POLL_INTERVAL) {
                Ok(()) => {
                    let _ = self.flush_pending();
                    info!("log flusher shutting down");
                    return;
                }
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => {
                    let _ = self.flush_pending();
                    return;
                }
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                    let _ = self.flush_pending();
                }
            }
        }
    }

    /// Assign the next LSN, serialize the record, and buffer it for the
    /// flusher. Returns the LSN immediately; durability is only guaranteed
    /// after `flush_up_to(lsn)` returns.
    pub fn append(&self, txn_id: u64, prev_lsn: u64, body: LogRecordBody) -> u64 {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let record = LogRecord { lsn, prev_lsn, txn_id, body };

        let mut pending = self.pending.lock().unwrap();
        pending.bytes += record.to_bytes().len();
        pending.records.push(record);
        let over_threshold = pending.bytes >= FLUSH_BYTE_THRESHOLD;
        drop(pending);

        if over_threshold {
            self.flush_cond.notify_all();
        }
        lsn
    }

    pub fn persistent_lsn(&self) -> u64 {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    /// Block until `persistent_lsn() >= target`. A no-op if already durable.
    pub fn flush_up_to(&self, target: u64) -> Result<()> {
        if self.persistent_lsn() >= target {
            return Ok(());
        }
        self.flush_pending()?;
        self.flush_cond.notify_all();
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let target = self.next_lsn.load(Ordering::SeqCst).saturating_sub(1);
        self.flush_up_to(target)
    }

    fn flush_pending(&self) -> Result<()> {
        let records = {
            let mut pending = self.pending.lock().unwrap();
            if pending.records.is_empty() {
                return Ok(());
            }
            std::mem::replace(&mut pending.records, Vec::new())
        };
        self.pending.lock().unwrap().bytes = 0;

        let max_lsn = records.iter().map(|r| r.lsn).max().unwrap_or(INVALID_LSN);
        {
            let mut file = self.file.lock().unwrap();
            for record in &records {
                write_framed(&mut *file, record)?;
            }
            file.flush().map_err(Error::Io)?;
            file.get_ref().sync_data().map_err(Error::Io)?;
        }

        self.persistent_lsn.fetch_max(max_lsn, Ordering::SeqCst);
        debug!("flushed {} log records up to lsn {}", records.len(), max_lsn);
        Ok(())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Flush pending records, then read the whole WAL file back from disk.
    /// Used by `TransactionManager::abort` to walk a single live
    /// transaction's undo chain the same way crash recovery does.
    pub fn read_all_records(&self) -> Result<Vec<LogRecord>> {
        self.flush_pending()?;
        let mut reader = std::io::BufReader::new(File::open(&self.log_path)?);
        let mut records = Vec::new();
        while let Some(record) = read_framed(&mut reader)? {
            records.push(record);
        }
        Ok(records)
    }

    /// Stop the flusher thread, flushing any residual records first.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.flusher.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_flush_persists_lsn() {
        let dir = tempfile::tempdir().unwrap();
        let lm = LogManager::open(dir.path().join("t.wal")).unwrap();
        let lsn = lm.append(1, INVALID_LSN, LogRecordBody::Begin);
        lm.flush_up_to(lsn).unwrap();
        assert!(lm.persistent_lsn() >= lsn);
    }

    #[test]
    fn reopen_continues_lsn_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wal");
        let last_lsn;
        {
            let lm = LogManager::open(&path).unwrap();
            last_lsn = lm.append(1, INVALID_LSN, LogRecordBody::Begin);
            lm.flush_up_to(last_lsn).unwrap();
            lm.shutdown();
        }
        let lm2 = LogManager::open(&path).unwrap();
        let next = lm2.append(2, INVALID_LSN, LogRecordBody::Begin);
        assert!(next > last_lsn);
    }
}
