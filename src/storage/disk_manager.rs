//! Disk Manager — reads and writes fixed-size pages to a single backing
//! file.
//!
//! Two deliberate departures from a naive implementation: reads past
//! end-of-file return zeroed pages instead of erroring, and writes are not
//! fsynced individually — a durability barrier fires every
//! `SYNC_EVERY_N_WRITES` writes and whenever `force_flush` is called.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use bit_vec::BitVec;
use log::debug;

use crate::config::PAGE_SIZE;
use crate::error::{Error, Result};

const SYNC_EVERY_N_WRITES: u64 = 32;

struct Inner {
    file: File,
    free_list: Vec<u32>,
    /// Bit `i` set means page `i` is currently sitting on `free_list`. Guards
    /// against a double `deallocate_page` silently queuing the same page id
    /// twice, which would hand it out to two different allocations later.
    freed: BitVec,
}

impl Inner {
    fn mark_freed(&mut self, page_id: u32) -> bool {
        let idx = page_id as usize;
        if idx >= self.freed.len() {
            self.freed.grow(idx + 1 - self.freed.len(), false);
        }
        if self.freed[idx] {
            return false;
        }
        self.freed.set(idx, true);
        true
    }

    fn mark_allocated(&mut self, page_id: u32) {
        let idx = page_id as usize;
        if idx < self.freed.len() {
            self.freed.set(idx, false);
        }
    }
}

/// Single file backing the database. `allocate_page` hands out monotonically
/// increasing page ids unless a freed page is available to reuse.
pub struct DiskManager {
    inner: Mutex<Inner>,
    next_page_id: AtomicU32,
    writes_since_sync: AtomicU64,
}

impl DiskManager {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        let next_page_id = (len / PAGE_SIZE as u64) as u32;

        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                free_list: Vec::new(),
                freed: BitVec::new(),
            }),
            next_page_id: AtomicU32::new(next_page_id),
            writes_since_sync: AtomicU64::new(0),
        })
    }

    /// Read a page into `buf`. A read whose offset is past the current end
    /// of file returns a zeroed page rather than an error.
    pub fn read_page(&self, page_id: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let file_len = inner.file.metadata()?.len();

        if offset >= file_len {
            buf.fill(0);
            return Ok(());
        }

        inner
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(Error::Io)?;
        match inner.file.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                buf.fill(0);
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn write_page(&self, page_id: u32, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let offset = page_id as u64 * PAGE_SIZE as u64;
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(Error::Io)?;
        inner.file.write_all(buf)?;

        let n = self.writes_since_sync.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SYNC_EVERY_N_WRITES == 0 {
            inner.file.sync_data()?;
        }
        Ok(())
    }

    /// Allocate a new page id, monotonically increasing unless a
    /// deallocated page is available for reuse.
    pub fn allocate_page(&self) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.free_list.pop() {
            inner.mark_allocated(id);
            debug!("reusing freed page {}", id);
            return id;
        }
        drop(inner);
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// A permitted extension: push `page_id` onto the free list for reuse.
    /// A page id already on the free list is ignored rather than queued
    /// twice (a double deallocate would otherwise let two later allocations
    /// hand out the same page).
    pub fn deallocate_page(&self, page_id: u32) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.mark_freed(page_id) {
            debug!("page {} deallocated twice, ignoring", page_id);
            return;
        }
        inner.free_list.push(page_id);
    }

    pub fn force_flush(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        inner.file.sync_all()?;
        Ok(())
    }

    pub fn num_pages(&self) -> u32 {
        self.next_page_id.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_past_eof_returns_zeroed_page() {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.db")).unwrap();
        let mut buf = [0xAAu8; PAGE_SIZE];
        dm.read_page(50, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.db")).unwrap();
        let pid = dm.allocate_page();
        let mut buf = [0u8; PAGE_SIZE];
        buf[0] = 42;
        dm.write_page(pid, &buf).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        dm.read_page(pid, &mut out).unwrap();
        assert_eq!(out[0], 42);
    }

    #[test]
    fn allocate_page_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.db")).unwrap();
        let a = dm.allocate_page();
        let b = dm.allocate_page();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn deallocated_page_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.db")).unwrap();
        let a = dm.allocate_page();
        dm.deallocate_page(a);
        let b = dm.allocate_page();
        assert_eq!(a, b);
    }

    #[test]
    fn double_deallocate_does_not_duplicate_the_free_list_entry() {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.db")).unwrap();
        let a = dm.allocate_page();
        dm.deallocate_page(a);
        dm.deallocate_page(a);

        let first = dm.allocate_page();
        let second = dm.allocate_page();
        assert_eq!(first, a);
        assert_ne!(second, a);
    }
}
