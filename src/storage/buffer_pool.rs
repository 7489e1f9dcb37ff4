//! Buffer pool manager.
//! a fixed `Vec<Frame>`, a page table mapping page id to frame index, a free
//! list, and a pluggable replacer. Generalized from that teacher's FIFO
//! policy to [`LruKReplacer`], and extended with a WAL-before-data rule: a
//! dirty frame is only written back once the log manager confirms its
//! `page_lsn` is durable.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::PAGE_SIZE;
use crate::error::{Error, Result};
use crate::storage::disk_manager::DiskManager;
use crate::storage::frame::Frame;
use crate::storage::page_guard::{PageReadGuard, PageWriteGuard};
use crate::storage::replacer::LruKReplacer;
use crate::storage::stats::BufferPoolStats;
use crate::wal::log_manager::LogManager;

pub struct BufferPool {
    frames: Vec<Frame>,
    page_table: RwLock<HashMap<u32, usize>>,
    free_list: Mutex<Vec<usize>>,
    replacer: Mutex<LruKReplacer>,
    disk_manager: DiskManager,
    log_manager: RwLock<Option<Arc<LogManager>>>,
    stats: BufferPoolStats,
    pool_size: usize,
}

impl BufferPool {
    pub fn new(pool_size: usize, disk_manager: DiskManager) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");
        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list: Vec<usize> = (0..pool_size).collect();

        Self {
            frames,
            page_table: RwLock::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: Mutex::new(LruKReplacer::new()),
            disk_manager,
            log_manager: RwLock::new(None),
            stats: BufferPoolStats::new(),
            pool_size,
        }
    }

    /// Wire in the log manager so dirty-page flushes can be held behind the
    /// WAL-before-data rule. Set once during engine startup.
    pub fn attach_log_manager(&self, log_manager: Arc<LogManager>) {
        *self.log_manager.write() = Some(log_manager);
    }

    pub fn disk_manager(&self) -> &DiskManager {
        &self.disk_manager
    }

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn fetch_page_read(&self, page_id: u32) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id].page();
        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    pub fn fetch_page_write(&self, page_id: u32) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id].page_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.get_free_frame()?;
        let page_id = self.disk_manager.allocate_page();

        let frame = &self.frames[frame_id];
        frame.page_mut().reset();
        frame.set_page_id(Some(page_id));
        frame.pin();

        self.page_table.write().insert(page_id, frame_id);
        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        let lock = frame.page_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Remove a page from the buffer pool and return its frame to disk's
    /// free list. Errors if the page is still pinned.
    pub fn delete_page(&self, page_id: u32) -> Result<()> {
        let mut pt = self.page_table.write();
        let frame_id = match pt.get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id];
        if frame.is_pinned() {
            return Err(Error::concurrency(format!(
                "cannot delete pinned page {}",
                page_id
            )));
        }

        pt.remove(&page_id);
        drop(pt);

        frame.reset();
        self.replacer.lock().remove(frame_id);
        self.free_list.lock().push(frame_id);
        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    pub fn flush_page(&self, page_id: u32) -> Result<()> {
        let frame_id = {
            let pt = self.page_table.read();
            match pt.get(&page_id) {
                Some(&fid) => fid,
                None => return Ok(()),
            }
        };
        self.flush_frame(frame_id, page_id)
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        let pages: Vec<(u32, usize)> = {
            let pt = self.page_table.read();
            pt.iter().map(|(&pid, &fid)| (pid, fid)).collect()
        };
        for (page_id, frame_id) in pages {
            self.flush_frame(frame_id, page_id)?;
        }
        self.disk_manager.force_flush()
    }

    pub(crate) fn unpin_internal(&self, frame_id: usize, is_dirty: bool) {
        let frame = &self.frames[frame_id];
        if is_dirty {
            frame.mark_dirty();
        }
        let new_pin_count = frame.unpin();
        if new_pin_count == 0 {
            self.replacer.lock().set_evictable(frame_id, true);
        }
    }

    fn fetch_page_internal(&self, page_id: u32) -> Result<usize> {
        {
            let pt = self.page_table.read();
            if let Some(&frame_id) = pt.get(&page_id) {
                self.handle_cache_hit(frame_id);
                return Ok(frame_id);
            }
        }
        self.handle_cache_miss(page_id)
    }

    fn handle_cache_hit(&self, frame_id: usize) {
        let frame = &self.frames[frame_id];
        frame.pin();
        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id);
        replacer.set_evictable(frame_id, false);
        self.stats.cache_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn handle_cache_miss(&self, page_id: u32) -> Result<usize> {
        self.stats
            .cache_misses
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let frame_id = self.get_free_frame()?;
        let mut buf = [0u8; PAGE_SIZE];
        self.disk_manager.read_page(page_id, &mut buf)?;
        self.stats
            .pages_read
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let frame = &self.frames[frame_id];
        frame.page_mut().as_mut_slice().copy_from_slice(&buf);
        frame.set_page_id(Some(page_id));
        frame.pin();

        self.page_table.write().insert(page_id, frame_id);
        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id);
        replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    fn get_free_frame(&self) -> Result<usize> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }
        self.evict_page()
    }

    fn evict_page(&self) -> Result<usize> {
        let frame_id = self
            .replacer
            .lock()
            .evict()
            .ok_or_else(|| Error::ResourceExhausted("buffer pool is full; no evictable frames".into()))?;

        self.stats
            .evictions
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let frame = &self.frames[frame_id];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            if let Some(pid) = old_page_id {
                self.flush_frame(frame_id, pid)?;
            }
        }

        if let Some(pid) = old_page_id {
            self.page_table.write().remove(&pid);
        }

        frame.clear_dirty();
        frame.set_page_id(None);
        Ok(frame_id)
    }

    /// Flush a frame, first waiting for the WAL to durably record the log
    /// record that produced `page_lsn` (write-ahead logging).
    fn flush_frame(&self, frame_id: usize, page_id: u32) -> Result<()> {
        let frame = &self.frames[frame_id];
        if !frame.is_dirty() {
            return Ok(());
        }

        if let Some(lm) = self.log_manager.read().as_ref() {
            lm.flush_up_to(frame.page_lsn())?;
        }

        let page = frame.page();
        self.disk_manager.write_page(page_id, page.as_slice())?;
        drop(page);

        frame.clear_dirty();
        self.stats
            .pages_written
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(size: usize) -> (BufferPool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.db")).unwrap();
        (BufferPool::new(size, dm), dir)
    }

    #[test]
    fn new_page_then_fetch_round_trips() {
        let (pool, _dir) = pool(4);
        let page_id;
        {
            let mut guard = pool.new_page().unwrap();
            page_id = guard.page_id();
            guard.as_mut_slice()[0] = 9;
        }
        let guard = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.as_slice()[0], 9);
    }

    #[test]
    fn eviction_reuses_frame_when_pool_is_full() {
        let (pool, _dir) = pool(1);
        let first = pool.new_page().unwrap().page_id();
        // first guard dropped, frame now evictable
        let second = pool.new_page().unwrap().page_id();
        assert_ne!(first, second);
    }

    #[test]
    fn full_pool_with_all_pages_pinned_errors() {
        let (pool, _dir) = pool(1);
        let _guard = pool.new_page().unwrap();
        let err = pool.new_page();
        assert!(err.is_err());
    }

    #[test]
    fn delete_pinned_page_is_rejected() {
        let (pool, _dir) = pool(2);
        let guard = pool.new_page().unwrap();
        let page_id = guard.page_id();
        assert!(pool.delete_page(page_id).is_err());
    }
}
