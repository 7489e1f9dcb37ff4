//! RAII guards for page access. A
//! `PageReadGuard` and `PageWriteGuard` each hold a `parking_lot` lock guard
//! over the page body and unpin their frame automatically on drop, so there
//! is no raw pin/unpin protocol for callers to get wrong.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::storage::buffer_pool::BufferPool;
use crate::storage::page::Page;

pub struct PageReadGuard<'a> {
    pool: &'a BufferPool,
    frame_id: usize,
    page_id: u32,
    lock: RwLockReadGuard<'a, Page>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPool,
        frame_id: usize,
        page_id: u32,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            lock,
        }
    }

    #[inline]
    pub fn page_id(&self) -> u32 {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> usize {
        self.frame_id
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_internal(self.frame_id, false);
    }
}

pub struct PageWriteGuard<'a> {
    pool: &'a BufferPool,
    frame_id: usize,
    page_id: u32,
    lock: RwLockWriteGuard<'a, Page>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPool,
        frame_id: usize,
        page_id: u32,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            lock,
        }
    }

    #[inline]
    pub fn page_id(&self) -> u32 {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> usize {
        self.frame_id
    }

    /// Record the LSN of the log record that justifies this write directly
    /// into the page's own header, so the buffer pool can enforce
    /// write-ahead logging when the page is later flushed to disk.
    pub fn stamp_lsn(&mut self, lsn: u64) {
        self.lock.set_lsn(lsn);
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.lock
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_internal(self.frame_id, true);
    }
}
