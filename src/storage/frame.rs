//! Frame — a slot in the buffer pool: a
//! `RwLock<Page>` for the page body, a `Mutex<Option<u32>>` for the resident
//! page id, and atomics for pin count and the dirty flag so pinning and
//! dirtying never need the page lock itself.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::page::Page;

pub struct Frame {
    page: RwLock<Page>,
    page_id: Mutex<Option<u32>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            page: RwLock::new(Page::new()),
            page_id: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// The page's own durable LSN, read out of its header (byte 0..8 of
    /// every page, per `Page::lsn`).
    #[inline]
    pub fn page_lsn(&self) -> u64 {
        self.page.read().lsn()
    }

    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    #[inline]
    pub fn page_id(&self) -> Option<u32> {
        *self.page_id.lock()
    }

    #[inline]
    pub fn set_page_id(&self, page_id: Option<u32>) {
        *self.page_id.lock() = page_id;
    }

    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement the pin count. A no-op (rather than a panic) at zero, since
    /// callers may unpin the same guard path more than once during error
    /// unwinding.
    #[inline]
    pub fn unpin(&self) -> u32 {
        loop {
            let old = self.pin_count.load(Ordering::Relaxed);
            if old == 0 {
                return 0;
            }
            if self
                .pin_count
                .compare_exchange(old, old - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return old - 1;
            }
        }
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    #[inline]
    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id().is_none()
    }

    #[inline]
    pub fn is_evictable(&self) -> bool {
        self.page_id().is_some() && !self.is_pinned()
    }

    pub fn reset(&self) {
        self.page_mut().reset();
        self.set_page_id(None);
        self.pin_count.store(0, Ordering::Relaxed);
        self.is_dirty.store(false, Ordering::Relaxed);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_unpin_round_trip() {
        let frame = Frame::new();
        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), 1);
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn unpin_at_zero_does_not_underflow() {
        let frame = Frame::new();
        assert_eq!(frame.unpin(), 0);
    }

    #[test]
    fn evictable_only_when_loaded_and_unpinned() {
        let frame = Frame::new();
        assert!(!frame.is_evictable());
        frame.set_page_id(Some(3));
        assert!(frame.is_evictable());
        frame.pin();
        assert!(!frame.is_evictable());
    }
}
