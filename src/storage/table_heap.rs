//! Table heap — a singly-linked chain of slotted pages holding one table's
//! tuples.

use std::sync::Arc;

use crate::error::Result;
use crate::rid::Rid;
use crate::storage::buffer_pool::BufferPool;
use crate::storage::table_page::{TablePage, TablePageView, UpdateOutcome, NO_NEXT_PAGE};

pub struct TableHeap {
    buffer_pool: Arc<BufferPool>,
    first_page_id: u32,
}

impl TableHeap {
    /// Create a fresh, empty heap and return it alongside its first page id
    /// (the catalog persists this id to reopen the heap later).
    pub fn create(buffer_pool: Arc<BufferPool>) -> Result<Self> {
        let first_page_id = {
            let mut guard = buffer_pool.new_page()?;
            let mut page = TablePage::new(guard.as_mut_slice());
            page.init();
            guard.page_id()
        };
        Ok(Self {
            buffer_pool,
            first_page_id,
        })
    }

    pub fn open(buffer_pool: Arc<BufferPool>, first_page_id: u32) -> Self {
        Self {
            buffer_pool,
            first_page_id,
        }
    }

    pub fn first_page_id(&self) -> u32 {
        self.first_page_id
    }

    pub fn insert(&self, bytes: &[u8]) -> Result<Rid> {
        let mut page_id = self.first_page_id;
        loop {
            let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
            let next_page_id = {
                let mut page = TablePage::new(guard.as_mut_slice());
                if let Some(slot) = page.insert(bytes) {
                    return Ok(Rid::new(page_id, slot as u32));
                }
                page.next_page_id()
            };

            if next_page_id != NO_NEXT_PAGE {
                page_id = next_page_id;
                continue;
            }

            drop(guard);
            let new_page_id = {
                let mut new_guard = self.buffer_pool.new_page()?;
                let mut new_page = TablePage::new(new_guard.as_mut_slice());
                new_page.init();
                new_guard.page_id()
            };
            let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
            let mut page = TablePage::new(guard.as_mut_slice());
            page.set_next_page_id(new_page_id);
            page_id = new_page_id;
        }
    }

    pub fn get(&self, rid: Rid) -> Result<Vec<u8>> {
        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        let page = TablePageView::new(guard.as_slice());
        page.get(rid.slot_num as u16).map(|b| b.to_vec())
    }

    pub fn is_deleted(&self, rid: Rid) -> Result<bool> {
        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        let page = TablePageView::new(guard.as_slice());
        Ok(page.is_deleted(rid.slot_num as u16))
    }

    pub fn mark_delete(&self, rid: Rid) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let mut page = TablePage::new(guard.as_mut_slice());
        page.mark_deleted(rid.slot_num as u16)
    }

    pub fn rollback_delete(&self, rid: Rid) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let mut page = TablePage::new(guard.as_mut_slice());
        page.rollback_delete(rid.slot_num as u16)
    }

    /// Update in place when the payload fits; otherwise mark the old slot
    /// deleted and insert fresh bytes elsewhere, returning the new RID.
    pub fn update(&self, rid: Rid, bytes: &[u8]) -> Result<UpdateOutcome> {
        {
            let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
            let mut page = TablePage::new(guard.as_mut_slice());
            if page.try_update_in_place(rid.slot_num as u16, bytes)? {
                return Ok(UpdateOutcome::SameRid);
            }
        }

        self.mark_delete(rid)?;
        let new_rid = self.insert(bytes)?;
        Ok(UpdateOutcome::Moved(new_rid))
    }

    /// Visit every live (non-deleted) tuple in page order.
    pub fn scan<F: FnMut(Rid, &[u8]) -> Result<()>>(&self, mut visit: F) -> Result<()> {
        let mut page_id = self.first_page_id;
        loop {
            let guard = self.buffer_pool.fetch_page_read(page_id)?;
            let page = TablePageView::new(guard.as_slice());
            let count = page.slot_count();
            for slot in 0..count {
                if page.is_deleted(slot) {
                    continue;
                }
                let bytes = page.get(slot)?.to_vec();
                visit(Rid::new(page_id, slot as u32), &bytes)?;
            }
            let next = page.next_page_id();
            drop(guard);
            if next == NO_NEXT_PAGE {
                return Ok(());
            }
            page_id = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk_manager::DiskManager;

    fn heap() -> (TableHeap, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.db")).unwrap();
        let pool = Arc::new(BufferPool::new(8, dm));
        (TableHeap::create(pool).unwrap(), dir)
    }

    #[test]
    fn insert_and_get_round_trips() {
        let (heap, _dir) = heap();
        let rid = heap.insert(b"row one").unwrap();
        assert_eq!(heap.get(rid).unwrap(), b"row one");
    }

    #[test]
    fn mark_delete_hides_tuple_from_scan() {
        let (heap, _dir) = heap();
        let rid = heap.insert(b"row one").unwrap();
        heap.insert(b"row two").unwrap();
        heap.mark_delete(rid).unwrap();

        let mut seen = Vec::new();
        heap.scan(|_, bytes| {
            seen.push(bytes.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![b"row two".to_vec()]);
    }

    #[test]
    fn update_with_smaller_payload_keeps_rid() {
        let (heap, _dir) = heap();
        let rid = heap.insert(b"original").unwrap();
        let outcome = heap.update(rid, b"short").unwrap();
        assert_eq!(outcome, UpdateOutcome::SameRid);
        assert_eq!(heap.get(rid).unwrap(), b"short");
    }

    #[test]
    fn update_with_larger_payload_moves_rid() {
        let (heap, _dir) = heap();
        let rid = heap.insert(b"short").unwrap();
        let outcome = heap.update(rid, b"a much longer replacement payload").unwrap();
        match outcome {
            UpdateOutcome::Moved(new_rid) => {
                assert_ne!(new_rid, rid);
                assert_eq!(heap.get(new_rid).unwrap(), b"a much longer replacement payload");
            }
            UpdateOutcome::SameRid => panic!("expected move"),
        }
    }

    #[test]
    fn overflowing_a_page_chains_to_a_new_one() {
        let (heap, _dir) = heap();
        let big = vec![7u8; 3000];
        let first = heap.insert(&big).unwrap();
        let second = heap.insert(&big).unwrap();
        assert_ne!(first.page_id, second.page_id);
    }
}
