//! B+tree index: insert/remove/lookup/range_scan with latch crabbing.
//!
//! The crabbing/split/merge control flow runs over this engine's own
//! `BufferPool`/`PageWriteGuard` and over variable-length `Value` keys
//! rather than fixed-width rows.
//!
//! Structural changes to the tree (splits, merges, root changes) are not
//! themselves logged to the WAL: recovery only replays table-heap
//! mutations, and the index is treated as derived state rebuilt by
//! re-running DDL/DML.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::Result;
use crate::index::btree::internal_page::BTreeInternalPage;
use crate::index::btree::leaf_page::BTreeLeafPage;
use crate::index::btree::page::BTreePageHeader;
use crate::rid::Rid;
use crate::storage::buffer_pool::BufferPool;
use crate::value::Value;

pub const DEFAULT_MAX_SIZE: u16 = 64;

pub struct BTreeIndex {
    buffer_pool: Arc<BufferPool>,
    root_page_id: Mutex<u32>,
    max_size: u16,
    /// A latch protecting structural changes to the tree above the page
    /// level (root swaps). Ordinary reads/lookups don't need it; insert and
    /// remove take it for their full duration, matching the single-writer
    /// simplification noted in DESIGN.md.
    tree_latch: Mutex<()>,
}

impl BTreeIndex {
    pub fn create(buffer_pool: Arc<BufferPool>) -> Result<Self> {
        Self::create_with_max_size(buffer_pool, DEFAULT_MAX_SIZE)
    }

    pub fn create_with_max_size(buffer_pool: Arc<BufferPool>, max_size: u16) -> Result<Self> {
        let mut guard = buffer_pool.new_page()?;
        let root_page_id = guard.page_id();
        let mut leaf = BTreeLeafPage::new_empty(max_size);
        leaf.write_back(guard.as_mut_slice())?;
        drop(guard);

        Ok(Self {
            buffer_pool,
            root_page_id: Mutex::new(root_page_id),
            max_size,
            tree_latch: Mutex::new(()),
        })
    }

    pub fn open(buffer_pool: Arc<BufferPool>, root_page_id: u32) -> Self {
        Self {
            buffer_pool,
            root_page_id: Mutex::new(root_page_id),
            max_size: DEFAULT_MAX_SIZE,
            tree_latch: Mutex::new(()),
        }
    }

    pub fn root_page_id(&self) -> u32 {
        *self.root_page_id.lock()
    }

    pub fn lookup(&self, key: &Value) -> Result<Option<Rid>> {
        let leaf_id = self.find_leaf_for_read(key)?;
        let guard = self.buffer_pool.fetch_page_read(leaf_id)?;
        let leaf = BTreeLeafPage::read(guard.as_slice())?;
        Ok(leaf.lookup(key))
    }

    /// Descend with read latches only, coupling parent-then-child (no
    /// crabbing needed since nothing is mutated).
    fn find_leaf_for_read(&self, key: &Value) -> Result<u32> {
        let mut current_id = self.root_page_id();
        loop {
            let guard = self.buffer_pool.fetch_page_read(current_id)?;
            let header = BTreePageHeader::read(guard.as_slice())?;
            if header.is_leaf() {
                return Ok(current_id);
            }
            let internal = BTreeInternalPage::read(guard.as_slice())?;
            current_id = internal.child_for(key);
        }
    }

    pub fn insert(&self, key: Value, rid: Rid) -> Result<()> {
        let _tree_guard = self.tree_latch.lock();
        let mut stack: Vec<u32> = Vec::new();
        let mut current_id = self.root_page_id();

        loop {
            let guard = self.buffer_pool.fetch_page_write(current_id)?;
            let header = BTreePageHeader::read(guard.as_slice())?;
            if header.is_leaf() {
                drop(guard);
                break;
            }
            let internal = BTreeInternalPage::read(guard.as_slice())?;
            let child_id = internal.child_for(&key);
            if header.is_safe_for_insert() {
                stack.clear();
            }
            stack.push(current_id);
            drop(guard);
            current_id = child_id;
        }

        self.insert_into_leaf(current_id, key, rid, &mut stack)
    }

    fn insert_into_leaf(&self, leaf_id: u32, key: Value, rid: Rid, ancestors: &mut Vec<u32>) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(leaf_id)?;
        let mut leaf = BTreeLeafPage::read(guard.as_slice())?;

        if leaf.would_fit(&key) {
            leaf.insert(key, rid);
            leaf.write_back(guard.as_mut_slice())?;
            return Ok(());
        }

        leaf.insert(key, rid);
        let right_entries = leaf.split_off();
        leaf.write_back(guard.as_mut_slice())?;

        let mut right_guard = self.buffer_pool.new_page()?;
        let right_id = right_guard.page_id();
        let mut right_leaf = BTreeLeafPage::new_empty(self.max_size);
        right_leaf.entries = right_entries;
        right_leaf.header.parent_page_id = leaf.header.parent_page_id;
        right_leaf.set_next_page_id(leaf.next_page_id());
        leaf.set_next_page_id(Some(right_id));
        right_leaf.write_back(right_guard.as_mut_slice())?;
        leaf.write_back(guard.as_mut_slice())?;

        let separator = right_leaf
            .first_key()
            .cloned()
            .expect("freshly split leaf always keeps at least one entry");
        drop(guard);
        drop(right_guard);

        self.propagate_split(leaf_id, separator, right_id, ancestors)
    }

    /// Insert `(separator, right_child)` into the parent named by the top of
    /// `ancestors`, splitting further up the tree as needed. If `ancestors`
    /// is empty, `left_id` was the root and a new root is created above it.
    fn propagate_split(
        &self,
        left_id: u32,
        separator: Value,
        right_id: u32,
        ancestors: &mut Vec<u32>,
    ) -> Result<()> {
        let parent_id = match ancestors.pop() {
            Some(id) => id,
            None => {
                let mut root_guard = self.buffer_pool.new_page()?;
                let new_root_id = root_guard.page_id();
                let mut root = BTreeInternalPage::new_root(left_id, separator, right_id, self.max_size);
                root.write_back(root_guard.as_mut_slice())?;
                drop(root_guard);

                self.set_parent(left_id, new_root_id)?;
                self.set_parent(right_id, new_root_id)?;
                *self.root_page_id.lock() = new_root_id;
                debug!("btree root split, new root page {}", new_root_id);
                return Ok(());
            }
        };

        self.set_parent(right_id, parent_id)?;

        let mut parent_guard = self.buffer_pool.fetch_page_write(parent_id)?;
        let mut parent = BTreeInternalPage::read(parent_guard.as_slice())?;
        parent.insert(separator, right_id);

        if !parent.header.is_full() {
            parent.write_back(parent_guard.as_mut_slice())?;
            return Ok(());
        }

        let (new_separator, right_children, right_keys) = parent.split_off();
        parent.write_back(parent_guard.as_mut_slice())?;

        let mut right_internal_guard = self.buffer_pool.new_page()?;
        let right_internal_id = right_internal_guard.page_id();
        let mut right_internal = BTreeInternalPage::new_empty(self.max_size);
        right_internal.children = right_children;
        right_internal.keys = right_keys;
        right_internal.header.parent_page_id = parent.header.parent_page_id;
        right_internal.write_back(right_internal_guard.as_mut_slice())?;
        drop(right_internal_guard);
        drop(parent_guard);

        for &child in &right_internal.children {
            self.set_parent(child, right_internal_id)?;
        }

        self.propagate_split(parent_id, new_separator, right_internal_id, ancestors)
    }

    fn set_parent(&self, page_id: u32, parent_id: u32) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        let header = BTreePageHeader::read(guard.as_slice())?;
        if header.is_leaf() {
            let mut leaf = BTreeLeafPage::read(guard.as_slice())?;
            leaf.header.parent_page_id = parent_id;
            leaf.write_back(guard.as_mut_slice())?;
        } else {
            let mut internal = BTreeInternalPage::read(guard.as_slice())?;
            internal.header.parent_page_id = parent_id;
            internal.write_back(guard.as_mut_slice())?;
        }
        Ok(())
    }

    pub fn remove(&self, key: &Value) -> Result<bool> {
        let _tree_guard = self.tree_latch.lock();
        let mut stack: Vec<u32> = Vec::new();
        let mut current_id = self.root_page_id();

        loop {
            let guard = self.buffer_pool.fetch_page_write(current_id)?;
            let header = BTreePageHeader::read(guard.as_slice())?;
            if header.is_leaf() {
                drop(guard);
                break;
            }
            let internal = BTreeInternalPage::read(guard.as_slice())?;
            let child_id = internal.child_for(key);
            if header.is_safe_for_delete() {
                stack.clear();
            }
            stack.push(current_id);
            drop(guard);
            current_id = child_id;
        }

        self.remove_from_leaf(current_id, key, &mut stack)
    }

    fn remove_from_leaf(&self, leaf_id: u32, key: &Value, ancestors: &mut Vec<u32>) -> Result<bool> {
        let mut guard = self.buffer_pool.fetch_page_write(leaf_id)?;
        let mut leaf = BTreeLeafPage::read(guard.as_slice())?;
        if !leaf.remove(key) {
            return Ok(false);
        }
        leaf.write_back(guard.as_mut_slice())?;

        let is_root = ancestors.is_empty();
        if is_root || !leaf.header.is_underflow() {
            return Ok(true);
        }
        drop(guard);

        self.fix_underflow(leaf_id, ancestors)?;
        Ok(true)
    }

    /// Coalesce-or-redistribute: try the left sibling first (spec's
    /// tie-break), then the right; merging recurses the fix upward into the
    /// parent.
    fn fix_underflow(&self, node_id: u32, ancestors: &mut Vec<u32>) -> Result<()> {
        let parent_id = match ancestors.pop() {
            Some(id) => id,
            None => return Ok(()),
        };

        let mut parent_guard = self.buffer_pool.fetch_page_write(parent_id)?;
        let mut parent = BTreeInternalPage::read(parent_guard.as_slice())?;
        let idx = parent
            .index_of_child(node_id)
            .expect("parent must reference every live child");

        let left_sibling = if idx > 0 { Some(parent.children[idx - 1]) } else { None };
        let right_sibling = parent.children.get(idx + 1).copied();

        let node_is_leaf = {
            let guard = self.buffer_pool.fetch_page_read(node_id)?;
            BTreePageHeader::read(guard.as_slice())?.is_leaf()
        };

        if node_is_leaf {
            if let Some(left_id) = left_sibling {
                if self.try_redistribute_leaf_from_left(left_id, node_id, &mut parent, idx)? {
                    parent.write_back(parent_guard.as_mut_slice())?;
                    return Ok(());
                }
            }
            if let Some(right_id) = right_sibling {
                if self.try_redistribute_leaf_from_right(node_id, right_id, &mut parent, idx)? {
                    parent.write_back(parent_guard.as_mut_slice())?;
                    return Ok(());
                }
            }
            if let Some(left_id) = left_sibling {
                self.merge_leaves(left_id, node_id, &mut parent, idx)?;
            } else if let Some(right_id) = right_sibling {
                self.merge_leaves(node_id, right_id, &mut parent, idx + 1)?;
            }
        } else {
            if let Some(left_id) = left_sibling {
                if self.try_redistribute_internal_from_left(left_id, node_id, &mut parent, idx)? {
                    parent.write_back(parent_guard.as_mut_slice())?;
                    return Ok(());
                }
            }
            if let Some(right_id) = right_sibling {
                if self.try_redistribute_internal_from_right(node_id, right_id, &mut parent, idx)? {
                    parent.write_back(parent_guard.as_mut_slice())?;
                    return Ok(());
                }
            }
            if let Some(left_id) = left_sibling {
                self.merge_internals(left_id, node_id, &mut parent, idx)?;
            } else if let Some(right_id) = right_sibling {
                self.merge_internals(node_id, right_id, &mut parent, idx + 1)?;
            }
        }

        parent.write_back(parent_guard.as_mut_slice())?;
        drop(parent_guard);

        if ancestors.is_empty() && parent.children.len() == 1 {
            *self.root_page_id.lock() = parent.children[0];
            self.set_parent(parent.children[0], crate::index::btree::page::NO_PAGE)?;
            self.buffer_pool.delete_page(parent_id)?;
            return Ok(());
        }

        if parent.header.is_underflow() && !ancestors.is_empty() {
            self.fix_underflow(parent_id, ancestors)?;
        }
        Ok(())
    }

    fn try_redistribute_leaf_from_left(
        &self,
        left_id: u32,
        node_id: u32,
        parent: &mut BTreeInternalPage,
        node_idx: usize,
    ) -> Result<bool> {
        let mut left_guard = self.buffer_pool.fetch_page_write(left_id)?;
        let mut left = BTreeLeafPage::read(left_guard.as_slice())?;
        if left.header.size <= left.header.min_size() {
            return Ok(false);
        }
        let (borrowed_key, borrowed_rid) = left.entries.pop().unwrap();
        left.header.size = left.entries.len() as u16;

        let mut node_guard = self.buffer_pool.fetch_page_write(node_id)?;
        let mut node = BTreeLeafPage::read(node_guard.as_slice())?;
        node.entries.insert(0, (borrowed_key.clone(), borrowed_rid));
        node.header.size = node.entries.len() as u16;

        left.write_back(left_guard.as_mut_slice())?;
        node.write_back(node_guard.as_mut_slice())?;
        parent.keys[node_idx - 1] = borrowed_key;
        Ok(true)
    }

    fn try_redistribute_leaf_from_right(
        &self,
        node_id: u32,
        right_id: u32,
        parent: &mut BTreeInternalPage,
        node_idx: usize,
    ) -> Result<bool> {
        let mut right_guard = self.buffer_pool.fetch_page_write(right_id)?;
        let mut right = BTreeLeafPage::read(right_guard.as_slice())?;
        if right.header.size <= right.header.min_size() {
            return Ok(false);
        }
        let (borrowed_key, borrowed_rid) = right.entries.remove(0);
        right.header.size = right.entries.len() as u16;

        let mut node_guard = self.buffer_pool.fetch_page_write(node_id)?;
        let mut node = BTreeLeafPage::read(node_guard.as_slice())?;
        node.entries.push((borrowed_key, borrowed_rid));
        node.header.size = node.entries.len() as u16;

        let new_separator = right
            .first_key()
            .cloned()
            .expect("right sibling kept at least one entry after lending");
        right.write_back(right_guard.as_mut_slice())?;
        node.write_back(node_guard.as_mut_slice())?;
        parent.keys[node_idx] = new_separator;
        Ok(true)
    }

    fn merge_leaves(
        &self,
        left_id: u32,
        right_id: u32,
        parent: &mut BTreeInternalPage,
        right_idx: usize,
    ) -> Result<()> {
        let mut left_guard = self.buffer_pool.fetch_page_write(left_id)?;
        let mut left = BTreeLeafPage::read(left_guard.as_slice())?;
        let right_guard = self.buffer_pool.fetch_page_read(right_id)?;
        let right = BTreeLeafPage::read(right_guard.as_slice())?;

        left.entries.extend(right.entries.clone());
        left.header.size = left.entries.len() as u16;
        left.set_next_page_id(right.next_page_id());
        left.write_back(left_guard.as_mut_slice())?;
        drop(left_guard);
        drop(right_guard);

        self.buffer_pool.delete_page(right_id)?;
        parent.remove_child(right_idx);
        debug!("merged btree leaf {} into {}", right_id, left_id);
        Ok(())
    }

    fn try_redistribute_internal_from_left(
        &self,
        left_id: u32,
        node_id: u32,
        parent: &mut BTreeInternalPage,
        node_idx: usize,
    ) -> Result<bool> {
        let mut left_guard = self.buffer_pool.fetch_page_write(left_id)?;
        let mut left = BTreeInternalPage::read(left_guard.as_slice())?;
        if left.header.size <= left.header.min_size() {
            return Ok(false);
        }
        let borrowed_child = left.children.pop().unwrap();
        let borrowed_key = left.keys.pop().unwrap();
        left.header.size = left.keys.len() as u16;

        let mut node_guard = self.buffer_pool.fetch_page_write(node_id)?;
        let mut node = BTreeInternalPage::read(node_guard.as_slice())?;
        let separator = parent.keys[node_idx - 1].clone();
        node.children.insert(0, borrowed_child);
        node.keys.insert(0, separator);
        node.header.size = node.keys.len() as u16;

        left.write_back(left_guard.as_mut_slice())?;
        node.write_back(node_guard.as_mut_slice())?;
        drop(node_guard);
        self.set_parent(borrowed_child, node_id)?;
        parent.keys[node_idx - 1] = borrowed_key;
        Ok(true)
    }

    fn try_redistribute_internal_from_right(
        &self,
        node_id: u32,
        right_id: u32,
        parent: &mut BTreeInternalPage,
        node_idx: usize,
    ) -> Result<bool> {
        let mut right_guard = self.buffer_pool.fetch_page_write(right_id)?;
        let mut right = BTreeInternalPage::read(right_guard.as_slice())?;
        if right.header.size <= right.header.min_size() {
            return Ok(false);
        }
        let borrowed_child = right.children.remove(0);
        let borrowed_key = right.keys.remove(0);
        right.header.size = right.keys.len() as u16;

        let mut node_guard = self.buffer_pool.fetch_page_write(node_id)?;
        let mut node = BTreeInternalPage::read(node_guard.as_slice())?;
        let separator = parent.keys[node_idx].clone();
        node.children.push(borrowed_child);
        node.keys.push(separator);
        node.header.size = node.keys.len() as u16;

        right.write_back(right_guard.as_mut_slice())?;
        node.write_back(node_guard.as_mut_slice())?;
        drop(node_guard);
        self.set_parent(borrowed_child, node_id)?;
        parent.keys[node_idx] = borrowed_key;
        Ok(true)
    }

    fn merge_internals(
        &self,
        left_id: u32,
        right_id: u32,
        parent: &mut BTreeInternalPage,
        right_idx: usize,
    ) -> Result<()> {
        let separator = parent.keys[right_idx - 1].clone();
        let mut left_guard = self.buffer_pool.fetch_page_write(left_id)?;
        let mut left = BTreeInternalPage::read(left_guard.as_slice())?;
        let right_guard = self.buffer_pool.fetch_page_read(right_id)?;
        let right = BTreeInternalPage::read(right_guard.as_slice())?;

        left.keys.push(separator);
        left.keys.extend(right.keys.clone());
        left.children.extend(right.children.clone());
        left.header.size = left.keys.len() as u16;
        left.write_back(left_guard.as_mut_slice())?;
        drop(left_guard);
        drop(right_guard);

        for &child in &right.children {
            self.set_parent(child, left_id)?;
        }

        self.buffer_pool.delete_page(right_id)?;
        parent.remove_child(right_idx);
        debug!("merged btree internal {} into {}", right_id, left_id);
        Ok(())
    }

    pub fn range_scan(&self, lo: Option<Value>, hi: Option<Value>) -> Result<BTreeRangeIter<'_>> {
        let start_leaf = match &lo {
            Some(key) => self.find_leaf_for_read(key)?,
            None => self.leftmost_leaf()?,
        };
        let guard = self.buffer_pool.fetch_page_read(start_leaf)?;
        let leaf = BTreeLeafPage::read(guard.as_slice())?;
        let start_idx = match &lo {
            Some(key) => leaf.find_index(key),
            None => 0,
        };

        Ok(BTreeRangeIter {
            index: self,
            current_page: Some(start_leaf),
            current_entries: leaf.entries,
            position: start_idx,
            hi,
        })
    }

    fn leftmost_leaf(&self) -> Result<u32> {
        let mut current_id = self.root_page_id();
        loop {
            let guard = self.buffer_pool.fetch_page_read(current_id)?;
            let header = BTreePageHeader::read(guard.as_slice())?;
            if header.is_leaf() {
                return Ok(current_id);
            }
            let internal = BTreeInternalPage::read(guard.as_slice())?;
            current_id = *internal.children.first().expect("internal node always has a first child");
        }
    }
}

/// A lazy ascending walk across leaf pages via their sibling chain.
pub struct BTreeRangeIter<'a> {
    index: &'a BTreeIndex,
    current_page: Option<u32>,
    current_entries: Vec<(Value, Rid)>,
    position: usize,
    hi: Option<Value>,
}

impl<'a> Iterator for BTreeRangeIter<'a> {
    type Item = (Value, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.position < self.current_entries.len() {
                let (key, rid) = self.current_entries[self.position].clone();
                if let Some(hi) = &self.hi {
                    if key.cmp_for_index(hi) == std::cmp::Ordering::Greater {
                        self.current_page = None;
                        return None;
                    }
                }
                self.position += 1;
                return Some((key, rid));
            }

            let next_page = self.current_page?;
            let guard = self.index.buffer_pool.fetch_page_read(next_page).ok()?;
            let leaf = BTreeLeafPage::read(guard.as_slice()).ok()?;
            drop(guard);
            self.current_page = leaf.next_page_id();
            self.current_entries = leaf.entries;
            self.position = 0;
            if self.current_entries.is_empty() && self.current_page.is_none() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk_manager::DiskManager;

    fn index_with_capacity(max_size: u16) -> (BTreeIndex, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.db")).unwrap();
        let pool = Arc::new(BufferPool::new(64, dm));
        let index = BTreeIndex::create_with_max_size(pool, max_size).unwrap();
        (index, dir)
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let (index, _dir) = index_with_capacity(8);
        index.insert(Value::I32(1), Rid::new(1, 0)).unwrap();
        index.insert(Value::I32(2), Rid::new(1, 1)).unwrap();
        assert_eq!(index.lookup(&Value::I32(1)).unwrap(), Some(Rid::new(1, 0)));
        assert_eq!(index.lookup(&Value::I32(99)).unwrap(), None);
    }

    #[test]
    fn enough_inserts_force_a_root_split() {
        let (index, _dir) = index_with_capacity(4);
        for i in 0..50 {
            index.insert(Value::I32(i), Rid::new(1, i as u32)).unwrap();
        }
        for i in 0..50 {
            assert_eq!(index.lookup(&Value::I32(i)).unwrap(), Some(Rid::new(1, i as u32)));
        }
    }

    #[test]
    fn range_scan_returns_entries_in_order() {
        let (index, _dir) = index_with_capacity(4);
        for i in (0..30).rev() {
            index.insert(Value::I32(i), Rid::new(1, i as u32)).unwrap();
        }
        let keys: Vec<i32> = index
            .range_scan(Some(Value::I32(10)), Some(Value::I32(20)))
            .unwrap()
            .map(|(k, _)| match k {
                Value::I32(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, (10..=20).collect::<Vec<_>>());
    }

    #[test]
    fn remove_then_lookup_misses() {
        let (index, _dir) = index_with_capacity(8);
        index.insert(Value::I32(1), Rid::new(1, 0)).unwrap();
        assert!(index.remove(&Value::I32(1)).unwrap());
        assert_eq!(index.lookup(&Value::I32(1)).unwrap(), None);
        assert!(!index.remove(&Value::I32(1)).unwrap());
    }

    #[test]
    fn deletes_causing_merges_keep_remaining_keys_reachable() {
        let (index, _dir) = index_with_capacity(4);
        for i in 0..40 {
            index.insert(Value::I32(i), Rid::new(1, i as u32)).unwrap();
        }
        for i in 0..30 {
            assert!(index.remove(&Value::I32(i)).unwrap());
        }
        for i in 30..40 {
            assert_eq!(index.lookup(&Value::I32(i)).unwrap(), Some(Rid::new(1, i as u32)));
        }
        for i in 0..30 {
            assert_eq!(index.lookup(&Value::I32(i)).unwrap(), None);
        }
    }
}
