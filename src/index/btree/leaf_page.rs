//! B+tree leaf page.
//!
//! Leaves carry `(key, value)` entries plus a `next_page_id` sibling
//! pointer forming the ordered scan chain. Entries are deserialized from
//! the raw page buffer into a sorted `Vec` on load and reserialized back
//! on `write_back`, since keys are variable-length `Value`s rather than
//! fixed-width rows.

use crate::config::PAGE_SIZE;
use crate::error::{Error, Result};
use crate::index::btree::page::{BTreePageHeader, HEADER_SIZE, NO_PAGE};
use crate::rid::Rid;
use crate::value::Value;

#[derive(Clone)]
pub struct BTreeLeafPage {
    pub header: BTreePageHeader,
    pub entries: Vec<(Value, Rid)>,
}

impl BTreeLeafPage {
    pub fn new_empty(max_size: u16) -> Self {
        Self {
            header: BTreePageHeader::new_leaf(max_size),
            entries: Vec::new(),
        }
    }

    pub fn read(data: &[u8; PAGE_SIZE]) -> Result<Self> {
        let header = BTreePageHeader::read(data)?;
        let mut cursor = std::io::Cursor::new(&data[HEADER_SIZE..]);
        let mut entries = Vec::with_capacity(header.size as usize);
        for _ in 0..header.size {
            let key = Value::decode(&mut cursor)?;
            let mut rid_buf = [0u8; 8];
            std::io::Read::read_exact(&mut cursor, &mut rid_buf)?;
            let page_id = u32::from_be_bytes(rid_buf[0..4].try_into().unwrap());
            let slot_num = u32::from_be_bytes(rid_buf[4..8].try_into().unwrap());
            entries.push((key, Rid::new(page_id, slot_num)));
        }
        Ok(Self { header, entries })
    }

    pub fn write_back(&mut self, data: &mut [u8; PAGE_SIZE]) -> Result<()> {
        self.header.size = self.entries.len() as u16;
        self.header.write(data);

        let mut body = Vec::new();
        for (key, rid) in &self.entries {
            key.encode(&mut body);
            body.extend_from_slice(&rid.page_id.to_be_bytes());
            body.extend_from_slice(&rid.slot_num.to_be_bytes());
        }
        if HEADER_SIZE + body.len() > PAGE_SIZE {
            return Err(Error::Internal("btree leaf page overflowed its buffer".into()));
        }
        data[HEADER_SIZE..HEADER_SIZE + body.len()].copy_from_slice(&body);
        Ok(())
    }

    /// Byte cost of entries currently held, used to decide whether a new
    /// entry still fits (a cheap proxy for a fixed-slot
    /// `max_size`, since keys are variable length here).
    fn byte_size(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, _)| k.encoded_len() + 8)
            .sum()
    }

    pub fn would_fit(&self, key: &Value) -> bool {
        HEADER_SIZE + self.byte_size() + key.encoded_len() + 8 <= PAGE_SIZE
            && !self.header.is_full()
    }

    pub fn find_index(&self, key: &Value) -> usize {
        match self
            .entries
            .binary_search_by(|(k, _)| k.cmp_for_index(key))
        {
            Ok(i) => i,
            Err(i) => i,
        }
    }

    pub fn lookup(&self, key: &Value) -> Option<Rid> {
        let idx = self.find_index(key);
        self.entries
            .get(idx)
            .filter(|(k, _)| k.cmp_for_index(key) == std::cmp::Ordering::Equal)
            .map(|(_, rid)| *rid)
    }

    pub fn insert(&mut self, key: Value, rid: Rid) {
        let idx = self.find_index(&key);
        self.entries.insert(idx, (key, rid));
        self.header.size = self.entries.len() as u16;
    }

    pub fn remove(&mut self, key: &Value) -> bool {
        let idx = self.find_index(key);
        if let Some((k, _)) = self.entries.get(idx) {
            if k.cmp_for_index(key) == std::cmp::Ordering::Equal {
                self.entries.remove(idx);
                self.header.size = self.entries.len() as u16;
                return true;
            }
        }
        false
    }

    pub fn first_key(&self) -> Option<&Value> {
        self.entries.first().map(|(k, _)| k)
    }

    /// Split this leaf in half, returning the new right-hand sibling's
    /// entries (to be written into a freshly allocated page by the caller).
    pub fn split_off(&mut self) -> Vec<(Value, Rid)> {
        let mid = self.entries.len() / 2;
        let right = self.entries.split_off(mid);
        self.header.size = self.entries.len() as u16;
        right
    }

    pub fn next_page_id(&self) -> Option<u32> {
        if self.header.next_page_id == NO_PAGE {
            None
        } else {
            Some(self.header.next_page_id)
        }
    }

    pub fn set_next_page_id(&mut self, page_id: Option<u32>) {
        self.header.next_page_id = page_id.unwrap_or(NO_PAGE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_entries_sorted() {
        let mut leaf = BTreeLeafPage::new_empty(8);
        leaf.insert(Value::I32(3), Rid::new(1, 0));
        leaf.insert(Value::I32(1), Rid::new(1, 1));
        leaf.insert(Value::I32(2), Rid::new(1, 2));
        let keys: Vec<i32> = leaf
            .entries
            .iter()
            .map(|(k, _)| match k {
                Value::I32(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn round_trips_through_raw_buffer() {
        let mut leaf = BTreeLeafPage::new_empty(8);
        leaf.insert(Value::I32(5), Rid::new(2, 9));
        let mut buf = [0u8; PAGE_SIZE];
        leaf.write_back(&mut buf).unwrap();
        let back = BTreeLeafPage::read(&buf).unwrap();
        assert_eq!(back.lookup(&Value::I32(5)), Some(Rid::new(2, 9)));
    }

    #[test]
    fn remove_missing_key_is_a_no_op() {
        let mut leaf = BTreeLeafPage::new_empty(8);
        leaf.insert(Value::I32(1), Rid::new(1, 0));
        assert!(!leaf.remove(&Value::I32(99)));
        assert_eq!(leaf.entries.len(), 1);
    }
}
