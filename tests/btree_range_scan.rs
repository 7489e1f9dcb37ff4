//! End-to-end scenario: insert enough keys to force the B+tree to split
//! across several leaf pages, then confirm a bounded range scan still
//! returns every matching key in ascending order.

use std::sync::Arc;

use stratumdb::index::BTreeIndex;
use stratumdb::rid::Rid;
use stratumdb::storage::{BufferPool, DiskManager};
use stratumdb::value::Value;

fn fresh_index(dir: &std::path::Path, max_size: u16) -> BTreeIndex {
    let dm = DiskManager::open(dir.join("idx.db")).unwrap();
    let pool = Arc::new(BufferPool::new(64, dm));
    BTreeIndex::create_with_max_size(pool, max_size).unwrap()
}

#[test]
fn range_scan_spans_multiple_leaves_in_ascending_order() {
    let dir = tempfile::tempdir().unwrap();
    let index = fresh_index(dir.path(), 4);

    // Insert out of order so the tree must actually sort, not just append.
    let mut keys: Vec<i64> = (0..200).collect();
    keys.reverse();
    for k in &keys {
        index.insert(Value::I64(*k), Rid::new(*k as u32, 0)).unwrap();
    }

    let hits = index.range_scan(Some(Value::I64(50)), Some(Value::I64(60))).unwrap();
    let collected: Vec<i64> = hits
        .map(|(key, _)| match key {
            Value::I64(v) => v,
            other => panic!("unexpected key variant: {:?}", other),
        })
        .collect();

    let expected: Vec<i64> = (50..=60).collect();
    assert_eq!(collected, expected);
}

#[test]
fn lookup_after_split_still_finds_every_key() {
    let dir = tempfile::tempdir().unwrap();
    let index = fresh_index(dir.path(), 4);

    for k in 0..64i64 {
        index.insert(Value::I64(k), Rid::new(k as u32, 1)).unwrap();
    }

    for k in 0..64i64 {
        let found = index.lookup(&Value::I64(k)).unwrap();
        assert_eq!(found, Some(Rid::new(k as u32, 1)));
    }
}

#[test]
fn remove_then_lookup_reports_the_key_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let index = fresh_index(dir.path(), 4);

    for k in 0..32i64 {
        index.insert(Value::I64(k), Rid::new(k as u32, 2)).unwrap();
    }
    assert!(index.remove(&Value::I64(10)).unwrap());
    assert!(index.lookup(&Value::I64(10)).unwrap().is_none());
}
