//! Catalog — tables, columns, and indexes metadata.
//!
//! The catalog is not an in-memory-only table: every table/column/index
//! row is written through `TableHeap` onto ordinary pages, and a fixed
//! page 0 header records the three system tables' root page ids so a
//! reopened database can find them again. The in-memory maps here are a
//! read cache rebuilt from those system tables at `open` time, not the
//! source of truth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::PAGE_SIZE;
use crate::error::{Error, Result};
use crate::rid::Rid;
use crate::schema::{Column, ColumnType, Schema};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::table_heap::TableHeap;
use crate::value::Value;

const MAGIC: u32 = 0x5354_5241; // "STRA"
const FORMAT_VERSION: u32 = 1;

#[derive(Debug)]
pub struct TableStats {
    pub row_count: AtomicU64,
}

impl TableStats {
    fn new() -> Self {
        Self { row_count: AtomicU64::new(0) }
    }
}

#[derive(Debug)]
pub struct TableMetadata {
    pub oid: u32,
    pub name: String,
    pub schema: Schema,
    pub first_page_id: u32,
    pub stats: TableStats,
    /// RID of this table's row in `__catalog_tables__`, kept so `drop_table`
    /// can tombstone it without a second scan.
    catalog_rid: Rid,
}

#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub oid: u32,
    pub table_oid: u32,
    pub name: String,
    pub key_columns: Vec<usize>,
    pub root_page_id: u32,
    pub unique: bool,
    catalog_rid: Rid,
}

pub struct Catalog {
    buffer_pool: Arc<BufferPool>,
    tables_heap: TableHeap,
    columns_heap: TableHeap,
    indexes_heap: TableHeap,
    next_oid: AtomicU32,
    tables_by_name: RwLock<HashMap<String, Arc<TableMetadata>>>,
    tables_by_oid: RwLock<HashMap<u32, Arc<TableMetadata>>>,
    indexes_by_table: RwLock<HashMap<u32, Vec<Arc<IndexInfo>>>>,
}

impl Catalog {
    /// Build a brand-new catalog: a header page at id 0, then one fresh
    /// heap each for tables/columns/indexes (ids 1..3 on a fresh database).
    pub fn bootstrap(buffer_pool: Arc<BufferPool>) -> Result<Self> {
        let header_page_id = {
            let guard = buffer_pool.new_page()?;
            guard.page_id()
        };
        if header_page_id != 0 {
            return Err(Error::internal("catalog bootstrap requires an empty database"));
        }

        let tables_heap = TableHeap::create(Arc::clone(&buffer_pool))?;
        let columns_heap = TableHeap::create(Arc::clone(&buffer_pool))?;
        let indexes_heap = TableHeap::create(Arc::clone(&buffer_pool))?;

        write_header(
            &buffer_pool,
            tables_heap.first_page_id(),
            columns_heap.first_page_id(),
            indexes_heap.first_page_id(),
            1,
        )?;

        Ok(Self {
            buffer_pool,
            tables_heap,
            columns_heap,
            indexes_heap,
            next_oid: AtomicU32::new(1),
            tables_by_name: RwLock::new(HashMap::new()),
            tables_by_oid: RwLock::new(HashMap::new()),
            indexes_by_table: RwLock::new(HashMap::new()),
        })
    }

    /// Reopen a catalog from an existing database, reading its header and
    /// replaying the three system tables to rebuild the in-memory cache.
    pub fn open(buffer_pool: Arc<BufferPool>) -> Result<Self> {
        let (tables_root, columns_root, indexes_root, next_oid) = read_header(&buffer_pool)?;

        let tables_heap = TableHeap::open(Arc::clone(&buffer_pool), tables_root);
        let columns_heap = TableHeap::open(Arc::clone(&buffer_pool), columns_root);
        let indexes_heap = TableHeap::open(Arc::clone(&buffer_pool), indexes_root);

        let catalog = Self {
            buffer_pool,
            tables_heap,
            columns_heap,
            indexes_heap,
            next_oid: AtomicU32::new(next_oid),
            tables_by_name: RwLock::new(HashMap::new()),
            tables_by_oid: RwLock::new(HashMap::new()),
            indexes_by_table: RwLock::new(HashMap::new()),
        };
        catalog.rebuild_cache()?;
        Ok(catalog)
    }

    fn rebuild_cache(&self) -> Result<()> {
        let mut columns_by_table: HashMap<u32, Vec<(u32, Column)>> = HashMap::new();
        self.columns_heap.scan(|_, bytes| {
            let (table_oid, index, column) = decode_column_row(bytes)?;
            columns_by_table.entry(table_oid).or_default().push((index, column));
            Ok(())
        })?;

        let mut by_name = self.tables_by_name.write().unwrap();
        let mut by_oid = self.tables_by_oid.write().unwrap();

        self.tables_heap.scan(|rid, bytes| {
            let (oid, name, first_page_id) = decode_table_row(bytes)?;
            let mut columns = columns_by_table.remove(&oid).unwrap_or_default();
            columns.sort_by_key(|(i, _)| *i);
            let schema = Schema::new(columns.into_iter().map(|(_, c)| c).collect())?;
            let meta = Arc::new(TableMetadata {
                oid,
                name: name.clone(),
                schema,
                first_page_id,
                stats: TableStats::new(),
                catalog_rid: rid,
            });
            by_name.insert(name, Arc::clone(&meta));
            by_oid.insert(oid, meta);
            Ok(())
        })?;
        drop(by_name);
        drop(by_oid);

        let mut by_table: HashMap<u32, Vec<Arc<IndexInfo>>> = HashMap::new();
        self.indexes_heap.scan(|rid, bytes| {
            let mut info = decode_index_row(bytes)?;
            info.catalog_rid = rid;
            by_table.entry(info.table_oid).or_default().push(Arc::new(info));
            Ok(())
        })?;
        *self.indexes_by_table.write().unwrap() = by_table;

        Ok(())
    }

    fn alloc_oid(&self) -> u32 {
        self.next_oid.fetch_add(1, Ordering::SeqCst)
    }

    pub fn create_table(&self, name: &str, columns: Vec<Column>) -> Result<Arc<TableMetadata>> {
        if self.tables_by_name.read().unwrap().contains_key(name) {
            return Err(Error::catalog(format!("table '{}' already exists", name)));
        }

        let schema = Schema::new(columns.clone())?;
        let heap = TableHeap::create(Arc::clone(&self.buffer_pool))?;
        let oid = self.alloc_oid();

        let row = encode_table_row(oid, name, heap.first_page_id());
        let rid = self.tables_heap.insert(&row)?;

        for (i, column) in columns.iter().enumerate() {
            let crow = encode_column_row(oid, i as u32, column);
            self.columns_heap.insert(&crow)?;
        }

        let meta = Arc::new(TableMetadata {
            oid,
            name: name.to_string(),
            schema,
            first_page_id: heap.first_page_id(),
            stats: TableStats::new(),
            catalog_rid: rid,
        });

        self.tables_by_name.write().unwrap().insert(name.to_string(), Arc::clone(&meta));
        self.tables_by_oid.write().unwrap().insert(oid, Arc::clone(&meta));
        self.persist_header()?;
        Ok(meta)
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let meta = self
            .tables_by_name
            .write()
            .unwrap()
            .remove(name)
            .ok_or_else(|| Error::catalog(format!("table '{}' does not exist", name)))?;
        self.tables_by_oid.write().unwrap().remove(&meta.oid);
        self.tables_heap.mark_delete(meta.catalog_rid)?;

        if let Some(indexes) = self.indexes_by_table.write().unwrap().remove(&meta.oid) {
            for index in indexes {
                self.indexes_heap.mark_delete(index.catalog_rid)?;
            }
        }
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<TableMetadata>> {
        self.tables_by_name.read().unwrap().get(name).cloned()
    }

    pub fn get_table_by_oid(&self, oid: u32) -> Option<Arc<TableMetadata>> {
        self.tables_by_oid.read().unwrap().get(&oid).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables_by_name.read().unwrap().keys().cloned().collect()
    }

    pub fn create_index(
        &self,
        table_oid: u32,
        name: &str,
        key_columns: Vec<usize>,
        unique: bool,
        root_page_id: u32,
    ) -> Result<Arc<IndexInfo>> {
        let oid = self.alloc_oid();
        let row = encode_index_row(oid, table_oid, name, &key_columns, unique, root_page_id);
        let rid = self.indexes_heap.insert(&row)?;

        let info = Arc::new(IndexInfo {
            oid,
            table_oid,
            name: name.to_string(),
            key_columns,
            root_page_id,
            unique,
            catalog_rid: rid,
        });
        self.indexes_by_table
            .write()
            .unwrap()
            .entry(table_oid)
            .or_default()
            .push(Arc::clone(&info));
        self.persist_header()?;
        Ok(info)
    }

    pub fn drop_index(&self, table_oid: u32, name: &str) -> Result<()> {
        let mut by_table = self.indexes_by_table.write().unwrap();
        let indexes = by_table
            .get_mut(&table_oid)
            .ok_or_else(|| Error::catalog(format!("index '{}' does not exist", name)))?;
        let pos = indexes
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| Error::catalog(format!("index '{}' does not exist", name)))?;
        let removed = indexes.remove(pos);
        self.indexes_heap.mark_delete(removed.catalog_rid)?;
        Ok(())
    }

    pub fn indexes_for_table(&self, table_oid: u32) -> Vec<Arc<IndexInfo>> {
        self.indexes_by_table
            .read()
            .unwrap()
            .get(&table_oid)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_index(&self, table_oid: u32, name: &str) -> Option<Arc<IndexInfo>> {
        self.indexes_for_table(table_oid).into_iter().find(|i| i.name == name)
    }

    fn persist_header(&self) -> Result<()> {
        write_header(
            &self.buffer_pool,
            self.tables_heap.first_page_id(),
            self.columns_heap.first_page_id(),
            self.indexes_heap.first_page_id(),
            self.next_oid.load(Ordering::SeqCst),
        )
    }
}

fn write_header(
    buffer_pool: &BufferPool,
    tables_root: u32,
    columns_root: u32,
    indexes_root: u32,
    next_oid: u32,
) -> Result<()> {
    let mut guard = buffer_pool.fetch_page_write(0)?;
    let data = guard.as_mut_slice();
    // Bytes 0..8 are reserved for the page-LSN (`Page::lsn`); the header
    // fields start right after, matching the convention every other page
    // type in this crate follows.
    data[8..12].copy_from_slice(&MAGIC.to_be_bytes());
    data[12..16].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
    data[16..20].copy_from_slice(&tables_root.to_be_bytes());
    data[20..24].copy_from_slice(&columns_root.to_be_bytes());
    data[24..28].copy_from_slice(&indexes_root.to_be_bytes());
    data[28..32].copy_from_slice(&next_oid.to_be_bytes());
    Ok(())
}

fn read_header(buffer_pool: &BufferPool) -> Result<(u32, u32, u32, u32)> {
    let guard = buffer_pool.fetch_page_read(0)?;
    let data: &[u8; PAGE_SIZE] = guard.as_slice();
    let magic = u32::from_be_bytes(data[8..12].try_into().unwrap());
    if magic != MAGIC {
        return Err(Error::corruption("catalog header page has an invalid magic"));
    }
    let tables_root = u32::from_be_bytes(data[16..20].try_into().unwrap());
    let columns_root = u32::from_be_bytes(data[20..24].try_into().unwrap());
    let indexes_root = u32::from_be_bytes(data[24..28].try_into().unwrap());
    let next_oid = u32::from_be_bytes(data[28..32].try_into().unwrap());
    Ok((tables_root, columns_root, indexes_root, next_oid))
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u32(&mut self) -> u32 {
        let v = u32::from_be_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn read_string(&mut self) -> String {
        let len = self.read_u32() as usize;
        let s = String::from_utf8_lossy(&self.bytes[self.pos..self.pos + len]).into_owned();
        self.pos += len;
        s
    }

    fn read_bool(&mut self) -> bool {
        let b = self.bytes[self.pos] != 0;
        self.pos += 1;
        b
    }
}

fn encode_column_type(out: &mut Vec<u8>, ty: &ColumnType) {
    match ty {
        ColumnType::Bool => out.push(0),
        ColumnType::I8 => out.push(1),
        ColumnType::I16 => out.push(2),
        ColumnType::I32 => out.push(3),
        ColumnType::I64 => out.push(4),
        ColumnType::F64 => out.push(5),
        ColumnType::FixedString(len) => {
            out.push(6);
            write_u32(out, *len as u32);
        }
        ColumnType::VarString => out.push(7),
        ColumnType::Blob => out.push(8),
        ColumnType::Timestamp => out.push(9),
        ColumnType::Vector(dim) => {
            out.push(10);
            write_u32(out, *dim as u32);
        }
    }
}

fn decode_column_type(cursor: &mut Cursor) -> Result<ColumnType> {
    let tag = cursor.bytes[cursor.pos];
    cursor.pos += 1;
    Ok(match tag {
        0 => ColumnType::Bool,
        1 => ColumnType::I8,
        2 => ColumnType::I16,
        3 => ColumnType::I32,
        4 => ColumnType::I64,
        5 => ColumnType::F64,
        6 => ColumnType::FixedString(cursor.read_u32() as usize),
        7 => ColumnType::VarString,
        8 => ColumnType::Blob,
        9 => ColumnType::Timestamp,
        10 => ColumnType::Vector(cursor.read_u32() as usize),
        other => return Err(Error::corruption(format!("unknown column type tag {}", other))),
    })
}

fn encode_table_row(oid: u32, name: &str, first_page_id: u32) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32(&mut out, oid);
    write_string(&mut out, name);
    write_u32(&mut out, first_page_id);
    out
}

fn decode_table_row(bytes: &[u8]) -> Result<(u32, String, u32)> {
    let mut cursor = Cursor::new(bytes);
    let oid = cursor.read_u32();
    let name = cursor.read_string();
    let first_page_id = cursor.read_u32();
    Ok((oid, name, first_page_id))
}

fn encode_column_row(table_oid: u32, index: u32, column: &Column) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32(&mut out, table_oid);
    write_u32(&mut out, index);
    write_string(&mut out, &column.name);
    encode_column_type(&mut out, &column.column_type);
    out.push(column.nullable as u8);
    match &column.default {
        Some(v) => {
            out.push(1);
            v.encode(&mut out);
        }
        None => out.push(0),
    }
    out
}

fn decode_column_row(bytes: &[u8]) -> Result<(u32, Column)> {
    let mut cursor = Cursor::new(bytes);
    let table_oid = cursor.read_u32();
    let index = cursor.read_u32();
    let name = cursor.read_string();
    let column_type = decode_column_type(&mut cursor)?;
    let nullable = cursor.read_bool();
    let has_default = cursor.bytes[cursor.pos] != 0;
    cursor.pos += 1;
    let default = if has_default {
        Some(Value::decode(&mut std::io::Cursor::new(&cursor.bytes[cursor.pos..]))?)
    } else {
        None
    };
    let mut column = Column::new(&name, column_type, nullable);
    column.default = default;
    Ok((table_oid, index, column))
}

fn encode_index_row(
    oid: u32,
    table_oid: u32,
    name: &str,
    key_columns: &[usize],
    unique: bool,
    root_page_id: u32,
) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32(&mut out, oid);
    write_u32(&mut out, table_oid);
    write_string(&mut out, name);
    write_u32(&mut out, root_page_id);
    out.push(unique as u8);
    write_u32(&mut out, key_columns.len() as u32);
    for &k in key_columns {
        write_u32(&mut out, k as u32);
    }
    out
}

fn decode_index_row(bytes: &[u8]) -> Result<IndexInfo> {
    let mut cursor = Cursor::new(bytes);
    let oid = cursor.read_u32();
    let table_oid = cursor.read_u32();
    let name = cursor.read_string();
    let root_page_id = cursor.read_u32();
    let unique = cursor.read_bool();
    let n = cursor.read_u32();
    let mut key_columns = Vec::with_capacity(n as usize);
    for _ in 0..n {
        key_columns.push(cursor.read_u32() as usize);
    }
    Ok(IndexInfo {
        oid,
        table_oid,
        name,
        key_columns,
        root_page_id,
        unique,
        catalog_rid: Rid::INVALID,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk_manager::DiskManager;

    fn fresh_pool(dir: &std::path::Path) -> Arc<BufferPool> {
        let dm = DiskManager::open(dir.join("t.db")).unwrap();
        Arc::new(BufferPool::new(32, dm))
    }

    #[test]
    fn create_then_lookup_table() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::bootstrap(fresh_pool(dir.path())).unwrap();

        let columns = vec![
            Column::new("id", ColumnType::I32, false),
            Column::new("v", ColumnType::I32, true),
        ];
        let meta = catalog.create_table("t", columns).unwrap();
        assert_eq!(meta.schema.arity(), 2);

        let found = catalog.get_table("t").unwrap();
        assert_eq!(found.oid, meta.oid);
        assert_eq!(catalog.table_names(), vec!["t".to_string()]);
    }

    #[test]
    fn duplicate_table_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::bootstrap(fresh_pool(dir.path())).unwrap();
        catalog.create_table("t", vec![Column::new("id", ColumnType::I32, false)]).unwrap();
        assert!(catalog.create_table("t", vec![Column::new("id", ColumnType::I32, false)]).is_err());
    }

    #[test]
    fn reopen_rebuilds_cache_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let pool = fresh_pool(dir.path());
        {
            let catalog = Catalog::bootstrap(Arc::clone(&pool)).unwrap();
            catalog
                .create_table("t", vec![Column::new("id", ColumnType::I32, false)])
                .unwrap();
            catalog.create_index(1, "t_id_idx", vec![0], true, 99).unwrap();
            pool.flush_all_pages().unwrap();
        }

        let reopened = Catalog::open(pool).unwrap();
        let meta = reopened.get_table("t").unwrap();
        assert_eq!(meta.schema.arity(), 1);
        let index = reopened.get_index(meta.oid, "t_id_idx").unwrap();
        assert_eq!(index.root_page_id, 99);
    }

    #[test]
    fn drop_table_removes_it_and_its_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::bootstrap(fresh_pool(dir.path())).unwrap();
        let meta = catalog.create_table("t", vec![Column::new("id", ColumnType::I32, false)]).unwrap();
        catalog.create_index(meta.oid, "idx", vec![0], false, 7).unwrap();

        catalog.drop_table("t").unwrap();
        assert!(catalog.get_table("t").is_none());
        assert!(catalog.indexes_for_table(meta.oid).is_empty());
    }
}
