//! DDL execution. `CREATE TABLE`/`CREATE INDEX`/`DROP TABLE` bypass the
//! planner and `Executor` tree entirely and act directly on the catalog,
//! since they have no row-producing shape to plan.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::btree::index::BTreeIndex;
use crate::schema::Column;
use crate::sql::ast::ColumnDef;
use crate::txn::transaction::Transaction;

use super::{ExecContext, QueryResult};

pub fn execute_create_table(ctx: &ExecContext, columns: &[ColumnDef], name: &str) -> Result<QueryResult> {
    let schema_columns: Vec<Column> = columns
        .iter()
        .map(|c| Column::new(&c.name, c.column_type.clone(), c.nullable))
        .collect();
    let meta = ctx.catalog.create_table(name, schema_columns)?;

    let pk_indices: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.primary_key)
        .map(|(i, _)| i)
        .collect();
    if !pk_indices.is_empty() {
        let index = BTreeIndex::create(Arc::clone(&ctx.buffer_pool))?;
        ctx.catalog
            .create_index(meta.oid, &format!("{}_pkey", name), pk_indices, true, index.root_page_id())?;
    }

    Ok(QueryResult::ok_affected(format!("CREATE TABLE {}", name), 0))
}

pub fn execute_create_index(
    ctx: &ExecContext,
    name: &str,
    table: &str,
    columns: &[String],
    unique: bool,
) -> Result<QueryResult> {
    let meta = ctx
        .catalog
        .get_table(table)
        .ok_or_else(|| Error::catalog(format!("table '{}' does not exist", table)))?;

    let key_columns: Vec<usize> = columns
        .iter()
        .map(|col| {
            meta.schema
                .index_of(col)
                .ok_or_else(|| Error::catalog(format!("column '{}' does not exist on table '{}'", col, table)))
        })
        .collect::<Result<_>>()?;

    let index = BTreeIndex::create(Arc::clone(&ctx.buffer_pool))?;
    let heap = ctx.heap_for(meta.oid)?;
    let key_col = key_columns[0];
    let mut build_err = None;
    heap.scan(|rid, bytes| {
        let tuple = crate::tuple::Tuple::from_bytes(&meta.schema, bytes)?;
        if let Err(e) = index.insert(tuple.get(key_col).clone(), rid) {
            build_err = Some(e);
        }
        Ok(())
    })?;
    if let Some(e) = build_err {
        return Err(e);
    }

    ctx.catalog.create_index(meta.oid, name, key_columns, unique, index.root_page_id())?;
    Ok(QueryResult::ok_affected(format!("CREATE INDEX {}", name), 0))
}

pub fn execute_drop_table(ctx: &ExecContext, txn: &Arc<Transaction>, name: &str) -> Result<QueryResult> {
    let meta = ctx
        .catalog
        .get_table(name)
        .ok_or_else(|| Error::catalog(format!("table '{}' does not exist", name)))?;
    ctx.lock_manager
        .lock_table(txn, crate::txn::lock_manager::LockMode::Exclusive, meta.oid)?;
    ctx.catalog.drop_table(name)?;
    Ok(QueryResult::ok_affected(format!("DROP TABLE {}", name), 0))
}
