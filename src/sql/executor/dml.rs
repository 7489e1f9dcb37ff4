//! INSERT/UPDATE/DELETE execution, outside the pull-based `Executor` tree
//! since they mutate state rather than produce rows and need each target
//! row's `Rid`, which the generic row-producing executors deliberately
//! don't carry.
//!
//! Grounded directly in `TransactionManager`'s own
//! `abort_undoes_uncommitted_insert` test: every mutation follows
//! heap-write, then WAL-append keyed by the txn's previous LSN, then
//! stamping the dirtied page with the new LSN, so a crash or abort can
//! undo it exactly the way recovery replays it.
//!
//! `TableHeap::update` returns `UpdateOutcome::{SameRid, Moved}`: an
//! in-place update logs as a single `Update` record exactly as recovery's
//! undo expects (restore `old_tuple` at the original slot); a move is
//! logged as the `Delete`+`Insert` pair the heap actually performed, since
//! a single `Update` record's undo assumes the row never left its slot.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::rid::Rid;
use crate::sql::ast::Expr;
use crate::sql::plan::PlanNode;
use crate::sql::row::{eval_expr, is_truthy, RowSchema};
use crate::storage::table_page::UpdateOutcome;
use crate::tuple::Tuple;
use crate::txn::lock_manager::LockMode;
use crate::txn::transaction::Transaction;
use crate::wal::log_record::LogRecordBody;

use super::{ExecContext, QueryResult};

fn append_and_stamp(ctx: &ExecContext, txn: &Arc<Transaction>, page_id: u32, body: LogRecordBody) -> Result<()> {
    let lsn = ctx.log_manager.append(txn.id(), txn.last_lsn(), body);
    txn.set_last_lsn(lsn);
    let mut guard = ctx.buffer_pool.fetch_page_write(page_id)?;
    guard.stamp_lsn(lsn);
    Ok(())
}

/// Walk a scan-shaped plan (`SeqScan`/`IndexScan`, optionally wrapped in one
/// or more `Filter`s — the only shapes `planner::plan_update`/`plan_delete`
/// ever build) collecting the `Rid` and current tuple of every row a
/// mutating statement targets, taking row-exclusive locks as it goes.
fn resolve_targets(
    ctx: &ExecContext,
    txn: &Arc<Transaction>,
    table_oid: u32,
    plan: &PlanNode,
) -> Result<Vec<(Rid, Tuple)>> {
    match plan {
        PlanNode::SeqScan { schema, .. } => {
            let heap = ctx.heap_for(table_oid)?;
            let meta = ctx
                .catalog
                .get_table_by_oid(table_oid)
                .ok_or_else(|| Error::catalog(format!("table oid {} does not exist", table_oid)))?;
            let mut rows = Vec::new();
            heap.scan(|rid, bytes| {
                ctx.lock_manager.lock_row(txn, LockMode::Exclusive, table_oid, rid)?;
                rows.push((rid, Tuple::from_bytes(&meta.schema, bytes)?));
                Ok(())
            })?;
            let _ = schema;
            Ok(rows)
        }
        PlanNode::IndexScan { index, lower, upper, .. } => {
            let heap = ctx.heap_for(table_oid)?;
            let meta = ctx
                .catalog
                .get_table_by_oid(table_oid)
                .ok_or_else(|| Error::catalog(format!("table oid {} does not exist", table_oid)))?;
            let idx = ctx.index_for(table_oid, index)?;
            let rids: Vec<Rid> = if lower.is_some() && upper.is_some() && lower == upper {
                idx.lookup(lower.as_ref().unwrap())?.into_iter().collect()
            } else {
                idx.range_scan(lower.clone(), upper.clone())?.map(|(_, rid)| rid).collect()
            };
            let mut rows = Vec::with_capacity(rids.len());
            for rid in rids {
                if heap.is_deleted(rid)? {
                    continue;
                }
                ctx.lock_manager.lock_row(txn, LockMode::Exclusive, table_oid, rid)?;
                let bytes = heap.get(rid)?;
                rows.push((rid, Tuple::from_bytes(&meta.schema, bytes.as_slice())?));
            }
            Ok(rows)
        }
        PlanNode::Filter { input, predicate } => {
            let schema = input
                .output_schema()
                .cloned()
                .ok_or_else(|| Error::internal("filter over a non-row-producing plan"))?;
            let rows = resolve_targets(ctx, txn, table_oid, input)?;
            rows.into_iter()
                .filter_map(|(rid, tuple)| match eval_expr(predicate, &schema, tuple.values()) {
                    Ok(v) if is_truthy(&v) => Some(Ok((rid, tuple))),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                })
                .collect()
        }
        other => Err(Error::internal(format!("unexpected plan shape feeding a mutation: {:?}", other))),
    }
}

/// Update the indexes on `table_oid` after a row's tuple (and possibly its
/// `Rid`) changed. Non-unique indexes can hold several rids under one key;
/// `BTreeIndex::remove` only takes a key, so this removes the whole key's
/// entry and reinserts — correct for the common unique-index case, and
/// documented as a simplification for duplicate-key indexes in DESIGN.md.
fn reindex_row(
    ctx: &ExecContext,
    catalog: &Catalog,
    table_oid: u32,
    old_tuple: Option<&Tuple>,
    new_tuple: Option<&Tuple>,
    new_rid: Rid,
) -> Result<()> {
    for info in catalog.indexes_for_table(table_oid) {
        let key_col = info.key_columns[0];
        let index = ctx.index_for(table_oid, &info.name)?;
        let old_key = old_tuple.map(|t| t.get(key_col).clone());
        let new_key = new_tuple.map(|t| t.get(key_col).clone());
        if old_key == new_key {
            continue;
        }
        if let Some(k) = &old_key {
            index.remove(k)?;
        }
        if let Some(k) = new_key {
            index.insert(k, new_rid)?;
        }
    }
    Ok(())
}

pub fn execute_insert(
    ctx: &ExecContext,
    txn: &Arc<Transaction>,
    table_oid: u32,
    rows: Vec<Vec<Expr>>,
) -> Result<QueryResult> {
    ctx.lock_manager.lock_table(txn, LockMode::IntentionExclusive, table_oid)?;
    let heap = ctx.heap_for(table_oid)?;
    let meta = ctx
        .catalog
        .get_table_by_oid(table_oid)
        .ok_or_else(|| Error::catalog(format!("table oid {} does not exist", table_oid)))?;
    let empty_schema = RowSchema { columns: Vec::new() };

    let mut count = 0u64;
    for row in rows {
        let values: Vec<_> =
            row.iter().map(|expr| eval_expr(expr, &empty_schema, &[])).collect::<Result<_>>()?;
        meta.schema.validate_values(&values)?;
        let tuple = Tuple::new(values);

        let rid = heap.insert(tuple.to_bytes())?;
        ctx.lock_manager.lock_row(txn, LockMode::Exclusive, table_oid, rid)?;
        append_and_stamp(ctx, txn, rid.page_id, LogRecordBody::Insert { rid, tuple: tuple.to_bytes().to_vec() })?;
        reindex_row(ctx, &ctx.catalog, table_oid, None, Some(&tuple), rid)?;

        count += 1;
    }

    Ok(QueryResult::ok_affected(format!("INSERT {}", count), count))
}

pub fn execute_update(
    ctx: &ExecContext,
    txn: &Arc<Transaction>,
    table_oid: u32,
    input: PlanNode,
    assignments: Vec<(usize, Expr)>,
) -> Result<QueryResult> {
    ctx.lock_manager.lock_table(txn, LockMode::IntentionExclusive, table_oid)?;
    let heap = ctx.heap_for(table_oid)?;
    let schema = input
        .output_schema()
        .cloned()
        .ok_or_else(|| Error::internal("update scan must produce rows"))?;
    let targets = resolve_targets(ctx, txn, table_oid, &input)?;

    let mut count = 0u64;
    for (rid, old_tuple) in targets {
        let mut new_values = old_tuple.values().to_vec();
        for (idx, expr) in &assignments {
            new_values[*idx] = eval_expr(expr, &schema, old_tuple.values())?;
        }
        let new_tuple = Tuple::new(new_values);

        match heap.update(rid, new_tuple.to_bytes())? {
            UpdateOutcome::SameRid => {
                append_and_stamp(
                    ctx,
                    txn,
                    rid.page_id,
                    LogRecordBody::Update {
                        rid,
                        old_tuple: old_tuple.to_bytes().to_vec(),
                        new_tuple: new_tuple.to_bytes().to_vec(),
                    },
                )?;
                reindex_row(ctx, &ctx.catalog, table_oid, Some(&old_tuple), Some(&new_tuple), rid)?;
            }
            UpdateOutcome::Moved(new_rid) => {
                append_and_stamp(
                    ctx,
                    txn,
                    rid.page_id,
                    LogRecordBody::Delete { rid, tuple: old_tuple.to_bytes().to_vec() },
                )?;
                ctx.lock_manager.lock_row(txn, LockMode::Exclusive, table_oid, new_rid)?;
                append_and_stamp(
                    ctx,
                    txn,
                    new_rid.page_id,
                    LogRecordBody::Insert { rid: new_rid, tuple: new_tuple.to_bytes().to_vec() },
                )?;
                reindex_row(ctx, &ctx.catalog, table_oid, Some(&old_tuple), Some(&new_tuple), new_rid)?;
            }
        }
        count += 1;
    }

    Ok(QueryResult::ok_affected(format!("UPDATE {}", count), count))
}

pub fn execute_delete(
    ctx: &ExecContext,
    txn: &Arc<Transaction>,
    table_oid: u32,
    input: PlanNode,
) -> Result<QueryResult> {
    ctx.lock_manager.lock_table(txn, LockMode::IntentionExclusive, table_oid)?;
    let heap = ctx.heap_for(table_oid)?;
    let targets = resolve_targets(ctx, txn, table_oid, &input)?;

    let mut count = 0u64;
    for (rid, old_tuple) in targets {
        heap.mark_delete(rid)?;
        append_and_stamp(ctx, txn, rid.page_id, LogRecordBody::Delete { rid, tuple: old_tuple.to_bytes().to_vec() })?;
        reindex_row(ctx, &ctx.catalog, table_oid, Some(&old_tuple), None, rid)?;
        count += 1;
    }

    Ok(QueryResult::ok_affected(format!("DELETE {}", count), count))
}
