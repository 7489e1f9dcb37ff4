//! Volcano-style executor.
//!
//! Execution dispatch is a closed sum type with a `match`, not a
//! `dyn Operator` trait object: [`Executor`] is built once
//! from a [`PlanNode`](crate::sql::plan::PlanNode) and then driven with
//! `open`/`next`/`close`, exactly mirroring the classic iterator model.
//!
//! Table scans buffer their whole result at `open()` rather than streaming
//! page-by-page, since the underlying [`TableHeap::scan`] takes a visitor
//! closure rather than exposing an iterator; every other operator still
//! pulls one row at a time from its child.

pub mod ddl;
mod dml;
mod join;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::index::btree::index::BTreeIndex;
use crate::rid::Rid;
use crate::sql::ast::AggregateFunction;
use crate::sql::plan::PlanNode;
use crate::sql::row::{eval_expr, is_truthy, RowSchema};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::table_heap::TableHeap;
use crate::tuple::Tuple;
use crate::txn::lock_manager::{LockManager, LockMode};
use crate::txn::transaction::{IsolationLevel, Transaction};
use crate::value::Value;
use crate::wal::log_manager::LogManager;

pub use dml::{execute_delete, execute_insert, execute_update};
pub use join::{HashJoinExec, NestedLoopJoinExec};

/// The outcome of running one SQL statement: the wire-level `QueryResult`
/// shape.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub success: bool,
    pub message: String,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn ok_rows(column_names: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let count = rows.len() as u64;
        Self { success: true, message: format!("{} row(s)", count), column_names, rows, rows_affected: 0 }
    }

    pub fn ok_affected(message: impl Into<String>, rows_affected: u64) -> Self {
        Self { success: true, message: message.into(), column_names: Vec::new(), rows: Vec::new(), rows_affected }
    }
}

/// Everything an executing statement needs besides its own transaction:
/// shared engine state plus small per-oid caches so repeated statements
/// don't reopen the same table heap or index on every call.
pub struct ExecContext {
    pub catalog: Arc<Catalog>,
    pub buffer_pool: Arc<BufferPool>,
    pub log_manager: Arc<LogManager>,
    pub lock_manager: Arc<LockManager>,
    heaps: Mutex<HashMap<u32, Arc<TableHeap>>>,
    indexes: Mutex<HashMap<u32, Arc<BTreeIndex>>>,
}

impl ExecContext {
    pub fn new(
        catalog: Arc<Catalog>,
        buffer_pool: Arc<BufferPool>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
    ) -> Self {
        Self {
            catalog,
            buffer_pool,
            log_manager,
            lock_manager,
            heaps: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn heap_for(&self, table_oid: u32) -> Result<Arc<TableHeap>> {
        let mut heaps = self.heaps.lock().unwrap();
        if let Some(heap) = heaps.get(&table_oid) {
            return Ok(Arc::clone(heap));
        }
        let meta = self
            .catalog
            .get_table_by_oid(table_oid)
            .ok_or_else(|| Error::catalog(format!("table oid {} does not exist", table_oid)))?;
        let heap = Arc::new(TableHeap::open(Arc::clone(&self.buffer_pool), meta.first_page_id));
        heaps.insert(table_oid, Arc::clone(&heap));
        Ok(heap)
    }

    pub fn index_for(&self, table_oid: u32, index_name: &str) -> Result<Arc<BTreeIndex>> {
        let info = self
            .catalog
            .get_index(table_oid, index_name)
            .ok_or_else(|| Error::catalog(format!("index '{}' does not exist", index_name)))?;
        let mut indexes = self.indexes.lock().unwrap();
        if let Some(index) = indexes.get(&info.oid) {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(BTreeIndex::open(Arc::clone(&self.buffer_pool), info.root_page_id));
        indexes.insert(info.oid, Arc::clone(&index));
        Ok(index)
    }

    /// Drop a cached index handle, e.g. after a structural DDL change that
    /// made it stale.
    pub fn invalidate_index(&self, index_oid: u32) {
        self.indexes.lock().unwrap().remove(&index_oid);
    }
}

fn isolation_scan_mode(isolation: IsolationLevel) -> Option<LockMode> {
    match isolation {
        IsolationLevel::ReadUncommitted => None,
        _ => Some(LockMode::Shared),
    }
}

/// READ_COMMITTED only promises to see committed data at the moment of the
/// read; it makes no promise that a later read in the same statement or
/// transaction sees the same row again. So its row S-locks are released the
/// instant the row has been read rather than held until commit, unlike
/// REPEATABLE_READ/SERIALIZABLE.
fn releases_row_lock_at_read(isolation: IsolationLevel) -> bool {
    isolation == IsolationLevel::ReadCommitted
}

/// SERIALIZABLE takes a whole-table `Shared` lock, held for the rest of the
/// transaction, instead of just the usual `IntentionShared`: this blocks any
/// concurrent insert into the table for the transaction's duration, which is
/// this engine's (coarse, table-granularity rather than predicate/gap-
/// granularity) stand-in for phantom prevention. Every other isolation level
/// only takes the intent lock, coexisting with concurrent readers and
/// writers at row granularity.
fn table_scan_lock_mode(isolation: IsolationLevel) -> LockMode {
    match isolation {
        IsolationLevel::Serializable => LockMode::Shared,
        _ => LockMode::IntentionShared,
    }
}

/// Run a fully built plan to completion, either as a DML mutation or by
/// draining a row-producing `Executor` into a materialized `QueryResult`.
pub fn execute_plan(ctx: &ExecContext, txn: &Arc<Transaction>, plan: PlanNode) -> Result<QueryResult> {
    match plan {
        PlanNode::Insert { table_oid, rows, .. } => execute_insert(ctx, txn, table_oid, rows),
        PlanNode::Update { table_oid, input, assignments, .. } => {
            execute_update(ctx, txn, table_oid, *input, assignments)
        }
        PlanNode::Delete { table_oid, input, .. } => execute_delete(ctx, txn, table_oid, *input),
        other => {
            let schema = other.output_schema().cloned().unwrap_or(RowSchema { columns: Vec::new() });
            let mut exec = Executor::build(other);
            exec.open(ctx, txn)?;
            let mut rows = Vec::new();
            while let Some(tuple) = exec.next(ctx, txn)? {
                rows.push(tuple.values().to_vec());
            }
            exec.close(ctx, txn)?;
            Ok(QueryResult::ok_rows(schema.names(), rows))
        }
    }
}

pub enum Executor {
    SeqScan(SeqScanExec),
    IndexScan(IndexScanExec),
    Filter(FilterExec),
    Project(ProjectExec),
    NestedLoopJoin(Box<NestedLoopJoinExec>),
    HashJoin(Box<HashJoinExec>),
    HashAggregate(Box<HashAggregateExec>),
    Sort(Box<SortExec>),
    Limit(Box<LimitExec>),
}

impl Executor {
    pub fn build(plan: PlanNode) -> Executor {
        match plan {
            PlanNode::SeqScan { table_oid, schema, .. } => {
                Executor::SeqScan(SeqScanExec { table_oid, schema, buffer: Vec::new(), pos: 0 })
            }
            PlanNode::IndexScan { table_oid, index, schema, lower, upper, .. } => {
                Executor::IndexScan(IndexScanExec { table_oid, index, schema, lower, upper, buffer: Vec::new(), pos: 0 })
            }
            PlanNode::Filter { input, predicate } => {
                let schema = input.output_schema().expect("filter input produces rows").clone();
                Executor::Filter(FilterExec { input: Box::new(Executor::build(*input)), predicate, schema })
            }
            PlanNode::Project { input, items, schema } => {
                let input_schema = input.output_schema().expect("project input produces rows").clone();
                Executor::Project(ProjectExec {
                    input: Box::new(Executor::build(*input)),
                    items,
                    schema,
                    input_schema,
                })
            }
            PlanNode::NestedLoopJoin { left, right, kind, on, schema } => {
                Executor::NestedLoopJoin(Box::new(NestedLoopJoinExec::new(
                    Executor::build(*left),
                    Executor::build(*right),
                    kind,
                    on,
                    schema,
                )))
            }
            PlanNode::HashJoin { left, right, kind, left_key, right_key, schema } => {
                let left_schema = left.output_schema().expect("hash join left produces rows").clone();
                let right_schema = right.output_schema().expect("hash join right produces rows").clone();
                Executor::HashJoin(Box::new(HashJoinExec::new(
                    Executor::build(*left),
                    Executor::build(*right),
                    kind,
                    left_key,
                    right_key,
                    left_schema,
                    right_schema,
                    schema,
                )))
            }
            PlanNode::HashAggregate { input, group_by, aggregates, schema } => {
                let input_schema = input.output_schema().expect("aggregate input produces rows").clone();
                Executor::HashAggregate(Box::new(HashAggregateExec {
                    input: Box::new(Executor::build(*input)),
                    group_by,
                    aggregates,
                    schema,
                    input_schema,
                    results: Vec::new(),
                    pos: 0,
                }))
            }
            PlanNode::Sort { input, keys } => Executor::Sort(Box::new(SortExec {
                input: Box::new(Executor::build(*input)),
                keys,
                buffer: Vec::new(),
                pos: 0,
            })),
            PlanNode::Limit { input, limit } => {
                Executor::Limit(Box::new(LimitExec { input: Box::new(Executor::build(*input)), limit, seen: 0 }))
            }
            PlanNode::Insert { .. } | PlanNode::Update { .. } | PlanNode::Delete { .. } => {
                unreachable!("DML plan nodes are handled directly by execute_plan")
            }
        }
    }

    pub fn open(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        match self {
            Executor::SeqScan(e) => e.open(ctx, txn),
            Executor::IndexScan(e) => e.open(ctx, txn),
            Executor::Filter(e) => e.input.open(ctx, txn),
            Executor::Project(e) => e.input.open(ctx, txn),
            Executor::NestedLoopJoin(e) => e.open(ctx, txn),
            Executor::HashJoin(e) => e.open(ctx, txn),
            Executor::HashAggregate(e) => e.open(ctx, txn),
            Executor::Sort(e) => e.open(ctx, txn),
            Executor::Limit(e) => e.input.open(ctx, txn),
        }
    }

    pub fn next(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<Option<Tuple>> {
        match self {
            Executor::SeqScan(e) => Ok(e.next()),
            Executor::IndexScan(e) => Ok(e.next()),
            Executor::Filter(e) => e.next(ctx, txn),
            Executor::Project(e) => e.next(ctx, txn),
            Executor::NestedLoopJoin(e) => e.next(ctx, txn),
            Executor::HashJoin(e) => e.next(ctx, txn),
            Executor::HashAggregate(e) => Ok(e.next()),
            Executor::Sort(e) => Ok(e.next()),
            Executor::Limit(e) => e.next(ctx, txn),
        }
    }

    pub fn close(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        match self {
            Executor::SeqScan(_) | Executor::IndexScan(_) => Ok(()),
            Executor::Filter(e) => e.input.close(ctx, txn),
            Executor::Project(e) => e.input.close(ctx, txn),
            Executor::NestedLoopJoin(e) => e.close(ctx, txn),
            Executor::HashJoin(e) => e.close(ctx, txn),
            Executor::HashAggregate(e) => e.input.close(ctx, txn),
            Executor::Sort(e) => e.input.close(ctx, txn),
            Executor::Limit(e) => e.input.close(ctx, txn),
        }
    }
}

pub struct SeqScanExec {
    table_oid: u32,
    schema: RowSchema,
    buffer: Vec<Tuple>,
    pos: usize,
}

impl SeqScanExec {
    fn open(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        ctx.lock_manager.lock_table(txn, table_scan_lock_mode(txn.isolation()), self.table_oid)?;
        let heap = ctx.heap_for(self.table_oid)?;
        let mode = isolation_scan_mode(txn.isolation());
        let release_at_read = releases_row_lock_at_read(txn.isolation());
        let mut rows = Vec::new();
        heap.scan(|rid, bytes| {
            if let Some(mode) = mode {
                ctx.lock_manager.lock_row(txn, mode, self.table_oid, rid)?;
                if release_at_read {
                    ctx.lock_manager.unlock_row(txn, self.table_oid, rid)?;
                }
            }
            rows.push(decode_row(ctx, self.table_oid, bytes)?);
            Ok(())
        })?;
        self.buffer = rows;
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Option<Tuple> {
        let t = self.buffer.get(self.pos)?.clone();
        self.pos += 1;
        Some(t)
    }
}

pub struct IndexScanExec {
    table_oid: u32,
    index: String,
    schema: RowSchema,
    lower: Option<Value>,
    upper: Option<Value>,
    buffer: Vec<Tuple>,
    pos: usize,
}

impl IndexScanExec {
    fn open(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        ctx.lock_manager.lock_table(txn, table_scan_lock_mode(txn.isolation()), self.table_oid)?;
        let heap = ctx.heap_for(self.table_oid)?;
        let index = ctx.index_for(self.table_oid, &self.index)?;
        let mode = isolation_scan_mode(txn.isolation());
        let release_at_read = releases_row_lock_at_read(txn.isolation());

        let rids: Vec<Rid> = if self.lower.is_some()
            && self.upper.is_some()
            && self.lower.as_ref().unwrap() == self.upper.as_ref().unwrap()
        {
            index.lookup(self.lower.as_ref().unwrap())?.into_iter().collect()
        } else {
            index
                .range_scan(self.lower.clone(), self.upper.clone())?
                .map(|(_, rid)| rid)
                .collect()
        };

        let mut rows = Vec::with_capacity(rids.len());
        for rid in rids {
            if heap.is_deleted(rid)? {
                continue;
            }
            if let Some(mode) = mode {
                ctx.lock_manager.lock_row(txn, mode, self.table_oid, rid)?;
                if release_at_read {
                    ctx.lock_manager.unlock_row(txn, self.table_oid, rid)?;
                }
            }
            let bytes = heap.get(rid)?;
            rows.push(decode_row(ctx, self.table_oid, &bytes)?);
        }
        self.buffer = rows;
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Option<Tuple> {
        let t = self.buffer.get(self.pos)?.clone();
        self.pos += 1;
        Some(t)
    }
}

fn decode_row(ctx: &ExecContext, table_oid: u32, bytes: &[u8]) -> Result<Tuple> {
    let meta = ctx
        .catalog
        .get_table_by_oid(table_oid)
        .ok_or_else(|| Error::catalog(format!("table oid {} does not exist", table_oid)))?;
    Tuple::from_bytes(&meta.schema, bytes)
}

pub struct FilterExec {
    input: Box<Executor>,
    predicate: crate::sql::ast::Expr,
    schema: RowSchema,
}

impl FilterExec {
    fn next(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.input.next(ctx, txn)? {
            let v = eval_expr(&self.predicate, &self.schema, tuple.values())?;
            if is_truthy(&v) {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }
}

pub struct ProjectExec {
    input: Box<Executor>,
    items: Vec<(crate::sql::ast::Expr, String)>,
    schema: RowSchema,
    input_schema: RowSchema,
}

impl ProjectExec {
    fn next(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<Option<Tuple>> {
        match self.input.next(ctx, txn)? {
            None => Ok(None),
            Some(tuple) => {
                let mut values = Vec::with_capacity(self.items.len());
                for (expr, _) in &self.items {
                    values.push(eval_expr(expr, &self.input_schema, tuple.values())?);
                }
                Ok(Some(Tuple::new(values)))
            }
        }
    }
}

/// `GROUP BY` equality, unlike `=`, treats two `Null`s in the same column as
/// the same group (SQL's "not distinct from" rule) rather than never equal.
fn group_keys_match(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| match (x, y) {
            (Value::Null, Value::Null) => true,
            _ => x == y,
        })
}

pub struct HashAggregateExec {
    input: Box<Executor>,
    group_by: Vec<crate::sql::ast::Expr>,
    aggregates: Vec<(AggregateFunction, Option<crate::sql::ast::Expr>, String)>,
    schema: RowSchema,
    input_schema: RowSchema,
    results: Vec<Tuple>,
    pos: usize,
}

#[derive(Clone)]
struct AggAcc {
    count: i64,
    sum: f64,
    min: Option<Value>,
    max: Option<Value>,
}

impl AggAcc {
    fn new() -> Self {
        Self { count: 0, sum: 0.0, min: None, max: None }
    }

    fn accumulate(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        self.count += 1;
        if let Some(f) = value.as_f64() {
            self.sum += f;
        }
        self.min = Some(match self.min.take() {
            Some(m) if m.cmp_for_index(value) != std::cmp::Ordering::Greater => m,
            _ => value.clone(),
        });
        self.max = Some(match self.max.take() {
            Some(m) if m.cmp_for_index(value) != std::cmp::Ordering::Less => m,
            _ => value.clone(),
        });
    }

    fn finalize(&self, func: AggregateFunction) -> Value {
        match func {
            AggregateFunction::Count | AggregateFunction::CountStar => Value::I64(self.count),
            AggregateFunction::Sum => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::F64(self.sum)
                }
            }
            AggregateFunction::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::F64(self.sum / self.count as f64)
                }
            }
            AggregateFunction::Min => self.min.clone().unwrap_or(Value::Null),
            AggregateFunction::Max => self.max.clone().unwrap_or(Value::Null),
        }
    }
}

impl HashAggregateExec {
    fn open(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        self.input.open(ctx, txn)?;

        let mut groups: Vec<(Vec<Value>, Vec<AggAcc>)> = Vec::new();
        while let Some(tuple) = self.input.next(ctx, txn)? {
            let key: Vec<Value> = self
                .group_by
                .iter()
                .map(|e| eval_expr(e, &self.input_schema, tuple.values()))
                .collect::<Result<_>>()?;

            let entry = match groups.iter_mut().find(|(k, _)| group_keys_match(k, &key)) {
                Some(entry) => entry,
                None => {
                    groups.push((key.clone(), vec![AggAcc::new(); self.aggregates.len()]));
                    groups.last_mut().unwrap()
                }
            };

            for (acc, (func, arg, _)) in entry.1.iter_mut().zip(self.aggregates.iter()) {
                let value = match (func, arg) {
                    (AggregateFunction::CountStar, _) => Value::I64(1),
                    (_, Some(expr)) => eval_expr(expr, &self.input_schema, tuple.values())?,
                    (_, None) => Value::I64(1),
                };
                acc.accumulate(&value);
            }
        }
        self.input.close(ctx, txn)?;

        if groups.is_empty() && self.group_by.is_empty() {
            groups.push((Vec::new(), vec![AggAcc::new(); self.aggregates.len()]));
        }

        self.results = groups
            .into_iter()
            .map(|(key, accs)| {
                let mut values = key;
                for (acc, (func, _, _)) in accs.iter().zip(self.aggregates.iter()) {
                    values.push(acc.finalize(*func));
                }
                Tuple::new(values)
            })
            .collect();
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Option<Tuple> {
        let t = self.results.get(self.pos)?.clone();
        self.pos += 1;
        Some(t)
    }
}

pub struct SortExec {
    input: Box<Executor>,
    keys: Vec<(usize, bool)>,
    buffer: Vec<Tuple>,
    pos: usize,
}

impl SortExec {
    fn open(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        self.input.open(ctx, txn)?;
        let mut rows = Vec::new();
        while let Some(t) = self.input.next(ctx, txn)? {
            rows.push(t);
        }
        self.input.close(ctx, txn)?;
        let keys = self.keys.clone();
        rows.sort_by(|a, b| {
            for &(idx, ascending) in &keys {
                let ord = a.get(idx).cmp_for_index(b.get(idx));
                if ord != std::cmp::Ordering::Equal {
                    return if ascending { ord } else { ord.reverse() };
                }
            }
            std::cmp::Ordering::Equal
        });
        self.buffer = rows;
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Option<Tuple> {
        let t = self.buffer.get(self.pos)?.clone();
        self.pos += 1;
        Some(t)
    }
}

pub struct LimitExec {
    input: Box<Executor>,
    limit: u64,
    seen: u64,
}

impl LimitExec {
    fn next(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<Option<Tuple>> {
        if self.seen >= self.limit {
            return Ok(None);
        }
        match self.input.next(ctx, txn)? {
            Some(t) => {
                self.seen += 1;
                Ok(Some(t))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};
    use crate::sql::ast::{BinaryOp, Expr};
    use crate::storage::disk_manager::DiskManager;
    use crate::txn::lock_manager::LockManager as LM;
    use crate::txn::transaction_manager::TransactionManager;
    use crate::wal::log_manager::LogManager as LogMgr;

    fn harness() -> (Arc<ExecContext>, Arc<TransactionManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.db")).unwrap();
        let pool = Arc::new(BufferPool::new(32, dm));
        let lm = LogMgr::open(dir.path().join("t.wal")).unwrap();
        pool.attach_log_manager(Arc::clone(&lm));
        let catalog = Arc::new(Catalog::bootstrap(Arc::clone(&pool)).unwrap());
        let lock_manager = Arc::new(LM::new());
        let tm = TransactionManager::new(Arc::clone(&pool), Arc::clone(&lm), Arc::clone(&lock_manager));
        let ctx = Arc::new(ExecContext::new(catalog, pool, lm, lock_manager));
        (ctx, tm, dir)
    }

    #[test]
    fn seq_scan_then_filter_returns_matching_rows() {
        let (ctx, tm, _dir) = harness();
        let meta = ctx
            .catalog
            .create_table(
                "t",
                vec![Column::new("id", ColumnType::I32, false), Column::new("v", ColumnType::I32, false)],
            )
            .unwrap();

        let txn = tm.begin(IsolationLevel::ReadCommitted);
        ctx.lock_manager.lock_table(&txn, LockMode::IntentionExclusive, meta.oid).unwrap();
        let heap = ctx.heap_for(meta.oid).unwrap();
        for i in 0..5 {
            heap.insert(Tuple::new(vec![Value::I32(i), Value::I32(i * 10)]).to_bytes()).unwrap();
        }
        tm.commit(&txn).unwrap();

        let txn = tm.begin(IsolationLevel::ReadCommitted);
        let schema = RowSchema::from_schema(None, &meta.schema);
        let plan = PlanNode::Filter {
            input: Box::new(PlanNode::SeqScan { table: "t".into(), table_oid: meta.oid, schema: schema.clone() }),
            predicate: Expr::BinaryOp {
                left: Box::new(Expr::Column("id".into())),
                op: BinaryOp::Gt,
                right: Box::new(Expr::Literal(Value::I32(2))),
            },
        };
        let result = execute_plan(&ctx, &txn, plan).unwrap();
        tm.commit(&txn).unwrap();
        assert_eq!(result.rows.len(), 2);
    }

    fn seeded_table(ctx: &Arc<ExecContext>, tm: &Arc<TransactionManager>) -> Arc<crate::catalog::TableMetadata> {
        let meta = ctx
            .catalog
            .create_table("t", vec![Column::new("id", ColumnType::I32, false)])
            .unwrap();
        let txn = tm.begin(IsolationLevel::ReadCommitted);
        ctx.lock_manager.lock_table(&txn, LockMode::IntentionExclusive, meta.oid).unwrap();
        let heap = ctx.heap_for(meta.oid).unwrap();
        for i in 0..3 {
            heap.insert(Tuple::new(vec![Value::I32(i)]).to_bytes()).unwrap();
        }
        tm.commit(&txn).unwrap();
        meta
    }

    #[test]
    fn read_committed_scan_releases_row_locks_before_commit() {
        let (ctx, tm, _dir) = harness();
        let meta = seeded_table(&ctx, &tm);

        let txn = tm.begin(IsolationLevel::ReadCommitted);
        let schema = RowSchema::from_schema(None, &meta.schema);
        let plan = PlanNode::SeqScan { table: "t".into(), table_oid: meta.oid, schema };
        execute_plan(&ctx, &txn, plan).unwrap();

        let row_locks_held =
            txn.held_locks().iter().any(|(r, _)| matches!(r, crate::txn::lock_manager::ResourceId::Row(..)));
        assert!(!row_locks_held, "READ_COMMITTED must not hold row locks past the read that took them");
        tm.commit(&txn).unwrap();
    }

    #[test]
    fn repeatable_read_scan_holds_row_locks_until_commit() {
        let (ctx, tm, _dir) = harness();
        let meta = seeded_table(&ctx, &tm);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        let schema = RowSchema::from_schema(None, &meta.schema);
        let plan = PlanNode::SeqScan { table: "t".into(), table_oid: meta.oid, schema };
        execute_plan(&ctx, &txn, plan).unwrap();

        let row_locks_held =
            txn.held_locks().iter().any(|(r, _)| matches!(r, crate::txn::lock_manager::ResourceId::Row(..)));
        assert!(row_locks_held, "REPEATABLE_READ must hold row locks until commit");
        tm.commit(&txn).unwrap();
    }

    #[test]
    fn serializable_scan_escalates_to_a_whole_table_shared_lock() {
        let (ctx, tm, _dir) = harness();
        let meta = seeded_table(&ctx, &tm);

        let txn = tm.begin(IsolationLevel::Serializable);
        let schema = RowSchema::from_schema(None, &meta.schema);
        let plan = PlanNode::SeqScan { table: "t".into(), table_oid: meta.oid, schema };
        execute_plan(&ctx, &txn, plan).unwrap();

        assert!(txn
            .held_locks()
            .contains(&(crate::txn::lock_manager::ResourceId::Table(meta.oid), LockMode::Shared)));
        tm.commit(&txn).unwrap();
    }

    #[test]
    fn serializable_write_after_scan_does_not_error_on_intent_lock() {
        let (ctx, tm, _dir) = harness();
        let meta = seeded_table(&ctx, &tm);

        let txn = tm.begin(IsolationLevel::Serializable);
        let schema = RowSchema::from_schema(None, &meta.schema);
        let plan = PlanNode::SeqScan { table: "t".into(), table_oid: meta.oid, schema };
        execute_plan(&ctx, &txn, plan).unwrap();

        // A later statement in the same SERIALIZABLE transaction requesting
        // the ordinary IntentionExclusive table lock must not fail just
        // because a stronger whole-table Shared lock is already held.
        ctx.lock_manager.lock_table(&txn, LockMode::IntentionExclusive, meta.oid).unwrap();
        assert!(txn
            .held_locks()
            .contains(&(crate::txn::lock_manager::ResourceId::Table(meta.oid), LockMode::Shared)));
        tm.commit(&txn).unwrap();
    }

    #[test]
    fn group_by_groups_null_keys_together() {
        let a = vec![Value::Null];
        let b = vec![Value::Null];
        assert!(group_keys_match(&a, &b));

        let c = vec![Value::I32(1)];
        let d = vec![Value::I32(1)];
        assert!(group_keys_match(&c, &d));

        assert!(!group_keys_match(&a, &c));
    }
}
