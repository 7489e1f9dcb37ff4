//! Join operators, built on the same Volcano pull model as the rest of
//! `sql::executor`: `NestedLoopJoinExec` materializes the right side once
//! and rescans it per left row; `HashJoinExec` builds a probe table from
//! the right side keyed by the equi-join key.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::sql::ast::{Expr, JoinKind};
use crate::sql::row::{eval_expr, is_truthy, RowSchema};
use crate::tuple::Tuple;
use crate::txn::transaction::Transaction;
use crate::value::Value;

use super::{Executor, ExecContext};

pub struct NestedLoopJoinExec {
    left: Box<Executor>,
    right: Box<Executor>,
    kind: JoinKind,
    on: Expr,
    schema: RowSchema,
    right_rows: Vec<Tuple>,
    right_arity: usize,
    current_left: Option<Tuple>,
    right_pos: usize,
    left_matched: bool,
}

impl NestedLoopJoinExec {
    pub fn new(left: Executor, right: Executor, kind: JoinKind, on: Expr, schema: RowSchema) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            kind,
            on,
            schema,
            right_rows: Vec::new(),
            right_arity: 0,
            current_left: None,
            right_pos: 0,
            left_matched: false,
        }
    }

    pub fn open(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        self.left.open(ctx, txn)?;
        self.right.open(ctx, txn)?;
        let mut rows = Vec::new();
        while let Some(t) = self.right.next(ctx, txn)? {
            rows.push(t);
        }
        self.right_arity = rows.first().map(|t| t.arity()).unwrap_or(0);
        self.right_rows = rows;
        self.right.close(ctx, txn)?;
        self.current_left = self.left.next(ctx, txn)?;
        self.right_pos = 0;
        self.left_matched = false;
        Ok(())
    }

    pub fn next(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<Option<Tuple>> {
        loop {
            let left_row = match &self.current_left {
                Some(t) => t.clone(),
                None => return Ok(None),
            };

            while self.right_pos < self.right_rows.len() {
                let right_row = self.right_rows[self.right_pos].clone();
                self.right_pos += 1;
                let combined = Tuple::concat(&left_row, &right_row);
                let matched = is_truthy(&eval_expr(&self.on, &self.schema, combined.values())?);
                if matched {
                    self.left_matched = true;
                    return Ok(Some(combined));
                }
            }

            let emit_unmatched = self.kind == JoinKind::Left && !self.left_matched;
            self.current_left = self.left.next(ctx, txn)?;
            self.right_pos = 0;
            let was_matched = self.left_matched;
            self.left_matched = false;

            if emit_unmatched && !was_matched {
                let nulls = vec![Value::Null; self.right_arity];
                return Ok(Some(Tuple::concat(&left_row, &Tuple::new(nulls))));
            }
        }
    }

    pub fn close(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        self.left.close(ctx, txn)
    }
}

/// `Value` implements a float-tolerant `PartialEq`/`Hash` but not `Eq`; this
/// wraps it for use as a hash-table key, accepting that tolerance as part
/// of the trade-off (two keys within float epsilon hash identically but
/// may not compare as exactly equal bit patterns).
#[derive(Clone, Debug)]
struct HashKey(Value);

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for HashKey {}

impl std::hash::Hash for HashKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

pub struct HashJoinExec {
    left: Box<Executor>,
    right: Box<Executor>,
    kind: JoinKind,
    left_key: Expr,
    right_key: Expr,
    left_schema: RowSchema,
    right_schema: RowSchema,
    table: HashMap<HashKey, Vec<Tuple>>,
    right_arity: usize,
    current_left: Option<Tuple>,
    matches: Vec<Tuple>,
    match_pos: usize,
    emitted_any: bool,
}

impl HashJoinExec {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left: Executor,
        right: Executor,
        kind: JoinKind,
        left_key: Expr,
        right_key: Expr,
        left_schema: RowSchema,
        right_schema: RowSchema,
        _schema: RowSchema,
    ) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            kind,
            left_key,
            right_key,
            left_schema,
            right_schema,
            table: HashMap::new(),
            right_arity: 0,
            current_left: None,
            matches: Vec::new(),
            match_pos: 0,
            emitted_any: false,
        }
    }

    pub fn open(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        self.left.open(ctx, txn)?;
        self.right.open(ctx, txn)?;
        let mut table: HashMap<HashKey, Vec<Tuple>> = HashMap::new();
        let mut arity = 0;
        while let Some(row) = self.right.next(ctx, txn)? {
            arity = row.arity();
            let key = eval_expr(&self.right_key, &self.right_schema, row.values())?;
            table.entry(HashKey(key)).or_default().push(row);
        }
        self.right.close(ctx, txn)?;
        self.table = table;
        self.right_arity = arity;
        self.matches = Vec::new();
        self.match_pos = 0;
        self.emitted_any = false;
        self.current_left = None;
        self.advance_left(ctx, txn)?;
        Ok(())
    }

    fn advance_left(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        self.current_left = self.left.next(ctx, txn)?;
        self.matches = Vec::new();
        self.match_pos = 0;
        self.emitted_any = false;
        if let Some(left_row) = self.current_left.clone() {
            let key = eval_expr(&self.left_key, &self.left_schema, left_row.values())?;
            self.matches = self.table.get(&HashKey(key)).cloned().unwrap_or_default();
        }
        Ok(())
    }

    pub fn next(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<Option<Tuple>> {
        loop {
            let left_row = match self.current_left.clone() {
                Some(t) => t,
                None => return Ok(None),
            };

            if self.match_pos < self.matches.len() {
                let right_row = self.matches[self.match_pos].clone();
                self.match_pos += 1;
                self.emitted_any = true;
                return Ok(Some(Tuple::concat(&left_row, &right_row)));
            }

            if self.kind == JoinKind::Left && !self.emitted_any {
                let nulls = Tuple::new(vec![Value::Null; self.right_arity]);
                let result = Tuple::concat(&left_row, &nulls);
                self.advance_left(ctx, txn)?;
                return Ok(Some(result));
            }

            self.advance_left(ctx, txn)?;
        }
    }

    pub fn close(&mut self, ctx: &ExecContext, txn: &Arc<Transaction>) -> Result<()> {
        self.left.close(ctx, txn)
    }
}
