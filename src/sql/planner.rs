//! Rule-based planner: turns a `ParsedQuery` plus the catalog into a
//! `PlanNode` tree.
//!
//! Rules applied, in order: constant folding over every expression tree,
//! predicate pushdown (a conjunct is pushed onto the scan of whichever
//! single table it resolves against), index selection (an equality or
//! range conjunct on an index's leading column becomes an `IndexScan`
//! instead of a `SeqScan`), and join algorithm selection (an equi-join
//! condition becomes a `HashJoin`; anything else falls back to
//! `NestedLoopJoin`). Aggregation and projection are layered on last.

use std::collections::HashSet;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::sql::ast::{AggregateFunction, BinaryOp, Expr, JoinClause, JoinKind, ParsedQuery, SelectQuery};
use crate::sql::plan::PlanNode;
use crate::sql::row::{eval_expr, RowSchema};
use crate::value::Value;

pub fn plan(query: ParsedQuery, catalog: &Catalog) -> Result<PlanNode> {
    match query {
        ParsedQuery::Select(select) => plan_select(select, catalog),
        ParsedQuery::Insert { table, columns, rows } => plan_insert(&table, columns, rows, catalog),
        ParsedQuery::Update { table, assignments, selection } => {
            plan_update(&table, assignments, selection, catalog)
        }
        ParsedQuery::Delete { table, selection } => plan_delete(&table, selection, catalog),
        other => Err(Error::internal(format!(
            "{:?} is not a plannable DML/query statement",
            other
        ))),
    }
}

fn table_oid(catalog: &Catalog, name: &str) -> Result<u32> {
    catalog
        .get_table(name)
        .map(|t| t.oid)
        .ok_or_else(|| Error::catalog(format!("table '{}' does not exist", name)))
}

fn plan_insert(
    table: &str,
    columns: Vec<String>,
    rows: Vec<Vec<Expr>>,
    catalog: &Catalog,
) -> Result<PlanNode> {
    let meta = catalog
        .get_table(table)
        .ok_or_else(|| Error::catalog(format!("table '{}' does not exist", table)))?;

    // Reorder each row's values to the table's declared column order,
    // filling any column not named in the statement with its default
    // (or NULL, which `Schema::validate_values` rejects if not nullable).
    let target_order: Vec<usize> = if columns.is_empty() {
        (0..meta.schema.arity()).collect()
    } else {
        columns
            .iter()
            .map(|c| {
                meta.schema
                    .index_of(c)
                    .ok_or_else(|| Error::catalog(format!("unknown column '{}' in insert", c)))
            })
            .collect::<Result<Vec<_>>>()?
    };

    let mut resolved_rows = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != target_order.len() {
            return Err(Error::constraint(format!(
                "insert expected {} values, got {}",
                target_order.len(),
                row.len()
            )));
        }
        let mut full: Vec<Expr> = meta
            .schema
            .columns
            .iter()
            .map(|c| c.default.clone().map(Expr::Literal).unwrap_or(Expr::Literal(Value::Null)))
            .collect();
        for (slot, value_expr) in target_order.iter().zip(row.into_iter()) {
            full[*slot] = value_expr;
        }
        resolved_rows.push(full);
    }

    Ok(PlanNode::Insert {
        table: table.to_string(),
        table_oid: meta.oid,
        rows: resolved_rows,
    })
}

fn plan_update(
    table: &str,
    assignments: Vec<(String, Expr)>,
    selection: Option<Expr>,
    catalog: &Catalog,
) -> Result<PlanNode> {
    let meta = catalog
        .get_table(table)
        .ok_or_else(|| Error::catalog(format!("table '{}' does not exist", table)))?;
    let schema = RowSchema::from_schema(None, &meta.schema);

    let mut resolved = Vec::with_capacity(assignments.len());
    for (name, expr) in assignments {
        let idx = meta
            .schema
            .index_of(&name)
            .ok_or_else(|| Error::catalog(format!("unknown column '{}' in update", name)))?;
        resolved.push((idx, fold_constants(&expr)));
    }

    let mut remaining = selection.as_ref().map(fold_constants).map(|e| split_conjuncts(&e)).unwrap_or_default();
    let mut input = build_scan_with_index(table, meta.oid, schema.clone(), catalog, &mut remaining);
    if let Some(residual) = conjuncts_to_expr(remaining) {
        input = PlanNode::Filter { input: Box::new(input), predicate: residual };
    }

    Ok(PlanNode::Update {
        table: table.to_string(),
        table_oid: meta.oid,
        input: Box::new(input),
        assignments: resolved,
    })
}

fn plan_delete(table: &str, selection: Option<Expr>, catalog: &Catalog) -> Result<PlanNode> {
    let meta = catalog
        .get_table(table)
        .ok_or_else(|| Error::catalog(format!("table '{}' does not exist", table)))?;
    let schema = RowSchema::from_schema(None, &meta.schema);

    let mut remaining = selection.as_ref().map(fold_constants).map(|e| split_conjuncts(&e)).unwrap_or_default();
    let mut input = build_scan_with_index(table, meta.oid, schema.clone(), catalog, &mut remaining);
    if let Some(residual) = conjuncts_to_expr(remaining) {
        input = PlanNode::Filter { input: Box::new(input), predicate: residual };
    }

    Ok(PlanNode::Delete {
        table: table.to_string(),
        table_oid: meta.oid,
        input: Box::new(input),
    })
}

fn plan_select(select: SelectQuery, catalog: &Catalog) -> Result<PlanNode> {
    let base_meta = catalog
        .get_table(&select.table)
        .ok_or_else(|| Error::catalog(format!("table '{}' does not exist", select.table)))?;
    let base_alias = select.table_alias.as_deref().unwrap_or(&select.table);
    let base_schema = RowSchema::from_schema(Some(base_alias), &base_meta.schema);

    let folded_selection = select.selection.as_ref().map(fold_constants);
    let mut remaining: Vec<Expr> = folded_selection.as_ref().map(split_conjuncts).unwrap_or_default();

    let mut node = build_scan_with_index(&select.table, base_meta.oid, base_schema.clone(), catalog, &mut remaining);

    for join in &select.joins {
        node = plan_join(node, join, catalog, &mut remaining)?;
    }

    // Whatever didn't get pushed into a scan or consumed by a join
    // condition is evaluated here, against the fully assembled row.
    if let Some(residual) = conjuncts_to_expr(remaining) {
        node = PlanNode::Filter { input: Box::new(node), predicate: residual };
    }

    let has_aggregates = select.projection.iter().any(|item| contains_aggregate(&item.expr))
        || !select.group_by.is_empty();

    if has_aggregates {
        node = plan_aggregate(node, &select)?;
    }

    node = plan_projection(node, &select, has_aggregates)?;

    if !select.order_by.is_empty() {
        let schema = node.output_schema().expect("project always yields rows").clone();
        let mut keys = Vec::with_capacity(select.order_by.len());
        for item in &select.order_by {
            let idx = match &item.expr {
                Expr::Column(name) => schema.resolve(None, name)?,
                Expr::Qualified(t, c) => schema.resolve(Some(t), c)?,
                other => {
                    return Err(Error::parse(format!("unsupported ORDER BY expression {:?}", other)))
                }
            };
            keys.push((idx, item.ascending));
        }
        node = PlanNode::Sort { input: Box::new(node), keys };
    }

    if let Some(limit) = select.limit {
        node = PlanNode::Limit { input: Box::new(node), limit };
    }

    Ok(node)
}

fn attach_eligible_filter(node: PlanNode, remaining: &mut Vec<Expr>, schema: &RowSchema) -> PlanNode {
    let eligible_idx: Vec<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, e)| expr_resolves_against(e, schema))
        .map(|(i, _)| i)
        .collect();
    if eligible_idx.is_empty() {
        return node;
    }
    let mut exprs = Vec::new();
    for &i in eligible_idx.iter().rev() {
        exprs.push(remaining.remove(i));
    }
    exprs.reverse();
    match conjuncts_to_expr(exprs) {
        Some(pred) => PlanNode::Filter { input: Box::new(node), predicate: pred },
        None => node,
    }
}

/// Look for an equality/range conjunct in `remaining` on `table`'s indexed
/// leading column; if one exists, return an `IndexScan` and drop that
/// conjunct (and any other bound found for the same column) from the list.
fn try_index_scan(
    table: &str,
    table_oid: u32,
    schema: &RowSchema,
    catalog: &Catalog,
    remaining: &mut Vec<Expr>,
) -> Option<PlanNode> {
    for index in catalog.indexes_for_table(table_oid) {
        let key_col_idx = *index.key_columns.first()?;
        let key_name = catalog.get_table_by_oid(table_oid)?.schema.column(key_col_idx).name.clone();

        let mut lower = None;
        let mut upper = None;
        let mut consumed = Vec::new();

        for (i, expr) in remaining.iter().enumerate() {
            if let Some((col, op, lit)) = as_column_literal_comparison(expr) {
                if col != key_name || !expr_resolves_against(expr, schema) {
                    continue;
                }
                match op {
                    BinaryOp::Eq => {
                        lower = Some(lit.clone());
                        upper = Some(lit.clone());
                        consumed.push(i);
                    }
                    BinaryOp::Gt | BinaryOp::GtEq => {
                        lower = Some(lit.clone());
                        consumed.push(i);
                    }
                    BinaryOp::Lt | BinaryOp::LtEq => {
                        upper = Some(lit.clone());
                        consumed.push(i);
                    }
                    _ => {}
                }
            }
        }

        if lower.is_none() && upper.is_none() {
            continue;
        }
        for &i in consumed.iter().rev() {
            remaining.remove(i);
        }
        return Some(PlanNode::IndexScan {
            table: table.to_string(),
            table_oid,
            index: index.name.clone(),
            schema: schema.clone(),
            lower,
            upper,
        });
    }
    None
}

fn as_column_literal_comparison(expr: &Expr) -> Option<(String, BinaryOp, Value)> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match (left.as_ref(), right.as_ref()) {
            (Expr::Column(c), Expr::Literal(v)) => Some((c.clone(), *op, v.clone())),
            (Expr::Qualified(_, c), Expr::Literal(v)) => Some((c.clone(), *op, v.clone())),
            (Expr::Literal(v), Expr::Column(c)) => Some((c.clone(), flip(*op), v.clone())),
            (Expr::Literal(v), Expr::Qualified(_, c)) => Some((c.clone(), flip(*op), v.clone())),
            _ => None,
        }
    } else {
        None
    }
}

fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::LtEq => BinaryOp::GtEq,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::GtEq => BinaryOp::LtEq,
        other => other,
    }
}

fn plan_join(
    left: PlanNode,
    join: &JoinClause,
    catalog: &Catalog,
    remaining: &mut Vec<Expr>,
) -> Result<PlanNode> {
    let meta = catalog
        .get_table(&join.table)
        .ok_or_else(|| Error::catalog(format!("table '{}' does not exist", join.table)))?;
    let alias = join.alias.as_deref().unwrap_or(&join.table);
    let right_schema = RowSchema::from_schema(Some(alias), &meta.schema);

    let right_scan = build_scan_with_index(&join.table, meta.oid, right_schema.clone(), catalog, remaining);

    let left_schema = left.output_schema().expect("left side of a join always produces rows").clone();
    let combined_schema = RowSchema::concat(&left_schema, &right_schema);
    let on = fold_constants(&join.on);

    // A RIGHT JOIN is executed as a LEFT JOIN with the operands swapped, so
    // the pull executor only ever implements Inner/Left; reorder the
    // output columns back with a Project so callers still see
    // `left ++ right` order.
    let built = match join.kind {
        JoinKind::Right => {
            let swapped_schema = RowSchema::concat(&right_schema, &left_schema);
            let node = build_join_node(right_scan, left, JoinKind::Left, on, swapped_schema);
            let reorder_items: Vec<(Expr, String)> = combined_schema
                .columns
                .iter()
                .map(|(t, c)| {
                    let expr = match t {
                        Some(t) => Expr::Qualified(t.clone(), c.clone()),
                        None => Expr::Column(c.clone()),
                    };
                    (expr, c.clone())
                })
                .collect();
            let reordered = PlanNode::Project {
                input: Box::new(node),
                items: reorder_items,
                schema: combined_schema,
            };
            return Ok(reordered);
        }
        JoinKind::Left => build_join_node(left, right_scan, JoinKind::Left, on, combined_schema),
        JoinKind::Inner => build_join_node(left, right_scan, JoinKind::Inner, on, combined_schema),
    };
    Ok(built)
}

fn build_scan_with_index(
    table: &str,
    table_oid: u32,
    schema: RowSchema,
    catalog: &Catalog,
    remaining: &mut Vec<Expr>,
) -> PlanNode {
    let node = match try_index_scan(table, table_oid, &schema, catalog, remaining) {
        Some(index_scan) => index_scan,
        None => PlanNode::SeqScan { table: table.to_string(), table_oid, schema: schema.clone() },
    };
    attach_eligible_filter(node, remaining, &schema)
}

/// Pick `HashJoin` when `on` is a simple equi-join between one column from
/// each side, otherwise fall back to `NestedLoopJoin`.
fn build_join_node(left: PlanNode, right: PlanNode, kind: JoinKind, on: Expr, schema: RowSchema) -> PlanNode {
    let left_schema = left.output_schema().cloned();
    let right_schema = right.output_schema().cloned();
    if let (Some(left_schema), Some(right_schema)) = (left_schema, right_schema) {
        if let Expr::BinaryOp { left: l, op: BinaryOp::Eq, right: r } = &on {
            let l_in_left = expr_resolves_against(l, &left_schema);
            let r_in_right = expr_resolves_against(r, &right_schema);
            let l_in_right = expr_resolves_against(l, &right_schema);
            let r_in_left = expr_resolves_against(r, &left_schema);

            if l_in_left && r_in_right {
                return PlanNode::HashJoin {
                    left: Box::new(left),
                    right: Box::new(right),
                    kind,
                    left_key: (**l).clone(),
                    right_key: (**r).clone(),
                    schema,
                };
            }
            if l_in_right && r_in_left {
                return PlanNode::HashJoin {
                    left: Box::new(left),
                    right: Box::new(right),
                    kind,
                    left_key: (**r).clone(),
                    right_key: (**l).clone(),
                    schema,
                };
            }
        }
    }
    PlanNode::NestedLoopJoin { left: Box::new(left), right: Box::new(right), kind, on, schema }
}

fn plan_aggregate(input: PlanNode, select: &SelectQuery) -> Result<PlanNode> {
    let input_schema = input.output_schema().expect("aggregate input produces rows").clone();
    let mut aggregates = Vec::new();
    let mut seen_names = HashSet::new();

    let mut group_by = Vec::new();
    for expr in &select.group_by {
        group_by.push(fold_constants(expr));
    }

    for item in &select.projection {
        collect_aggregates(&item.expr, &mut aggregates, &mut seen_names);
    }
    if let Some(having) = &select.having {
        collect_aggregates(having, &mut aggregates, &mut seen_names);
    }

    let mut schema_cols = Vec::new();
    for expr in &group_by {
        let name = match expr {
            Expr::Column(name) => name.clone(),
            Expr::Qualified(_, name) => name.clone(),
            _ => format!("group_{}", schema_cols.len()),
        };
        schema_cols.push((None, name));
    }
    for (_, _, name) in &aggregates {
        schema_cols.push((None, name.clone()));
    }

    let schema = RowSchema { columns: schema_cols };
    let _ = input_schema;
    Ok(PlanNode::HashAggregate { input: Box::new(input), group_by, aggregates, schema })
}

fn collect_aggregates(
    expr: &Expr,
    out: &mut Vec<(AggregateFunction, Option<Expr>, String)>,
    seen: &mut HashSet<String>,
) {
    match expr {
        Expr::Aggregate { func, arg, .. } => {
            let base = aggregate_name(*func, arg.as_deref());
            let mut name = base.clone();
            let mut n = 1;
            while seen.contains(&name) {
                n += 1;
                name = format!("{}_{}", base, n);
            }
            seen.insert(name.clone());
            out.push((*func, arg.as_deref().cloned(), name));
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_aggregates(left, out, seen);
            collect_aggregates(right, out, seen);
        }
        Expr::UnaryOp { expr, .. } => collect_aggregates(expr, out, seen),
        _ => {}
    }
}

fn aggregate_name(func: AggregateFunction, arg: Option<&Expr>) -> String {
    let suffix = match arg {
        Some(Expr::Column(name)) => format!("_{}", name),
        Some(Expr::Qualified(_, name)) => format!("_{}", name),
        _ => String::new(),
    };
    match func {
        AggregateFunction::Count => format!("count{}", suffix),
        AggregateFunction::CountStar => "count_star".to_string(),
        AggregateFunction::Sum => format!("sum{}", suffix),
        AggregateFunction::Avg => format!("avg{}", suffix),
        AggregateFunction::Min => format!("min{}", suffix),
        AggregateFunction::Max => format!("max{}", suffix),
    }
}

fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Aggregate { .. } => true,
        Expr::BinaryOp { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::UnaryOp { expr, .. } => contains_aggregate(expr),
        _ => false,
    }
}

/// When the input is a `HashAggregate`, rewrite each projection item's
/// `Aggregate`/group-by expression into a plain reference to the aggregate
/// node's already-computed output column of the same name.
fn plan_projection(input: PlanNode, select: &SelectQuery, aggregated: bool) -> Result<PlanNode> {
    if select.projection.len() == 1 && matches!(select.projection[0].expr, Expr::Wildcard) && !aggregated {
        return Ok(input);
    }

    let input_schema = input.output_schema().expect("projection input produces rows").clone();
    let mut items = Vec::new();

    for item in &select.projection {
        if matches!(item.expr, Expr::Wildcard) {
            for (table, name) in &input_schema.columns {
                let expr = match table {
                    Some(t) => Expr::Qualified(t.clone(), name.clone()),
                    None => Expr::Column(name.clone()),
                };
                items.push((expr, name.clone()));
            }
            continue;
        }

        let expr = if aggregated {
            rewrite_against_aggregate_output(&item.expr, &input_schema)?
        } else {
            fold_constants(&item.expr)
        };
        let name = item
            .alias
            .clone()
            .unwrap_or_else(|| default_projection_name(&item.expr));
        items.push((expr, name));
    }

    let schema = RowSchema {
        columns: items.iter().map(|(_, name)| (None, name.clone())).collect(),
    };
    Ok(PlanNode::Project { input: Box::new(input), items, schema })
}

fn default_projection_name(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => name.clone(),
        Expr::Qualified(_, name) => name.clone(),
        Expr::Aggregate { func, arg, .. } => aggregate_name(*func, arg.as_deref()),
        _ => "expr".to_string(),
    }
}

fn rewrite_against_aggregate_output(expr: &Expr, agg_schema: &RowSchema) -> Result<Expr> {
    match expr {
        Expr::Aggregate { func, arg, .. } => {
            let name = aggregate_name(*func, arg.as_deref());
            if agg_schema.resolve(None, &name).is_ok() {
                Ok(Expr::Column(name))
            } else {
                Err(Error::catalog(format!("aggregate '{}' not found in group result", name)))
            }
        }
        Expr::Column(name) => {
            agg_schema.resolve(None, name)?;
            Ok(Expr::Column(name.clone()))
        }
        Expr::Qualified(_, name) => {
            agg_schema.resolve(None, name)?;
            Ok(Expr::Column(name.clone()))
        }
        Expr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
            left: Box::new(rewrite_against_aggregate_output(left, agg_schema)?),
            op: *op,
            right: Box::new(rewrite_against_aggregate_output(right, agg_schema)?),
        }),
        Expr::UnaryOp { op, expr } => Ok(Expr::UnaryOp {
            op: *op,
            expr: Box::new(rewrite_against_aggregate_output(expr, agg_schema)?),
        }),
        other => Ok(other.clone()),
    }
}

/// Fold `Literal op Literal` (and unary-op-of-literal) subtrees bottom-up
/// into a single `Literal`, leaving anything that still references a
/// column untouched.
fn fold_constants(expr: &Expr) -> Expr {
    let empty_schema = RowSchema { columns: Vec::new() };
    match expr {
        Expr::BinaryOp { left, op, right } => {
            let l = fold_constants(left);
            let r = fold_constants(right);
            if let (Expr::Literal(_), Expr::Literal(_)) = (&l, &r) {
                let candidate = Expr::BinaryOp { left: Box::new(l.clone()), op: *op, right: Box::new(r.clone()) };
                if let Ok(v) = eval_expr(&candidate, &empty_schema, &[]) {
                    return Expr::Literal(v);
                }
            }
            Expr::BinaryOp { left: Box::new(l), op: *op, right: Box::new(r) }
        }
        Expr::UnaryOp { op, expr } => {
            let e = fold_constants(expr);
            if let Expr::Literal(_) = &e {
                let candidate = Expr::UnaryOp { op: *op, expr: Box::new(e.clone()) };
                if let Ok(v) = eval_expr(&candidate, &empty_schema, &[]) {
                    return Expr::Literal(v);
                }
            }
            Expr::UnaryOp { op: *op, expr: Box::new(e) }
        }
        other => other.clone(),
    }
}

fn split_conjuncts(expr: &Expr) -> Vec<Expr> {
    match expr {
        Expr::BinaryOp { left, op: BinaryOp::And, right } => {
            let mut out = split_conjuncts(left);
            out.extend(split_conjuncts(right));
            out
        }
        other => vec![other.clone()],
    }
}

fn conjuncts_to_expr(mut exprs: Vec<Expr>) -> Option<Expr> {
    let first = exprs.pop()?;
    exprs.into_iter().rev().fold(Some(first), |acc, e| {
        acc.map(|a| Expr::BinaryOp { left: Box::new(e), op: BinaryOp::And, right: Box::new(a) })
    })
}

fn expr_resolves_against(expr: &Expr, schema: &RowSchema) -> bool {
    let mut refs = Vec::new();
    collect_column_refs(expr, &mut refs);
    refs.iter().all(|(t, c)| schema.resolve(t.as_deref(), c).is_ok())
}

fn collect_column_refs(expr: &Expr, out: &mut Vec<(Option<String>, String)>) {
    match expr {
        Expr::Column(name) => out.push((None, name.clone())),
        Expr::Qualified(t, name) => out.push((Some(t.clone()), name.clone())),
        Expr::BinaryOp { left, right, .. } => {
            collect_column_refs(left, out);
            collect_column_refs(right, out);
        }
        Expr::UnaryOp { expr, .. } => collect_column_refs(expr, out),
        Expr::Aggregate { arg: Some(arg), .. } => collect_column_refs(arg, out),
        _ => {}
    }
}
