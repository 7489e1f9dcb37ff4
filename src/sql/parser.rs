//! SQL parser.
//!
//! Wraps `sqlparser` (`GenericDialect`) rather than hand-writing recursive
//! descent, and translates its AST into the engine's own closed
//! `ParsedQuery` enum. The
//! non-standard `FOR SYSTEM_TIME AS OF TX <n>` clause is stripped from the
//! raw text by `strip_temporal_clause` before delegating to `sqlparser`,
//! then the captured transaction id is re-attached to the resulting
//! `ParsedQuery::Select`.

use sqlparser::ast::{
    self, Assignment, ColumnOption, DataType, Expr as SqlExpr, FunctionArg, FunctionArgExpr,
    Ident, ObjectName, ObjectType, Query, Select, SelectItem as SqlSelectItem, SetExpr, Statement,
    TableFactor, TableWithJoins, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::error::{Error, Result};
use crate::schema::ColumnType;
use crate::sql::ast::{
    AggregateFunction, BinaryOp, ColumnDef, Expr, IsolationLevel, JoinClause, JoinKind,
    OrderByItem, ParsedQuery, SelectItem, SelectQuery, UnaryOp,
};
use crate::value::Value;

pub fn parse(sql: &str) -> Result<Vec<ParsedQuery>> {
    let (stripped, as_of_tx) = strip_temporal_clause(sql);
    let statements = Parser::parse_sql(&GenericDialect {}, &stripped)
        .map_err(|e| Error::parse(e.to_string()))?;

    statements.into_iter().map(|s| translate_statement(s, as_of_tx)).collect()
}

/// Remove a trailing `FOR SYSTEM_TIME AS OF TX <n>` clause (case
/// insensitive) and return the transaction id it named, if any.
fn strip_temporal_clause(sql: &str) -> (String, Option<u64>) {
    let upper = sql.to_uppercase();
    let marker = "FOR SYSTEM_TIME AS OF TX";
    let start = match upper.find(marker) {
        Some(s) => s,
        None => return (sql.to_string(), None),
    };

    let rest = &sql[start + marker.len()..];
    let digits_end = rest.find(|c: char| !c.is_whitespace() && !c.is_ascii_digit()).unwrap_or(rest.len());
    let txn_id: Option<u64> = rest[..digits_end].trim().parse().ok();

    let mut stripped = String::with_capacity(sql.len());
    stripped.push_str(&sql[..start]);
    stripped.push_str(&sql[start + marker.len() + digits_end..]);
    (stripped, txn_id)
}

fn translate_statement(stmt: Statement, as_of_tx: Option<u64>) -> Result<ParsedQuery> {
    match stmt {
        Statement::CreateTable { name, columns, .. } => {
            let columns = columns.iter().map(translate_column_def).collect::<Result<Vec<_>>>()?;
            Ok(ParsedQuery::CreateTable { name: object_name(&name), columns })
        }
        Statement::CreateIndex { name, table_name, columns, unique, .. } => {
            let index_name = name.map(|n| object_name(&n)).unwrap_or_default();
            let column_names = columns.iter().map(|c| c.expr.to_string()).collect();
            Ok(ParsedQuery::CreateIndex {
                name: index_name,
                table: object_name(&table_name),
                columns: column_names,
                unique,
            })
        }
        Statement::Drop { object_type: ObjectType::Table, names, .. } => {
            let name = names
                .into_iter()
                .next()
                .ok_or_else(|| Error::parse("DROP TABLE requires a table name".to_string()))?;
            Ok(ParsedQuery::DropTable { name: object_name(&name) })
        }
        Statement::Insert { table_name, columns, source, .. } => {
            let table = object_name(&table_name);
            let columns = columns.iter().map(ident_to_string).collect();
            let rows = match source {
                Some(query) => translate_insert_rows(*query)?,
                None => Vec::new(),
            };
            Ok(ParsedQuery::Insert { table, columns, rows })
        }
        Statement::Update { table, assignments, selection, .. } => {
            let table_name = table_with_joins_name(&table)?;
            let assignments = assignments.iter().map(translate_assignment).collect::<Result<Vec<_>>>()?;
            let selection = selection.as_ref().map(translate_expr).transpose()?;
            Ok(ParsedQuery::Update { table: table_name, assignments, selection })
        }
        Statement::Delete { table_name, selection, .. } => {
            let table = table_factor_name(&table_name)?;
            let selection = selection.as_ref().map(translate_expr).transpose()?;
            Ok(ParsedQuery::Delete { table, selection })
        }
        Statement::Query(query) => Ok(ParsedQuery::Select(translate_select_query(*query, as_of_tx)?)),
        Statement::StartTransaction { modes, .. } => {
            let isolation = modes.iter().find_map(|mode| match mode {
                ast::TransactionMode::IsolationLevel(level) => Some(translate_isolation_level(level)),
                _ => None,
            });
            Ok(ParsedQuery::Begin { isolation })
        }
        Statement::Commit { .. } => Ok(ParsedQuery::Commit),
        Statement::Rollback { .. } => Ok(ParsedQuery::Rollback),
        other => Err(Error::parse(format!("unsupported statement: {}", other))),
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".")
}

fn ident_to_string(ident: &Ident) -> String {
    ident.value.clone()
}

fn table_factor_name(tf: &TableFactor) -> Result<String> {
    match tf {
        TableFactor::Table { name, .. } => Ok(object_name(name)),
        other => Err(Error::parse(format!("unsupported table reference: {:?}", other))),
    }
}

fn table_with_joins_name(t: &TableWithJoins) -> Result<String> {
    table_factor_name(&t.relation)
}

fn translate_column_def(col: &ast::ColumnDef) -> Result<ColumnDef> {
    let column_type = translate_data_type(&col.data_type)?;
    let mut nullable = true;
    let mut primary_key = false;
    for option in &col.options {
        match &option.option {
            ColumnOption::NotNull => nullable = false,
            ColumnOption::Unique { is_primary: true } => {
                primary_key = true;
                nullable = false;
            }
            _ => {}
        }
    }
    Ok(ColumnDef { name: col.name.value.clone(), column_type, nullable, primary_key })
}

fn translate_data_type(data_type: &DataType) -> Result<ColumnType> {
    Ok(match data_type {
        DataType::Boolean => ColumnType::Bool,
        DataType::TinyInt(_) => ColumnType::I8,
        DataType::SmallInt(_) => ColumnType::I16,
        DataType::Int(_) | DataType::Integer(_) => ColumnType::I32,
        DataType::BigInt(_) => ColumnType::I64,
        DataType::Float(_) | DataType::Double | DataType::Real => ColumnType::F64,
        DataType::Varchar(_) | DataType::Text => ColumnType::VarString,
        DataType::Blob(_) => ColumnType::Blob,
        DataType::Date => ColumnType::Timestamp,
        DataType::Array(_) => ColumnType::Vector(0),
        // Matched by name rather than destructured fields for types whose
        // exact shape (precision/length/timezone payload) drifts across
        // `sqlparser` releases: Char, Timestamp, Time, String-with-length.
        other => {
            let name = other.to_string().to_uppercase();
            if name.starts_with("CHAR") {
                ColumnType::FixedString(1)
            } else if name.starts_with("TIMESTAMP") || name.starts_with("TIME") {
                ColumnType::Timestamp
            } else if name.contains("VECTOR") {
                ColumnType::Vector(0)
            } else {
                ColumnType::VarString
            }
        }
    })
}

fn translate_assignment(assignment: &Assignment) -> Result<(String, Expr)> {
    let name = assignment.id.last().map(|i| i.value.clone()).unwrap_or_default();
    Ok((name, translate_expr(&assignment.value)?))
}

fn translate_insert_rows(query: Query) -> Result<Vec<Vec<Expr>>> {
    match *query.body {
        SetExpr::Values(values) => values
            .rows
            .into_iter()
            .map(|row| row.iter().map(translate_expr).collect::<Result<Vec<_>>>())
            .collect(),
        other => Err(Error::parse(format!("unsupported INSERT source: {:?}", other))),
    }
}

fn translate_select_query(query: Query, as_of_tx: Option<u64>) -> Result<SelectQuery> {
    let select = match *query.body {
        SetExpr::Select(select) => *select,
        other => return Err(Error::parse(format!("unsupported query body: {:?}", other))),
    };

    let (table, table_alias, joins) = translate_from(&select)?;
    let projection = select
        .projection
        .iter()
        .map(translate_select_item)
        .collect::<Result<Vec<_>>>()?;
    let selection = select.selection.as_ref().map(translate_expr).transpose()?;
    let group_by = translate_group_by(&select)?;
    let having = select.having.as_ref().map(translate_expr).transpose()?;

    let order_by = query
        .order_by
        .iter()
        .map(|o| {
            Ok(OrderByItem { expr: translate_expr(&o.expr)?, ascending: o.asc.unwrap_or(true) })
        })
        .collect::<Result<Vec<_>>>()?;

    let limit = match &query.limit {
        Some(SqlExpr::Value(SqlValue::Number(n, _))) => n.parse().ok(),
        _ => None,
    };

    Ok(SelectQuery {
        projection,
        table,
        table_alias,
        joins,
        selection,
        group_by,
        having,
        order_by,
        limit,
        as_of_tx,
    })
}

fn translate_group_by(select: &Select) -> Result<Vec<Expr>> {
    select.group_by.iter().map(translate_expr).collect()
}

fn translate_from(select: &Select) -> Result<(String, Option<String>, Vec<JoinClause>)> {
    let from = select
        .from
        .first()
        .ok_or_else(|| Error::parse("SELECT requires a FROM clause".to_string()))?;

    let table = table_factor_name(&from.relation)?;
    let table_alias = table_factor_alias(&from.relation);

    let joins = from
        .joins
        .iter()
        .map(|j| {
            let (kind, on) = match &j.join_operator {
                ast::JoinOperator::Inner(constraint) => (JoinKind::Inner, constraint),
                ast::JoinOperator::LeftOuter(constraint) => (JoinKind::Left, constraint),
                ast::JoinOperator::RightOuter(constraint) => (JoinKind::Right, constraint),
                other => return Err(Error::parse(format!("unsupported join type: {:?}", other))),
            };
            let on_expr = match on {
                ast::JoinConstraint::On(expr) => translate_expr(expr)?,
                other => return Err(Error::parse(format!("unsupported join constraint: {:?}", other))),
            };
            Ok(JoinClause {
                kind,
                table: table_factor_name(&j.relation)?,
                alias: table_factor_alias(&j.relation),
                on: on_expr,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((table, table_alias, joins))
}

fn table_factor_alias(tf: &TableFactor) -> Option<String> {
    match tf {
        TableFactor::Table { alias, .. } => alias.as_ref().map(|a| a.name.value.clone()),
        _ => None,
    }
}

fn translate_select_item(item: &SqlSelectItem) -> Result<SelectItem> {
    match item {
        SqlSelectItem::UnnamedExpr(expr) => Ok(SelectItem { expr: translate_expr(expr)?, alias: None }),
        SqlSelectItem::ExprWithAlias { expr, alias } => {
            Ok(SelectItem { expr: translate_expr(expr)?, alias: Some(alias.value.clone()) })
        }
        SqlSelectItem::Wildcard(_) | SqlSelectItem::QualifiedWildcard(_, _) => {
            Ok(SelectItem { expr: Expr::Wildcard, alias: None })
        }
    }
}

fn translate_expr(expr: &SqlExpr) -> Result<Expr> {
    match expr {
        SqlExpr::Identifier(ident) => Ok(Expr::Column(ident.value.clone())),
        SqlExpr::CompoundIdentifier(parts) => {
            if parts.len() == 2 {
                Ok(Expr::Qualified(parts[0].value.clone(), parts[1].value.clone()))
            } else {
                Ok(Expr::Column(parts.last().map(|i| i.value.clone()).unwrap_or_default()))
            }
        }
        SqlExpr::Value(v) => Ok(Expr::Literal(translate_literal(v))),
        SqlExpr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
            left: Box::new(translate_expr(left)?),
            op: translate_binary_op(op)?,
            right: Box::new(translate_expr(right)?),
        }),
        SqlExpr::UnaryOp { op, expr } => Ok(Expr::UnaryOp {
            op: match op {
                ast::UnaryOperator::Not => UnaryOp::Not,
                ast::UnaryOperator::Minus => UnaryOp::Neg,
                other => return Err(Error::parse(format!("unsupported unary operator: {:?}", other))),
            },
            expr: Box::new(translate_expr(expr)?),
        }),
        SqlExpr::Nested(inner) => translate_expr(inner),
        SqlExpr::IsNull(inner) => Ok(Expr::BinaryOp {
            left: Box::new(translate_expr(inner)?),
            op: BinaryOp::Eq,
            right: Box::new(Expr::Literal(Value::Null)),
        }),
        SqlExpr::Function(func) => translate_function(func),
        other => Err(Error::parse(format!("unsupported expression: {:?}", other))),
    }
}

fn translate_binary_op(op: &ast::BinaryOperator) -> Result<BinaryOp> {
    use ast::BinaryOperator as B;
    Ok(match op {
        B::Eq => BinaryOp::Eq,
        B::NotEq => BinaryOp::NotEq,
        B::Lt => BinaryOp::Lt,
        B::LtEq => BinaryOp::LtEq,
        B::Gt => BinaryOp::Gt,
        B::GtEq => BinaryOp::GtEq,
        B::And => BinaryOp::And,
        B::Or => BinaryOp::Or,
        B::Plus => BinaryOp::Add,
        B::Minus => BinaryOp::Sub,
        B::Multiply => BinaryOp::Mul,
        B::Divide => BinaryOp::Div,
        B::Modulo => BinaryOp::Mod,
        other => return Err(Error::parse(format!("unsupported binary operator: {:?}", other))),
    })
}

fn translate_literal(value: &SqlValue) -> Value {
    match value {
        SqlValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Value::I64(i)
            } else {
                n.parse::<f64>().map(Value::F64).unwrap_or(Value::Null)
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => Value::VarString(s.clone()),
        SqlValue::Boolean(b) => Value::Bool(*b),
        SqlValue::Null => Value::Null,
        _ => Value::Null,
    }
}

fn translate_function(func: &ast::Function) -> Result<Expr> {
    let name = object_name(&func.name).to_uppercase();
    let func_kind = match name.as_str() {
        "COUNT" => AggregateFunction::Count,
        "SUM" => AggregateFunction::Sum,
        "AVG" => AggregateFunction::Avg,
        "MIN" => AggregateFunction::Min,
        "MAX" => AggregateFunction::Max,
        other => return Err(Error::parse(format!("unsupported function: {}", other))),
    };

    let args = &func.args;
    let (arg, is_star) = match args.first() {
        Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(e))) => (Some(translate_expr(e)?), false),
        Some(FunctionArg::Unnamed(FunctionArgExpr::Wildcard)) => (None, true),
        _ => (None, false),
    };

    let func = if func_kind == AggregateFunction::Count && is_star {
        AggregateFunction::CountStar
    } else {
        func_kind
    };

    Ok(Expr::Aggregate { func, arg: arg.map(Box::new), distinct: func_distinct(func) })
}

fn func_distinct(_func: AggregateFunction) -> bool {
    false
}

fn translate_isolation_level(level: &ast::TransactionIsolationLevel) -> IsolationLevel {
    match level {
        ast::TransactionIsolationLevel::ReadUncommitted => IsolationLevel::ReadUncommitted,
        ast::TransactionIsolationLevel::ReadCommitted => IsolationLevel::ReadCommitted,
        ast::TransactionIsolationLevel::RepeatableRead => IsolationLevel::RepeatableRead,
        ast::TransactionIsolationLevel::Serializable => IsolationLevel::Serializable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table() {
        let parsed = parse("CREATE TABLE t (id INT NOT NULL, name VARCHAR(20))").unwrap();
        match &parsed[0] {
            ParsedQuery::CreateTable { name, columns } => {
                assert_eq!(name, "t");
                assert_eq!(columns.len(), 2);
                assert!(!columns[0].nullable);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn parses_simple_select_with_where() {
        let parsed = parse("SELECT id, name FROM t WHERE id = 1").unwrap();
        match &parsed[0] {
            ParsedQuery::Select(q) => {
                assert_eq!(q.table, "t");
                assert_eq!(q.projection.len(), 2);
                assert!(q.selection.is_some());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn strips_temporal_clause_and_preserves_parseability() {
        let parsed = parse("SELECT * FROM t FOR SYSTEM_TIME AS OF TX 42 WHERE id = 1").unwrap();
        match &parsed[0] {
            ParsedQuery::Select(q) => assert_eq!(q.as_of_tx, Some(42)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn parses_insert_multi_row() {
        let parsed = parse("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b')").unwrap();
        match &parsed[0] {
            ParsedQuery::Insert { table, columns, rows } => {
                assert_eq!(table, "t");
                assert_eq!(columns.len(), 2);
                assert_eq!(rows.len(), 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn parses_join_clause() {
        let parsed = parse("SELECT * FROM a JOIN b ON a.id = b.a_id").unwrap();
        match &parsed[0] {
            ParsedQuery::Select(q) => {
                assert_eq!(q.joins.len(), 1);
                assert_eq!(q.joins[0].kind, JoinKind::Inner);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
