//! Row-shape bookkeeping the executor needs between operators: a schema of
//! `(table alias, column name)` pairs next to a flat `Value` slice, and
//! expression evaluation against that shape.
//!
//! `Schema` (catalog.rs / schema.rs) describes a single table's on-disk
//! layout; `RowSchema` describes whatever a plan node currently produces,
//! which after a join is the concatenation of two tables' columns.

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::sql::ast::{BinaryOp, Expr, UnaryOp};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct RowSchema {
    pub columns: Vec<(Option<String>, String)>,
}

impl RowSchema {
    pub fn from_schema(alias: Option<&str>, schema: &Schema) -> Self {
        Self {
            columns: schema
                .columns
                .iter()
                .map(|c| (alias.map(|a| a.to_string()), c.name.clone()))
                .collect(),
        }
    }

    pub fn concat(left: &RowSchema, right: &RowSchema) -> RowSchema {
        let mut columns = left.columns.clone();
        columns.extend(right.columns.clone());
        RowSchema { columns }
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(_, name)| name.clone()).collect()
    }

    /// Resolve a (possibly qualified) column reference to its slot.
    /// An unqualified name must be unambiguous across every source table.
    pub fn resolve(&self, table: Option<&str>, column: &str) -> Result<usize> {
        let mut matches = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, (t, c))| c == column && (table.is_none() || t.as_deref() == table));

        let first = matches
            .next()
            .ok_or_else(|| Error::catalog(format!("unknown column '{}'", column)))?;
        if matches.next().is_some() {
            return Err(Error::catalog(format!("ambiguous column reference '{}'", column)));
        }
        Ok(first.0)
    }
}

/// Evaluate a scalar expression against one row. `Expr::Aggregate` never
/// reaches here: the planner only emits it as a `HashAggregate` output
/// column, which evaluates its argument separately per input row.
pub fn eval_expr(expr: &Expr, schema: &RowSchema, values: &[Value]) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Column(name) => Ok(values[schema.resolve(None, name)?].clone()),
        Expr::Qualified(table, name) => Ok(values[schema.resolve(Some(table), name)?].clone()),
        Expr::Wildcard => Err(Error::internal("wildcard cannot be evaluated as a scalar")),
        Expr::Aggregate { .. } => Err(Error::internal("aggregate expression outside of HashAggregate")),
        Expr::UnaryOp { op, expr } => {
            let v = eval_expr(expr, schema, values)?;
            eval_unary(*op, &v)
        }
        Expr::BinaryOp { left, op, right } => {
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                let l = as_bool(&eval_expr(left, schema, values)?)?;
                return match op {
                    BinaryOp::And if !l => Ok(Value::Bool(false)),
                    BinaryOp::Or if l => Ok(Value::Bool(true)),
                    _ => {
                        let r = as_bool(&eval_expr(right, schema, values)?)?;
                        Ok(Value::Bool(r))
                    }
                };
            }
            let l = eval_expr(left, schema, values)?;
            let r = eval_expr(right, schema, values)?;
            eval_binary(*op, &l, &r)
        }
    }
}

/// `WHERE`/`ON`/`HAVING` predicates treat `NULL` and non-`BOOL` results as
/// false rather than erroring, matching ordinary SQL predicate truth tables.
pub fn is_truthy(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

fn as_bool(v: &Value) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(Error::ty(format!("expected BOOL, got {}", other.type_name()))),
    }
}

fn eval_unary(op: UnaryOp, v: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!as_bool(v)?)),
        UnaryOp::Neg => match v.as_f64() {
            Some(f) => Ok(Value::F64(-f)),
            None => Err(Error::ty(format!("cannot negate {}", v.type_name()))),
        },
    }
}

fn is_integral(v: &Value) -> bool {
    matches!(v, Value::I8(_) | Value::I16(_) | Value::I32(_) | Value::I64(_) | Value::Bool(_))
}

fn eval_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    use BinaryOp::*;
    match op {
        Eq => Ok(Value::Bool(l == r)),
        NotEq => Ok(Value::Bool(l != r)),
        Lt => Ok(Value::Bool(l.cmp_for_index(r) == std::cmp::Ordering::Less)),
        LtEq => Ok(Value::Bool(l.cmp_for_index(r) != std::cmp::Ordering::Greater)),
        Gt => Ok(Value::Bool(l.cmp_for_index(r) == std::cmp::Ordering::Greater)),
        GtEq => Ok(Value::Bool(l.cmp_for_index(r) != std::cmp::Ordering::Less)),
        And | Or => unreachable!("short-circuited in eval_expr"),
        Add | Sub | Mul | Div | Mod => {
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(Error::ty(format!(
                        "arithmetic requires numeric operands, got {} and {}",
                        l.type_name(),
                        r.type_name()
                    )))
                }
            };
            let result = match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => {
                    if b == 0.0 {
                        return Err(Error::constraint("division by zero"));
                    }
                    a / b
                }
                Mod => {
                    if b == 0.0 {
                        return Err(Error::constraint("modulo by zero"));
                    }
                    a % b
                }
                _ => unreachable!(),
            };
            if is_integral(l) && is_integral(r) {
                Ok(Value::I64(result as i64))
            } else {
                Ok(Value::F64(result))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};

    fn schema() -> RowSchema {
        let s = Schema::new(vec![
            Column::new("id", ColumnType::I32, false),
            Column::new("name", ColumnType::VarString, false),
        ])
        .unwrap();
        RowSchema::from_schema(Some("t"), &s)
    }

    #[test]
    fn resolves_qualified_and_unqualified_names() {
        let s = schema();
        assert_eq!(s.resolve(None, "id").unwrap(), 0);
        assert_eq!(s.resolve(Some("t"), "name").unwrap(), 1);
        assert!(s.resolve(Some("other"), "id").is_err());
    }

    #[test]
    fn evaluates_comparison_and_boolean_ops() {
        let s = schema();
        let values = vec![Value::I32(5), Value::VarString("abc".into())];
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::Column("id".into())),
            op: BinaryOp::Gt,
            right: Box::new(Expr::Literal(Value::I32(3))),
        };
        assert_eq!(eval_expr(&expr, &s, &values).unwrap(), Value::Bool(true));
    }

    #[test]
    fn col_equals_null_never_matches_even_when_col_is_null() {
        let s = schema();
        let values = vec![Value::Null, Value::VarString("abc".into())];
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::Column("id".into())),
            op: BinaryOp::Eq,
            right: Box::new(Expr::Literal(Value::Null)),
        };
        let result = eval_expr(&expr, &s, &values).unwrap();
        assert_eq!(result, Value::Bool(false));
        assert!(!is_truthy(&result));
    }

    #[test]
    fn arithmetic_on_integers_stays_integral() {
        let s = schema();
        let values = vec![Value::I32(5), Value::VarString("abc".into())];
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::Column("id".into())),
            op: BinaryOp::Add,
            right: Box::new(Expr::Literal(Value::I32(2))),
        };
        assert_eq!(eval_expr(&expr, &s, &values).unwrap(), Value::I64(7));
    }

    #[test]
    fn division_by_zero_is_rejected() {
        let s = schema();
        let values = vec![Value::I32(5), Value::VarString("abc".into())];
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::Column("id".into())),
            op: BinaryOp::Div,
            right: Box::new(Expr::Literal(Value::I32(0))),
        };
        assert!(eval_expr(&expr, &s, &values).is_err());
    }
}
