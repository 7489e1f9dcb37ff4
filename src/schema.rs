//! Column and Schema.
//!
//! Covers the full column type set and precomputes a name→index map and
//! fixed-size layout so tuple encode/decode never has to re-derive them.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F64,
    FixedString(usize),
    VarString,
    Blob,
    Timestamp,
    Vector(usize),
}

impl ColumnType {
    /// `Some(n)` if every value of this type takes exactly `n` bytes once
    /// encoded (the length prefix and tag always cost 5 bytes extra, which
    /// callers add on top of this).
    pub fn fixed_payload_size(&self) -> Option<usize> {
        match self {
            ColumnType::Bool => Some(1),
            ColumnType::I8 => Some(1),
            ColumnType::I16 => Some(2),
            ColumnType::I32 => Some(4),
            ColumnType::I64 => Some(8),
            ColumnType::F64 => Some(8),
            ColumnType::FixedString(len) => Some(*len),
            ColumnType::Vector(dim) => Some(dim * 8),
            ColumnType::VarString | ColumnType::Blob | ColumnType::Timestamp => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub columns: Vec<Column>,
    name_index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut name_index = HashMap::new();
        for (i, c) in columns.iter().enumerate() {
            if name_index.insert(c.name.clone(), i).is_some() {
                return Err(Error::catalog(format!("duplicate column name '{}'", c.name)));
            }
        }
        Ok(Self { columns, name_index })
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    pub fn column(&self, i: usize) -> &Column {
        &self.columns[i]
    }

    /// The fixed tuple payload size (sum of each column's encoded size,
    /// including each value's 5-byte tag+length header), or `None` if any
    /// column is variable-length.
    pub fn fixed_tuple_size(&self) -> Option<usize> {
        let mut total = 0usize;
        for c in &self.columns {
            total += 5 + c.column_type.fixed_payload_size()?;
        }
        Some(total)
    }

    pub fn has_variable_length_column(&self) -> bool {
        self.fixed_tuple_size().is_none()
    }

    pub fn validate_values(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.arity() {
            return Err(Error::ty(format!(
                "expected {} values, got {}",
                self.arity(),
                values.len()
            )));
        }
        for (v, c) in values.iter().zip(self.columns.iter()) {
            if v.is_null() && !c.nullable {
                return Err(Error::constraint(format!(
                    "column '{}' is not nullable",
                    c.name
                )));
            }
            if !v.is_compatible_with(&c.column_type) {
                return Err(Error::ty(format!(
                    "value of type {} is not compatible with column '{}' ({:?})",
                    v.type_name(),
                    c.name,
                    c.column_type
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::I32, false),
            Column::new("v", ColumnType::I32, false),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_column_names_rejected() {
        let err = Schema::new(vec![
            Column::new("id", ColumnType::I32, false),
            Column::new("id", ColumnType::I32, false),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn fixed_tuple_size_for_all_fixed_columns() {
        let schema = sample();
        assert_eq!(schema.fixed_tuple_size(), Some((5 + 4) * 2));
        assert!(!schema.has_variable_length_column());
    }

    #[test]
    fn variable_length_column_has_no_fixed_size() {
        let schema = Schema::new(vec![
            Column::new("id", ColumnType::I32, false),
            Column::new("name", ColumnType::VarString, true),
        ])
        .unwrap();
        assert_eq!(schema.fixed_tuple_size(), None);
        assert!(schema.has_variable_length_column());
    }

    #[test]
    fn validate_rejects_null_in_non_nullable_column() {
        let schema = sample();
        let err = schema.validate_values(&[Value::I32(1), Value::Null]);
        assert!(err.is_err());
    }
}
