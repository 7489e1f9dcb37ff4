//! `Tuple` — an ordered sequence of `Value`s.
//!
//! Keeps an owned byte representation alongside the value vector; any
//! setter reserializes it.

use std::fmt;
use std::io::Read;

use crate::error::Result;
use crate::schema::Schema;
use crate::value::Value;

#[derive(Clone)]
pub struct Tuple {
    values: Vec<Value>,
    bytes: Vec<u8>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        let bytes = Self::serialize(&values);
        Self { values, bytes }
    }

    fn serialize(values: &[Value]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for v in values {
            v.encode(&mut bytes);
        }
        bytes
    }

    pub fn from_bytes(schema: &Schema, bytes: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let mut values = Vec::with_capacity(schema.arity());
        for _ in 0..schema.arity() {
            values.push(Value::decode(&mut cursor)?);
        }
        Ok(Self {
            values,
            bytes: bytes.to_vec(),
        })
    }

    pub fn read_from<R: Read>(reader: &mut R, schema: &Schema) -> Result<Self> {
        let mut values = Vec::with_capacity(schema.arity());
        for _ in 0..schema.arity() {
            values.push(Value::decode(reader)?);
        }
        Ok(Self::new(values))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, i: usize) -> &Value {
        &self.values[i]
    }

    pub fn set(&mut self, i: usize, value: Value) {
        self.values[i] = value;
        self.bytes = Self::serialize(&self.values);
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn project(&self, indices: &[usize]) -> Tuple {
        Tuple::new(indices.iter().map(|&i| self.values[i].clone()).collect())
    }

    pub fn concat(left: &Tuple, right: &Tuple) -> Tuple {
        let mut values = left.values.clone();
        values.extend(right.values.clone());
        Tuple::new(values)
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};

    #[test]
    fn round_trip_through_schema() {
        let schema = Schema::new(vec![
            Column::new("id", ColumnType::I32, false),
            Column::new("name", ColumnType::VarString, false),
        ])
        .unwrap();
        let tuple = Tuple::new(vec![Value::I32(7), Value::VarString("hi".into())]);
        let back = Tuple::from_bytes(&schema, tuple.to_bytes()).unwrap();
        assert_eq!(tuple, back);
    }

    #[test]
    fn setter_reserializes_bytes() {
        let mut tuple = Tuple::new(vec![Value::I32(1)]);
        let before = tuple.to_bytes().to_vec();
        tuple.set(0, Value::I32(2));
        assert_ne!(before, tuple.to_bytes());
    }
}
