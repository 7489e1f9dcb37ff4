//! `Value` — the tagged union over every storable type.
//!
//! Serialization is length-prefixed and self-describing: a one-byte type
//! tag, a four-byte big-endian payload length, then the payload. Every
//! variant is encoded the same way (even fixed-width ones) so a reader never
//! needs outside context (a `Schema`) to skip over a `Value` it doesn't
//! care about — only to interpret one once the bytes are in hand.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::schema::ColumnType;

const FLOAT_EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    /// A fixed-width string, padded/truncated to `len` bytes on write.
    FixedString(String),
    VarString(String),
    Blob(Vec<u8>),
    /// Date/time/timestamp, stored verbatim as text.
    Timestamp(String),
    Vector(Vec<f64>),
}

#[repr(u8)]
enum Tag {
    Null = 0,
    Bool = 1,
    I8 = 2,
    I16 = 3,
    I32 = 4,
    I64 = 5,
    F64 = 6,
    FixedString = 7,
    VarString = 8,
    Blob = 9,
    Timestamp = 10,
    Vector = 11,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOL",
            Value::I8(_) => "I8",
            Value::I16(_) => "I16",
            Value::I32(_) => "I32",
            Value::I64(_) => "I64",
            Value::F64(_) => "F64",
            Value::FixedString(_) => "FIXED_STRING",
            Value::VarString(_) => "VAR_STRING",
            Value::Blob(_) => "BLOB",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Vector(_) => "VECTOR",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Widen any integer/float/bool variant to `f64`, for cross-type
    /// numeric comparison. Returns `None` for non-numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::I8(v) => Some(*v as f64),
            Value::I16(v) => Some(*v as f64),
            Value::I32(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// A total order usable for B+tree keys: numeric variants compare by
    /// widened value; values of the same non-numeric variant compare
    /// lexicographically; `Null` sorts lowest; otherwise values are ordered
    /// by type tag so the order is total (never panics, never "incomparable").
    pub fn cmp_for_index(&self, other: &Value) -> Ordering {
        if let (Value::Null, Value::Null) = (self, other) {
            return Ordering::Equal;
        }
        if self.is_null() {
            return Ordering::Less;
        }
        if other.is_null() {
            return Ordering::Greater;
        }

        if self.is_numeric() && other.is_numeric() {
            return self
                .as_f64()
                .unwrap()
                .partial_cmp(&other.as_f64().unwrap())
                .unwrap_or(Ordering::Equal);
        }

        match (self, other) {
            (Value::FixedString(a), Value::FixedString(b)) => a.cmp(b),
            (Value::VarString(a), Value::VarString(b)) => a.cmp(b),
            (Value::FixedString(a), Value::VarString(b)) => a.cmp(b),
            (Value::VarString(a), Value::FixedString(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Vector(a), Value::Vector(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let c = x.partial_cmp(y).unwrap_or(Ordering::Equal);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.tag_rank().cmp(&other.tag_rank()),
        }
    }

    fn tag_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::I8(_) => 2,
            Value::I16(_) => 3,
            Value::I32(_) => 4,
            Value::I64(_) => 5,
            Value::F64(_) => 6,
            Value::FixedString(_) => 7,
            Value::VarString(_) => 8,
            Value::Blob(_) => 9,
            Value::Timestamp(_) => 10,
            Value::Vector(_) => 11,
        }
    }

    pub fn is_compatible_with(&self, column_type: &ColumnType) -> bool {
        if self.is_null() {
            return true;
        }
        match (self, column_type) {
            (Value::Bool(_), ColumnType::Bool) => true,
            (Value::I8(_), ColumnType::I8) => true,
            (Value::I16(_), ColumnType::I16) => true,
            (Value::I32(_), ColumnType::I32) => true,
            (Value::I64(_), ColumnType::I64) => true,
            (Value::F64(_), ColumnType::F64) => true,
            (Value::FixedString(_), ColumnType::FixedString(_)) => true,
            (Value::VarString(_), ColumnType::VarString) => true,
            (Value::Blob(_), ColumnType::Blob) => true,
            (Value::Timestamp(_), ColumnType::Timestamp) => true,
            (Value::Vector(v), ColumnType::Vector(dim)) => v.len() == *dim,
            // An integer literal is castable to any wider numeric column.
            (v, ColumnType::I64) if v.is_numeric() => true,
            (v, ColumnType::F64) if v.is_numeric() => true,
            _ => false,
        }
    }

    /// Cast to fit `column_type`, applied at insert/update time once
    /// `is_compatible_with` has already been checked.
    pub fn cast_to(&self, column_type: &ColumnType) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        match column_type {
            ColumnType::I64 => Ok(Value::I64(self.as_f64().ok_or_else(|| {
                Error::ty(format!("cannot cast {} to I64", self.type_name()))
            })? as i64)),
            ColumnType::F64 => Ok(Value::F64(self.as_f64().ok_or_else(|| {
                Error::ty(format!("cannot cast {} to F64", self.type_name()))
            })?)),
            ColumnType::FixedString(len) => match self {
                Value::FixedString(s) | Value::VarString(s) => {
                    let mut s = s.clone();
                    s.truncate(*len);
                    Ok(Value::FixedString(s))
                }
                _ => Err(Error::ty(format!("cannot cast {} to FixedString", self.type_name()))),
            },
            _ => Ok(self.clone()),
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::new();
        let tag = match self {
            Value::Null => Tag::Null,
            Value::Bool(b) => {
                payload.push(*b as u8);
                Tag::Bool
            }
            Value::I8(v) => {
                payload.push(*v as u8);
                Tag::I8
            }
            Value::I16(v) => {
                payload.extend_from_slice(&v.to_be_bytes());
                Tag::I16
            }
            Value::I32(v) => {
                payload.extend_from_slice(&v.to_be_bytes());
                Tag::I32
            }
            Value::I64(v) => {
                payload.extend_from_slice(&v.to_be_bytes());
                Tag::I64
            }
            Value::F64(v) => {
                payload.extend_from_slice(&v.to_be_bytes());
                Tag::F64
            }
            Value::FixedString(s) => {
                payload.extend_from_slice(s.as_bytes());
                Tag::FixedString
            }
            Value::VarString(s) => {
                payload.extend_from_slice(s.as_bytes());
                Tag::VarString
            }
            Value::Blob(b) => {
                payload.extend_from_slice(b);
                Tag::Blob
            }
            Value::Timestamp(s) => {
                payload.extend_from_slice(s.as_bytes());
                Tag::Timestamp
            }
            Value::Vector(v) => {
                for x in v {
                    payload.extend_from_slice(&x.to_be_bytes());
                }
                Tag::Vector
            }
        };
        out.push(tag as u8);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
    }

    pub fn encoded_len(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    pub fn decode<R: Read>(reader: &mut R) -> Result<Value> {
        let mut tag_buf = [0u8; 1];
        reader.read_exact(&mut tag_buf)?;
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;

        let value = match tag_buf[0] {
            0 => Value::Null,
            1 => Value::Bool(payload[0] != 0),
            2 => Value::I8(payload[0] as i8),
            3 => Value::I16(i16::from_be_bytes(payload[..2].try_into().unwrap())),
            4 => Value::I32(i32::from_be_bytes(payload[..4].try_into().unwrap())),
            5 => Value::I64(i64::from_be_bytes(payload[..8].try_into().unwrap())),
            6 => Value::F64(f64::from_be_bytes(payload[..8].try_into().unwrap())),
            7 => Value::FixedString(String::from_utf8_lossy(&payload).into_owned()),
            8 => Value::VarString(String::from_utf8_lossy(&payload).into_owned()),
            9 => Value::Blob(payload),
            10 => Value::Timestamp(String::from_utf8_lossy(&payload).into_owned()),
            11 => {
                let mut v = Vec::with_capacity(payload.len() / 8);
                for chunk in payload.chunks_exact(8) {
                    v.push(f64::from_be_bytes(chunk.try_into().unwrap()));
                }
                Value::Vector(v)
            }
            other => return Err(Error::corruption(format!("unknown value tag {}", other))),
        };
        Ok(value)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Value> {
        let mut cursor = io::Cursor::new(bytes);
        Value::decode(&mut cursor)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let bytes = self.to_bytes();
        w.write_all(&bytes)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (a, b) if a.is_numeric() && b.is_numeric() => {
                (a.as_f64().unwrap() - b.as_f64().unwrap()).abs() < FLOAT_EPS
            }
            (Value::FixedString(a), Value::FixedString(b)) => a == b,
            (Value::VarString(a), Value::VarString(b)) => a == b,
            (Value::FixedString(a), Value::VarString(b)) => a == b,
            (Value::VarString(a), Value::FixedString(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < FLOAT_EPS)
            }
            _ => false,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::I8(v) => v.hash(state),
            Value::I16(v) => v.hash(state),
            Value::I32(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::FixedString(s) | Value::VarString(s) => s.hash(state),
            Value::Blob(b) => b.hash(state),
            Value::Timestamp(s) => s.hash(state),
            Value::Vector(v) => {
                for x in v {
                    x.to_bits().hash(state);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_every_variant() {
        let values = vec![
            Value::Bool(true),
            Value::I8(-5),
            Value::I16(-1000),
            Value::I32(123456),
            Value::I64(-987654321),
            Value::F64(3.14159),
            Value::FixedString("abc".to_string()),
            Value::VarString("hello world".to_string()),
            Value::Blob(vec![1, 2, 3, 4]),
            Value::Timestamp("2026-07-27T00:00:00".to_string()),
            Value::Vector(vec![1.0, 2.0, 3.0]),
        ];
        for v in values {
            let bytes = v.to_bytes();
            let back = Value::from_bytes(&bytes).unwrap();
            assert_eq!(v, back, "round trip failed for {}", v.type_name());
        }
    }

    #[test]
    fn null_round_trips_as_null_but_never_equals_itself() {
        let bytes = Value::Null.to_bytes();
        let back = Value::from_bytes(&bytes).unwrap();
        assert!(back.is_null());
        assert_ne!(Value::Null, Value::Null);
        assert_ne!(Value::Null, back);
    }

    #[test]
    fn float_equality_has_tolerance() {
        assert_eq!(Value::F64(1.0), Value::F64(1.0 + 1e-12));
        assert_ne!(Value::F64(1.0), Value::F64(1.1));
    }

    #[test]
    fn cross_type_numeric_comparison() {
        assert_eq!(
            Value::I32(5).cmp_for_index(&Value::F64(5.0)),
            Ordering::Equal
        );
        assert_eq!(
            Value::I8(1).cmp_for_index(&Value::I64(2)),
            Ordering::Less
        );
    }

    #[test]
    fn null_sorts_lowest() {
        assert_eq!(Value::Null.cmp_for_index(&Value::I32(-1000)), Ordering::Less);
    }
}
