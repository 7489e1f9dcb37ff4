//! Wire-level framing constants and payload codecs: 1-byte message type,
//! 4-byte big-endian length, payload.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::sql::executor::QueryResult;
use crate::txn::IsolationLevel;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Connect,
    Disconnect,
    Query,
    Result,
    Error,
    Begin,
    Commit,
    Rollback,
    Prepare,
    Execute,
    Ping,
    Pong,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0x01 => MessageType::Connect,
            0x02 => MessageType::Disconnect,
            0x03 => MessageType::Query,
            0x04 => MessageType::Result,
            0x05 => MessageType::Error,
            0x06 => MessageType::Begin,
            0x07 => MessageType::Commit,
            0x08 => MessageType::Rollback,
            0x09 => MessageType::Prepare,
            0x0A => MessageType::Execute,
            0x0B => MessageType::Ping,
            0x0C => MessageType::Pong,
            other => return Err(Error::corruption(format!("unknown wire message type 0x{:02x}", other))),
        })
    }

    pub fn to_byte(self) -> u8 {
        match self {
            MessageType::Connect => 0x01,
            MessageType::Disconnect => 0x02,
            MessageType::Query => 0x03,
            MessageType::Result => 0x04,
            MessageType::Error => 0x05,
            MessageType::Begin => 0x06,
            MessageType::Commit => 0x07,
            MessageType::Rollback => 0x08,
            MessageType::Prepare => 0x09,
            MessageType::Execute => 0x0A,
            MessageType::Ping => 0x0B,
            MessageType::Pong => 0x0C,
        }
    }
}

/// A BEGIN payload is either empty (default isolation) or a single byte
/// naming the level.
pub fn decode_isolation(payload: &[u8]) -> IsolationLevel {
    match payload.first() {
        Some(0) => IsolationLevel::ReadUncommitted,
        Some(1) => IsolationLevel::ReadCommitted,
        Some(2) => IsolationLevel::RepeatableRead,
        Some(3) => IsolationLevel::Serializable,
        _ => IsolationLevel::ReadCommitted,
    }
}

pub fn encode_ack(message: &str) -> Vec<u8> {
    message.as_bytes().to_vec()
}

pub fn ack_result(message: &str) -> Vec<u8> {
    encode_query_result(&QueryResult::ok_affected(message, 0))
}

pub fn encode_handle(handle: u64) -> Vec<u8> {
    handle.to_be_bytes().to_vec()
}

pub fn decode_handle(payload: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let n = payload.len().min(8);
    bytes[..n].copy_from_slice(&payload[..n]);
    u64::from_be_bytes(bytes)
}

pub fn encode_error(err: &Error) -> Vec<u8> {
    format!("{}: {}", err.kind(), err).into_bytes()
}

fn write_length_prefixed(out: &mut BytesMut, bytes: &[u8]) {
    out.put_u32(bytes.len() as u32);
    out.put_slice(bytes);
}

/// RESULT payload: length-prefixed column names, then length-prefixed rows
/// of length-prefixed serialized `Value`s.
pub fn encode_query_result(result: &QueryResult) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(64);
    out.put_u32(result.column_names.len() as u32);
    for name in &result.column_names {
        write_length_prefixed(&mut out, name.as_bytes());
    }
    out.put_u32(result.rows.len() as u32);
    for row in &result.rows {
        let mut row_bytes = BytesMut::new();
        row_bytes.put_u32(row.len() as u32);
        for value in row {
            write_length_prefixed(&mut row_bytes, &value.to_bytes());
        }
        write_length_prefixed(&mut out, &row_bytes);
    }
    out.to_vec()
}

#[allow(dead_code)]
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    Value::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_byte() {
        for mt in [
            MessageType::Connect,
            MessageType::Query,
            MessageType::Result,
            MessageType::Error,
            MessageType::Begin,
            MessageType::Execute,
            MessageType::Pong,
        ] {
            assert_eq!(MessageType::from_byte(mt.to_byte()).unwrap(), mt);
        }
    }

    #[test]
    fn query_result_encodes_rows_and_columns() {
        let result = QueryResult::ok_rows(vec!["id".into()], vec![vec![Value::I32(7)]]);
        let bytes = encode_query_result(&result);
        assert!(!bytes.is_empty());
    }
}
