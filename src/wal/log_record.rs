//! WAL log record format.
//!
//! Each record carries an LSN and the previous LSN written by the same
//! transaction, expressed as a closed sum type with an explicit
//! encode/decode pair rather than runtime polymorphism.

use std::io::{Read, Write};

use crc32fast::Hasher;

use crate::error::{Error, Result};
use crate::rid::Rid;

pub const INVALID_LSN: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    Begin = 0,
    Commit = 1,
    Abort = 2,
    Insert = 3,
    Delete = 4,
    Update = 5,
    NewPage = 6,
    Clr = 7,
    End = 8,
}

impl Tag {
    fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Tag::Begin,
            1 => Tag::Commit,
            2 => Tag::Abort,
            3 => Tag::Insert,
            4 => Tag::Delete,
            5 => Tag::Update,
            6 => Tag::NewPage,
            7 => Tag::Clr,
            8 => Tag::End,
            other => return Err(Error::corruption(format!("unknown log record tag {}", other))),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogRecordBody {
    Begin,
    Commit,
    Abort,
    Insert { rid: Rid, tuple: Vec<u8> },
    Delete { rid: Rid, tuple: Vec<u8> },
    Update {
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    },
    NewPage { page_id: u32 },
    /// Compensation log record, emitted during undo; itself redo-only.
    Clr { undone_lsn: u64, rid: Rid, compensating: CompensatingAction },
    End,
}

/// What a CLR does when redone: the inverse of the original operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CompensatingAction {
    Delete { tuple: Vec<u8> },
    Insert { tuple: Vec<u8> },
    Restore { old_tuple: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub lsn: u64,
    pub prev_lsn: u64,
    pub txn_id: u64,
    pub body: LogRecordBody,
}

impl LogRecord {
    pub fn is_begin(&self) -> bool {
        matches!(self.body, LogRecordBody::Begin)
    }

    pub fn is_commit(&self) -> bool {
        matches!(self.body, LogRecordBody::Commit)
    }

    pub fn is_abort(&self) -> bool {
        matches!(self.body, LogRecordBody::Abort)
    }

    pub fn is_end(&self) -> bool {
        matches!(self.body, LogRecordBody::End)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.lsn.to_be_bytes());
        out.extend_from_slice(&self.prev_lsn.to_be_bytes());
        out.extend_from_slice(&self.txn_id.to_be_bytes());

        match &self.body {
            LogRecordBody::Begin => out.push(Tag::Begin as u8),
            LogRecordBody::Commit => out.push(Tag::Commit as u8),
            LogRecordBody::Abort => out.push(Tag::Abort as u8),
            LogRecordBody::End => out.push(Tag::End as u8),
            LogRecordBody::Insert { rid, tuple } => {
                out.push(Tag::Insert as u8);
                encode_rid(out, *rid);
                encode_bytes(out, tuple);
            }
            LogRecordBody::Delete { rid, tuple } => {
                out.push(Tag::Delete as u8);
                encode_rid(out, *rid);
                encode_bytes(out, tuple);
            }
            LogRecordBody::Update { rid, old_tuple, new_tuple } => {
                out.push(Tag::Update as u8);
                encode_rid(out, *rid);
                encode_bytes(out, old_tuple);
                encode_bytes(out, new_tuple);
            }
            LogRecordBody::NewPage { page_id } => {
                out.push(Tag::NewPage as u8);
                out.extend_from_slice(&page_id.to_be_bytes());
            }
            LogRecordBody::Clr { undone_lsn, rid, compensating } => {
                out.push(Tag::Clr as u8);
                out.extend_from_slice(&undone_lsn.to_be_bytes());
                encode_rid(out, *rid);
                match compensating {
                    CompensatingAction::Delete { tuple } => {
                        out.push(0);
                        encode_bytes(out, tuple);
                    }
                    CompensatingAction::Insert { tuple } => {
                        out.push(1);
                        encode_bytes(out, tuple);
                    }
                    CompensatingAction::Restore { old_tuple } => {
                        out.push(2);
                        encode_bytes(out, old_tuple);
                    }
                }
            }
        }
    }

    pub fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let lsn = read_u64(reader)?;
        let prev_lsn = read_u64(reader)?;
        let txn_id = read_u64(reader)?;
        let tag = Tag::from_u8(read_u8(reader)?)?;

        let body = match tag {
            Tag::Begin => LogRecordBody::Begin,
            Tag::Commit => LogRecordBody::Commit,
            Tag::Abort => LogRecordBody::Abort,
            Tag::End => LogRecordBody::End,
            Tag::Insert => LogRecordBody::Insert {
                rid: decode_rid(reader)?,
                tuple: decode_bytes(reader)?,
            },
            Tag::Delete => LogRecordBody::Delete {
                rid: decode_rid(reader)?,
                tuple: decode_bytes(reader)?,
            },
            Tag::Update => {
                let rid = decode_rid(reader)?;
                let old_tuple = decode_bytes(reader)?;
                let new_tuple = decode_bytes(reader)?;
                LogRecordBody::Update { rid, old_tuple, new_tuple }
            }
            Tag::NewPage => LogRecordBody::NewPage { page_id: read_u32(reader)? },
            Tag::Clr => {
                let undone_lsn = read_u64(reader)?;
                let rid = decode_rid(reader)?;
                let kind = read_u8(reader)?;
                let compensating = match kind {
                    0 => CompensatingAction::Delete { tuple: decode_bytes(reader)? },
                    1 => CompensatingAction::Insert { tuple: decode_bytes(reader)? },
                    2 => CompensatingAction::Restore { old_tuple: decode_bytes(reader)? },
                    other => return Err(Error::corruption(format!("unknown CLR kind {}", other))),
                };
                LogRecordBody::Clr { undone_lsn, rid, compensating }
            }
        };

        Ok(Self { lsn, prev_lsn, txn_id, body })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

fn encode_rid(out: &mut Vec<u8>, rid: Rid) {
    out.extend_from_slice(&rid.page_id.to_be_bytes());
    out.extend_from_slice(&rid.slot_num.to_be_bytes());
}

fn decode_rid<R: Read>(reader: &mut R) -> Result<Rid> {
    Ok(Rid::new(read_u32(reader)?, read_u32(reader)?))
}

fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn decode_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(Error::Io)?;
    Ok(buf)
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(Error::Io)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(Error::Io)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(Error::Io)?;
    Ok(u64::from_be_bytes(buf))
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Write a length-and-checksum-framed record to any sink (used by the log
/// manager's flush path and recovery scan): a 4-byte length, a 4-byte CRC32
/// of the record bytes, then the record bytes themselves.
pub fn write_framed<W: Write>(writer: &mut W, record: &LogRecord) -> Result<()> {
    let bytes = record.to_bytes();
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).map_err(Error::Io)?;
    writer.write_all(&crc32(&bytes).to_be_bytes()).map_err(Error::Io)?;
    writer.write_all(&bytes).map_err(Error::Io)?;
    Ok(())
}

/// Read one length-and-checksum-framed record, or `Ok(None)` at a clean end
/// of stream. A checksum mismatch means the record was corrupted on disk
/// and is reported as `Error::Corruption` rather than silently accepted.
pub fn read_framed<R: Read>(reader: &mut R) -> Result<Option<LogRecord>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut checksum_buf = [0u8; 4];
    reader.read_exact(&mut checksum_buf).map_err(Error::Io)?;
    let expected = u32::from_be_bytes(checksum_buf);

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(Error::Io)?;
    if crc32(&body) != expected {
        return Err(Error::corruption("WAL record failed checksum verification".to_string()));
    }

    let record = LogRecord::decode(&mut std::io::Cursor::new(body))?;
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        let bodies = vec![
            LogRecordBody::Begin,
            LogRecordBody::Commit,
            LogRecordBody::Abort,
            LogRecordBody::End,
            LogRecordBody::Insert { rid: Rid::new(1, 2), tuple: vec![1, 2, 3] },
            LogRecordBody::Delete { rid: Rid::new(1, 2), tuple: vec![4, 5] },
            LogRecordBody::Update {
                rid: Rid::new(3, 4),
                old_tuple: vec![1],
                new_tuple: vec![2, 2],
            },
            LogRecordBody::NewPage { page_id: 7 },
            LogRecordBody::Clr {
                undone_lsn: 42,
                rid: Rid::new(1, 1),
                compensating: CompensatingAction::Delete { tuple: vec![9] },
            },
        ];

        for body in bodies {
            let record = LogRecord { lsn: 10, prev_lsn: 5, txn_id: 1, body };
            let bytes = record.to_bytes();
            let back = LogRecord::decode(&mut std::io::Cursor::new(bytes)).unwrap();
            assert_eq!(record, back);
        }
    }

    #[test]
    fn framed_round_trip_over_a_stream() {
        let r1 = LogRecord { lsn: 1, prev_lsn: 0, txn_id: 1, body: LogRecordBody::Begin };
        let r2 = LogRecord {
            lsn: 2,
            prev_lsn: 1,
            txn_id: 1,
            body: LogRecordBody::Insert { rid: Rid::new(0, 0), tuple: vec![1] },
        };

        let mut buf = Vec::new();
        write_framed(&mut buf, &r1).unwrap();
        write_framed(&mut buf, &r2).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_framed(&mut cursor).unwrap().unwrap(), r1);
        assert_eq!(read_framed(&mut cursor).unwrap().unwrap(), r2);
        assert!(read_framed(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn a_flipped_byte_fails_checksum_verification() {
        let record = LogRecord {
            lsn: 1,
            prev_lsn: 0,
            txn_id: 1,
            body: LogRecordBody::Insert { rid: Rid::new(0, 0), tuple: vec![1, 2, 3] },
        };

        let mut buf = Vec::new();
        write_framed(&mut buf, &record).unwrap();
        // Flip a bit in the record payload, past the 8-byte length+checksum
        // header.
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_framed(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), "CorruptionError");
    }
}
