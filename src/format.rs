//! Byte layout of a log file.
//!
//! ```text
//! Header block (offset 0)
//! ┌──────────────────────────────────────────────────────────────┐
//! │ MAGIC            │ 4 bytes │ "ALOG"                          │
//! │ VERSION          │ 2 bytes │ Format version (u16 LE)         │
//! │ FLAGS            │ 2 bytes │ bit 0 = SEALED                  │
//! │ HEADER_LEN       │ 4 bytes │ Total block length, records     │
//! │                  │         │ start right after it            │
//! │ CRC32            │ 4 bytes │ Checksum of [16, HEADER_LEN)    │
//! │ START/END MSG    │ 2 x 8   │ Message numbers                 │
//! │ START/END FT     │ 2 x 8   │ File-time ticks                 │
//! │ START/END DT     │ 2 x 8   │ i64 µs since Unix epoch         │
//! │ RECORD_COUNT     │ 8 bytes │                                 │
//! │ LAST_REC_OFFSET  │ 8 bytes │ 0 = unknown                     │
//! │ NAME_LEN         │ 2 bytes │                                 │
//! │ COMPUTER_NAME    │ N bytes │ UTF-8                           │
//! └──────────────────────────────────────────────────────────────┘
//!
//! Record frame (repeated until end of file)
//! ┌──────────────────────────────────────────────────────────────┐
//! │ BODY_LEN         │ 4 bytes │ Bytes following this field      │
//! │ CRC32            │ 4 bytes │ Checksum of the rest of body    │
//! │ MSG_NUMBER       │ 8 bytes │                                 │
//! │ FILE_TIME        │ 8 bytes │                                 │
//! │ TIMESTAMP        │ 8 bytes │ i64 µs since Unix epoch         │
//! │ PAYLOAD          │ rest    │ Opaque                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::error::DecodeError;
use crate::record::LogRecord;
use crate::util;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use std::io::{self, Cursor, Read, Write};

pub const MAGIC: [u8; 4] = *b"ALOG";

pub const FLAG_SEALED: u16 = 0x0001;

/// Fixed part of the header block, up to and including NAME_LEN.
pub const PROLOGUE_SIZE: usize = 82;

/// Offset of the first byte covered by the header CRC.
const HEADER_CRC_START: usize = 16;

pub const RECORD_LEN_PREFIX: usize = 4;

/// CRC + msg number + file time + timestamp.
pub const RECORD_MIN_BODY: usize = 4 + 8 + 8 + 8;

/// Decode paths, selected by the version field. A new revision gets a new
/// variant; existing paths are never patched in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
  V1,
}

impl FormatVersion {
  pub const CURRENT: FormatVersion = FormatVersion::V1;

  pub fn number(self) -> u16 {
    match self {
      FormatVersion::V1 => 1,
    }
  }

  /// Checks the magic/version marker at the start of `prologue`.
  pub fn detect(prologue: &[u8]) -> Result<Self, DecodeError> {
    let mut magic = [0u8; 4];
    let mut cursor = Cursor::new(prologue);
    cursor.read_exact(&mut magic)?;
    let version = cursor.read_u16::<LittleEndian>()?;

    match (magic == MAGIC, version) {
      (true, 1) => Ok(FormatVersion::V1),
      _ => Err(DecodeError::BadMagic { magic, version }),
    }
  }

  /// Total header block length declared by a prologue of this version.
  pub fn header_len(self, prologue: &[u8]) -> Result<usize, DecodeError> {
    match self {
      FormatVersion::V1 => {
        let mut cursor = Cursor::new(&prologue[8..]);
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        if len < PROLOGUE_SIZE {
          return Err(DecodeError::Malformed {
            offset: 8,
            reason: format!("header length {} is below the minimum {}", len, PROLOGUE_SIZE),
          });
        }
        Ok(len)
      }
    }
  }

  pub fn decode_header(self, block: &[u8]) -> Result<HeaderBlock, DecodeError> {
    match self {
      FormatVersion::V1 => HeaderBlock::decode_v1(block),
    }
  }

  /// Decodes a record body (everything after the length prefix).
  /// `offset` is the position of the frame's length prefix in the file.
  pub fn decode_record(self, offset: u64, body: &[u8]) -> Result<LogRecord, DecodeError> {
    match self {
      FormatVersion::V1 => decode_record_v1(offset, body),
    }
  }
}

/// The header block exactly as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
  pub flags: u16,
  pub start_msg_number: u64,
  pub end_msg_number: u64,
  pub start_file_time: u64,
  pub end_file_time: u64,
  pub start_datetime_micros: i64,
  pub end_datetime_micros: i64,
  pub record_count: u64,
  pub last_record_offset: u64,
  pub computer_name: String,
}

impl HeaderBlock {
  pub fn unsealed(computer_name: impl Into<String>) -> Self {
    Self {
      flags: 0,
      start_msg_number: 0,
      end_msg_number: 0,
      start_file_time: 0,
      end_file_time: 0,
      start_datetime_micros: 0,
      end_datetime_micros: 0,
      record_count: 0,
      last_record_offset: 0,
      computer_name: computer_name.into(),
    }
  }

  pub fn is_sealed(&self) -> bool {
    self.flags & FLAG_SEALED != 0
  }

  /// Length of the encoded block; also the offset of the first record.
  pub fn encoded_len(&self) -> usize {
    PROLOGUE_SIZE + self.computer_name.len()
  }

  /// Serializes the block in the current format version.
  pub fn encode(&self) -> io::Result<Vec<u8>> {
    let name = self.computer_name.as_bytes();
    if name.len() > u16::MAX as usize {
      return Err(io::Error::new(io::ErrorKind::InvalidInput, "computer name too long"));
    }

    let header_len = self.encoded_len();
    let mut covered = Vec::with_capacity(header_len - HEADER_CRC_START);
    covered.write_u64::<LittleEndian>(self.start_msg_number)?;
    covered.write_u64::<LittleEndian>(self.end_msg_number)?;
    covered.write_u64::<LittleEndian>(self.start_file_time)?;
    covered.write_u64::<LittleEndian>(self.end_file_time)?;
    covered.write_i64::<LittleEndian>(self.start_datetime_micros)?;
    covered.write_i64::<LittleEndian>(self.end_datetime_micros)?;
    covered.write_u64::<LittleEndian>(self.record_count)?;
    covered.write_u64::<LittleEndian>(self.last_record_offset)?;
    covered.write_u16::<LittleEndian>(name.len() as u16)?;
    covered.write_all(name)?;

    let mut buf = Vec::with_capacity(header_len);
    buf.write_all(&MAGIC)?;
    buf.write_u16::<LittleEndian>(FormatVersion::CURRENT.number())?;
    buf.write_u16::<LittleEndian>(self.flags)?;
    buf.write_u32::<LittleEndian>(header_len as u32)?;
    buf.write_u32::<LittleEndian>(checksum(&covered))?;
    buf.write_all(&covered)?;
    Ok(buf)
  }

  fn decode_v1(block: &[u8]) -> Result<Self, DecodeError> {
    let mut cursor = Cursor::new(block);
    cursor.set_position(6);
    let flags = cursor.read_u16::<LittleEndian>()?;
    let header_len = cursor.read_u32::<LittleEndian>()? as usize;
    let stored_crc = cursor.read_u32::<LittleEndian>()?;

    if block.len() != header_len {
      return Err(DecodeError::Malformed {
        offset: 8,
        reason: format!("header block is {} bytes, header declares {}", block.len(), header_len),
      });
    }

    let actual_crc = checksum(&block[HEADER_CRC_START..]);
    if actual_crc != stored_crc {
      return Err(DecodeError::ChecksumMismatch {
        expected: stored_crc,
        actual: actual_crc,
        offset: 0,
      });
    }

    let start_msg_number = cursor.read_u64::<LittleEndian>()?;
    let end_msg_number = cursor.read_u64::<LittleEndian>()?;
    let start_file_time = cursor.read_u64::<LittleEndian>()?;
    let end_file_time = cursor.read_u64::<LittleEndian>()?;
    let start_datetime_micros = cursor.read_i64::<LittleEndian>()?;
    let end_datetime_micros = cursor.read_i64::<LittleEndian>()?;
    let record_count = cursor.read_u64::<LittleEndian>()?;
    let last_record_offset = cursor.read_u64::<LittleEndian>()?;
    let name_len = cursor.read_u16::<LittleEndian>()? as usize;

    if PROLOGUE_SIZE + name_len != header_len {
      return Err(DecodeError::Malformed {
        offset: 80,
        reason: format!("computer name length {} does not fill header of {} bytes", name_len, header_len),
      });
    }

    let computer_name = String::from_utf8(block[PROLOGUE_SIZE..].to_vec()).map_err(|e| DecodeError::Malformed {
      offset: PROLOGUE_SIZE as u64,
      reason: format!("computer name is not UTF-8: {}", e),
    })?;

    Ok(Self {
      flags,
      start_msg_number,
      end_msg_number,
      start_file_time,
      end_file_time,
      start_datetime_micros,
      end_datetime_micros,
      record_count,
      last_record_offset,
      computer_name,
    })
  }
}

/// Serializes one record frame, length prefix included.
pub fn encode_record(msg_number: u64, file_time: u64, timestamp: DateTime<Utc>, payload: &[u8]) -> io::Result<Vec<u8>> {
  let body_len = RECORD_MIN_BODY + payload.len();
  if body_len > u32::MAX as usize {
    return Err(io::Error::new(io::ErrorKind::InvalidInput, "record payload too large"));
  }

  let mut covered = Vec::with_capacity(body_len - 4);
  covered.write_u64::<LittleEndian>(msg_number)?;
  covered.write_u64::<LittleEndian>(file_time)?;
  covered.write_i64::<LittleEndian>(util::datetime_to_micros(timestamp))?;
  covered.write_all(payload)?;

  let mut buf = Vec::with_capacity(RECORD_LEN_PREFIX + body_len);
  buf.write_u32::<LittleEndian>(body_len as u32)?;
  buf.write_u32::<LittleEndian>(checksum(&covered))?;
  buf.write_all(&covered)?;
  Ok(buf)
}

/// Reads a record length prefix.
pub fn read_record_len(prefix: &[u8]) -> Result<usize, DecodeError> {
  let mut cursor = Cursor::new(prefix);
  Ok(cursor.read_u32::<LittleEndian>()? as usize)
}

fn decode_record_v1(offset: u64, body: &[u8]) -> Result<LogRecord, DecodeError> {
  if body.len() < RECORD_MIN_BODY {
    return Err(DecodeError::Malformed {
      offset,
      reason: format!("record body of {} bytes is below the minimum {}", body.len(), RECORD_MIN_BODY),
    });
  }

  let mut cursor = Cursor::new(body);
  let stored_crc = cursor.read_u32::<LittleEndian>()?;
  let actual_crc = checksum(&body[4..]);
  if stored_crc != actual_crc {
    return Err(DecodeError::ChecksumMismatch {
      expected: stored_crc,
      actual: actual_crc,
      offset,
    });
  }

  let msg_number = cursor.read_u64::<LittleEndian>()?;
  let file_time = cursor.read_u64::<LittleEndian>()?;
  let micros = cursor.read_i64::<LittleEndian>()?;
  let timestamp = util::micros_to_datetime(micros).ok_or_else(|| DecodeError::Malformed {
    offset,
    reason: format!("timestamp {} µs is out of range", micros),
  })?;

  Ok(LogRecord {
    msg_number,
    file_time,
    timestamp,
    payload: body[RECORD_MIN_BODY..].to_vec(),
    offset,
  })
}

pub fn checksum(bytes: &[u8]) -> u32 {
  crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn sample_block() -> HeaderBlock {
    HeaderBlock {
      flags: FLAG_SEALED,
      start_msg_number: 10,
      end_msg_number: 20,
      start_file_time: 1_000,
      end_file_time: 2_000,
      start_datetime_micros: 1_445_626_381_000_000,
      end_datetime_micros: 1_445_626_391_000_000,
      record_count: 11,
      last_record_offset: 512,
      computer_name: "2014R2-VS-WSP".into(),
    }
  }

  #[test]
  fn test_header_layout() {
    let block = sample_block();
    let bytes = block.encode().unwrap();
    assert_eq!(bytes.len(), PROLOGUE_SIZE + 13);
    assert_eq!(&bytes[0..4], b"ALOG");

    let version = FormatVersion::detect(&bytes).unwrap();
    assert_eq!(version, FormatVersion::V1);
    assert_eq!(version.header_len(&bytes).unwrap(), bytes.len());
    assert_eq!(version.decode_header(&bytes).unwrap(), block);
  }

  #[test]
  fn test_unknown_version_is_bad_magic() {
    let mut bytes = sample_block().encode().unwrap();
    bytes[4] = 9;
    match FormatVersion::detect(&bytes) {
      Err(DecodeError::BadMagic { magic, version }) => {
        assert_eq!(&magic, b"ALOG");
        assert_eq!(version, 9);
      }
      other => panic!("expected BadMagic, got {:?}", other),
    }
  }

  #[test]
  fn test_header_crc_detects_flip() {
    let mut bytes = sample_block().encode().unwrap();
    bytes[20] ^= 0xFF;
    let err = FormatVersion::V1.decode_header(&bytes).unwrap_err();
    assert!(matches!(err, DecodeError::ChecksumMismatch { offset: 0, .. }));
  }

  #[test]
  fn test_record_frame() {
    let ts = Utc.with_ymd_and_hms(2015, 10, 23, 18, 53, 1).unwrap();
    let frame = encode_record(42, 130_900_991_810_000_000, ts, b"Starting up").unwrap();
    let len = read_record_len(&frame).unwrap();
    assert_eq!(len, frame.len() - RECORD_LEN_PREFIX);

    let record = FormatVersion::V1.decode_record(100, &frame[RECORD_LEN_PREFIX..]).unwrap();
    assert_eq!(record.msg_number, 42);
    assert_eq!(record.timestamp, ts);
    assert_eq!(record.payload, b"Starting up");
    assert_eq!(record.offset, 100);
  }

  #[test]
  fn test_short_record_body_is_malformed() {
    let err = FormatVersion::V1.decode_record(7, &[0u8; 10]).unwrap_err();
    assert!(matches!(err, DecodeError::Malformed { offset: 7, .. }));
  }
}
