//! Decoded per-file header and per-message record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Summary of one log file, taken from its header block (or, for a file still
/// being written, from its first and last records).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogHeader {
  pub log_file_path: PathBuf,
  pub computer_name: String,
  pub start_msg_number: u64,
  pub end_msg_number: u64,
  /// 100 ns ticks since 1601-01-01 UTC.
  pub start_file_time: u64,
  pub end_file_time: u64,
  pub start_datetime: DateTime<Utc>,
  pub end_datetime: DateTime<Utc>,
  pub record_count: u64,
  /// The producer finished this file; the ranges above are authoritative.
  pub sealed: bool,
}

/// One decoded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogRecord {
  pub msg_number: u64,
  pub file_time: u64,
  pub timestamp: DateTime<Utc>,
  /// Vendor payload, kept opaque.
  pub payload: Vec<u8>,
  /// Byte offset of the record frame within its file.
  #[serde(skip)]
  pub offset: u64,
}

impl LogRecord {
  /// Lossy UTF-8 view of the payload, for diagnostics.
  pub fn payload_text(&self) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(&self.payload)
  }
}
