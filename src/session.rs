use std::path::Path;

use crate::config::ReaderOptions;
use crate::decoder::LogDecoder;
use crate::error::DecodeError;
use crate::record::{LogHeader, LogRecord};

/// The single open log file of a reader: its decoder plus a read cursor.
///
/// Dropping the session releases the file handle.
pub struct Session {
  decoder: LogDecoder,
  /// Offset of the frame `next_record` decodes.
  cursor: u64,
}

impl Session {
  pub fn open(path: &Path, options: &ReaderOptions) -> Result<Self, DecodeError> {
    let decoder = LogDecoder::open(path, options)?;
    let cursor = decoder.records_start();
    Ok(Self { decoder, cursor })
  }

  pub fn path(&self) -> &Path {
    self.decoder.path()
  }

  pub fn header(&self) -> &LogHeader {
    self.decoder.header()
  }

  /// First record of the file. Moves the cursor just past it.
  pub fn first_record(&mut self) -> Result<Option<LogRecord>, DecodeError> {
    let start = self.decoder.records_start();
    self.cursor = start;
    self.step()
  }

  /// Last record of the file. Moves the cursor to the end.
  pub fn last_record(&mut self) -> Result<Option<LogRecord>, DecodeError> {
    let last = self.decoder.last_record()?;
    self.cursor = match &last {
      Some(record) => match self.decoder.read_at(record.offset)? {
        Some((_, next)) => next,
        None => self.decoder.len(),
      },
      None => self.decoder.records_start(),
    };
    Ok(last)
  }

  /// Record at the cursor, or `None` once the file is exhausted.
  pub fn next_record(&mut self) -> Result<Option<LogRecord>, DecodeError> {
    self.step()
  }

  fn step(&mut self) -> Result<Option<LogRecord>, DecodeError> {
    match self.decoder.read_at(self.cursor)? {
      Some((record, next)) => {
        self.cursor = next;
        Ok(Some(record))
      }
      None => Ok(None),
    }
  }
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
      .field("path", &self.path())
      .field("cursor", &self.cursor)
      .finish()
  }
}
