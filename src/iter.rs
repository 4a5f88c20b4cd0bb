use std::sync::Arc;

use crate::config::ReaderOptions;
use crate::decoder::LogDecoder;
use crate::error::{DecodeError, Error, Result};
use crate::index::{DirectoryIndex, MessageNumber};
use crate::record::LogRecord;
use crate::resolver;

/// Sequential records starting at a message number, crossing file boundaries
/// in rotation order.
///
/// Works on the index snapshot taken when it was created; files rotated in
/// afterwards are not visited.
pub struct RecordsFrom {
  index: Arc<DirectoryIndex>,
  options: ReaderOptions,
  /// Smallest message number to yield.
  start: u64,
  /// Index position of the next file to open.
  next_file: usize,
  current: Option<(LogDecoder, u64)>,
  /// Last message number yielded from the previous file.
  carried_over: Option<u64>,
  last_yielded: Option<u64>,
  done: bool,
}

impl RecordsFrom {
  pub(crate) fn new(index: Arc<DirectoryIndex>, options: ReaderOptions, start: u64) -> Self {
    // Begin at the first file holding `start`, or failing that the first file
    // entirely after it.
    let next_file = resolver::matching_positions::<MessageNumber>(&index, start)
      .first()
      .copied()
      .or_else(|| {
        index
          .entries()
          .iter()
          .position(|e| e.header.start_msg_number > start)
      })
      .unwrap_or(index.len());

    Self {
      index,
      options,
      start,
      next_file,
      current: None,
      carried_over: None,
      last_yielded: None,
      done: false,
    }
  }

  /// Opens the next indexed file. Returns false when none is left.
  fn advance_file(&mut self) -> Result<bool> {
    while self.next_file < self.index.len() {
      let path = self.index.entries()[self.next_file].header.log_file_path.clone();
      self.next_file += 1;

      match LogDecoder::open(&path, &self.options) {
        Ok(decoder) => {
          let offset = decoder.records_start();
          self.carried_over = self.last_yielded;
          self.current = Some((decoder, offset));
          return Ok(true);
        }
        Err(DecodeError::NoRecords) => {
          tracing::debug!(target: "aalog_reader", "Skipping {:?} while iterating: no records", path);
          continue;
        }
        Err(e) => return Err(Error::decode(path, e)),
      }
    }
    Ok(false)
  }
}

impl Iterator for RecordsFrom {
  type Item = Result<LogRecord>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if self.done {
        return None;
      }

      if self.current.is_none() {
        match self.advance_file() {
          Ok(true) => {}
          Ok(false) => {
            self.done = true;
            return None;
          }
          Err(e) => {
            self.done = true;
            return Some(Err(e));
          }
        }
      }

      let Some((decoder, offset)) = self.current.as_mut() else {
        continue;
      };

      match decoder.read_at(*offset) {
        Ok(Some((record, next))) => {
          *offset = next;

          if record.msg_number < self.start {
            continue;
          }
          // Adjacent files may repeat the boundary message.
          if self.carried_over.is_some_and(|c| record.msg_number <= c) {
            continue;
          }

          self.last_yielded = Some(record.msg_number);
          return Some(Ok(record));
        }
        Ok(None) => {
          self.current = None;
        }
        Err(e) => {
          let path = decoder.path().to_path_buf();
          self.done = true;
          self.current = None;
          return Some(Err(Error::decode(path, e)));
        }
      }
    }
  }
}
