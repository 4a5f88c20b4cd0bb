use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use memmap2::Mmap;

use crate::config::{ReadStrategy, ReaderOptions};
use crate::error::DecodeError;
use crate::format::{self, FormatVersion, HeaderBlock, PROLOGUE_SIZE, RECORD_LEN_PREFIX};
use crate::record::{LogHeader, LogRecord};
use crate::util;

/// Backing bytes of an open log file.
enum Source {
  Io { reader: BufReader<File>, pos: u64 },
  Mmap(Mmap),
}

impl Source {
  fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    match self {
      Self::Io { reader, pos } => {
        let expected = std::mem::replace(pos, u64::MAX);
        if expected != offset {
          reader.seek(SeekFrom::Start(offset))?;
        }
        reader.read_exact(buf)?;
        *pos = offset + buf.len() as u64;
        Ok(())
      }
      Self::Mmap(mmap) => {
        let start = offset as usize;
        let end = start + buf.len();
        if end > mmap.len() {
          return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        buf.copy_from_slice(&mmap[start..end]);
        Ok(())
      }
    }
  }
}

/// Decoder for a single log file: the decoded header plus random and
/// sequential access to its records.
///
/// Holds exactly one read-only handle, released when the decoder is dropped.
/// The file length is captured at open; bytes appended later are not seen.
pub struct LogDecoder {
  path: PathBuf,
  source: Source,
  len: u64,
  version: FormatVersion,
  block: HeaderBlock,
  header: LogHeader,
}

impl LogDecoder {
  pub fn open(path: &Path, options: &ReaderOptions) -> Result<Self, DecodeError> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    if len < PROLOGUE_SIZE as u64 {
      return Err(DecodeError::Truncated {
        offset: 0,
        needed: PROLOGUE_SIZE as u64,
        available: len,
      });
    }

    let mut source = match options.read_strategy {
      // Safety: log files are append-only once written; a producer truncating
      // a mapped file is outside what this reader supports.
      ReadStrategy::Mmap => Source::Mmap(unsafe { Mmap::map(&file)? }),
      ReadStrategy::StandardIo => Source::Io {
        reader: BufReader::with_capacity(options.read_buffer_size, file),
        pos: 0,
      },
    };

    let mut prologue = [0u8; PROLOGUE_SIZE];
    source.read_exact_at(0, &mut prologue)?;
    let version = FormatVersion::detect(&prologue)?;
    let header_len = version.header_len(&prologue)?;
    if (header_len as u64) > len {
      return Err(DecodeError::Truncated {
        offset: 0,
        needed: header_len as u64,
        available: len,
      });
    }

    let mut raw = vec![0u8; header_len];
    source.read_exact_at(0, &mut raw)?;
    let block = version.decode_header(&raw)?;

    let mut decoder = Self {
      path: path.to_path_buf(),
      source,
      len,
      version,
      header: placeholder_header(path, &block),
      block,
    };
    decoder.header = decoder.resolve_header()?;
    Ok(decoder)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn header(&self) -> &LogHeader {
    &self.header
  }

  pub fn into_header(self) -> LogHeader {
    self.header
  }

  /// File length captured at open.
  pub fn len(&self) -> u64 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == self.records_start()
  }

  /// Offset of the first record frame.
  pub fn records_start(&self) -> u64 {
    self.block.encoded_len() as u64
  }

  /// Decodes the record frame starting at `offset`.
  ///
  /// Returns the record and the offset of the following frame, or `None` at a
  /// clean end of file. A frame whose declared length runs past the end of
  /// the file is `Truncated`, never silently dropped.
  pub fn read_at(&mut self, offset: u64) -> Result<Option<(LogRecord, u64)>, DecodeError> {
    if offset == self.len {
      return Ok(None);
    }

    let remaining = self.len.saturating_sub(offset);
    if remaining < RECORD_LEN_PREFIX as u64 {
      return Err(DecodeError::Truncated {
        offset,
        needed: RECORD_LEN_PREFIX as u64,
        available: remaining,
      });
    }

    let mut prefix = [0u8; RECORD_LEN_PREFIX];
    self.source.read_exact_at(offset, &mut prefix)?;
    let body_len = format::read_record_len(&prefix)? as u64;

    let frame_len = RECORD_LEN_PREFIX as u64 + body_len;
    if frame_len > remaining {
      return Err(DecodeError::Truncated {
        offset,
        needed: frame_len,
        available: remaining,
      });
    }

    let mut body = vec![0u8; body_len as usize];
    self.source.read_exact_at(offset + RECORD_LEN_PREFIX as u64, &mut body)?;
    let record = self.version.decode_record(offset, &body)?;
    Ok(Some((record, offset + frame_len)))
  }

  /// Forward-only stream over every record. Calling again restarts from the
  /// first record.
  pub fn records(&mut self) -> RecordStream<'_> {
    let start = self.records_start();
    self.records_from(start)
  }

  /// Stream starting at a known frame offset.
  pub fn records_from(&mut self, offset: u64) -> RecordStream<'_> {
    RecordStream {
      decoder: self,
      next_offset: offset,
      done: false,
    }
  }

  pub fn first_record(&mut self) -> Result<Option<LogRecord>, DecodeError> {
    let start = self.records_start();
    Ok(self.read_at(start)?.map(|(record, _)| record))
  }

  /// The terminal record. A sealed header carrying the last frame offset lets
  /// us decode forward from there instead of walking the whole file.
  pub fn last_record(&mut self) -> Result<Option<LogRecord>, DecodeError> {
    let start = match self.block.last_record_offset {
      offset if self.block.is_sealed() && offset >= self.records_start() && offset < self.len => offset,
      _ => self.records_start(),
    };

    let mut last = None;
    for record in self.records_from(start) {
      last = Some(record?);
    }
    Ok(last)
  }

  fn resolve_header(&mut self) -> Result<LogHeader, DecodeError> {
    if self.block.is_sealed() {
      if self.block.record_count == 0 {
        return Err(DecodeError::NoRecords);
      }
      return header_from_block(&self.path, &self.block);
    }

    // Still being written: derive the ranges from the records themselves. A
    // frame cut short at the end is one the producer has not finished yet.
    let path = self.path.clone();
    let mut first: Option<LogRecord> = None;
    let mut last: Option<LogRecord> = None;
    let mut count = 0u64;
    for record in self.records() {
      let record = match record {
        Ok(record) => record,
        Err(DecodeError::Truncated { offset, .. }) => {
          tracing::debug!(target: "aalog_reader", "Ignoring partial frame at {} in active file {:?}", offset, path);
          break;
        }
        Err(e) => return Err(e),
      };
      count += 1;
      if first.is_none() {
        first = Some(record);
      } else {
        last = Some(record);
      }
    }

    let first = first.ok_or(DecodeError::NoRecords)?;
    let last = last.unwrap_or_else(|| first.clone());
    Ok(LogHeader {
      log_file_path: self.path.clone(),
      computer_name: self.block.computer_name.clone(),
      start_msg_number: first.msg_number,
      end_msg_number: last.msg_number,
      start_file_time: first.file_time,
      end_file_time: last.file_time,
      start_datetime: first.timestamp,
      end_datetime: last.timestamp,
      record_count: count,
      sealed: false,
    })
  }
}

/// Lazily decoded records of one file.
///
/// Yields `Err` once for a corrupt or truncated tail and then stops.
pub struct RecordStream<'a> {
  decoder: &'a mut LogDecoder,
  next_offset: u64,
  done: bool,
}

impl RecordStream<'_> {
  /// Offset of the frame the next call to `next` will decode.
  pub fn position(&self) -> u64 {
    self.next_offset
  }
}

impl Iterator for RecordStream<'_> {
  type Item = Result<LogRecord, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }

    match self.decoder.read_at(self.next_offset) {
      Ok(Some((record, next))) => {
        self.next_offset = next;
        Some(Ok(record))
      }
      Ok(None) => {
        self.done = true;
        None
      }
      Err(e) => {
        self.done = true;
        Some(Err(e))
      }
    }
  }
}

/// Decodes only the header of the file at `path` with default read options.
pub fn decode_header(path: &Path) -> Result<LogHeader, DecodeError> {
  decode_header_with(path, &ReaderOptions::default())
}

pub fn decode_header_with(path: &Path, options: &ReaderOptions) -> Result<LogHeader, DecodeError> {
  Ok(LogDecoder::open(path, options)?.into_header())
}

pub(crate) fn header_from_block(path: &Path, block: &HeaderBlock) -> Result<LogHeader, DecodeError> {
  let datetime = |micros: i64, offset: u64| {
    util::micros_to_datetime(micros).ok_or_else(|| DecodeError::Malformed {
      offset,
      reason: format!("header datetime {} µs is out of range", micros),
    })
  };

  Ok(LogHeader {
    log_file_path: path.to_path_buf(),
    computer_name: block.computer_name.clone(),
    start_msg_number: block.start_msg_number,
    end_msg_number: block.end_msg_number,
    start_file_time: block.start_file_time,
    end_file_time: block.end_file_time,
    start_datetime: datetime(block.start_datetime_micros, 48)?,
    end_datetime: datetime(block.end_datetime_micros, 56)?,
    record_count: block.record_count,
    sealed: true,
  })
}

fn placeholder_header(path: &Path, block: &HeaderBlock) -> LogHeader {
  LogHeader {
    log_file_path: path.to_path_buf(),
    computer_name: block.computer_name.clone(),
    start_msg_number: 0,
    end_msg_number: 0,
    start_file_time: 0,
    end_file_time: 0,
    start_datetime: DateTime::<Utc>::UNIX_EPOCH,
    end_datetime: DateTime::<Utc>::UNIX_EPOCH,
    record_count: 0,
    sealed: false,
  }
}
