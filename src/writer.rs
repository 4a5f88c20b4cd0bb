use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::decoder;
use crate::error::{Error, Result};
use crate::format::{self, FLAG_SEALED, HeaderBlock};
use crate::record::LogHeader;
use crate::util;

/// Produces a log file in the current format version.
///
/// The header is written unsealed on `create`; its ranges are only final
/// once `finish` rewrites it. Until then readers derive the ranges from the
/// records, the same way they treat a file the platform is still writing.
pub struct LogFileWriter {
  path: PathBuf,
  file: BufWriter<File>,
  block: HeaderBlock,
  /// Offset the next frame will be written at.
  next_offset: u64,
}

impl LogFileWriter {
  pub fn create(path: impl AsRef<Path>, computer_name: impl Into<String>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(true)
      .open(&path)?;

    let block = HeaderBlock::unsealed(computer_name);
    let mut file = BufWriter::new(file);
    file.write_all(&block.encode()?)?;

    Ok(Self {
      path,
      next_offset: block.encoded_len() as u64,
      file,
      block,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn record_count(&self) -> u64 {
    self.block.record_count
  }

  /// Appends one record and returns the offset of its frame.
  /// Message numbers must not decrease within a file.
  pub fn append(&mut self, msg_number: u64, file_time: u64, timestamp: DateTime<Utc>, payload: &[u8]) -> Result<u64> {
    if self.block.record_count > 0 && msg_number < self.block.end_msg_number {
      return Err(Error::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
          "message number {} precedes last written message {}",
          msg_number, self.block.end_msg_number
        ),
      )));
    }

    let frame = format::encode_record(msg_number, file_time, timestamp, payload)?;
    self.file.write_all(&frame)?;

    let micros = util::datetime_to_micros(timestamp);
    if self.block.record_count == 0 {
      self.block.start_msg_number = msg_number;
      self.block.start_file_time = file_time;
      self.block.start_datetime_micros = micros;
    }
    self.block.end_msg_number = msg_number;
    self.block.end_file_time = file_time;
    self.block.end_datetime_micros = micros;
    self.block.record_count += 1;

    let offset = self.next_offset;
    self.block.last_record_offset = offset;
    self.next_offset += frame.len() as u64;
    Ok(offset)
  }

  /// Hands buffered frames to the OS so concurrent readers can see them.
  pub fn flush(&mut self) -> Result<()> {
    self.file.flush()?;
    Ok(())
  }

  /// Seals the file: rewrites the header with the final ranges and the
  /// offset of the last frame, then syncs to disk.
  pub fn finish(mut self) -> Result<LogHeader> {
    self.block.flags |= FLAG_SEALED;
    let encoded = self.block.encode()?;

    self.file.flush()?;
    let file = self.file.get_mut();
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&encoded)?;
    file.sync_all()?;

    decoder::header_from_block(&self.path, &self.block).map_err(|e| Error::decode(&self.path, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::decoder::decode_header;

  fn at(ticks: u64) -> DateTime<Utc> {
    util::filetime_to_datetime(ticks).unwrap()
  }

  #[test]
  fn test_finish_seals_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("w.aaLog");
    let base = util::FILETIME_UNIX_EPOCH_TICKS + 10_000_000;

    let mut writer = LogFileWriter::create(&path, "HOST").unwrap();
    let first = writer.append(1, base, at(base), b"a").unwrap();
    let second = writer.append(1, base + 5, at(base + 5), b"b").unwrap();
    assert_eq!(first, (format::PROLOGUE_SIZE + 4) as u64);
    assert!(second > first);
    assert_eq!(writer.record_count(), 2);

    let sealed = writer.finish().unwrap();
    assert!(sealed.sealed);
    assert_eq!(decode_header(&path).unwrap(), sealed);
    assert_eq!((sealed.start_msg_number, sealed.end_msg_number), (1, 1));
    assert_eq!(sealed.end_file_time, base + 5);
  }

  #[test]
  fn test_decreasing_message_number_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = util::FILETIME_UNIX_EPOCH_TICKS;
    let mut writer = LogFileWriter::create(dir.path().join("w.aaLog"), "HOST").unwrap();
    writer.append(10, base, at(base), b"").unwrap();

    let err = writer.append(9, base, at(base), b"").unwrap_err();
    assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::InvalidInput));
  }
}
