#![allow(dead_code)]

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use aalog_reader::{LogFileWriter, LogReader, ReaderOptions, filetime_to_datetime};
use chrono::{DateTime, Utc};
use tempfile::TempDir;

/// File time of message 0 (late 2022).
pub const BASE_FILE_TIME: u64 = 133_100_000_000_000_000;

/// One second between consecutive messages.
pub const TICKS_PER_MESSAGE: u64 = 10_000_000;

pub const COMPUTER_NAME: &str = "TESTHOST";

/// Message `n` is stamped at `file_time_of(n)` in every test corpus, so the
/// three key spaces move in lockstep and share boundaries.
pub fn file_time_of(msg_number: u64) -> u64 {
  BASE_FILE_TIME + msg_number * TICKS_PER_MESSAGE
}

pub fn timestamp_of(msg_number: u64) -> DateTime<Utc> {
  filetime_to_datetime(file_time_of(msg_number)).unwrap()
}

pub fn payload_of(msg_number: u64) -> Vec<u8> {
  format!("message {}", msg_number).into_bytes()
}

pub struct TestEnv {
  // The TempDir guard must be kept alive to prevent premature deletion of the directory.
  pub _dir: TempDir,
  pub root: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    Self { _dir: dir, root }
  }

  pub fn options(&self) -> ReaderOptions {
    ReaderOptions::new(&self.root)
  }

  pub fn reader(&self) -> LogReader {
    LogReader::new(self.options()).unwrap()
  }

  pub fn reader_with(&self, configure: impl FnOnce(&mut ReaderOptions)) -> LogReader {
    let mut options = self.options();
    configure(&mut options);
    LogReader::new(options).unwrap()
  }

  pub fn path(&self, name: &str) -> PathBuf {
    self.root.join(name)
  }

  /// Writes a sealed file holding every message in `msgs`.
  pub fn write_log(&self, name: &str, msgs: RangeInclusive<u64>) -> PathBuf {
    let mut writer = self.start_log(name, msgs);
    let path = writer.path().to_path_buf();
    writer.flush().unwrap();
    writer.finish().unwrap();
    path
  }

  /// Writes a file the producer has not sealed yet.
  pub fn write_unsealed(&self, name: &str, msgs: RangeInclusive<u64>) -> PathBuf {
    let mut writer = self.start_log(name, msgs);
    writer.flush().unwrap();
    writer.path().to_path_buf()
  }

  /// Writes one sealed file per `(start, end)` range, named in rotation order.
  pub fn write_rotation(&self, ranges: &[(u64, u64)]) -> Vec<PathBuf> {
    ranges
      .iter()
      .enumerate()
      .map(|(i, &(start, end))| self.write_log(&format!("log_{:04}.aaLog", i), start..=end))
      .collect()
  }

  fn start_log(&self, name: &str, msgs: RangeInclusive<u64>) -> LogFileWriter {
    let mut writer = LogFileWriter::create(self.path(name), COMPUTER_NAME).unwrap();
    for n in msgs {
      writer.append(n, file_time_of(n), timestamp_of(n), &payload_of(n)).unwrap();
    }
    writer
  }
}

pub fn file_names(paths: &[PathBuf]) -> Vec<String> {
  paths.iter().map(|p| file_name(p)).collect()
}

pub fn file_name(path: &Path) -> String {
  path.file_name().unwrap().to_string_lossy().to_string()
}
