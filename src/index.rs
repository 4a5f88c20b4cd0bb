//! Directory-wide index over the headers of every log file.
//!
//! Entries are held in rotation order (`start_file_time`, then
//! `start_msg_number`). Each key space additionally gets a [`Projection`]: the
//! entry positions sorted by that key space's interval start, plus a flag
//! recording whether interval ends are non-decreasing in that order. The
//! resolver binary searches ordered projections and scans unordered ones.

use std::fmt::Debug;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::error::IndexError;
use crate::record::LogHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySpaceKind {
  FileTime,
  Timestamp,
  MessageNumber,
}

/// Key extraction for one of the three ordering keys of a log file.
pub trait KeySpace {
  type Key: Ord + Copy + Debug;

  const KIND: KeySpaceKind;
  const NAME: &'static str;

  fn start(header: &LogHeader) -> Self::Key;
  fn end(header: &LogHeader) -> Self::Key;

  fn contains(header: &LogHeader, key: Self::Key) -> bool {
    Self::start(header) <= key && key <= Self::end(header)
  }
}

/// 100 ns file-time ticks.
pub enum FileTime {}

/// Wall-clock timestamps.
pub enum Timestamp {}

/// Monotonic message sequence numbers.
pub enum MessageNumber {}

impl KeySpace for FileTime {
  type Key = u64;
  const KIND: KeySpaceKind = KeySpaceKind::FileTime;
  const NAME: &'static str = "file time";

  fn start(header: &LogHeader) -> u64 {
    header.start_file_time
  }

  fn end(header: &LogHeader) -> u64 {
    header.end_file_time
  }
}

impl KeySpace for Timestamp {
  type Key = DateTime<Utc>;
  const KIND: KeySpaceKind = KeySpaceKind::Timestamp;
  const NAME: &'static str = "timestamp";

  fn start(header: &LogHeader) -> DateTime<Utc> {
    header.start_datetime
  }

  fn end(header: &LogHeader) -> DateTime<Utc> {
    header.end_datetime
  }
}

impl KeySpace for MessageNumber {
  type Key = u64;
  const KIND: KeySpaceKind = KeySpaceKind::MessageNumber;
  const NAME: &'static str = "message number";

  fn start(header: &LogHeader) -> u64 {
    header.start_msg_number
  }

  fn end(header: &LogHeader) -> u64 {
    header.end_msg_number
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryIndexEntry {
  pub header: LogHeader,
  pub file_size: u64,
  pub file_mtime: SystemTime,
}

/// Entry positions sorted by one key space's interval start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
  order: Vec<usize>,
  ordered: bool,
}

impl Projection {
  fn build<K: KeySpace>(entries: &[DirectoryIndexEntry]) -> Self {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| (K::start(&entries[i].header), i));

    let well_formed = entries.iter().all(|e| K::start(&e.header) <= K::end(&e.header));
    let ends_monotonic = order
      .windows(2)
      .all(|w| K::end(&entries[w[0]].header) <= K::end(&entries[w[1]].header));

    Self {
      order,
      ordered: well_formed && ends_monotonic,
    }
  }

  /// Entry positions, ascending by interval start.
  pub fn order(&self) -> &[usize] {
    &self.order
  }

  /// False when interval ends go backwards (e.g. a clock reset), in which
  /// case only a linear scan answers queries correctly.
  pub fn is_ordered(&self) -> bool {
    self.ordered
  }
}

/// Immutable, ordered view of every indexed log file in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryIndex {
  entries: Vec<DirectoryIndexEntry>,
  by_file_time: Projection,
  by_timestamp: Projection,
  by_msg_number: Projection,
}

impl DirectoryIndex {
  /// Orders `entries` by rotation and builds the per-key-space projections.
  ///
  /// Two files sharing both start file time and start message number cannot
  /// be ordered and are reported rather than silently resolved.
  pub fn build(mut entries: Vec<DirectoryIndexEntry>) -> Result<Self, IndexError> {
    entries.sort_by(|a, b| {
      (a.header.start_file_time, a.header.start_msg_number).cmp(&(b.header.start_file_time, b.header.start_msg_number))
    });

    if let Some(pair) = entries.windows(2).find(|w| {
      w[0].header.start_file_time == w[1].header.start_file_time
        && w[0].header.start_msg_number == w[1].header.start_msg_number
    }) {
      return Err(IndexError::AmbiguousOrdering {
        first: pair[0].header.log_file_path.clone(),
        second: pair[1].header.log_file_path.clone(),
        file_time: pair[0].header.start_file_time,
        msg_number: pair[0].header.start_msg_number,
      });
    }

    let index = Self {
      by_file_time: Projection::build::<FileTime>(&entries),
      by_timestamp: Projection::build::<Timestamp>(&entries),
      by_msg_number: Projection::build::<MessageNumber>(&entries),
      entries,
    };

    for kind in [KeySpaceKind::FileTime, KeySpaceKind::Timestamp, KeySpaceKind::MessageNumber] {
      if !index.projection(kind).is_ordered() {
        tracing::debug!(target: "aalog_reader", "{:?} ranges are not monotonic across files; lookups will scan", kind);
      }
    }

    Ok(index)
  }

  pub fn empty() -> Self {
    Self {
      entries: Vec::new(),
      by_file_time: Projection::build::<FileTime>(&[]),
      by_timestamp: Projection::build::<Timestamp>(&[]),
      by_msg_number: Projection::build::<MessageNumber>(&[]),
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn entries(&self) -> &[DirectoryIndexEntry] {
    &self.entries
  }

  /// Read-only snapshot of every header, in rotation order.
  pub fn headers(&self) -> Vec<LogHeader> {
    self.entries.iter().map(|e| e.header.clone()).collect()
  }

  pub fn projection(&self, kind: KeySpaceKind) -> &Projection {
    match kind {
      KeySpaceKind::FileTime => &self.by_file_time,
      KeySpaceKind::Timestamp => &self.by_timestamp,
      KeySpaceKind::MessageNumber => &self.by_msg_number,
    }
  }

  /// The file currently being written to: the one reaching furthest in file
  /// time (the later file in rotation order on a tie).
  pub fn current(&self) -> Option<&DirectoryIndexEntry> {
    self.entries.iter().max_by_key(|e| e.header.end_file_time)
  }
}
