//! "Which file(s) hold this key?" against a [`DirectoryIndex`].
//!
//! One range search serves all three key spaces. Intervals are closed and
//! adjacent files may share boundary values, so every containing file is
//! returned, in rotation order.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::ResolverError;
use crate::index::{DirectoryIndex, FileTime, KeySpace, KeySpaceKind, MessageNumber, Timestamp};

/// A lookup key tagged with its key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKey {
  FileTime(u64),
  Timestamp(DateTime<Utc>),
  MessageNumber(u64),
}

impl QueryKey {
  pub fn kind(&self) -> KeySpaceKind {
    match self {
      QueryKey::FileTime(_) => KeySpaceKind::FileTime,
      QueryKey::Timestamp(_) => KeySpaceKind::Timestamp,
      QueryKey::MessageNumber(_) => KeySpaceKind::MessageNumber,
    }
  }
}

/// Outcome of a lookup. A miss is an ordinary value, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
  /// Owning files in rotation order; never empty.
  Found(Vec<PathBuf>),
  /// No file covers the key; carries the nearest files on either side.
  OutOfRange(ResolverError),
}

impl Resolution {
  /// Owning files; empty when the key is outside every indexed range.
  pub fn paths(&self) -> &[PathBuf] {
    match self {
      Resolution::Found(paths) => paths,
      Resolution::OutOfRange(_) => &[],
    }
  }

  pub fn into_paths(self) -> Vec<PathBuf> {
    match self {
      Resolution::Found(paths) => paths,
      Resolution::OutOfRange(_) => Vec::new(),
    }
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, Resolution::OutOfRange(_))
  }

  pub fn into_result(self) -> Result<Vec<PathBuf>, ResolverError> {
    match self {
      Resolution::Found(paths) => Ok(paths),
      Resolution::OutOfRange(e) => Err(e),
    }
  }
}

pub fn find_files_for(index: &DirectoryIndex, key: QueryKey) -> Resolution {
  match key {
    QueryKey::FileTime(k) => resolve::<FileTime>(index, k),
    QueryKey::Timestamp(k) => resolve::<Timestamp>(index, k),
    QueryKey::MessageNumber(k) => resolve::<MessageNumber>(index, k),
  }
}

pub fn resolve<K: KeySpace>(index: &DirectoryIndex, key: K::Key) -> Resolution {
  let positions = matching_positions::<K>(index, key);
  if positions.is_empty() {
    return Resolution::OutOfRange(out_of_range::<K>(index, key));
  }

  let entries = index.entries();
  Resolution::Found(
    positions
      .into_iter()
      .map(|i| entries[i].header.log_file_path.clone())
      .collect(),
  )
}

/// Positions (in rotation order) of every entry whose interval holds `key`.
pub fn matching_positions<K: KeySpace>(index: &DirectoryIndex, key: K::Key) -> Vec<usize> {
  let entries = index.entries();
  let projection = index.projection(K::KIND);

  let mut hits: Vec<usize> = if projection.is_ordered() {
    // Ends are non-decreasing along the projection, so the entries ending at
    // or after `key` form a suffix; walk it while starts are still <= key.
    let order = projection.order();
    let first = order.partition_point(|&i| K::end(&entries[i].header) < key);
    order[first..]
      .iter()
      .copied()
      .take_while(|&i| K::start(&entries[i].header) <= key)
      .filter(|&i| K::contains(&entries[i].header, key))
      .collect()
  } else {
    (0..entries.len())
      .filter(|&i| K::contains(&entries[i].header, key))
      .collect()
  };

  hits.sort_unstable();
  hits
}

fn out_of_range<K: KeySpace>(index: &DirectoryIndex, key: K::Key) -> ResolverError {
  let entries = index.entries();

  let below = entries
    .iter()
    .filter(|e| K::end(&e.header) < key)
    .max_by_key(|e| K::end(&e.header))
    .map(|e| e.header.log_file_path.clone());

  let above = entries
    .iter()
    .filter(|e| K::start(&e.header) > key)
    .min_by_key(|e| K::start(&e.header))
    .map(|e| e.header.log_file_path.clone());

  ResolverError::OutOfRange {
    key_space: K::NAME,
    key: format!("{:?}", key),
    below,
    above,
  }
}
