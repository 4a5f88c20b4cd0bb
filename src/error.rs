use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures while decoding a single log file.
#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("Truncated data at offset {offset}: needed {needed} bytes, only {available} available")]
  Truncated { offset: u64, needed: u64, available: u64 },

  #[error("Bad format marker: magic {magic:?}, version {version}")]
  BadMagic { magic: [u8; 4], version: u16 },

  #[error("CRC32 Checksum Mismatch: expected {expected:#x}, got {actual:#x} at offset {offset}")]
  ChecksumMismatch { expected: u32, actual: u32, offset: u64 },

  #[error("Malformed data at offset {offset}: {reason}")]
  Malformed { offset: u64, reason: String },

  #[error("Unsealed log file contains no records yet")]
  NoRecords,

  #[error("I/O Error: {0}")]
  Io(#[from] io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexError {
  #[error("Ambiguous ordering: {first:?} and {second:?} share start file time {file_time} and start message {msg_number}")]
  AmbiguousOrdering {
    first: PathBuf,
    second: PathBuf,
    file_time: u64,
    msg_number: u64,
  },
}

/// Reasons the persisted index cannot be used. Every variant except
/// `Unwritable` is a cache miss and leads to a rebuild.
#[derive(Error, Debug)]
pub enum CacheError {
  #[error("No cache artifact at {0}")]
  Absent(PathBuf),

  #[error("Cache artifact {path} is unreadable: {reason}")]
  Unreadable { path: PathBuf, reason: String },

  #[error("Cache format version mismatch: expected {expected}, found {found}")]
  VersionMismatch { expected: u16, found: u16 },

  #[error("Cache fingerprint does not match the directory listing")]
  Stale,

  #[error("Failed to write cache artifact {path}: {source}")]
  Unwritable {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl CacheError {
  /// True when the error only means "rebuild the index".
  pub fn is_miss(&self) -> bool {
    !matches!(self, CacheError::Unwritable { .. })
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
  #[error("Key {key} of {key_space} is outside the indexed range (below: {below:?}, above: {above:?})")]
  OutOfRange {
    key_space: &'static str,
    key: String,
    below: Option<PathBuf>,
    above: Option<PathBuf>,
  },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OpenError {
  #[error("Log file or directory not found: {0}")]
  NotFound(PathBuf),

  #[error("No log file is open")]
  NotOpen,
}

#[derive(Error, Debug)]
pub enum Error {
  #[error("I/O Error: {0}")]
  Io(#[from] io::Error),

  #[error("Failed to decode {path}: {source}")]
  Decode {
    path: PathBuf,
    #[source]
    source: DecodeError,
  },

  #[error("Index Error: {0}")]
  Index(#[from] IndexError),

  #[error("Cache Error: {0}")]
  Cache(#[from] CacheError),

  #[error("Resolver Error: {0}")]
  Resolver(#[from] ResolverError),

  #[error("Open Error: {0}")]
  Open(#[from] OpenError),

  #[error("Configuration Error: {0}")]
  Config(String),
}

impl Error {
  pub(crate) fn decode(path: impl Into<PathBuf>, source: DecodeError) -> Self {
    Error::Decode {
      path: path.into(),
      source,
    }
  }
}
