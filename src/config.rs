use std::path::PathBuf;

/// Defines the strategy used for reading log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
  /// Seeks and reads through a `BufReader`. Memory use is bounded by
  /// `read_buffer_size`.
  StandardIo,

  /// Memory-maps the log file. Cheapest for repeated random reads.
  /// WARNING: a file truncated by its producer while mapped raises SIGBUS.
  Mmap,
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
  /// Root directory holding the rotating log files.
  pub log_directory: PathBuf,

  // --- Index cache ---
  /// When false the persisted index cache is bypassed entirely and the
  /// directory index is always rebuilt in memory.
  /// Default: true.
  pub cache_enabled: bool,

  /// Location of the cache artifact.
  /// Default: None (`<log_directory>/aalog-index.cache`).
  pub cache_path: Option<PathBuf>,

  // --- Discovery ---
  /// Extension (without the dot) of the files to index. Matched case-insensitively.
  /// Default: "aaLog".
  pub file_extension: String,

  // --- Reading ---
  pub read_strategy: ReadStrategy,

  /// Size of the buffer used for reading/scanning files.
  /// Default: 64 KB.
  pub read_buffer_size: usize,
}

impl Default for ReaderOptions {
  fn default() -> Self {
    Self {
      log_directory: PathBuf::from("./logs"),
      cache_enabled: true,
      cache_path: None,
      file_extension: "aaLog".to_string(),
      read_strategy: ReadStrategy::StandardIo,
      read_buffer_size: 64 * 1024, // 64 KB
    }
  }
}

impl ReaderOptions {
  pub const DEFAULT_CACHE_FILENAME: &'static str = "aalog-index.cache";

  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      log_directory: path.into(),
      ..Default::default()
    }
  }

  /// The cache artifact location these options resolve to.
  pub fn resolved_cache_path(&self) -> PathBuf {
    self
      .cache_path
      .clone()
      .unwrap_or_else(|| self.log_directory.join(Self::DEFAULT_CACHE_FILENAME))
  }
}
