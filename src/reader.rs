use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::cache::{CacheFingerprint, IndexCache};
use crate::config::ReaderOptions;
use crate::decoder::LogDecoder;
use crate::error::{CacheError, DecodeError, Error, OpenError, Result};
use crate::index::{DirectoryIndex, DirectoryIndexEntry};
use crate::iter::RecordsFrom;
use crate::record::{LogHeader, LogRecord};
use crate::resolver::{self, QueryKey, Resolution};
use crate::scanner::{DirectoryScanner, ExtensionScanner, ScannedFile};
use crate::session::Session;

/// An index together with the listing it was built from.
struct LoadedIndex {
  index: Arc<DirectoryIndex>,
  fingerprint: CacheFingerprint,
}

/// Reader over one directory of rotating log files.
///
/// Index lookups take `&self` and may run from several threads at once. The
/// open-file session is exclusive to the owner and needs `&mut self`.
pub struct LogReader {
  options: ReaderOptions,
  scanner: Box<dyn DirectoryScanner>,
  cache: Option<IndexCache>,
  index: RwLock<Option<Arc<LoadedIndex>>>,
  session: Option<Session>,
}

impl LogReader {
  pub fn new(options: ReaderOptions) -> Result<Self> {
    let scanner = ExtensionScanner::new(options.file_extension.clone());
    Self::with_scanner(options, scanner)
  }

  /// Uses a custom directory enumeration instead of the extension filter.
  pub fn with_scanner(options: ReaderOptions, scanner: impl DirectoryScanner + 'static) -> Result<Self> {
    if options.file_extension.is_empty() {
      return Err(Error::Config("file_extension must not be empty".into()));
    }
    if options.read_buffer_size == 0 {
      return Err(Error::Config("read_buffer_size must be greater than zero".into()));
    }

    let cache = options
      .cache_enabled
      .then(|| IndexCache::new(options.resolved_cache_path()));

    Ok(Self {
      options,
      scanner: Box::new(scanner),
      cache,
      index: RwLock::new(None),
      session: None,
    })
  }

  pub fn options(&self) -> &ReaderOptions {
    &self.options
  }

  // --- Session ---

  /// Opens a specific log file, closing any file already open. No indexing
  /// is involved.
  pub fn open(&mut self, path: impl AsRef<Path>) -> Result<&LogHeader> {
    let path = path.as_ref();
    self.close()?;

    if !path.is_file() {
      return Err(OpenError::NotFound(path.to_path_buf()).into());
    }

    let session = Session::open(path, &self.options).map_err(|e| Error::decode(path, e))?;
    Ok(self.session.insert(session).header())
  }

  /// Opens the file currently being written to: the indexed file reaching
  /// furthest in file time.
  pub fn open_current(&mut self) -> Result<&LogHeader> {
    self.close()?;

    let index = self.index()?;
    let current = index
      .current()
      .ok_or_else(|| OpenError::NotFound(self.options.log_directory.clone()))?;
    let path = current.header.log_file_path.clone();

    self.open(path)
  }

  /// Releases the open file. Closing an unopened reader succeeds and does
  /// nothing.
  pub fn close(&mut self) -> Result<()> {
    if let Some(session) = self.session.take() {
      tracing::debug!(target: "aalog_reader", "Closing {:?}", session.path());
    }
    Ok(())
  }

  pub fn is_open(&self) -> bool {
    self.session.is_some()
  }

  pub fn current_path(&self) -> Result<&Path> {
    Ok(self.session()?.path())
  }

  pub fn current_header(&self) -> Result<&LogHeader> {
    Ok(self.session()?.header())
  }

  pub fn first_record(&mut self) -> Result<Option<LogRecord>> {
    self.with_session(Session::first_record)
  }

  pub fn last_record(&mut self) -> Result<Option<LogRecord>> {
    self.with_session(Session::last_record)
  }

  /// The record after the one last returned, or `None` at end of file.
  pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
    self.with_session(Session::next_record)
  }

  fn session(&self) -> Result<&Session> {
    self.session.as_ref().ok_or_else(|| OpenError::NotOpen.into())
  }

  /// Runs a record read against the open file. A decode failure releases the
  /// file; the reader is then unopened.
  fn with_session<T>(&mut self, op: impl FnOnce(&mut Session) -> std::result::Result<T, DecodeError>) -> Result<T> {
    let session = self.session.as_mut().ok_or(OpenError::NotOpen)?;
    match op(session) {
      Ok(value) => Ok(value),
      Err(e) => {
        let path = session.path().to_path_buf();
        self.session = None;
        Err(Error::decode(path, e))
      }
    }
  }

  // --- Index ---

  /// The directory index, current as of this call.
  ///
  /// The in-memory index is reused while the directory listing is unchanged;
  /// otherwise the cache artifact is tried and, failing that, the index is
  /// rebuilt from the file headers and persisted.
  pub fn index(&self) -> Result<Arc<DirectoryIndex>> {
    let listing = self.scan()?;
    let fingerprint = CacheFingerprint::from_listing(&listing);

    if let Some(loaded) = self.index.read().as_ref() {
      if loaded.fingerprint == fingerprint {
        tracing::debug!(target: "aalog_reader", "Reusing in-memory index of {} files", loaded.index.len());
        return Ok(loaded.index.clone());
      }
    }

    let index = Arc::new(self.load_or_build(&listing, &fingerprint)?);
    self.install(index.clone(), fingerprint);
    Ok(index)
  }

  /// Rebuilds the index from the file headers, ignoring both the in-memory
  /// index and the cache artifact, and persists the result.
  pub fn refresh_index(&self) -> Result<Arc<DirectoryIndex>> {
    let listing = self.scan()?;
    let fingerprint = CacheFingerprint::from_listing(&listing);

    let index = Arc::new(self.rebuild(&listing, &fingerprint)?);
    self.install(index.clone(), fingerprint);
    Ok(index)
  }

  /// Read-only snapshot of every indexed header, in rotation order.
  pub fn header_index(&self) -> Result<Vec<LogHeader>> {
    Ok(self.index()?.headers())
  }

  fn install(&self, index: Arc<DirectoryIndex>, fingerprint: CacheFingerprint) {
    *self.index.write() = Some(Arc::new(LoadedIndex { index, fingerprint }));
  }

  fn scan(&self) -> Result<Vec<ScannedFile>> {
    let directory = &self.options.log_directory;
    if !directory.is_dir() {
      return Err(OpenError::NotFound(directory.clone()).into());
    }
    self.scanner.scan(directory)
  }

  fn load_or_build(&self, listing: &[ScannedFile], fingerprint: &CacheFingerprint) -> Result<DirectoryIndex> {
    if let Some(cache) = &self.cache {
      match cache.load(listing) {
        Ok(index) => {
          tracing::debug!(target: "aalog_reader", "Loaded index of {} files from {:?}", index.len(), cache.path());
          return Ok(index);
        }
        Err(e @ (CacheError::Absent(_) | CacheError::Stale)) => {
          tracing::debug!(target: "aalog_reader", "Index cache miss: {}", e);
        }
        Err(e) => {
          tracing::warn!(target: "aalog_reader", "Index cache unusable, rebuilding: {}", e);
        }
      }
    }

    self.rebuild(listing, fingerprint)
  }

  fn rebuild(&self, listing: &[ScannedFile], fingerprint: &CacheFingerprint) -> Result<DirectoryIndex> {
    let started = Instant::now();
    let index = build_index(listing, &self.options)?;
    tracing::info!(
      target: "aalog_reader",
      "Rebuilt index of {} files ({} listed) in {:?}",
      index.len(),
      listing.len(),
      started.elapsed()
    );

    if let Some(cache) = &self.cache {
      if let Err(e) = cache.store(&index, fingerprint) {
        tracing::warn!(target: "aalog_reader", "Failed to persist index cache: {}", e);
      }
    }

    Ok(index)
  }

  // --- Resolution ---

  /// Files whose range holds `key`. A key outside every indexed range gives
  /// `Resolution::OutOfRange`, not an error.
  pub fn resolve(&self, key: QueryKey) -> Result<Resolution> {
    let index = self.index()?;
    Ok(resolver::find_files_for(&index, key))
  }

  pub fn log_file_paths_for_file_time(&self, file_time: u64) -> Result<Vec<PathBuf>> {
    Ok(self.resolve(QueryKey::FileTime(file_time))?.into_paths())
  }

  pub fn log_file_paths_for_timestamp(&self, timestamp: DateTime<Utc>) -> Result<Vec<PathBuf>> {
    Ok(self.resolve(QueryKey::Timestamp(timestamp))?.into_paths())
  }

  pub fn log_file_paths_for_message_number(&self, msg_number: u64) -> Result<Vec<PathBuf>> {
    Ok(self.resolve(QueryKey::MessageNumber(msg_number))?.into_paths())
  }

  /// Records with message numbers from `msg_number` onwards, across files.
  pub fn records_from(&self, msg_number: u64) -> Result<RecordsFrom> {
    Ok(RecordsFrom::new(self.index()?, self.options.clone(), msg_number))
  }
}

impl std::fmt::Debug for LogReader {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LogReader")
      .field("options", &self.options)
      .field("session", &self.session)
      .finish_non_exhaustive()
  }
}

/// Decodes the header of every listed file into a fresh index.
///
/// Any decode failure aborts the build; only a file with no records yet is
/// left out.
pub fn build_index(listing: &[ScannedFile], options: &ReaderOptions) -> Result<DirectoryIndex> {
  let mut entries = Vec::with_capacity(listing.len());

  for file in listing {
    let header = match LogDecoder::open(&file.path, options) {
      Ok(decoder) => decoder.into_header(),
      Err(DecodeError::NoRecords) => {
        tracing::debug!(target: "aalog_reader", "Skipping {:?}: no records yet", file.path);
        continue;
      }
      Err(e) => return Err(Error::decode(&file.path, e)),
    };

    entries.push(DirectoryIndexEntry {
      header,
      file_size: file.stamp.size,
      file_mtime: file.stamp.modified,
    });
  }

  Ok(DirectoryIndex::build(entries)?)
}
