//! Persisted directory index.
//!
//! The artifact carries the fingerprint of the listing it was built from and
//! is only reused when that fingerprint matches the live listing exactly.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ MAGIC          │ 4 bytes  │ "ALIX"                          │
//! │ VERSION        │ 2 bytes  │ Artifact format version (u16)   │
//! │ CRC32          │ 4 bytes  │ Checksum of BODY                │
//! │ BODY_LEN       │ 8 bytes  │ Length of BODY (u64 LE)         │
//! │ BODY           │ N bytes  │ Fingerprint, then entries       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tempfile::NamedTempFile;

use crate::error::CacheError;
use crate::format::checksum;
use crate::index::{DirectoryIndex, DirectoryIndexEntry};
use crate::record::LogHeader;
use crate::scanner::{FileStamp, ScannedFile};
use crate::util;

/// `(size, mtime)` of exactly the files a listing contained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheFingerprint {
  files: BTreeMap<PathBuf, FileStamp>,
}

impl CacheFingerprint {
  pub fn from_listing(listing: &[ScannedFile]) -> Self {
    Self {
      files: listing.iter().map(|f| (f.path.clone(), f.stamp)).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

/// Reads and writes the index artifact at one location.
#[derive(Debug, Clone)]
pub struct IndexCache {
  path: PathBuf,
}

impl IndexCache {
  pub const MAGIC: [u8; 4] = *b"ALIX";
  pub const VERSION: u16 = 1;

  const PREAMBLE_SIZE: usize = 4 + 2 + 4 + 8;

  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Returns the persisted index if it was built from exactly `listing`.
  /// Every error is a cache miss.
  pub fn load(&self, listing: &[ScannedFile]) -> Result<DirectoryIndex, CacheError> {
    let bytes = match fs::read(&self.path) {
      Ok(b) => b,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CacheError::Absent(self.path.clone())),
      Err(e) => return Err(self.unreadable(e)),
    };

    let (stored, entries) = self.decode(&bytes)?;
    if stored != CacheFingerprint::from_listing(listing) {
      return Err(CacheError::Stale);
    }

    DirectoryIndex::build(entries).map_err(|e| self.unreadable(e))
  }

  /// Persists `index` with the fingerprint of the listing it was built from.
  ///
  /// Every call writes its own temporary sibling and renames it into place,
  /// so a concurrent `load` sees either the previous artifact or this one.
  pub fn store(&self, index: &DirectoryIndex, fingerprint: &CacheFingerprint) -> Result<(), CacheError> {
    let unwritable = |source: io::Error| CacheError::Unwritable {
      path: self.path.clone(),
      source,
    };

    let body = encode_body(index, fingerprint).map_err(unwritable)?;
    let parent = match self.path.parent() {
      Some(p) if !p.as_os_str().is_empty() => p,
      _ => Path::new("."),
    };

    // The temp file is removed on every early return.
    let result = (|| -> io::Result<()> {
      let mut writer = BufWriter::new(NamedTempFile::new_in(parent)?);
      writer.write_all(&Self::MAGIC)?;
      writer.write_u16::<LittleEndian>(Self::VERSION)?;
      writer.write_u32::<LittleEndian>(checksum(&body))?;
      writer.write_u64::<LittleEndian>(body.len() as u64)?;
      writer.write_all(&body)?;

      let temp = writer.into_inner().map_err(|e| e.into_error())?;
      temp.as_file().sync_all()?;
      temp.persist(&self.path).map_err(|e| e.error)?;

      // fsync the parent directory so the rename itself is durable
      File::open(parent)?.sync_all()?;
      Ok(())
    })();

    result.map_err(unwritable)
  }

  fn decode(&self, bytes: &[u8]) -> Result<(CacheFingerprint, Vec<DirectoryIndexEntry>), CacheError> {
    if bytes.len() < Self::PREAMBLE_SIZE {
      return Err(self.unreadable(format!("artifact is only {} bytes", bytes.len())));
    }

    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).map_err(|e| self.unreadable(e))?;
    if magic != Self::MAGIC {
      return Err(self.unreadable(format!("invalid magic {:?}", magic)));
    }

    let version = cursor.read_u16::<LittleEndian>().map_err(|e| self.unreadable(e))?;
    if version != Self::VERSION {
      return Err(CacheError::VersionMismatch {
        expected: Self::VERSION,
        found: version,
      });
    }

    let stored_crc = cursor.read_u32::<LittleEndian>().map_err(|e| self.unreadable(e))?;
    let body_len = cursor.read_u64::<LittleEndian>().map_err(|e| self.unreadable(e))?;
    let body = &bytes[Self::PREAMBLE_SIZE..];
    if body.len() as u64 != body_len {
      return Err(self.unreadable(format!("body is {} bytes, preamble declares {}", body.len(), body_len)));
    }

    let actual_crc = checksum(body);
    if actual_crc != stored_crc {
      return Err(self.unreadable(format!(
        "checksum mismatch: expected {:#x}, got {:#x}",
        stored_crc, actual_crc
      )));
    }

    decode_body(body).map_err(|e| self.unreadable(e))
  }

  fn unreadable(&self, reason: impl ToString) -> CacheError {
    CacheError::Unreadable {
      path: self.path.clone(),
      reason: reason.to_string(),
    }
  }
}

fn encode_body(index: &DirectoryIndex, fingerprint: &CacheFingerprint) -> io::Result<Vec<u8>> {
  let mut buf = Vec::new();

  buf.write_u32::<LittleEndian>(fingerprint.files.len() as u32)?;
  for (path, stamp) in &fingerprint.files {
    write_path(&mut buf, path)?;
    write_stamp(&mut buf, stamp)?;
  }

  buf.write_u32::<LittleEndian>(index.len() as u32)?;
  for entry in index.entries() {
    let h = &entry.header;
    write_path(&mut buf, &h.log_file_path)?;
    write_str(&mut buf, &h.computer_name)?;
    buf.write_u64::<LittleEndian>(h.start_msg_number)?;
    buf.write_u64::<LittleEndian>(h.end_msg_number)?;
    buf.write_u64::<LittleEndian>(h.start_file_time)?;
    buf.write_u64::<LittleEndian>(h.end_file_time)?;
    buf.write_i64::<LittleEndian>(util::datetime_to_micros(h.start_datetime))?;
    buf.write_i64::<LittleEndian>(util::datetime_to_micros(h.end_datetime))?;
    buf.write_u64::<LittleEndian>(h.record_count)?;
    buf.write_u8(h.sealed as u8)?;
    write_stamp(
      &mut buf,
      &FileStamp {
        size: entry.file_size,
        modified: entry.file_mtime,
      },
    )?;
  }

  Ok(buf)
}

fn decode_body(body: &[u8]) -> io::Result<(CacheFingerprint, Vec<DirectoryIndexEntry>)> {
  let mut cursor = Cursor::new(body);

  let file_count = cursor.read_u32::<LittleEndian>()?;
  let mut files = BTreeMap::new();
  for _ in 0..file_count {
    let path = read_path(&mut cursor)?;
    let stamp = read_stamp(&mut cursor)?;
    files.insert(path, stamp);
  }

  let entry_count = cursor.read_u32::<LittleEndian>()?;
  let mut entries = Vec::with_capacity(entry_count.min(4096) as usize);
  for _ in 0..entry_count {
    let log_file_path = read_path(&mut cursor)?;
    let computer_name = read_str(&mut cursor)?;
    let start_msg_number = cursor.read_u64::<LittleEndian>()?;
    let end_msg_number = cursor.read_u64::<LittleEndian>()?;
    let start_file_time = cursor.read_u64::<LittleEndian>()?;
    let end_file_time = cursor.read_u64::<LittleEndian>()?;
    let start_datetime = read_datetime(&mut cursor)?;
    let end_datetime = read_datetime(&mut cursor)?;
    let record_count = cursor.read_u64::<LittleEndian>()?;
    let sealed = cursor.read_u8()? != 0;
    let stamp = read_stamp(&mut cursor)?;

    entries.push(DirectoryIndexEntry {
      header: LogHeader {
        log_file_path,
        computer_name,
        start_msg_number,
        end_msg_number,
        start_file_time,
        end_file_time,
        start_datetime,
        end_datetime,
        record_count,
        sealed,
      },
      file_size: stamp.size,
      file_mtime: stamp.modified,
    });
  }

  if cursor.position() != body.len() as u64 {
    return Err(io::Error::new(io::ErrorKind::InvalidData, "trailing bytes after index entries"));
  }

  Ok((CacheFingerprint { files }, entries))
}

fn write_str(buf: &mut Vec<u8>, s: &str) -> io::Result<()> {
  buf.write_u32::<LittleEndian>(s.len() as u32)?;
  buf.write_all(s.as_bytes())
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> io::Result<String> {
  let len = cursor.read_u32::<LittleEndian>()? as u64;
  let remaining = cursor.get_ref().len() as u64 - cursor.position();
  if len > remaining {
    return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
  }
  let mut bytes = vec![0u8; len as usize];
  cursor.read_exact(&mut bytes)?;
  String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_path(buf: &mut Vec<u8>, path: &Path) -> io::Result<()> {
  let s = path
    .to_str()
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("non UTF-8 path: {}", path.display())))?;
  write_str(buf, s)
}

fn read_path(cursor: &mut Cursor<&[u8]>) -> io::Result<PathBuf> {
  read_str(cursor).map(PathBuf::from)
}

fn write_stamp(buf: &mut Vec<u8>, stamp: &FileStamp) -> io::Result<()> {
  buf.write_u64::<LittleEndian>(stamp.size)?;
  buf.write_i128::<LittleEndian>(util::system_time_to_nanos(stamp.modified))
}

fn read_stamp(cursor: &mut Cursor<&[u8]>) -> io::Result<FileStamp> {
  let size = cursor.read_u64::<LittleEndian>()?;
  let nanos = cursor.read_i128::<LittleEndian>()?;
  Ok(FileStamp {
    size,
    modified: util::nanos_to_system_time(nanos),
  })
}

fn read_datetime(cursor: &mut Cursor<&[u8]>) -> io::Result<chrono::DateTime<chrono::Utc>> {
  let micros = cursor.read_i64::<LittleEndian>()?;
  util::micros_to_datetime(micros)
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("datetime {} µs out of range", micros)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::index::tests::entry;
  use std::time::{Duration, UNIX_EPOCH};

  fn listing(index: &DirectoryIndex) -> Vec<ScannedFile> {
    index
      .entries()
      .iter()
      .map(|e| ScannedFile {
        path: e.header.log_file_path.clone(),
        stamp: FileStamp {
          size: e.file_size,
          modified: e.file_mtime,
        },
      })
      .collect()
  }

  fn sample_index() -> DirectoryIndex {
    DirectoryIndex::build(vec![entry("f1", 1, 100), entry("f2", 100, 250), entry("f3", 250, 400)]).unwrap()
  }

  #[test]
  fn test_store_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let cache = IndexCache::new(dir.path().join("index.cache"));
    let index = sample_index();
    let files = listing(&index);

    cache.store(&index, &CacheFingerprint::from_listing(&files)).unwrap();
    assert_eq!(cache.load(&files).unwrap(), index);

    // No temp files left behind.
    let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(leftovers.len(), 1);
  }

  #[test]
  fn test_absent_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let cache = IndexCache::new(dir.path().join("index.cache"));
    let err = cache.load(&[]).unwrap_err();
    assert!(matches!(err, CacheError::Absent(_)));
    assert!(err.is_miss());
  }

  #[test]
  fn test_any_listing_change_is_stale() {
    let dir = tempfile::tempdir().unwrap();
    let cache = IndexCache::new(dir.path().join("index.cache"));
    let index = sample_index();
    let files = listing(&index);
    cache.store(&index, &CacheFingerprint::from_listing(&files)).unwrap();

    let mut touched = files.clone();
    touched[1].stamp.modified = UNIX_EPOCH + Duration::from_nanos(1);
    assert!(matches!(cache.load(&touched), Err(CacheError::Stale)));

    let mut resized = files.clone();
    resized[2].stamp.size += 1;
    assert!(matches!(cache.load(&resized), Err(CacheError::Stale)));

    let removed = files[..2].to_vec();
    assert!(matches!(cache.load(&removed), Err(CacheError::Stale)));

    let mut added = files.clone();
    added.push(ScannedFile {
      path: PathBuf::from("f4"),
      stamp: files[0].stamp,
    });
    assert!(matches!(cache.load(&added), Err(CacheError::Stale)));
  }

  #[test]
  fn test_version_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let cache = IndexCache::new(dir.path().join("index.cache"));
    let index = sample_index();
    let files = listing(&index);
    cache.store(&index, &CacheFingerprint::from_listing(&files)).unwrap();

    let mut bytes = fs::read(cache.path()).unwrap();
    bytes[4..6].copy_from_slice(&2u16.to_le_bytes());
    fs::write(cache.path(), &bytes).unwrap();

    match cache.load(&files) {
      Err(CacheError::VersionMismatch { expected, found }) => {
        assert_eq!(expected, IndexCache::VERSION);
        assert_eq!(found, 2);
      }
      other => panic!("expected VersionMismatch, got {:?}", other),
    }
  }

  #[test]
  fn test_corrupt_body_is_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let cache = IndexCache::new(dir.path().join("index.cache"));
    let index = sample_index();
    let files = listing(&index);
    cache.store(&index, &CacheFingerprint::from_listing(&files)).unwrap();

    let mut bytes = fs::read(cache.path()).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(cache.path(), &bytes).unwrap();
    assert!(matches!(cache.load(&files), Err(CacheError::Unreadable { .. })));

    fs::write(cache.path(), b"ALIX").unwrap();
    assert!(matches!(cache.load(&files), Err(CacheError::Unreadable { .. })));
  }

  #[test]
  fn test_store_into_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let cache = IndexCache::new(dir.path().join("missing").join("index.cache"));
    let err = cache.store(&sample_index(), &CacheFingerprint::default()).unwrap_err();
    assert!(matches!(err, CacheError::Unwritable { .. }));
    assert!(!err.is_miss());
  }
}
