//! Directory enumeration seam.
//!
//! The index never walks directories itself; it consumes the listing a
//! `DirectoryScanner` produces. `ExtensionScanner` is the stock adapter.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;
use crate::util;

/// Size and modification time of a file at listing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStamp {
  pub size: u64,
  pub modified: SystemTime,
}

impl FileStamp {
  pub fn of(path: &Path) -> std::io::Result<Self> {
    let metadata = fs::metadata(path)?;
    Ok(Self {
      size: metadata.len(),
      modified: metadata.modified()?,
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
  pub path: PathBuf,
  pub stamp: FileStamp,
}

/// Supplies the candidate log files of a directory, in rotation order when
/// the naming allows it (the index re-sorts by header content regardless).
pub trait DirectoryScanner: Send + Sync {
  fn scan(&self, directory: &Path) -> Result<Vec<ScannedFile>>;
}

/// Lists regular files with a given extension, sorted by path.
#[derive(Debug, Clone)]
pub struct ExtensionScanner {
  extension: String,
}

impl ExtensionScanner {
  pub fn new(extension: impl Into<String>) -> Self {
    Self {
      extension: extension.into(),
    }
  }
}

impl DirectoryScanner for ExtensionScanner {
  fn scan(&self, directory: &Path) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
      let entry = entry?;
      if !entry.file_type()?.is_file() {
        continue;
      }

      let path = entry.path();
      if !util::has_extension(&path, &self.extension) {
        continue;
      }

      // A file rotated away between read_dir and stat is simply not listed.
      match FileStamp::of(&path) {
        Ok(stamp) => files.push(ScannedFile { path, stamp }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
        Err(e) => return Err(e.into()),
      }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_scan_filters_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("b.aaLog"), b"x").unwrap();
    fs::write(dir.path().join("a.AALOG"), b"yy").unwrap();
    fs::write(dir.path().join("aalog-index.cache"), b"z").unwrap();
    fs::write(dir.path().join("notes.txt"), b"z").unwrap();
    fs::create_dir(dir.path().join("sub.aaLog")).unwrap();

    let files = ExtensionScanner::new("aaLog").scan(dir.path()).unwrap();
    let names: Vec<_> = files
      .iter()
      .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
      .collect();
    assert_eq!(names, vec!["a.AALOG", "b.aaLog"]);
    assert_eq!(files[0].stamp.size, 2);
  }

  #[test]
  fn test_scan_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert!(ExtensionScanner::new("aaLog").scan(&missing).is_err());
  }
}
