//! # aalog-reader
//!
//! `aalog_reader` reads a directory of rotating binary log files and answers
//! "which file holds this message?" for three key spaces: file time,
//! wall-clock timestamp and message number.
//!
//! ## Key Features
//!
//! * **Versioned Decoding**: One decoder per on-disk format version.
//! * **Directory Index**: Every file header, ordered by rotation.
//! * **Persistent Cache**: The index is stored next to the logs and reused
//!   only while the directory listing is unchanged.
//! * **Boundary-aware Lookup**: Adjacent files may share a boundary value;
//!   every owning file is returned.
//! * **Sessions**: First, last and sequential record reads on one open file.
//!
//! ## Example
//!
//! ```no_run
//! use aalog_reader::{LogReader, ReaderOptions};
//!
//! # fn main() -> aalog_reader::Result<()> {
//! let mut reader = LogReader::new(ReaderOptions::new("/var/log/historian"))?;
//!
//! // Which file(s) hold message 1500?
//! let files = reader.log_file_paths_for_message_number(1500)?;
//!
//! // Tail of the file being written right now.
//! reader.open_current()?;
//! let last = reader.last_record()?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod decoder;
mod error;
mod format;
mod index;
mod iter;
mod reader;
mod record;
mod resolver;
mod scanner;
mod session;
mod util;
mod writer;

// Re-exports for the flat public API
pub use cache::{CacheFingerprint, IndexCache};
pub use config::{ReadStrategy, ReaderOptions};
pub use decoder::{LogDecoder, RecordStream, decode_header, decode_header_with};
pub use error::{CacheError, DecodeError, Error, IndexError, OpenError, ResolverError, Result};
pub use format::FormatVersion;
pub use index::{
  DirectoryIndex, DirectoryIndexEntry, FileTime, KeySpace, KeySpaceKind, MessageNumber, Projection, Timestamp,
};
pub use iter::RecordsFrom;
pub use reader::{LogReader, build_index};
pub use record::{LogHeader, LogRecord};
pub use resolver::{QueryKey, Resolution, find_files_for, resolve};
pub use scanner::{DirectoryScanner, ExtensionScanner, FileStamp, ScannedFile};
pub use util::{datetime_to_filetime, filetime_to_datetime};
pub use writer::LogFileWriter;
