//! KCF archive container.
//!
//! A KCF stream is a six-byte marker followed by checksummed records.  The
//! first record is the archive header; each entry after it is a file header
//! record whose added data carries the file's bytes, optionally continued
//! in data fragment records.
//!
//! Layers, bottom up: [`cursor`] and [`checksum`] → [`record`] and
//! [`marker`] → [`Archive`] with the [`io_stream`] engine → the entry layer
//! in [`files`] using [`FileInfo`] and [`ArchiveHeader`].

pub mod archive;
pub mod checksum;
pub mod cursor;
pub mod error;
pub mod file_info;
pub mod files;
pub mod header;
pub mod io_stream;
pub mod marker;
pub mod record;

pub use archive::{
    Archive, ArchiveOptions, Mode, PackerState, ReaderState, UnpackerState, WriterState,
    DEFAULT_CHUNK_SIZE,
};
pub use error::{KcfError, Result};
pub use file_info::{FileInfo, FileType};
pub use header::{ArchiveHeader, ARCHIVE_VERSION};
pub use io_stream::{Sequential, StreamedWrite};
pub use record::{Record, RecordType};
