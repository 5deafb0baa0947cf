//! The [`Archive`] handle: one stream, one tagged state.
//!
//! ```no_run
//! use kcf::{Archive, FileInfo};
//!
//! // Write
//! let mut ar = Archive::create("out.kcf")?;
//! ar.init_archive()?;
//! ar.add_file(&FileInfo::regular("readme.txt").with_unpacked_size(13), b"Hello, world!")?;
//! ar.close()?;
//!
//! // Read
//! let mut ar = Archive::open("out.kcf")?;
//! ar.read_archive_header()?;
//! let mut out = Vec::new();
//! ar.extract(&mut out)?;
//! assert_eq!(out, b"Hello, world!");
//! # Ok::<(), kcf::KcfError>(())
//! ```
//!
//! # Modes
//! A handle is idle, reading or writing, never two at once.  Reader and
//! writer operations live in [`crate::io_stream`]; the per-file layer in
//! [`crate::files`].  Every operation checks the state first and returns
//! [`KcfError::InvalidState`] without touching the stream when called out
//! of order.

use std::fs::{File, OpenOptions};
use std::io::{Seek, Write};
use std::path::Path;

use log::debug;

use crate::error::{KcfError, Result};
use crate::file_info::FileInfo;
use crate::record::Record;

/// Default buffer size for streaming file payloads: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
/// Largest single read or write issued against the stream: 1 GiB.
pub const MAX_IO_CHUNK:       usize = 1 << 30;

// ── ArchiveOptions ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Buffer size used by `insert_file_data` and `extract`.
    pub chunk_size:  usize,
    /// Request an added-data CRC-32C on every file payload.
    pub payload_crc: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            chunk_size:  DEFAULT_CHUNK_SIZE,
            payload_crc: true,
        }
    }
}

// ── States ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    AtMarker,
    AtRecordHeader,
    /// Inside a record's header or data.  Only observable after a failed read.
    AtRecordData,
    AtAddedData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    AtMarker,
    AtRecord,
    AtAddedData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Reading(ReaderState),
    Writing(WriterState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackerState {
    ValidatingFormat,
    FileHeader,
    FileData,
    AfterFileData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackerState {
    Idle,
    FileHeader,
    FileData,
    AfterFileData,
}

/// Progress through the added data of the record just read.
#[derive(Debug, Default)]
pub(crate) struct IncomingData {
    pub remaining:      u64,
    pub consumed:       u64,
    pub declared_crc32: Option<u32>,
    pub running_crc32:  u32,
}

/// Everything needed to backpatch the record whose payload is being streamed.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub record:        Record,
    /// `None` when the stream could not report a position.
    pub record_offset: Option<u64>,
    /// Zero when the size was left for the backpatch.
    pub declared_size: u64,
    pub written:       u64,
    pub running_crc32: u32,
    pub has_crc32:     bool,
}

/// Position inside the entry currently being unpacked.
#[derive(Debug, Default)]
pub(crate) struct EntryProgress {
    /// Continuation bit of the record whose added data is current.
    pub continued: bool,
    pub bytes:     u64,
    pub crc32:     u32,
}

// ── Archive ──────────────────────────────────────────────────────────────────

pub struct Archive<S> {
    pub(crate) stream:       S,
    pub(crate) mode:         Mode,
    pub(crate) options:      ArchiveOptions,
    pub(crate) incoming:     IncomingData,
    pub(crate) pending:      Option<PendingWrite>,
    pub(crate) unpacker:     UnpackerState,
    pub(crate) packer:       PackerState,
    pub(crate) entry:        EntryProgress,
    pub(crate) current_file: Option<FileInfo>,
}

impl<S> Archive<S> {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Wrap a stream in an idle handle.
    pub fn new(stream: S) -> Self {
        Self::with_options(stream, ArchiveOptions::default())
    }

    pub fn with_options(stream: S, options: ArchiveOptions) -> Self {
        Self {
            stream,
            mode:         Mode::Idle,
            options,
            incoming:     IncomingData::default(),
            pending:      None,
            unpacker:     UnpackerState::ValidatingFormat,
            packer:       PackerState::Idle,
            entry:        EntryProgress::default(),
            current_file: None,
        }
    }

    /// A handle already in reading mode, positioned before the marker.
    /// Works for streams that cannot be written.
    pub fn reader(stream: S) -> Self {
        let mut ar = Self::new(stream);
        ar.mode = Mode::Reading(ReaderState::AtMarker);
        ar
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn mode(&self) -> Mode { self.mode }

    pub fn unpacker_state(&self) -> UnpackerState { self.unpacker }

    pub fn packer_state(&self) -> PackerState { self.packer }

    pub fn options(&self) -> &ArchiveOptions { &self.options }

    /// Metadata of the entry being read or written, if any.
    pub fn current_file(&self) -> Option<&FileInfo> { self.current_file.as_ref() }

    pub fn get_ref(&self) -> &S { &self.stream }

    /// Direct stream access.  Moving the position behind the handle's back
    /// desynchronises its state.
    pub fn get_mut(&mut self) -> &mut S { &mut self.stream }

    /// Give up the stream without finishing a pending payload.
    pub fn into_inner(self) -> S { self.stream }

    pub(crate) fn reader_state(&self) -> Option<ReaderState> {
        match self.mode {
            Mode::Reading(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn writer_state(&self) -> Option<WriterState> {
        match self.mode {
            Mode::Writing(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn enter_reading(&mut self) {
        self.mode         = Mode::Reading(ReaderState::AtMarker);
        self.incoming     = IncomingData::default();
        self.unpacker     = UnpackerState::ValidatingFormat;
        self.entry        = EntryProgress::default();
        self.current_file = None;
        debug!("archive switched to reading");
    }
}

impl<S: Write + Seek> Archive<S> {
    /// Switch to reading.  A payload still being streamed is finished
    /// (and backpatched) first, then the stream is flushed.
    pub fn start_reading(&mut self) -> Result<()> {
        match self.mode {
            Mode::Reading(_) => return Ok(()),
            Mode::Writing(WriterState::AtAddedData) => self.finish_added_data()?,
            _ => {}
        }
        if let Mode::Writing(_) = self.mode {
            self.stream.flush().map_err(KcfError::Write)?;
        }
        self.enter_reading();
        Ok(())
    }

    /// Switch to writing and emit the marker.
    pub fn start_writing(&mut self) -> Result<()> {
        if let Mode::Writing(_) = self.mode {
            return Ok(());
        }
        self.mode         = Mode::Writing(WriterState::AtMarker);
        self.pending      = None;
        self.packer       = PackerState::Idle;
        self.current_file = None;
        debug!("archive switched to writing");
        self.write_marker()
    }

    /// Finish any pending payload, flush, and hand back the stream.
    pub fn close(mut self) -> Result<S> {
        if self.writer_state() == Some(WriterState::AtAddedData) {
            self.finish_added_data()?;
        }
        if let Mode::Writing(_) = self.mode {
            self.stream.flush().map_err(KcfError::Write)?;
        }
        Ok(self.stream)
    }
}

impl Archive<File> {
    /// Open an existing archive for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(KcfError::from_os)?;
        Ok(Self::reader(file))
    }

    /// Create (or truncate) an archive and emit the marker.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_options(path, ArchiveOptions::default())
    }

    pub fn create_with_options<P: AsRef<Path>>(path: P, options: ArchiveOptions) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(KcfError::from_os)?;
        let mut ar = Self::with_options(file, options);
        ar.start_writing()?;
        Ok(ar)
    }
}
