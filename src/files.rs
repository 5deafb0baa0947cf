//! Entry-level packing and unpacking on top of the record engine.
//!
//! An entry is a FileHeader record whose added data is the start of the
//! file's payload.  While a record carries the continuation flag, the
//! payload goes on in the next record, which must be a DataFragment.  The
//! packer only ever writes single-record entries; the unpacker follows
//! continuations.

use std::io::{self, Read, Seek, Write};

use log::{debug, trace};

use crate::archive::{Archive, EntryProgress, Mode, PackerState, ReaderState, UnpackerState};
use crate::checksum::crc32c;
use crate::error::{KcfError, Result};
use crate::file_info::FileInfo;
use crate::header::{ArchiveHeader, ARCHIVE_VERSION};
use crate::record::{
    Record, RecordType, FLAG_ADDED_DATA_CRC32, FLAG_ADDED_SIZE_4, FLAG_ADDED_SIZE_8,
};

/// Sizes above this are declared with the 8-byte size field.
const NARROW_SIZE_MAX: u64 = i32::MAX as u64;

// ── Unpacker ─────────────────────────────────────────────────────────────────

impl<S: Read> Archive<S> {
    fn expect_reading(&self, op: &'static str) -> Result<()> {
        match self.mode {
            Mode::Reading(_) => Ok(()),
            _ => Err(KcfError::InvalidState(op)),
        }
    }

    /// Locate the marker (if not done yet) and read the archive header.
    pub fn read_archive_header(&mut self) -> Result<ArchiveHeader> {
        self.expect_reading("read_archive_header")?;
        if self.unpacker != UnpackerState::ValidatingFormat {
            return Err(KcfError::InvalidState("read_archive_header"));
        }
        if self.reader_state() == Some(ReaderState::AtMarker) {
            self.find_marker()?;
        }
        let record = self.read_record()?;
        let header = ArchiveHeader::from_record(&record)?;
        if self.reader_state() == Some(ReaderState::AtAddedData) {
            self.skip_record()?;
        }
        if header.archive_version > ARCHIVE_VERSION {
            return Err(KcfError::InvalidFormat(format!(
                "archive version {} is newer than supported version {ARCHIVE_VERSION}",
                header.archive_version
            )));
        }
        debug!("archive header: version {}", header.archive_version);
        self.unpacker = UnpackerState::FileHeader;
        Ok(header)
    }

    /// Metadata of the current entry, reading its header if needed.
    ///
    /// Returns [`KcfError::Eof`] once every entry has been consumed.
    pub fn get_current_file_info(&mut self) -> Result<FileInfo> {
        self.expect_reading("get_current_file_info")?;
        match self.unpacker {
            UnpackerState::FileHeader => {
                let record = self.read_record()?;
                let info = FileInfo::from_record(&record)?;
                trace!("entry {:?} ({:?})", info.file_name, info.file_type);
                self.entry        = EntryProgress { continued: record.is_continued(), ..Default::default() };
                self.current_file = Some(info.clone());
                self.unpacker     = UnpackerState::FileData;
                Ok(info)
            }
            UnpackerState::FileData | UnpackerState::AfterFileData => self
                .current_file
                .clone()
                .ok_or(KcfError::InvalidState("get_current_file_info")),
            UnpackerState::ValidatingFormat => Err(KcfError::InvalidState("get_current_file_info")),
        }
    }

    /// Read the next continuation record, which must be a valid DataFragment.
    fn read_fragment(&mut self) -> Result<Record> {
        let record = self.read_record()?;
        if record.head_type != RecordType::DataFragment {
            return Err(KcfError::InvalidData(format!(
                "expected a data fragment, found {:?}", record.head_type
            )));
        }
        if !record.validate() {
            return Err(KcfError::InvalidData("data fragment checksum mismatch".into()));
        }
        self.entry.continued = record.is_continued();
        Ok(record)
    }

    fn finish_entry(&mut self) {
        self.entry        = EntryProgress::default();
        self.current_file = None;
        self.unpacker     = UnpackerState::FileHeader;
    }

    /// Skip the current entry, fragments included.
    pub fn skip_file(&mut self) -> Result<()> {
        self.expect_reading("skip_file")?;
        match self.unpacker {
            UnpackerState::ValidatingFormat => return Err(KcfError::InvalidState("skip_file")),
            UnpackerState::FileHeader => {
                let record = self.read_record()?;
                if record.head_type != RecordType::FileHeader || !record.validate() {
                    return Err(KcfError::InvalidData("corrupt or misplaced file header".into()));
                }
                self.entry.continued = record.is_continued();
            }
            UnpackerState::FileData | UnpackerState::AfterFileData => {}
        }
        loop {
            if self.reader_state() == Some(ReaderState::AtAddedData) {
                self.skip_record()?;
            }
            if !self.entry.continued {
                break;
            }
            self.read_fragment()?;
        }
        self.finish_entry();
        Ok(())
    }

    /// Read up to `buf.len()` bytes of the current entry's payload,
    /// crossing into DataFragment records as needed.
    ///
    /// `Ok(0)` marks the end of the entry; its size and CRC are verified at
    /// that point when the header declared them.
    pub fn read_file_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.expect_reading("read_file_data")?;
        match self.unpacker {
            UnpackerState::FileData => {}
            UnpackerState::AfterFileData => return Ok(0),
            _ => return Err(KcfError::InvalidState("read_file_data")),
        }
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.reader_state() == Some(ReaderState::AtAddedData) {
                let n = self.read_added_data(buf)?;
                if n > 0 {
                    self.entry.bytes += n as u64;
                    self.entry.crc32  = crc32c(self.entry.crc32, &buf[..n]);
                    return Ok(n);
                }
                continue;
            }
            if self.entry.continued {
                self.read_fragment()?;
                continue;
            }
            self.verify_entry()?;
            self.unpacker = UnpackerState::AfterFileData;
            return Ok(0);
        }
    }

    fn verify_entry(&self) -> Result<()> {
        let Some(info) = self.current_file.as_ref() else { return Ok(()) };
        if let Some(size) = info.unpacked_size {
            if size != self.entry.bytes {
                return Err(KcfError::InvalidData(format!(
                    "{}: expected {size} bytes, found {}", info.file_name, self.entry.bytes
                )));
            }
        }
        if let Some(crc) = info.file_crc32 {
            if crc != self.entry.crc32 {
                return Err(KcfError::InvalidData(format!("{}: file checksum mismatch", info.file_name)));
            }
        }
        Ok(())
    }

    /// Copy the current entry's payload into `sink`.  Returns the bytes
    /// written and leaves the handle at the next entry.
    pub fn extract<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<u64> {
        self.expect_reading("extract")?;
        if self.unpacker == UnpackerState::FileHeader {
            self.get_current_file_info()?;
        } else if self.unpacker == UnpackerState::ValidatingFormat {
            return Err(KcfError::InvalidState("extract"));
        }

        let mut buf = vec![0u8; self.options.chunk_size.max(1)];
        let mut total = 0u64;
        loop {
            let n = self.read_file_data(&mut buf)?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).map_err(KcfError::Write)?;
            total += n as u64;
        }
        self.finish_entry();
        Ok(total)
    }
}

// ── Packer ───────────────────────────────────────────────────────────────────

impl<S: Write + Seek> Archive<S> {
    fn expect_packer(&self, allowed: &[PackerState], op: &'static str) -> Result<()> {
        match self.mode {
            Mode::Writing(_) if allowed.contains(&self.packer) => Ok(()),
            _ => Err(KcfError::InvalidState(op)),
        }
    }

    /// Emit the marker (if needed) and a version-1 archive header.
    pub fn init_archive(&mut self) -> Result<()> {
        if let Mode::Writing(_) = self.mode {
            self.expect_packer(&[PackerState::Idle], "init_archive")?;
        }
        self.start_writing()?;
        let mut record = ArchiveHeader::default().to_record()?;
        self.write_record(&mut record)?;
        self.packer = PackerState::FileHeader;
        Ok(())
    }

    fn payload_crc_flag(&self) -> u8 {
        if self.options.payload_crc { FLAG_ADDED_DATA_CRC32 } else { 0 }
    }

    /// Write an entry header and open its payload.
    ///
    /// A known `unpacked_size` is declared up front; otherwise the size is
    /// filled in by [`end_file`](Self::end_file).
    pub fn begin_file(&mut self, info: &FileInfo) -> Result<()> {
        self.expect_packer(&[PackerState::Idle, PackerState::FileHeader], "begin_file")?;
        let mut record = info.to_record()?;
        match info.unpacked_size {
            Some(size) if size > 0 => {
                record.head_flags |= if size > NARROW_SIZE_MAX { FLAG_ADDED_SIZE_8 } else { FLAG_ADDED_SIZE_4 };
                record.added_size  = size;
            }
            _ => {
                record.head_flags |= FLAG_ADDED_SIZE_8;
                record.added_size  = 0;
            }
        }
        record.head_flags |= self.payload_crc_flag();
        self.write_record(&mut record)?;
        self.current_file = Some(info.clone());
        self.packer       = PackerState::FileData;
        Ok(())
    }

    /// Stream `input` to EOF into the open entry.
    pub fn insert_file_data<R: Read + ?Sized>(&mut self, input: &mut R) -> Result<u64> {
        self.expect_packer(&[PackerState::FileData], "insert_file_data")?;
        let mut buf = vec![0u8; self.options.chunk_size.max(1)];
        let mut total = 0u64;
        loop {
            let n = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(KcfError::Read(e)),
            };
            self.write_added_data(&buf[..n])?;
            total += n as u64;
        }
        self.packer = PackerState::AfterFileData;
        Ok(total)
    }

    /// Seal the open entry, backpatching its header as needed.
    pub fn end_file(&mut self) -> Result<()> {
        self.expect_packer(&[PackerState::AfterFileData], "end_file")?;
        self.finish_added_data()?;
        self.current_file = None;
        self.packer       = PackerState::FileHeader;
        Ok(())
    }

    /// Write a whole entry in one record.  Needs no seeking, so it works on
    /// [`Sequential`](crate::io_stream::Sequential) streams.  An empty
    /// payload (directories, empty files) writes the header alone.
    pub fn add_file(&mut self, info: &FileInfo, payload: &[u8]) -> Result<()> {
        self.expect_packer(&[PackerState::Idle, PackerState::FileHeader], "add_file")?;
        let mut record = info.to_record()?;
        record.head_flags |= self.payload_crc_flag();
        self.write_record_with_added_data(&mut record, payload)?;
        self.packer = PackerState::FileHeader;
        Ok(())
    }
}
