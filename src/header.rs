//! Archive header record: the first record after the marker.
//!
//! # Payload
//! ```text
//!   u16  archive_version
//! ```
//! A well-formed header therefore has `head_size >= 8`.

use serde::Serialize;

use crate::cursor::ByteReader;
use crate::error::{KcfError, Result};
use crate::record::{Record, RecordType};

pub const ARCHIVE_VERSION: u16 = 1;
/// Fixed prefix + the version field.
pub const MIN_HEADER_SIZE: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveHeader {
    pub archive_version: u16,
}

impl Default for ArchiveHeader {
    fn default() -> Self {
        Self { archive_version: ARCHIVE_VERSION }
    }
}

impl ArchiveHeader {
    pub fn new(archive_version: u16) -> Self {
        Self { archive_version }
    }

    pub fn to_record(&self) -> Result<Record> {
        Record::new(RecordType::ArchiveHeader, 0, self.archive_version.to_le_bytes().to_vec())
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        if !record.validate() {
            return Err(KcfError::InvalidData("archive header checksum mismatch".into()));
        }
        if record.head_type != RecordType::ArchiveHeader {
            return Err(KcfError::InvalidData(format!(
                "expected an archive header record, found {:?}", record.head_type
            )));
        }
        if record.head_size < MIN_HEADER_SIZE {
            return Err(KcfError::InvalidData(format!(
                "archive header of {} bytes is too short", record.head_size
            )));
        }
        let archive_version = ByteReader::new(&record.data).read_u16()?;
        Ok(Self { archive_version })
    }
}
