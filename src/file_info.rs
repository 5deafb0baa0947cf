//! File header payload: the metadata describing one archive entry.
//!
//! # Payload (all little-endian)
//! ```text
//!   u8   file_flags         0x01 timestamp, 0x02 file crc, mask 0x0C unpacked size
//!   u8   file_type          'R' regular, 'd' directory
//!  [u32 | u64 unpacked_size] 0x04 → 4 bytes, 0x0C → 8 bytes, otherwise absent
//!  [u32 file_crc32]
//!   u32  compression_info   reserved, always 0
//!  [u64 time_stamp]
//!   u16  file_name_size
//!   ..   file_name          no terminator
//! ```

use serde::Serialize;

use crate::cursor::{ByteReader, ByteWriter};
use crate::error::{KcfError, Result};
use crate::record::{Record, RecordType};

pub const FILE_FLAG_TIME_STAMP:    u8 = 0x01;
pub const FILE_FLAG_FILE_CRC32:    u8 = 0x02;
pub const FILE_FLAG_UNPACKED_4:    u8 = 0x04;
pub const FILE_FLAG_UNPACKED_8:    u8 = 0x0C;
pub const UNPACKED_SIZE_MASK:      u8 = 0x0C;

/// Sizes above this switch to the 8-byte unpacked size field.
pub const WIDE_SIZE_THRESHOLD: u64 = i32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileType {
    Regular,
    Directory,
    Unknown(u8),
}

impl From<u8> for FileType {
    fn from(v: u8) -> Self {
        match v {
            // 'F' was the regular-file code in early writers
            b'R' | b'F' => FileType::Regular,
            b'd'        => FileType::Directory,
            other       => FileType::Unknown(other),
        }
    }
}

impl From<FileType> for u8 {
    fn from(t: FileType) -> u8 {
        match t {
            FileType::Regular    => b'R',
            FileType::Directory  => b'd',
            FileType::Unknown(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub file_name:          String,
    pub file_type:          FileType,
    /// Seconds since the Unix epoch.
    pub time_stamp:         Option<u64>,
    pub unpacked_size:      Option<u64>,
    /// Encode `unpacked_size` with the 8-byte field.
    pub wide_unpacked_size: bool,
    /// CRC-32C of the whole entry payload.
    pub file_crc32:         Option<u32>,
    pub compression_info:   u32,
}

impl FileInfo {
    pub fn new(file_name: impl Into<String>, file_type: FileType) -> Self {
        Self {
            file_name:          file_name.into(),
            file_type,
            time_stamp:         None,
            unpacked_size:      None,
            wide_unpacked_size: false,
            file_crc32:         None,
            compression_info:   0,
        }
    }

    pub fn regular(file_name: impl Into<String>) -> Self {
        Self::new(file_name, FileType::Regular)
    }

    pub fn directory(file_name: impl Into<String>) -> Self {
        Self::new(file_name, FileType::Directory)
    }

    pub fn with_unpacked_size(mut self, size: u64) -> Self {
        self.unpacked_size      = Some(size);
        self.wide_unpacked_size = size > WIDE_SIZE_THRESHOLD;
        self
    }

    pub fn with_time_stamp(mut self, secs: u64) -> Self {
        self.time_stamp = Some(secs);
        self
    }

    pub fn with_file_crc32(mut self, crc: u32) -> Self {
        self.file_crc32 = Some(crc);
        self
    }

    fn unpacked_width(&self) -> usize {
        match self.unpacked_size {
            None => 0,
            Some(size) if self.wide_unpacked_size || size > u32::MAX as u64 => 8,
            Some(_) => 4,
        }
    }

    pub fn file_flags(&self) -> u8 {
        let mut flags = 0;
        if self.time_stamp.is_some() { flags |= FILE_FLAG_TIME_STAMP; }
        if self.file_crc32.is_some() { flags |= FILE_FLAG_FILE_CRC32; }
        flags |= match self.unpacked_width() {
            8 => FILE_FLAG_UNPACKED_8,
            4 => FILE_FLAG_UNPACKED_4,
            _ => 0,
        };
        flags
    }

    fn payload_len(&self) -> usize {
        2 + self.unpacked_width()
            + if self.file_crc32.is_some() { 4 } else { 0 }
            + 4
            + if self.time_stamp.is_some() { 8 } else { 0 }
            + 2
            + self.file_name.len()
    }

    /// Encode as a FileHeader record with no added-data flags set.
    pub fn to_record(&self) -> Result<Record> {
        let name = self.file_name.as_bytes();
        let name_len = u16::try_from(name.len()).map_err(|_| {
            KcfError::InvalidParameter(format!("file name of {} bytes is too long", name.len()))
        })?;

        let mut data = vec![0u8; self.payload_len()];
        let mut w = ByteWriter::new(&mut data);
        w.write_u8(self.file_flags())?;
        w.write_u8(self.file_type.into())?;
        match (self.unpacked_size, self.unpacked_width()) {
            (Some(size), 8) => w.write_u64(size)?,
            (Some(size), _) => w.write_u32(size as u32)?,
            (None, _)       => {}
        }
        if let Some(crc) = self.file_crc32 {
            w.write_u32(crc)?;
        }
        w.write_u32(self.compression_info)?;
        if let Some(ts) = self.time_stamp {
            w.write_u64(ts)?;
        }
        w.write_u16(name_len)?;
        w.write_bytes(name)?;

        Record::new(RecordType::FileHeader, 0, data)
    }

    /// Decode a FileHeader record.  Every read is bounds-checked against the
    /// record's data, so a lying `file_name_size` yields `InvalidData`.
    pub fn from_record(record: &Record) -> Result<Self> {
        if !record.validate() {
            return Err(KcfError::InvalidData("file header checksum mismatch".into()));
        }
        if record.head_type != RecordType::FileHeader {
            return Err(KcfError::InvalidData(format!(
                "expected a file header record, found {:?}", record.head_type
            )));
        }

        let mut r = ByteReader::new(&record.data);
        let flags     = r.read_u8()?;
        let file_type = FileType::from(r.read_u8()?);
        let (unpacked_size, wide_unpacked_size) = match flags & UNPACKED_SIZE_MASK {
            FILE_FLAG_UNPACKED_8 => (Some(r.read_u64()?), true),
            FILE_FLAG_UNPACKED_4 => (Some(r.read_u32()? as u64), false),
            _                    => (None, false),
        };
        let file_crc32 = if flags & FILE_FLAG_FILE_CRC32 != 0 { Some(r.read_u32()?) } else { None };
        let compression_info = r.read_u32()?;
        let time_stamp = if flags & FILE_FLAG_TIME_STAMP != 0 { Some(r.read_u64()?) } else { None };
        let name_len = r.read_u16()? as usize;
        let file_name = String::from_utf8(r.read_bytes(name_len)?.to_vec())
            .map_err(|e| KcfError::InvalidData(format!("file name is not UTF-8: {e}")))?;

        Ok(Self {
            file_name,
            file_type,
            time_stamp,
            unpacked_size,
            wide_unpacked_size,
            file_crc32,
            compression_info,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Zero the name and reset every field.
    pub fn clear(&mut self) {
        let mut name = std::mem::take(&mut self.file_name).into_bytes();
        name.fill(0);
        *self = FileInfo::new(String::new(), FileType::Regular);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FLAG_ADDED_SIZE_4;

    fn legacy_hello_record() -> Record {
        let mut data = vec![0x04, b'F', 0x0F, 0, 0, 0, 0, 0, 0, 0, 0x09, 0];
        data.extend_from_slice(b"hello.txt");
        let mut record = Record {
            head_type:  RecordType::FileHeader,
            head_flags: FLAG_ADDED_SIZE_4,
            added_size: 15,
            data,
            ..Default::default()
        };
        record.fix().unwrap();
        record
    }

    #[test]
    fn legacy_hello_vector() {
        let record = legacy_hello_record();
        assert_eq!(record.head_size, 31);
        assert_eq!(record.head_checksum, 0x3E39);

        let info = FileInfo::from_record(&record).unwrap();
        assert_eq!(info.file_name, "hello.txt");
        assert_eq!(info.file_type, FileType::Regular);
        assert_eq!(info.unpacked_size, Some(15));
        assert!(!info.wide_unpacked_size);
        assert_eq!(info.file_crc32, None);
        assert_eq!(info.time_stamp, None);
    }

    #[test]
    fn all_optional_fields_survive() {
        let info = FileInfo::regular("docs/readme.md")
            .with_unpacked_size(4096)
            .with_time_stamp(1_700_000_000)
            .with_file_crc32(0xDEAD_BEEF);
        let record = info.to_record().unwrap();
        assert_eq!(record.data[0], 0x01 | 0x02 | 0x04);
        assert_eq!(record.data[1], b'R');
        assert_eq!(FileInfo::from_record(&record).unwrap(), info);
    }

    #[test]
    fn wide_size_selects_eight_bytes() {
        let info = FileInfo::regular("big.bin").with_unpacked_size(WIDE_SIZE_THRESHOLD + 1);
        assert!(info.wide_unpacked_size);
        let record = info.to_record().unwrap();
        assert_eq!(record.data[0] & UNPACKED_SIZE_MASK, FILE_FLAG_UNPACKED_8);
        assert_eq!(FileInfo::from_record(&record).unwrap(), info);
    }

    #[test]
    fn size_mask_0x08_means_absent() {
        let mut data = vec![0x08, b'd', 0, 0, 0, 0, 1, 0];
        data.push(b'x');
        let record = Record::new(RecordType::FileHeader, 0, data).unwrap();
        let info = FileInfo::from_record(&record).unwrap();
        assert_eq!(info.unpacked_size, None);
        assert!(info.is_directory());
        assert_eq!(info.file_name, "x");
    }

    #[test]
    fn lying_name_length_is_invalid_data() {
        let mut record = legacy_hello_record();
        record.data[10] = 0xFF;
        record.fix().unwrap();
        assert!(matches!(FileInfo::from_record(&record), Err(KcfError::InvalidData(_))));
    }

    #[test]
    fn non_utf8_name_is_invalid_data() {
        let mut record = legacy_hello_record();
        let last = record.data.len() - 1;
        record.data[last] = 0xFF;
        record.fix().unwrap();
        assert!(matches!(FileInfo::from_record(&record), Err(KcfError::InvalidData(_))));
    }

    #[test]
    fn wrong_record_type_is_rejected() {
        let mut record = legacy_hello_record();
        record.head_type = RecordType::DataFragment;
        record.fix().unwrap();
        assert!(matches!(FileInfo::from_record(&record), Err(KcfError::InvalidData(_))));
    }

    #[test]
    fn corrupt_checksum_is_rejected() {
        let mut record = legacy_hello_record();
        record.data[2] = 0x10;
        assert!(matches!(FileInfo::from_record(&record), Err(KcfError::InvalidData(_))));
    }

    #[test]
    fn clear_resets_to_an_empty_regular_entry() {
        let mut info = FileInfo::directory("tmp").with_time_stamp(5);
        info.clear();
        assert_eq!(info, FileInfo::regular(""));
    }

    #[test]
    fn overlong_name_is_invalid_parameter() {
        let info = FileInfo::regular("n".repeat(70_000));
        assert!(matches!(info.to_record(), Err(KcfError::InvalidParameter(_))));
    }
}
