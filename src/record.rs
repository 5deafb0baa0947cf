//! Record codec.
//!
//! # Layout (all little-endian)
//!
//! ```text
//!   u16  head_checksum     low 16 bits of CRC-32C over every field below + data
//!   u8   head_type
//!   u8   head_flags
//!   u16  head_size         header + data, excluding added data
//!  [u32 | u64 added_size]  width selected by (head_flags & 0xC0)
//!  [u32 added_data_crc32]  present when head_flags & 0x20
//!   ..   data              head_size - header_len bytes
//! ```
//!
//! Added data (the payload) follows the record on the stream and is never
//! part of `head_size`.  Only `0x80` and `0xC0` in the size mask select a
//! width; `0x00` and `0x40` both mean "no added size".

use crate::checksum::{crc32c, truncate16};
use crate::cursor::{ByteReader, ByteWriter};
use crate::error::{KcfError, Result};

/// The record continues into a following DataFragment record.
pub const FLAG_CONTINUED:        u8 = 0x01;
/// An `added_data_crc32` field is present.
pub const FLAG_ADDED_DATA_CRC32: u8 = 0x20;
/// 4-byte `added_size` field.
pub const FLAG_ADDED_SIZE_4:     u8 = 0x80;
/// 8-byte `added_size` field.
pub const FLAG_ADDED_SIZE_8:     u8 = 0xC0;
pub const ADDED_SIZE_MASK:       u8 = 0xC0;

/// checksum + type + flags + size.
pub const FIXED_HEADER_LEN: usize = 6;
/// Fixed prefix plus an 8-byte size and a CRC.
pub const MAX_HEADER_LEN:   usize = FIXED_HEADER_LEN + 8 + 4;

// ── RecordType ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Marker,
    ArchiveHeader,
    FileHeader,
    DataFragment,
    /// Any other type byte.  Accepted by the codec, rejected by consumers.
    Unknown(u8),
}

impl From<u8> for RecordType {
    fn from(v: u8) -> Self {
        match v {
            b'!' => RecordType::Marker,
            b'A' => RecordType::ArchiveHeader,
            b'F' => RecordType::FileHeader,
            b'D' => RecordType::DataFragment,
            other => RecordType::Unknown(other),
        }
    }
}

impl From<RecordType> for u8 {
    fn from(t: RecordType) -> u8 {
        match t {
            RecordType::Marker        => b'!',
            RecordType::ArchiveHeader => b'A',
            RecordType::FileHeader    => b'F',
            RecordType::DataFragment  => b'D',
            RecordType::Unknown(v)    => v,
        }
    }
}

impl Default for RecordType {
    fn default() -> Self { RecordType::Unknown(0) }
}

// ── AddedSizeWidth ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddedSizeWidth {
    Absent,
    Four,
    Eight,
}

impl AddedSizeWidth {
    pub fn from_flags(flags: u8) -> Self {
        match flags & ADDED_SIZE_MASK {
            FLAG_ADDED_SIZE_8 => AddedSizeWidth::Eight,
            FLAG_ADDED_SIZE_4 => AddedSizeWidth::Four,
            _                 => AddedSizeWidth::Absent,
        }
    }

    pub fn len(self) -> usize {
        match self {
            AddedSizeWidth::Absent => 0,
            AddedSizeWidth::Four   => 4,
            AddedSizeWidth::Eight  => 8,
        }
    }

    /// Largest `added_size` the field can carry.
    pub fn max_value(self) -> u64 {
        match self {
            AddedSizeWidth::Absent => 0,
            AddedSizeWidth::Four   => u32::MAX as u64,
            AddedSizeWidth::Eight  => u64::MAX,
        }
    }
}

/// Encoded header length implied by `flags`.
pub fn header_len(flags: u8) -> usize {
    let crc = if flags & FLAG_ADDED_DATA_CRC32 != 0 { 4 } else { 0 };
    FIXED_HEADER_LEN + AddedSizeWidth::from_flags(flags).len() + crc
}

// ── Record ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub head_checksum:    u16,
    pub head_type:        RecordType,
    pub head_flags:       u8,
    pub head_size:        u16,
    /// Zero when the flags declare no added size.
    pub added_size:       u64,
    /// Zero when the flags declare no CRC.
    pub added_data_crc32: u32,
    pub data:             Vec<u8>,
}

impl Record {
    /// Build a record and [`fix`](Self::fix) it.
    pub fn new(head_type: RecordType, head_flags: u8, data: Vec<u8>) -> Result<Self> {
        let mut record = Record { head_type, head_flags, data, ..Default::default() };
        record.fix()?;
        Ok(record)
    }

    pub fn added_size_width(&self) -> AddedSizeWidth {
        AddedSizeWidth::from_flags(self.head_flags)
    }

    pub fn has_added_size(&self) -> bool {
        self.added_size_width() != AddedSizeWidth::Absent
    }

    pub fn has_added_data_crc32(&self) -> bool {
        self.head_flags & FLAG_ADDED_DATA_CRC32 != 0
    }

    pub fn is_continued(&self) -> bool {
        self.head_flags & FLAG_CONTINUED != 0
    }

    pub fn header_len(&self) -> usize {
        header_len(self.head_flags)
    }

    /// Header plus embedded data, as laid out by the current flags.
    pub fn encoded_len(&self) -> usize {
        self.header_len() + self.data.len()
    }

    /// Everything after the checksum field, up to the end of the header.
    fn write_fields(&self, w: &mut ByteWriter<'_>) -> Result<()> {
        w.write_u8(self.head_type.into())?;
        w.write_u8(self.head_flags)?;
        w.write_u16(self.head_size)?;
        match self.added_size_width() {
            AddedSizeWidth::Absent => {}
            AddedSizeWidth::Four   => w.write_u32(self.added_size as u32)?,
            AddedSizeWidth::Eight  => w.write_u64(self.added_size)?,
        }
        if self.has_added_data_crc32() {
            w.write_u32(self.added_data_crc32)?;
        }
        Ok(())
    }

    pub fn calculate_checksum(&self) -> u16 {
        let mut fields = [0u8; MAX_HEADER_LEN - 2];
        let len = self.header_len() - 2;
        let mut w = ByteWriter::new(&mut fields[..len]);
        // The buffer is sized from the same flags, so this cannot run short.
        let _ = self.write_fields(&mut w);
        truncate16(crc32c(crc32c(0, &fields[..len]), &self.data))
    }

    /// True when the stored checksum matches the record's contents.
    pub fn validate(&self) -> bool {
        self.head_checksum == self.calculate_checksum()
    }

    /// Recompute `head_size` and `head_checksum` from the flags and data.
    pub fn fix(&mut self) -> Result<()> {
        let width = self.added_size_width();
        if self.added_size > width.max_value() && width != AddedSizeWidth::Absent {
            return Err(KcfError::InvalidParameter(format!(
                "added size {} does not fit a {}-byte field", self.added_size, width.len()
            )));
        }
        let size = self.encoded_len();
        self.head_size = u16::try_from(size).map_err(|_| {
            KcfError::InvalidParameter(format!("record of {size} bytes exceeds the 65535-byte limit"))
        })?;
        self.head_checksum = self.calculate_checksum();
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.head_size as usize != self.encoded_len() {
            return Err(KcfError::InvalidParameter(format!(
                "head_size {} disagrees with the {}-byte layout", self.head_size, self.encoded_len()
            )));
        }
        let mut out = vec![0u8; self.encoded_len()];
        let mut w = ByteWriter::new(&mut out);
        w.write_u16(self.head_checksum)?;
        self.write_fields(&mut w)?;
        w.write_bytes(&self.data)?;
        Ok(out)
    }

    /// Parse the header fields only; `data` is left empty.
    ///
    /// `bytes` must hold at least the header implied by its flags byte.
    pub fn decode_header(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let head_checksum = r.read_u16()?;
        let head_type     = RecordType::from(r.read_u8()?);
        let head_flags    = r.read_u8()?;
        let head_size     = r.read_u16()?;

        let hlen = header_len(head_flags);
        if (head_size as usize) < hlen {
            return Err(KcfError::InvalidData(format!(
                "head_size {head_size} is smaller than the {hlen}-byte header"
            )));
        }
        let added_size = match AddedSizeWidth::from_flags(head_flags) {
            AddedSizeWidth::Absent => 0,
            AddedSizeWidth::Four   => r.read_u32()? as u64,
            AddedSizeWidth::Eight  => r.read_u64()?,
        };
        let added_data_crc32 = if head_flags & FLAG_ADDED_DATA_CRC32 != 0 { r.read_u32()? } else { 0 };

        Ok(Record {
            head_checksum,
            head_type,
            head_flags,
            head_size,
            added_size,
            added_data_crc32,
            data: Vec::new(),
        })
    }

    /// Parse a complete record.  Bytes past `head_size` are ignored.
    ///
    /// The checksum is not checked; see [`validate`](Self::validate).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut record = Self::decode_header(bytes)?;
        let mut r = ByteReader::new(bytes);
        r.read_bytes(record.header_len())?;
        record.data = r.read_bytes(record.data_len())?.to_vec();
        Ok(record)
    }

    /// Embedded data length implied by `head_size`.
    pub fn data_len(&self) -> usize {
        (self.head_size as usize).saturating_sub(self.header_len())
    }

    /// Zero the data buffer and reset every field.
    pub fn clear(&mut self) {
        self.data.fill(0);
        *self = Record::default();
    }
}
