use std::io::Read;

use log::{debug, trace};

use super::{discard, read_exact_at, ReadPosition};
use crate::archive::{Archive, IncomingData, Mode, ReaderState, MAX_IO_CHUNK};
use crate::checksum::crc32c;
use crate::error::{KcfError, Result};
use crate::marker;
use crate::record::{self, Record, FIXED_HEADER_LEN, MAX_HEADER_LEN};

impl<S: Read> Archive<S> {
    fn expect_reader(&self, want: ReaderState, op: &'static str) -> Result<()> {
        if self.reader_state() == Some(want) {
            Ok(())
        } else {
            Err(KcfError::InvalidState(op))
        }
    }

    /// Scan for the marker.  Returns the bytes consumed, marker included.
    pub fn find_marker(&mut self) -> Result<u64> {
        self.expect_reader(ReaderState::AtMarker, "find_marker")?;
        let consumed = marker::find_marker(&mut self.stream)?;
        debug!("marker found after {} byte(s)", consumed - marker::MARKER.len() as u64);
        self.mode = Mode::Reading(ReaderState::AtRecordHeader);
        Ok(consumed)
    }

    /// Read the header fields of the next record; data is not read.
    fn read_record_header(&mut self) -> Result<Record> {
        let mut buf = [0u8; MAX_HEADER_LEN];
        read_exact_at(&mut self.stream, &mut buf[..1], ReadPosition::Boundary)?;
        self.mode = Mode::Reading(ReaderState::AtRecordData);
        read_exact_at(&mut self.stream, &mut buf[1..FIXED_HEADER_LEN], ReadPosition::Middle)?;
        let hlen = record::header_len(buf[3]);
        read_exact_at(&mut self.stream, &mut buf[FIXED_HEADER_LEN..hlen], ReadPosition::Middle)?;
        Record::decode_header(&buf[..hlen])
    }

    fn enter_record_payload(&mut self, record: &Record) {
        self.incoming = IncomingData::default();
        if record.has_added_size() {
            self.incoming.remaining      = record.added_size;
            self.incoming.declared_crc32 = record.has_added_data_crc32().then_some(record.added_data_crc32);
            self.mode = Mode::Reading(ReaderState::AtAddedData);
        } else {
            self.mode = Mode::Reading(ReaderState::AtRecordHeader);
        }
    }

    /// Read the next record's header and data.  Added data, if declared, is
    /// left on the stream for [`read_added_data`](Self::read_added_data).
    pub fn read_record(&mut self) -> Result<Record> {
        self.expect_reader(ReaderState::AtRecordHeader, "read_record")?;
        let mut record = self.read_record_header()?;
        let mut data = vec![0u8; record.data_len()];
        read_exact_at(&mut self.stream, &mut data, ReadPosition::Middle)?;
        record.data = data;
        trace!(
            "read record type={:?} flags={:#04x} head_size={} added_size={}",
            record.head_type, record.head_flags, record.head_size, record.added_size
        );
        self.enter_record_payload(&record);
        Ok(record)
    }

    /// Skip the rest of the current record: the whole record from a record
    /// boundary, or the unread added data from inside a payload.
    pub fn skip_record(&mut self) -> Result<()> {
        let n = match self.reader_state() {
            Some(ReaderState::AtRecordHeader) => {
                let record = self.read_record_header()?;
                trace!("skip record type={:?} head_size={}", record.head_type, record.head_size);
                // added_size is untrusted and may be near u64::MAX
                discard(&mut self.stream, record.data_len() as u64)?;
                record.added_size
            }
            Some(ReaderState::AtAddedData) => self.incoming.remaining,
            _ => return Err(KcfError::InvalidState("skip_record")),
        };
        discard(&mut self.stream, n)?;
        self.incoming = IncomingData::default();
        self.mode = Mode::Reading(ReaderState::AtRecordHeader);
        Ok(())
    }

    /// Read up to `buf.len()` bytes of the current payload.
    ///
    /// Returns `Ok(0)` once the payload is exhausted, at which point the
    /// handle is back at a record boundary.  An empty `buf` also yields
    /// `Ok(0)` but leaves unread payload in place; use
    /// [`is_added_data_available`](Self::is_added_data_available) to tell the
    /// two apart.  A declared CRC is checked when the last byte has been read.
    pub fn read_added_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.expect_reader(ReaderState::AtAddedData, "read_added_data")?;
        if self.incoming.remaining == 0 {
            self.end_added_data()?;
            return Ok(0);
        }
        let want = (buf.len() as u64)
            .min(self.incoming.remaining)
            .min(MAX_IO_CHUNK as u64) as usize;
        let chunk = &mut buf[..want];
        read_exact_at(&mut self.stream, chunk, ReadPosition::Middle)?;

        self.incoming.running_crc32 = crc32c(self.incoming.running_crc32, chunk);
        self.incoming.remaining    -= want as u64;
        self.incoming.consumed     += want as u64;
        if self.incoming.remaining == 0 {
            self.end_added_data()?;
        }
        Ok(want)
    }

    fn end_added_data(&mut self) -> Result<()> {
        self.mode = Mode::Reading(ReaderState::AtRecordHeader);
        match self.incoming.declared_crc32 {
            Some(declared) if declared != self.incoming.running_crc32 => {
                Err(KcfError::InvalidData(format!(
                    "added data checksum mismatch: stored {declared:#010x}, computed {:#010x}",
                    self.incoming.running_crc32
                )))
            }
            _ => Ok(()),
        }
    }

    /// True while the current record still has unread added data.
    pub fn is_added_data_available(&self) -> bool {
        self.reader_state() == Some(ReaderState::AtAddedData) && self.incoming.remaining > 0
    }

    pub fn added_data_remaining(&self) -> u64 {
        match self.reader_state() {
            Some(ReaderState::AtAddedData) => self.incoming.remaining,
            _ => 0,
        }
    }

    /// Added-data bytes of the current record read so far.
    pub fn added_data_consumed(&self) -> u64 {
        self.incoming.consumed
    }

    /// Running CRC-32C over the added data read so far.
    pub fn added_data_crc32(&self) -> u32 {
        self.incoming.running_crc32
    }
}
