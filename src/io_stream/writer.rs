use std::io::{self, Seek, SeekFrom, Write};

use log::{debug, trace};

use super::{write_chunked, StreamedWrite};
use crate::archive::{Archive, Mode, PendingWrite, WriterState};
use crate::checksum::crc32c;
use crate::error::{KcfError, Result};
use crate::marker;
use crate::record::{
    Record, ADDED_SIZE_MASK, FLAG_ADDED_DATA_CRC32, FLAG_ADDED_SIZE_4, FLAG_ADDED_SIZE_8,
};

/// Payloads up to this size get the 4-byte size field.
const NARROW_PAYLOAD_MAX: usize = i32::MAX as usize;

impl<S: Write + Seek> Archive<S> {
    pub fn write_marker(&mut self) -> Result<()> {
        if self.writer_state() != Some(WriterState::AtMarker) {
            return Err(KcfError::InvalidState("write_marker"));
        }
        marker::write_marker(&mut self.stream)?;
        self.mode = Mode::Writing(WriterState::AtRecord);
        Ok(())
    }

    /// Leave `AtAddedData` (finishing the payload) so a new record can start.
    fn ready_for_record(&mut self, op: &'static str) -> Result<()> {
        match self.writer_state() {
            Some(WriterState::AtRecord)    => Ok(()),
            Some(WriterState::AtAddedData) => self.finish_added_data(),
            _ => Err(KcfError::InvalidState(op)),
        }
    }

    fn emit(&mut self, record: &Record) -> Result<()> {
        let bytes = record.encode()?;
        self.stream.write_all(&bytes).map_err(KcfError::Write)?;
        trace!(
            "wrote record type={:?} flags={:#04x} head_size={} added_size={}",
            record.head_type, record.head_flags, record.head_size, record.added_size
        );
        Ok(())
    }

    /// Write a record.  If it declares an added size, the handle stays at
    /// its payload until [`finish_added_data`](Self::finish_added_data) or
    /// the next record.
    ///
    /// A payload of unknown size (`added_size == 0`) or one with a requested
    /// CRC is backpatched later; on a stream that cannot report its position
    /// this fails with `Write` before anything is written.
    pub fn write_record(&mut self, record: &mut Record) -> Result<()> {
        self.ready_for_record("write_record")?;
        record.fix()?;

        let needs_backpatch = record.has_added_size()
            && (record.added_size == 0 || record.has_added_data_crc32());
        let record_offset = match self.stream.stream_position() {
            Ok(pos) => Some(pos),
            Err(e) if needs_backpatch => {
                return Err(KcfError::Write(io::Error::new(
                    e.kind(),
                    format!("record needs a backpatch but the stream cannot seek: {e}"),
                )))
            }
            Err(_) => None,
        };

        self.emit(record)?;

        if record.has_added_size() {
            self.pending = Some(PendingWrite {
                record:        record.clone(),
                record_offset,
                declared_size: record.added_size,
                written:       0,
                running_crc32: 0,
                has_crc32:     record.has_added_data_crc32(),
            });
            self.mode = Mode::Writing(WriterState::AtAddedData);
        } else {
            self.mode = Mode::Writing(WriterState::AtRecord);
        }
        Ok(())
    }

    /// Write a record and its whole payload in one go.  Never seeks.
    ///
    /// The size field is chosen from the payload length; an empty payload
    /// clears the size and CRC flags.
    pub fn write_record_with_added_data(&mut self, record: &mut Record, payload: &[u8]) -> Result<()> {
        self.ready_for_record("write_record_with_added_data")?;

        record.head_flags &= !ADDED_SIZE_MASK;
        if payload.is_empty() {
            record.head_flags      &= !FLAG_ADDED_DATA_CRC32;
            record.added_size       = 0;
            record.added_data_crc32 = 0;
        } else {
            if record.has_added_data_crc32() {
                record.added_data_crc32 = crc32c(0, payload);
            }
            record.head_flags |= if payload.len() > NARROW_PAYLOAD_MAX {
                FLAG_ADDED_SIZE_8
            } else {
                FLAG_ADDED_SIZE_4
            };
            record.added_size = payload.len() as u64;
        }
        record.fix()?;

        self.emit(record)?;
        write_chunked(&mut self.stream, payload)?;
        self.mode = Mode::Writing(WriterState::AtRecord);
        Ok(())
    }

    /// Append payload bytes.  With a declared size, anything past it is
    /// silently dropped.
    pub fn write_added_data(&mut self, chunk: &[u8]) -> Result<()> {
        if self.writer_state() != Some(WriterState::AtAddedData) {
            return Err(KcfError::InvalidState("write_added_data"));
        }
        let pending = self.pending.as_mut().ok_or(KcfError::InvalidState("write_added_data"))?;

        let mut take = chunk.len() as u64;
        if pending.declared_size > 0 {
            take = take.min(pending.declared_size - pending.written);
        } else {
            let limit = pending.record.added_size_width().max_value();
            if pending.written + take > limit {
                return Err(KcfError::InvalidParameter(format!(
                    "payload exceeds the {}-byte size field", pending.record.added_size_width().len()
                )));
            }
        }
        let chunk = &chunk[..take as usize];
        if chunk.is_empty() {
            return Ok(());
        }

        write_chunked(&mut self.stream, chunk)?;
        pending.written += take;
        if pending.has_crc32 {
            pending.running_crc32 = crc32c(pending.running_crc32, chunk);
        }
        Ok(())
    }

    /// Seal the payload.  The record header is rewritten in place unless the
    /// declared size was met exactly and no CRC was requested.
    pub fn finish_added_data(&mut self) -> Result<()> {
        if self.writer_state() != Some(WriterState::AtAddedData) {
            return Err(KcfError::InvalidState("finish_added_data"));
        }
        let pending = self.pending.as_mut().ok_or(KcfError::InvalidState("finish_added_data"))?;

        let exact = pending.declared_size > 0 && pending.written == pending.declared_size;
        if !exact || pending.has_crc32 {
            let record_offset = pending.record_offset.ok_or_else(|| {
                KcfError::write_msg(io::ErrorKind::Unsupported, "cannot backpatch: stream position unknown")
            })?;
            pending.record.added_size       = pending.written;
            pending.record.added_data_crc32 = pending.running_crc32;
            pending.record.fix()?;
            let bytes = pending.record.encode()?;

            let end = self.stream.stream_position().map_err(KcfError::Write)?;
            self.stream.seek(SeekFrom::Start(record_offset)).map_err(KcfError::Write)?;
            self.stream.write_all(&bytes).map_err(KcfError::Write)?;
            self.stream.seek(SeekFrom::Start(end)).map_err(KcfError::Write)?;
            debug!(
                "backpatched record at {record_offset}: added_size={} crc={:#010x}",
                pending.written, pending.running_crc32
            );
        }

        self.pending = None;
        self.mode = Mode::Writing(WriterState::AtRecord);
        Ok(())
    }

    /// Start a record whose payload will be streamed through the returned
    /// writer.  The record must declare an added size (0 for unknown).
    pub fn streamed_write(&mut self, record: &mut Record) -> Result<StreamedWrite<'_, S>> {
        if !record.has_added_size() {
            return Err(KcfError::InvalidParameter(
                "streamed record must declare an added size".into(),
            ));
        }
        self.write_record(record)?;
        Ok(StreamedWrite { archive: self })
    }
}
