//! Record-level streaming engine: reader and writer state machines.
//!
//! # Reader
//! `find_marker` → `read_record` → (`read_added_data`)* → `read_record` …
//! `skip_record` jumps over whatever is left of the current record.
//! Running out of stream at a record boundary is [`KcfError::Eof`]; anywhere
//! else it is [`KcfError::PrematureEof`].
//!
//! # Writer
//! `write_record` either completes a record or, when the record declares an
//! added size, leaves the handle at its payload.  Payload bytes go through
//! `write_added_data`; `finish_added_data` rewrites the header in place when
//! the size was unknown up front or a CRC was requested.  That rewrite needs
//! a seekable stream, so `write_record` refuses to start a payload it could
//! not backpatch.  [`StreamedWrite`] packages the three calls as one scoped
//! transaction.
//!
//! # Non-seekable streams
//! Wrap pipes and sockets in [`Sequential`].  Reading and one-shot writes
//! (`write_record_with_added_data`) never seek.

mod reader;
mod writer;

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::archive::{Archive, MAX_IO_CHUNK};
use crate::error::{KcfError, Result};

// ── Stream helpers ───────────────────────────────────────────────────────────

/// Where a short read happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadPosition {
    Boundary,
    Middle,
}

/// Read until `buf` is full or the stream ends; returns the count.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Fill `buf` completely, classifying a short read by `at`.
pub(crate) fn read_exact_at<R: Read + ?Sized>(
    reader: &mut R,
    buf:    &mut [u8],
    at:     ReadPosition,
) -> Result<()> {
    let n = read_full(reader, buf).map_err(KcfError::Read)?;
    if n == buf.len() {
        Ok(())
    } else if n == 0 && at == ReadPosition::Boundary {
        Err(KcfError::Eof)
    } else {
        Err(KcfError::PrematureEof)
    }
}

/// Consume exactly `n` bytes.  Reading rather than seeking keeps
/// truncation visible and works on pipes.
pub(crate) fn discard<R: Read + ?Sized>(reader: &mut R, n: u64) -> Result<()> {
    let skipped = io::copy(&mut reader.take(n), &mut io::sink()).map_err(KcfError::Read)?;
    if skipped < n {
        return Err(KcfError::PrematureEof);
    }
    Ok(())
}

/// `write_all` in slices of at most [`MAX_IO_CHUNK`].
pub(crate) fn write_chunked<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> Result<()> {
    for chunk in buf.chunks(MAX_IO_CHUNK) {
        writer.write_all(chunk).map_err(KcfError::Write)?;
    }
    Ok(())
}

// ── Sequential ───────────────────────────────────────────────────────────────

/// Adapter for streams that cannot seek.  Every `seek` (including a
/// position query) fails with `ErrorKind::Unsupported`.
#[derive(Debug)]
pub struct Sequential<T>(pub T);

impl<T> Sequential<T> {
    pub fn into_inner(self) -> T { self.0 }
}

impl<T: Read> Read for Sequential<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<T: Write> Write for Sequential<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<T> Seek for Sequential<T> {
    fn seek(&mut self, _: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "stream is not seekable"))
    }
}

// ── StreamedWrite ────────────────────────────────────────────────────────────

/// A record whose payload is being streamed.
///
/// Created by [`Archive::streamed_write`], which fails up front when the
/// record will need a backpatch the stream cannot perform.  Payload goes in
/// through [`Write`]; [`finish`](Self::finish) seals the record.  Bytes past
/// a declared size are dropped.  Dropping without `finish` leaves the payload
/// open; the next record written finishes it.
pub struct StreamedWrite<'a, S: Write + Seek> {
    archive: &'a mut Archive<S>,
}

impl<'a, S: Write + Seek> StreamedWrite<'a, S> {
    /// Payload bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.archive.pending.as_ref().map_or(0, |p| p.written)
    }

    pub fn finish(self) -> Result<()> {
        self.archive.finish_added_data()
    }
}

impl<'a, S: Write + Seek> Write for StreamedWrite<'a, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.archive.write_added_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.archive.stream.flush()
    }
}
