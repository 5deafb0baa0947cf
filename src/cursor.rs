//! Bounds-checked little-endian cursors over byte slices.
//!
//! Every access checks the requested span against the buffer before
//! touching it.  A failed access returns [`OutOfBounds`] and leaves the
//! cursor where it was.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::error::KcfError;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("access of {wanted} byte(s) at offset {offset} exceeds buffer of {len} byte(s)")]
pub struct OutOfBounds {
    pub offset: usize,
    pub wanted: usize,
    pub len:    usize,
}

impl From<OutOfBounds> for KcfError {
    fn from(e: OutOfBounds) -> Self {
        KcfError::InvalidData(e.to_string())
    }
}

fn span(pos: usize, wanted: usize, len: usize) -> Result<usize, OutOfBounds> {
    pos.checked_add(wanted)
        .filter(|&end| end <= len)
        .ok_or(OutOfBounds { offset: pos, wanted, len })
}

// ── Reader ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize { self.pos }

    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], OutOfBounds> {
        let end = span(self.pos, n, self.buf.len())?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, OutOfBounds> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, OutOfBounds> {
        Ok(LittleEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, OutOfBounds> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, OutOfBounds> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize { self.pos }

    fn slot(&mut self, n: usize) -> Result<&mut [u8], OutOfBounds> {
        let end   = span(self.pos, n, self.buf.len())?;
        let start = self.pos;
        self.pos  = end;
        Ok(&mut self.buf[start..end])
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), OutOfBounds> {
        self.slot(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), OutOfBounds> {
        self.slot(1)?[0] = v;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), OutOfBounds> {
        LittleEndian::write_u16(self.slot(2)?, v);
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), OutOfBounds> {
        LittleEndian::write_u32(self.slot(4)?, v);
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), OutOfBounds> {
        LittleEndian::write_u64(self.slot(8)?, v);
        Ok(())
    }
}
