//! The six-byte archive marker that opens every KCF stream.

use std::io::{self, Read, Write};

use crate::error::{KcfError, Result};

pub const MARKER: [u8; 6] = [0x4B, 0x43, 0x21, 0x1A, 0x06, 0x00];

pub fn write_marker<W: Write + ?Sized>(writer: &mut W) -> Result<()> {
    writer.write_all(&MARKER).map_err(KcfError::Write)
}

/// Scan forward until the marker has been consumed.
///
/// Returns the number of bytes read, marker included, so a marker at the
/// very start yields 6.  Leading bytes (an SFX stub, say) are skipped.
pub fn find_marker<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    let mut window = [0u8; 6];
    let mut byte   = [0u8; 1];
    let mut consumed: u64 = 0;

    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                return Err(KcfError::InvalidFormat(format!(
                    "no archive marker in {consumed} byte(s)"
                )))
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(KcfError::Read(e)),
        }
        window.copy_within(1.., 0);
        window[5] = byte[0];
        consumed += 1;
        if consumed >= MARKER.len() as u64 && window == MARKER {
            return Ok(consumed);
        }
    }
}
