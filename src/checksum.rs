//! CRC-32C (Castagnoli) as used by record headers and payloads.

/// Continue a CRC-32C computation from `seed` over `bytes`.
///
/// `crc32c(0, a ++ b) == crc32c(crc32c(0, a), b)`.
pub fn crc32c(seed: u32, bytes: &[u8]) -> u32 {
    ::crc32c::crc32c_append(seed, bytes)
}

/// Record headers store only the low half of the CRC.
pub fn truncate16(crc: u32) -> u16 {
    (crc & 0xFFFF) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_check_value() {
        assert_eq!(crc32c(0, b"123456789"), 0xE306_9283);
    }

    #[test]
    fn chaining_matches_one_shot() {
        let data = b"Hello, world!\r\n";
        let (a, b) = data.split_at(6);
        assert_eq!(crc32c(crc32c(0, a), b), crc32c(0, data));
        assert_eq!(crc32c(0, data), 0x5A69_6CE4);
    }

    #[test]
    fn empty_input_keeps_seed() {
        assert_eq!(crc32c(0, &[]), 0);
        assert_eq!(crc32c(0x1234_5678, &[]), 0x1234_5678);
    }
}
