//! Byte-order, hex and hardware-address helpers.
//!
//! All functions are pure; out-of-bounds access and malformed input are
//! reported as errors rather than panics.

use crate::{PrinterError, Result};

/// Read a big-endian `u16` at `offset`.
pub fn read_u16_be(buf: &[u8], offset: usize) -> Result<u16> {
    let bytes = buf
        .get(offset..offset.saturating_add(2))
        .filter(|b| b.len() == 2)
        .ok_or_else(|| offset_error(buf.len(), offset))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Write `value` as a big-endian `u16` at `offset`.
pub fn write_u16_be(buf: &mut [u8], offset: usize, value: u16) -> Result<()> {
    let len = buf.len();
    let slot = buf
        .get_mut(offset..offset.saturating_add(2))
        .filter(|b| b.len() == 2)
        .ok_or_else(|| offset_error(len, offset))?;
    slot.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

fn offset_error(len: usize, offset: usize) -> PrinterError {
    PrinterError::OutOfRange {
        what: "offset",
        value: offset as i64,
        min: 0,
        max: len as i64 - 2,
    }
}

/// Lowercase hex, two characters per byte, no separators.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Exact inverse of [`bytes_to_hex`]. Accepts either letter case.
pub fn hex_to_bytes(text: &str) -> Result<Vec<u8>> {
    hex::decode(text).map_err(|e| PrinterError::InvalidFormat(format!("{text:?}: {e}")))
}

/// Format a 6-byte hardware address as one separator-free lowercase hex group.
///
/// With `reversed`, the bytes are read back-to-front first (little-endian
/// advertised addresses).
pub fn mac_bytes_to_string(bytes: &[u8], reversed: bool) -> Result<String> {
    if bytes.len() != 6 {
        return Err(PrinterError::InvalidAddress(format!(
            "expected 6 bytes, got {}",
            bytes.len()
        )));
    }
    if reversed {
        let flipped: Vec<u8> = bytes.iter().rev().copied().collect();
        Ok(bytes_to_hex(&flipped))
    } else {
        Ok(bytes_to_hex(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_round_trips_at_every_offset() {
        let mut buf = [0u8; 6];
        for offset in 0..=4 {
            for value in [0u16, 1, 0x00ff, 0x0100, 0x1234, 0xfffe, u16::MAX] {
                write_u16_be(&mut buf, offset, value).unwrap();
                assert_eq!(read_u16_be(&buf, offset).unwrap(), value);
            }
        }
    }

    #[test]
    fn u16_full_value_range() {
        let mut buf = [0u8; 2];
        for value in 0..=u16::MAX {
            write_u16_be(&mut buf, 0, value).unwrap();
            assert_eq!(read_u16_be(&buf, 0).unwrap(), value);
        }
    }

    #[test]
    fn u16_is_big_endian() {
        let mut buf = [0u8; 3];
        write_u16_be(&mut buf, 1, 0xabcd).unwrap();
        assert_eq!(buf, [0x00, 0xab, 0xcd]);
    }

    #[test]
    fn u16_out_of_range_offsets_fail() {
        let mut buf = [0u8; 4];
        assert!(matches!(
            read_u16_be(&buf, 3),
            Err(PrinterError::OutOfRange { what: "offset", .. })
        ));
        assert!(matches!(
            write_u16_be(&mut buf, 3, 1),
            Err(PrinterError::OutOfRange { .. })
        ));
        assert!(read_u16_be(&buf, usize::MAX).is_err());
        assert!(read_u16_be(&[], 0).is_err());
        // Failed write leaves the buffer untouched.
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn hex_round_trip() {
        let samples: [&[u8]; 4] = [&[], &[0x00], &[0xde, 0xad, 0xbe, 0xef], &[0x0f, 0xf0, 0x7a]];
        for bytes in samples {
            let text = bytes_to_hex(bytes);
            assert_eq!(text.len(), bytes.len() * 2);
            assert_eq!(text, text.to_lowercase());
            assert_eq!(hex_to_bytes(&text).unwrap(), bytes);
        }
    }

    #[test]
    fn hex_rejects_malformed_input() {
        assert!(matches!(hex_to_bytes("abc"), Err(PrinterError::InvalidFormat(_))));
        assert!(matches!(hex_to_bytes("zz"), Err(PrinterError::InvalidFormat(_))));
        assert!(matches!(hex_to_bytes("0x12"), Err(PrinterError::InvalidFormat(_))));
    }

    #[test]
    fn mac_formatting() {
        let mac = [0x11, 0x22, 0x33, 0xaa, 0xbb, 0xcc];
        assert_eq!(mac_bytes_to_string(&mac, false).unwrap(), "112233aabbcc");
        assert_eq!(mac_bytes_to_string(&mac, true).unwrap(), "ccbbaa332211");
    }

    #[test]
    fn mac_wrong_length_fails() {
        assert!(matches!(
            mac_bytes_to_string(&[1, 2, 3, 4, 5], false),
            Err(PrinterError::InvalidAddress(_))
        ));
    }
}
