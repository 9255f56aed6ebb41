//! Printer command protocol.
//!
//! Every message on the wire is a length-prefixed frame:
//! `[opcode:1][length:2 BE][payload][checksum]`, where the checksum is a
//! CRC-8 over the payload for opcodes that carry one.

pub mod commands;
pub mod frame;

pub use commands::PrintJob;
pub use frame::{CommandFrame, FrameReader};

/// Opcodes understood by the printer firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Auth = 0x01,
    AuthResult = 0x02,
    QueryStatus = 0x10,
    Status = 0x11,
    SetDensity = 0x20,
    FeedPaper = 0x21,
    PrintBegin = 0x30,
    PrintData = 0x31,
    PrintEnd = 0x32,
    StopPrint = 0x33,
    PrintComplete = 0x40,
    PrintFault = 0x41,
    PrintPaused = 0x42,
    PrintResumed = 0x43,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => Self::Auth,
            0x02 => Self::AuthResult,
            0x10 => Self::QueryStatus,
            0x11 => Self::Status,
            0x20 => Self::SetDensity,
            0x21 => Self::FeedPaper,
            0x30 => Self::PrintBegin,
            0x31 => Self::PrintData,
            0x32 => Self::PrintEnd,
            0x33 => Self::StopPrint,
            0x40 => Self::PrintComplete,
            0x41 => Self::PrintFault,
            0x42 => Self::PrintPaused,
            0x43 => Self::PrintResumed,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Number of trailing checksum bytes for this opcode.
    pub fn checksum_len(self) -> usize {
        match self {
            Self::Auth | Self::PrintData => 1,
            _ => 0,
        }
    }
}

/// Size of the opcode plus length prefix.
pub const HEADER_LEN: usize = 3;

/// CRC8 lookup table used for checksum calculation.
#[rustfmt::skip]
const CRC8_TABLE: [u8; 256] = [
    0,   7,  14,   9,  28,  27,  18,  21,  56,  63,  54,  49,  36,  35,  42,  45,
  112, 119, 126, 121, 108, 107,  98, 101,  72,  79,  70,  65,  84,  83,  90,  93,
  224, 231, 238, 233, 252, 251, 242, 245, 216, 223, 214, 209, 196, 195, 202, 205,
  144, 151, 158, 153, 140, 139, 130, 133, 168, 175, 166, 161, 180, 179, 186, 189,
  199, 192, 201, 206, 219, 220, 213, 210, 255, 248, 241, 246, 227, 228, 237, 234,
  183, 176, 185, 190, 171, 172, 165, 162, 143, 136, 129, 134, 147, 148, 157, 154,
   39,  32,  41,  46,  59,  60,  53,  50,  31,  24,  17,  22,   3,   4,  13,  10,
   87,  80,  89,  94,  75,  76,  69,  66, 111, 104,  97, 102, 115, 116, 125, 122,
  137, 142, 135, 128, 149, 146, 155, 156, 177, 182, 191, 184, 173, 170, 163, 164,
  249, 254, 247, 240, 229, 226, 235, 236, 193, 198, 207, 200, 221, 218, 211, 212,
  105, 110, 103,  96, 117, 114, 123, 124,  81,  86,  95,  88,  77,  74,  67,  68,
   25,  30,  23,  16,   5,   2,  11,  12,  33,  38,  47,  40,  61,  58,  51,  52,
   78,  73,  64,  71,  82,  85,  92,  91, 118, 113, 120, 127, 106, 109, 100,  99,
   62,  57,  48,  55,  34,  37,  44,  43,   6,   1,   8,  15,  26,  29,  20,  19,
  174, 169, 160, 167, 178, 181, 188, 187, 150, 145, 152, 159, 138, 141, 132, 131,
  222, 217, 208, 215, 194, 197, 204, 203, 230, 225, 232, 239, 250, 253, 244, 243,
];

/// CRC-8 (poly 0x07) over a byte slice.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &b| CRC8_TABLE[usize::from(crc ^ b)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_round_trip_through_bytes() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op.as_byte(), byte);
            }
        }
        assert_eq!(Opcode::from_byte(0x31), Some(Opcode::PrintData));
        assert_eq!(Opcode::from_byte(0xff), None);
    }

    #[test]
    fn crc8_reference_values() {
        assert_eq!(crc8(&[]), 0);
        // CRC-8/SMBUS check value for "123456789".
        assert_eq!(crc8(b"123456789"), 0xf4);
    }

    #[test]
    fn only_auth_and_data_carry_checksums() {
        assert_eq!(Opcode::Auth.checksum_len(), 1);
        assert_eq!(Opcode::PrintData.checksum_len(), 1);
        assert_eq!(Opcode::SetDensity.checksum_len(), 0);
        assert_eq!(Opcode::Status.checksum_len(), 0);
    }
}
