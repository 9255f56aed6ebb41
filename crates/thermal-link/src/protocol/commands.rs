//! Builders for host-to-device command frames.
//!
//! Argument validation happens before a frame is built, so an invalid
//! argument never produces any bytes.

use image_processor::PackedBitmap;

use super::frame::{CommandFrame, fragment};
use super::Opcode;
use crate::pairing::PairingChecksums;
use crate::{PrinterError, Result};

pub const DENSITY_MIN: u8 = 0;
pub const DENSITY_MAX: u8 = 6;
pub const FEED_MIN: u16 = 1;
pub const FEED_MAX: u16 = 255;

/// Pairing handshake: `nonce ‖ low ‖ high` with the checksums as ASCII hex.
pub fn auth(nonce: &[u8], checksums: &PairingChecksums) -> Result<CommandFrame> {
    let mut payload = Vec::with_capacity(nonce.len() + checksums.low.len() + checksums.high.len());
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(checksums.low.as_bytes());
    payload.extend_from_slice(checksums.high.as_bytes());
    CommandFrame::new(Opcode::Auth, payload)
}

pub fn query_status() -> CommandFrame {
    CommandFrame::empty(Opcode::QueryStatus)
}

pub fn set_density(level: u8) -> Result<CommandFrame> {
    if !(DENSITY_MIN..=DENSITY_MAX).contains(&level) {
        return Err(PrinterError::OutOfRange {
            what: "density",
            value: i64::from(level),
            min: i64::from(DENSITY_MIN),
            max: i64::from(DENSITY_MAX),
        });
    }
    CommandFrame::new(Opcode::SetDensity, vec![level])
}

/// Advance the paper by `distance` dot lines.
pub fn feed(distance: u16) -> Result<CommandFrame> {
    let level = u8::try_from(distance)
        .ok()
        .filter(|d| u16::from(*d) >= FEED_MIN)
        .ok_or(PrinterError::OutOfRange {
            what: "feed distance",
            value: i64::from(distance),
            min: i64::from(FEED_MIN),
            max: i64::from(FEED_MAX),
        })?;
    CommandFrame::new(Opcode::FeedPaper, vec![level])
}

pub fn stop() -> CommandFrame {
    CommandFrame::empty(Opcode::StopPrint)
}

/// A bitmap accepted for printing on a device with a fixed dot-line width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    bitmap: PackedBitmap,
}

impl PrintJob {
    /// Fails with `UnsupportedWidth` unless the bitmap is exactly `dot_width`
    /// pixels wide.
    pub fn new(bitmap: PackedBitmap, dot_width: u32) -> Result<Self> {
        if bitmap.width() != dot_width {
            return Err(PrinterError::UnsupportedWidth {
                expected: dot_width,
                actual: bitmap.width(),
            });
        }
        for (what, value) in [("bitmap width", bitmap.width()), ("bitmap height", bitmap.height())] {
            if value > u32::from(u16::MAX) {
                return Err(PrinterError::OutOfRange {
                    what,
                    value: i64::from(value),
                    min: 1,
                    max: i64::from(u16::MAX),
                });
            }
        }
        Ok(Self { bitmap })
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    /// Encode the full transmission: `PRINT_BEGIN`, row-aligned
    /// `PRINT_DATA` fragments, `PRINT_END`.
    pub fn into_frames(self, mtu: usize) -> Result<Vec<CommandFrame>> {
        let mut begin = Vec::with_capacity(4);
        // Both dimensions were checked against u16 in `new`.
        begin.extend_from_slice(&(self.width() as u16).to_be_bytes());
        begin.extend_from_slice(&(self.height() as u16).to_be_bytes());

        let row_bytes = self.bitmap.row_bytes();
        let data = fragment(Opcode::PrintData, self.bitmap.data(), mtu, row_bytes)?;

        let mut frames = Vec::with_capacity(data.len() + 2);
        frames.push(CommandFrame::new(Opcode::PrintBegin, begin)?);
        frames.extend(data);
        frames.push(CommandFrame::empty(Opcode::PrintEnd));
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(width: u32, height: u32) -> PackedBitmap {
        let len = PackedBitmap::row_bytes_for(width) * height as usize;
        PackedBitmap::from_packed(width, height, vec![0x5a; len]).unwrap()
    }

    #[test]
    fn density_bounds() {
        assert_eq!(set_density(0).unwrap().payload, vec![0]);
        assert_eq!(set_density(6).unwrap().payload, vec![6]);
        assert_eq!(
            set_density(7),
            Err(PrinterError::OutOfRange {
                what: "density",
                value: 7,
                min: 0,
                max: 6
            })
        );
    }

    #[test]
    fn feed_bounds() {
        assert_eq!(feed(1).unwrap().payload, vec![1]);
        assert_eq!(feed(255).unwrap().encode(), vec![0x21, 0x00, 0x01, 0xff]);
        assert!(matches!(feed(0), Err(PrinterError::OutOfRange { .. })));
        assert!(matches!(feed(256), Err(PrinterError::OutOfRange { .. })));
    }

    #[test]
    fn auth_payload_layout() {
        let sums = PairingChecksums {
            low: "3f".into(),
            high: "a0".into(),
        };
        let frame = auth(&[1, 2, 3], &sums).unwrap();
        assert_eq!(frame.opcode, Opcode::Auth);
        assert_eq!(frame.payload, vec![1, 2, 3, b'3', b'f', b'a', b'0']);
    }

    #[test]
    fn print_job_rejects_wrong_width() {
        assert_eq!(
            PrintJob::new(bitmap(200, 10), 384),
            Err(PrinterError::UnsupportedWidth {
                expected: 384,
                actual: 200
            })
        );
    }

    #[test]
    fn print_job_frame_sequence() {
        let job = PrintJob::new(bitmap(384, 200), 384).unwrap();
        let frames = job.into_frames(182).unwrap();

        let first = frames.first().unwrap();
        assert_eq!(first.opcode, Opcode::PrintBegin);
        assert_eq!(first.payload, vec![0x01, 0x80, 0x00, 0xc8]);
        assert_eq!(frames.last().unwrap().opcode, Opcode::PrintEnd);

        let data = &frames[1..frames.len() - 1];
        assert!(data.iter().all(|f| f.opcode == Opcode::PrintData));
        assert!(data.iter().all(|f| f.encoded_len() <= 182));
        assert!(data.iter().all(|f| f.payload.len() % 48 == 0));
        let total: usize = data.iter().map(|f| f.payload.len()).sum();
        assert_eq!(total, 48 * 200);
    }
}
