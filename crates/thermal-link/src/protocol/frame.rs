//! Frame encoding, MTU fragmentation and receive-side reassembly.

use tracing::{debug, warn};

use super::{HEADER_LEN, Opcode, crc8};
use crate::codec::{read_u16_be, write_u16_be};
use crate::{PrinterError, Result};

/// One protocol frame. The length prefix is derived from `payload` on
/// encode, so it always matches the payload byte count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl CommandFrame {
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > usize::from(u16::MAX) {
            return Err(PrinterError::OutOfRange {
                what: "frame payload length",
                value: payload.len() as i64,
                min: 0,
                max: i64::from(u16::MAX),
            });
        }
        Ok(Self { opcode, payload })
    }

    /// A frame with no payload.
    pub fn empty(opcode: Opcode) -> Self {
        Self {
            opcode,
            payload: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + self.opcode.checksum_len()
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = self.opcode.as_byte();
        // Payload length is bounded to u16 by construction.
        let len = u16::try_from(self.payload.len()).unwrap_or(u16::MAX);
        let _ = write_u16_be(&mut buf, 1, len);
        buf.extend_from_slice(&self.payload);
        if self.opcode.checksum_len() > 0 {
            buf.push(crc8(&self.payload));
        }
        buf
    }

    /// Parse exactly one frame from `bytes`.
    ///
    /// A length prefix that disagrees with the received byte count, an
    /// unknown opcode or a bad checksum is reported as `FrameCorrupt`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&op_byte, _) = bytes
            .split_first()
            .ok_or_else(|| PrinterError::FrameCorrupt("empty frame".into()))?;
        let opcode = Opcode::from_byte(op_byte)
            .ok_or_else(|| PrinterError::FrameCorrupt(format!("unknown opcode {op_byte:#04x}")))?;
        let declared = read_u16_be(bytes, 1)
            .map_err(|_| PrinterError::FrameCorrupt("truncated header".into()))?;

        let cs_len = opcode.checksum_len();
        let expected = HEADER_LEN + usize::from(declared) + cs_len;
        if bytes.len() != expected {
            return Err(PrinterError::FrameCorrupt(format!(
                "{opcode:?}: length prefix {declared} implies {expected} bytes, received {}",
                bytes.len()
            )));
        }

        let payload = &bytes[HEADER_LEN..HEADER_LEN + usize::from(declared)];
        if cs_len > 0 {
            let got = bytes[expected - 1];
            let want = crc8(payload);
            if got != want {
                return Err(PrinterError::FrameCorrupt(format!(
                    "{opcode:?}: checksum {got:#04x} != {want:#04x}"
                )));
            }
        }

        Ok(Self {
            opcode,
            payload: payload.to_vec(),
        })
    }
}

/// Split `payload` into frames of `opcode` that each fit in `mtu` bytes.
///
/// With `unit > 1`, every fragment except possibly the last carries a whole
/// number of `unit`-byte records (bitmap rows) as long as one record fits.
/// An empty payload yields a single empty frame.
pub fn fragment(opcode: Opcode, payload: &[u8], mtu: usize, unit: usize) -> Result<Vec<CommandFrame>> {
    let overhead = HEADER_LEN + opcode.checksum_len();
    let max = mtu
        .checked_sub(overhead)
        .filter(|m| *m > 0)
        .ok_or(PrinterError::OutOfRange {
            what: "mtu",
            value: mtu as i64,
            min: overhead as i64 + 1,
            max: i64::from(u16::MAX),
        })?
        .min(usize::from(u16::MAX));

    if payload.is_empty() {
        return Ok(vec![CommandFrame::empty(opcode)]);
    }

    let chunk = if unit > 1 && unit <= max {
        max - max % unit
    } else {
        max
    };

    let frames: Vec<CommandFrame> = payload
        .chunks(chunk)
        .map(|part| CommandFrame {
            opcode,
            payload: part.to_vec(),
        })
        .collect();
    debug!(?opcode, bytes = payload.len(), frames = frames.len(), chunk, "Fragmented payload");
    Ok(frames)
}

/// Receive-side parsing of transport notifications.
///
/// Every notification carries whole frames, one or more back to back. A
/// frame whose length prefix runs past the end of its notification is
/// reported as `FrameCorrupt` together with the rest of that notification.
/// Bytes that do not start with a known opcode are skipped one at a time
/// until the next frame start.
#[derive(Debug, Clone, Copy)]
pub struct FrameReader {
    max_payload: usize,
}

impl FrameReader {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Parse one notification into the frames it carries, in order.
    pub fn read(&self, chunk: &[u8]) -> Vec<Result<CommandFrame>> {
        let mut out = Vec::new();
        let mut rest = chunk;
        let mut skipped = 0usize;

        while let Some(&op_byte) = rest.first() {
            let Some(opcode) = Opcode::from_byte(op_byte) else {
                skipped += 1;
                rest = &rest[1..];
                continue;
            };
            if skipped > 0 {
                out.push(Err(corrupt(format!("skipped {skipped} bytes without a known opcode"))));
                skipped = 0;
            }

            let declared = match read_u16_be(rest, 1) {
                Ok(declared) => usize::from(declared),
                Err(_) => {
                    out.push(Err(corrupt(format!("{opcode:?}: truncated header"))));
                    break;
                }
            };
            if declared > self.max_payload {
                out.push(Err(corrupt(format!(
                    "{opcode:?}: length prefix {declared} exceeds limit {}",
                    self.max_payload
                ))));
                break;
            }

            let total = HEADER_LEN + declared + opcode.checksum_len();
            if rest.len() < total {
                out.push(Err(corrupt(format!(
                    "{opcode:?}: length prefix {declared} implies {total} bytes, notification carries {}",
                    rest.len()
                ))));
                break;
            }

            let (bytes, tail) = rest.split_at(total);
            let decoded = CommandFrame::decode(bytes);
            if let Err(e) = &decoded {
                warn!(error = %e, "Dropping corrupt frame");
            }
            out.push(decoded);
            rest = tail;
        }

        if skipped > 0 {
            out.push(Err(corrupt(format!("skipped {skipped} bytes without a known opcode"))));
        }
        out
    }
}

fn corrupt(reason: String) -> PrinterError {
    warn!(%reason, "Dropping notification bytes");
    PrinterError::FrameCorrupt(reason)
}
