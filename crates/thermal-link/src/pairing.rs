//! Challenge-response pairing.
//!
//! The device authenticates a session from two checksums derived from its
//! hardware address and a host-generated nonce. The derivation is a
//! pluggable, versioned algorithm selected through configuration.

use std::fmt;
use std::sync::Arc;

use rand::RngCore;

use crate::codec;
use crate::device::MacAddress;
use crate::{PrinterError, Result};

/// The two checksums sent in the pairing handshake, as lowercase hex.
#[derive(Clone, PartialEq, Eq)]
pub struct PairingChecksums {
    pub low: String,
    pub high: String,
}

impl fmt::Debug for PairingChecksums {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingChecksums").finish_non_exhaustive()
    }
}

/// A checksum derivation scheme the device firmware understands.
pub trait PairingAlgorithm: Send + Sync {
    /// Version identifier used in configuration.
    fn version(&self) -> u8;

    /// Derive both checksums. `address` must be exactly 6 bytes.
    fn derive(&self, address: &[u8], nonce: &[u8]) -> Result<PairingChecksums>;
}

/// Version 1: CRC-16 (poly 0x1021) seeded from the folded address, run over
/// the nonce followed by the reversed address.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc16Mix;

const CRC16_POLY: u16 = 0x1021;

fn crc16_update(mut crc: u16, data: &[u8]) -> u16 {
    for &b in data {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn address_seed(address: &[u8; 6]) -> u16 {
    address
        .chunks(2)
        .fold(0xffff, |acc, pair| acc.rotate_left(5) ^ u16::from_be_bytes([pair[0], pair[1]]))
}

impl PairingAlgorithm for Crc16Mix {
    fn version(&self) -> u8 {
        1
    }

    fn derive(&self, address: &[u8], nonce: &[u8]) -> Result<PairingChecksums> {
        let addr = MacAddress::from_slice(address)?;
        let mut crc = crc16_update(address_seed(addr.as_bytes()), nonce);
        let reversed: Vec<u8> = addr.as_bytes().iter().rev().copied().collect();
        crc = crc16_update(crc, &reversed);

        let [high, low] = crc.to_be_bytes();
        Ok(PairingChecksums {
            low: codec::bytes_to_hex(&[low]),
            high: codec::bytes_to_hex(&[high]),
        })
    }
}

/// Resolve a configured algorithm version.
pub fn algorithm(version: u8) -> Result<Arc<dyn PairingAlgorithm>> {
    match version {
        1 => Ok(Arc::new(Crc16Mix)),
        other => Err(PrinterError::UnsupportedPairingVersion(other)),
    }
}

/// Generate a random pairing nonce.
pub fn generate_nonce(len: usize) -> Vec<u8> {
    let mut nonce = vec![0u8; len];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

/// Per-session authentication material. Held only in memory and wiped on
/// [`SessionSecret::clear`] or drop.
pub struct SessionSecret {
    nonce: Vec<u8>,
    checksums: Option<PairingChecksums>,
}

impl SessionSecret {
    pub fn new(nonce: Vec<u8>, checksums: PairingChecksums) -> Self {
        Self {
            nonce,
            checksums: Some(checksums),
        }
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn checksums(&self) -> Option<&PairingChecksums> {
        self.checksums.as_ref()
    }

    pub fn is_cleared(&self) -> bool {
        self.checksums.is_none() && self.nonce.is_empty()
    }

    pub fn clear(&mut self) {
        self.nonce.fill(0);
        self.nonce.clear();
        if let Some(mut sums) = self.checksums.take() {
            // Overwrite before the strings are freed.
            sums.low.replace_range(.., &"0".repeat(sums.low.len()));
            sums.high.replace_range(.., &"0".repeat(sums.high.len()));
        }
    }
}

impl Drop for SessionSecret {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSecret")
            .field("cleared", &self.is_cleared())
            .finish_non_exhaustive()
    }
}
