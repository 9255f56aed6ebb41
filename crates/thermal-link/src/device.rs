//! Discovered device and hardware address types.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::codec;
use crate::{PrinterError, Result};

/// A 6-byte hardware (MAC-like) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Build from a slice that must be exactly 6 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 6] = bytes.try_into().map_err(|_| {
            PrinterError::InvalidAddress(format!("expected 6 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Build from little-endian advertised bytes (stored reversed on air).
    pub fn from_reversed(bytes: &[u8]) -> Result<Self> {
        let mut addr = Self::from_slice(bytes)?;
        addr.0.reverse();
        Ok(addr)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Separator-free lowercase hex form, e.g. `112233aabbcc`.
    pub fn to_compact(&self) -> String {
        codec::bytes_to_hex(&self.0)
    }

    /// An all-zero address means the platform hides the real one.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = PrinterError;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` or `aabbccddeeff`.
    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let separators = s.len() - compact.len();
        if compact.len() != 12 || (separators != 0 && separators != 5) {
            return Err(PrinterError::InvalidAddress(s.to_string()));
        }
        let bytes = codec::hex_to_bytes(&compact)
            .map_err(|_| PrinterError::InvalidAddress(s.to_string()))?;
        Self::from_slice(&bytes)
    }
}

/// A device reported by the transport during a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredDevice {
    /// Opaque session handle, stable for the duration of a scan.
    pub id: String,
    /// Advertised display name, if any.
    pub name: Option<String>,
    /// Hardware address, if the platform exposes it.
    pub address: Option<MacAddress>,
    /// Received signal strength in dBm.
    pub rssi: i16,
}

impl DiscoveredDevice {
    pub fn new(id: impl Into<String>, name: Option<String>, address: Option<MacAddress>, rssi: i16) -> Self {
        Self {
            id: id.into(),
            name,
            address,
            rssi,
        }
    }

    /// Name for display, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.id)
    }
}
