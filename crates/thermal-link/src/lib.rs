//! Thermal label/receipt printer control over a short-range radio link.
//!
//! Provides device discovery, challenge-response pairing, length-prefixed
//! command framing, telemetry decoding and a connection state machine that
//! serializes print/density/feed commands against a single transport channel.
//! Image rasterization lives in the `image-processor` crate and is re-exported
//! here as [`PackedBitmap`] and [`RasterOptions`].

pub mod ble;
pub mod codec;
pub mod config;
pub mod device;
pub mod events;
pub mod logging;
pub mod pairing;
pub mod protocol;
pub mod session;
pub mod status;
pub mod transport;

use std::time::Duration;

// Re-exports for convenience
pub use ble::BleTransport;
pub use config::PrinterConfig;
pub use device::{DiscoveredDevice, MacAddress};
pub use events::{PrintResult, PrinterEvent};
pub use image_processor::{PackedBitmap, RasterOptions};
pub use pairing::{PairingAlgorithm, PairingChecksums};
pub use session::{PrinterClient, PrinterState, ScanHandle};
pub use status::{ChargeState, PrinterStatus};
pub use transport::{Channel, Transport};

/// Fault reported by the device while printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DeviceFault {
    PaperOut,
    Overheat,
    LowVoltage,
    Unknown(u8),
}

impl DeviceFault {
    /// Map a `PRINT_FAULT` code to a fault kind.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::PaperOut,
            2 => Self::Overheat,
            3 => Self::LowVoltage,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PaperOut => f.write_str("out of paper"),
            Self::Overheat => f.write_str("print head overheated"),
            Self::LowVoltage => f.write_str("battery voltage too low"),
            Self::Unknown(code) => write!(f, "unknown fault code {code:#04x}"),
        }
    }
}

/// Errors that can occur during printer operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PrinterError {
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Device rejected pairing (code {0:#04x})")]
    PairingRejected(u8),

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Invalid hex string: {0}")]
    InvalidFormat(String),

    #[error("Corrupt frame: {0}")]
    FrameCorrupt(String),

    #[error("Corrupt telemetry: {0}")]
    TelemetryCorrupt(String),

    #[error("Unsupported width: printer expects {expected} dots, got {actual}")]
    UnsupportedWidth { expected: u32, actual: u32 },

    #[error("{what} out of range: {value} not in {min}..={max}")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Device fault: {0}")]
    DeviceFault(DeviceFault),

    #[error("Disconnected")]
    Disconnected,

    #[error("Cannot {operation} while printer is {state}")]
    InvalidState {
        operation: &'static str,
        state: PrinterState,
    },

    #[error("Busy: {0}")]
    Busy(&'static str),

    #[error("Print stopped by caller")]
    PrintStopped,

    #[error("Unsupported pairing algorithm version {0}")]
    UnsupportedPairingVersion(u8),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

impl PrinterError {
    /// Whether this error means the radio link itself can no longer be trusted.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable(_) | Self::Timeout(_) | Self::Disconnected
        )
    }
}

impl From<image_processor::RasterError> for PrinterError {
    fn from(err: image_processor::RasterError) -> Self {
        match err {
            image_processor::RasterError::UnsupportedWidth { expected, actual } => {
                Self::UnsupportedWidth { expected, actual }
            }
            other => Self::InvalidImage(other.to_string()),
        }
    }
}

/// Result type alias for printer operations.
pub type Result<T> = std::result::Result<T, PrinterError>;
