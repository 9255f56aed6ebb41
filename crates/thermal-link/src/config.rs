//! Runtime configuration: defaults, `.env` file and environment overrides.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PrinterError, Result};

/// Printer link configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    /// Fixed dot-line width of the print head.
    pub dot_width: u32,
    /// Largest write the transport accepts, in bytes.
    pub mtu: usize,
    pub scan_timeout_ms: u64,
    /// Link supervision for connect, pairing and command acknowledgment.
    pub link_timeout_ms: u64,
    /// Upper bound for a print job from `PRINT_BEGIN` to completion.
    pub print_timeout_ms: u64,
    /// Pause between consecutive writes.
    pub write_interval_ms: u64,
    pub nonce_len: usize,
    pub pairing_version: u8,
    /// Receive-side limit on a frame's declared payload length.
    pub max_frame_payload: usize,
    pub debug_logging: bool,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            dot_width: image_processor::DEFAULT_DOT_WIDTH,
            mtu: 182,
            scan_timeout_ms: 3_000,
            link_timeout_ms: 10_000,
            print_timeout_ms: 60_000,
            write_interval_ms: 20,
            nonce_len: 8,
            pairing_version: 1,
            max_frame_payload: 1024,
            debug_logging: false,
        }
    }
}

impl PrinterConfig {
    /// Load `.env` (first match among a few candidate paths), then apply
    /// `PRINTER_*` environment overrides and validate.
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparsable values keep
    /// the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        override_from(&lookup, "PRINTER_DOT_WIDTH", &mut cfg.dot_width);
        override_from(&lookup, "PRINTER_MTU", &mut cfg.mtu);
        override_from(&lookup, "PRINTER_SCAN_TIMEOUT_MS", &mut cfg.scan_timeout_ms);
        override_from(&lookup, "PRINTER_LINK_TIMEOUT_MS", &mut cfg.link_timeout_ms);
        override_from(&lookup, "PRINTER_PRINT_TIMEOUT_MS", &mut cfg.print_timeout_ms);
        override_from(&lookup, "PRINTER_WRITE_INTERVAL_MS", &mut cfg.write_interval_ms);
        override_from(&lookup, "PRINTER_NONCE_LEN", &mut cfg.nonce_len);
        override_from(&lookup, "PRINTER_PAIRING_VERSION", &mut cfg.pairing_version);
        override_from(&lookup, "PRINTER_MAX_FRAME_PAYLOAD", &mut cfg.max_frame_payload);
        if let Some(v) = lookup("PRINTER_DEBUG") {
            cfg.debug_logging = matches!(v.trim(), "true" | "1");
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        check_range("dot_width", u64::from(self.dot_width), 8, 2048)?;
        if self.dot_width % 8 != 0 {
            return Err(PrinterError::Config(format!(
                "dot_width must be a multiple of 8, got {}",
                self.dot_width
            )));
        }
        check_range("mtu", self.mtu as u64, 8, 4096)?;
        check_range("scan_timeout_ms", self.scan_timeout_ms, 100, 60_000)?;
        check_range("link_timeout_ms", self.link_timeout_ms, 100, 120_000)?;
        check_range("print_timeout_ms", self.print_timeout_ms, 1_000, 600_000)?;
        check_range("write_interval_ms", self.write_interval_ms, 0, 1_000)?;
        check_range("nonce_len", self.nonce_len as u64, 1, 32)?;
        check_range("max_frame_payload", self.max_frame_payload as u64, 16, 65_535)?;
        crate::pairing::algorithm(self.pairing_version)
            .map_err(|e| PrinterError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }

    pub fn print_timeout(&self) -> Duration {
        Duration::from_millis(self.print_timeout_ms)
    }

    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }

    /// Bytes per packed dot line.
    pub fn data_length(&self) -> usize {
        image_processor::PackedBitmap::row_bytes_for(self.dot_width)
    }
}

fn override_from<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(v) = lookup(key) {
        match v.trim().parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(key, value = %v, "Ignoring unparsable config override"),
        }
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(PrinterError::Config(format!(
            "{name} must be in {min}..={max}, got {value}"
        )))
    }
}

fn load_dotenv() {
    let candidates = [".env", "../.env"];
    for path in &candidates {
        if dotenvy::from_filename(path).is_ok() {
            tracing::info!("Loaded .env from: {path}");
            return;
        }
    }
    tracing::debug!("No .env file found, using system environment variables");
}
