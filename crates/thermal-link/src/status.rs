//! Telemetry decoding.
//!
//! `STATUS` payload: `[battery %][flags][charge state][density]`, followed by
//! reserved bytes that are ignored. Flags: bit0 paper present, bit1 head
//! overheated, bit2 low voltage.

use serde::Serialize;
use tracing::warn;

use crate::{PrinterError, Result};

const FLAG_PAPER: u8 = 0x01;
const FLAG_OVERHEAT: u8 = 0x02;
const FLAG_LOW_VOLTAGE: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChargeState {
    NotCharging,
    Charging,
    ChargeComplete,
}

impl ChargeState {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::NotCharging),
            1 => Some(Self::Charging),
            2 => Some(Self::ChargeComplete),
            _ => None,
        }
    }
}

/// Last-known device telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrinterStatus {
    /// Battery level, 1..=100.
    pub battery: u8,
    pub paper_present: bool,
    pub overheated: bool,
    pub low_voltage: bool,
    pub charge: ChargeState,
    /// Configured print density, 0..=6.
    pub density: u8,
}

impl PrinterStatus {
    /// Whether the device can accept a print right now.
    pub fn ready_to_print(&self) -> bool {
        self.paper_present && !self.overheated && !self.low_voltage
    }
}

fn corrupt(reason: String) -> PrinterError {
    PrinterError::TelemetryCorrupt(reason)
}

/// Decode one `STATUS` payload.
pub fn decode_status(payload: &[u8]) -> Result<PrinterStatus> {
    let [battery, flags, charge, density, ..] = *payload else {
        return Err(corrupt(format!("expected at least 4 bytes, got {}", payload.len())));
    };
    if !(1..=100).contains(&battery) {
        return Err(corrupt(format!("battery level {battery} out of range")));
    }
    let charge =
        ChargeState::from_code(charge).ok_or_else(|| corrupt(format!("charge state {charge}")))?;
    if density > crate::protocol::commands::DENSITY_MAX {
        return Err(corrupt(format!("density {density} out of range")));
    }

    Ok(PrinterStatus {
        battery,
        paper_present: flags & FLAG_PAPER != 0,
        overheated: flags & FLAG_OVERHEAT != 0,
        low_voltage: flags & FLAG_LOW_VOLTAGE != 0,
        charge,
        density,
    })
}

/// Keeps the last valid snapshot; corrupt telemetry never replaces it.
#[derive(Debug, Default)]
pub struct StatusDecoder {
    last: Option<PrinterStatus>,
}

impl StatusDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<PrinterStatus> {
        self.last
    }

    /// Decode and store a notification. Returns `Ok(Some(_))` only when the
    /// snapshot changed.
    pub fn apply(&mut self, payload: &[u8]) -> Result<Option<PrinterStatus>> {
        match decode_status(payload) {
            Ok(status) if self.last == Some(status) => Ok(None),
            Ok(status) => {
                self.last = Some(status);
                Ok(Some(status))
            }
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "Dropping telemetry");
                Err(e)
            }
        }
    }
}
