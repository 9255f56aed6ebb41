//! Events published to subscribers of a [`PrinterClient`](crate::PrinterClient).

use crate::device::DiscoveredDevice;
use crate::session::PrinterState;
use crate::status::PrinterStatus;
use crate::PrinterError;

/// Final outcome of one `print` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintResult {
    pub job_id: u64,
    pub outcome: Result<(), PrinterError>,
}

impl PrintResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&PrinterError> {
        self.outcome.as_ref().err()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrinterEvent {
    DeviceDiscovered(DiscoveredDevice),
    StatusChanged(PrinterStatus),
    StateChanged {
        from: PrinterState,
        to: PrinterState,
    },
    PrintFinished(PrintResult),
    /// Devices still connected when the host process resumed.
    Restored(Vec<DiscoveredDevice>),
}
