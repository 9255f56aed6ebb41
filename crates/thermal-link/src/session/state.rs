use std::fmt;

use serde::Serialize;

/// Connection and print lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PrinterState {
    Disconnected,
    /// Link open and paired; readiness handshake pending.
    Connected,
    Idle,
    Printing,
    PrintingPaused,
    PrintingCompleted,
    Error,
}

impl PrinterState {
    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: PrinterState) -> bool {
        use PrinterState::*;
        matches!(
            (self, to),
            (_, Disconnected)
                | (Disconnected, Connected)
                | (Connected, Idle)
                | (Idle, Printing)
                | (Printing, PrintingCompleted | PrintingPaused | Error | Idle)
                | (PrintingPaused, Printing | Error | Idle)
                | (PrintingCompleted, Idle)
                | (Error, Idle)
        )
    }

    /// Whether a session is established and accepting queued commands.
    pub fn is_ready(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connected)
    }

    pub fn is_printing(self) -> bool {
        matches!(self, Self::Printing | Self::PrintingPaused)
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Idle => "idle",
            Self::Printing => "printing",
            Self::PrintingPaused => "paused",
            Self::PrintingCompleted => "completed",
            Self::Error => "in error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::PrinterState::*;
    use super::*;

    const ALL: [PrinterState; 7] = [
        Disconnected,
        Connected,
        Idle,
        Printing,
        PrintingPaused,
        PrintingCompleted,
        Error,
    ];

    #[test]
    fn every_state_can_disconnect() {
        for s in ALL {
            assert!(s.can_transition_to(Disconnected), "{s:?}");
        }
    }

    #[test]
    fn print_lifecycle_edges() {
        assert!(Disconnected.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Printing));
        assert!(Printing.can_transition_to(PrintingCompleted));
        assert!(Printing.can_transition_to(PrintingPaused));
        assert!(PrintingPaused.can_transition_to(Printing));
        assert!(PrintingCompleted.can_transition_to(Idle));
        assert!(Error.can_transition_to(Idle));
    }

    #[test]
    fn illegal_edges_are_refused() {
        assert!(!Disconnected.can_transition_to(Idle));
        assert!(!Disconnected.can_transition_to(Printing));
        assert!(!Connected.can_transition_to(Printing));
        assert!(!Idle.can_transition_to(PrintingCompleted));
        assert!(!PrintingCompleted.can_transition_to(Printing));
    }

    #[test]
    fn readiness() {
        assert!(!Disconnected.is_ready());
        assert!(!Connected.is_ready());
        assert!(Idle.is_ready());
        assert!(Error.is_ready());
        assert!(PrintingPaused.is_printing());
    }
}
