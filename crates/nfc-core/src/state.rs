//! Scan state and cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Phase of the scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPhase {
    /// Between cycles.
    #[default]
    Idle,
    /// Polling for a target.
    Selecting,
    /// Reading the selected card.
    Reading,
    /// Writing the selected card.
    Writing,
    /// Handing a result to the consumer.
    Reporting,
    /// Session torn down.
    Stopped,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPhase::Idle => write!(f, "Idle"),
            ScanPhase::Selecting => write!(f, "Selecting"),
            ScanPhase::Reading => write!(f, "Reading"),
            ScanPhase::Writing => write!(f, "Writing"),
            ScanPhase::Reporting => write!(f, "Reporting"),
            ScanPhase::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Cooperative cancellation flag shared between a session and its worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` for the first request only.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Phase shared between the worker and session handles.
#[derive(Debug, Default)]
pub struct PhaseCell {
    phase: Mutex<ScanPhase>,
}

impl PhaseCell {
    pub fn get(&self) -> ScanPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `to`, returning the previous phase.
    pub fn goto(&self, to: ScanPhase) -> ScanPhase {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        let from = *phase;
        if from != to {
            tracing::trace!(from = %from, to = %to, "Phase transition");
        }
        *phase = to;
        from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_once() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_phase_cell() {
        let cell = PhaseCell::default();
        assert_eq!(cell.get(), ScanPhase::Idle);
        assert_eq!(cell.goto(ScanPhase::Reading), ScanPhase::Idle);
        assert_eq!(cell.goto(ScanPhase::Reporting), ScanPhase::Reading);
        assert_eq!(cell.get(), ScanPhase::Reporting);
    }
}
