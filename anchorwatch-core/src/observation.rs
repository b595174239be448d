use std::time::{Duration, SystemTime};

/// Per-invocation waiter state machine.
///
/// `Checking -> (Satisfied | Waiting)`, `Waiting -> (Checking | TimedOut | Cancelled)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    /// Evaluating the predicate. Transient: no observation is emitted in this
    /// phase, so [`WaitObservation::phase`] never returns it.
    Checking,
    Waiting,
    Satisfied,
    TimedOut,
    Cancelled,
}

impl WaitPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Satisfied | Self::TimedOut | Self::Cancelled)
    }
}

/// Observation variants emitted by a running wait.
///
/// Borrows the observed state so observers can inspect it without cloning.
pub enum WaitObservation<'a, State> {
    /// A change was observed but the predicate is still false.
    Unsatisfied {
        ts: SystemTime,
        label: &'a str,
        state: &'a State,
        message: &'a str,
    },
    Satisfied {
        ts: SystemTime,
        label: &'a str,
        checks: usize,
        notifications: usize,
    },
    TimedOut {
        ts: SystemTime,
        label: &'a str,
        elapsed: Duration,
    },
    Cancelled {
        ts: SystemTime,
        label: &'a str,
        elapsed: Duration,
    },
}

impl<State> WaitObservation<'_, State> {
    /// Phase the waiter is in once this observation has been emitted.
    pub fn phase(&self) -> WaitPhase {
        match self {
            Self::Unsatisfied { .. } => WaitPhase::Waiting,
            Self::Satisfied { .. } => WaitPhase::Satisfied,
            Self::TimedOut { .. } => WaitPhase::TimedOut,
            Self::Cancelled { .. } => WaitPhase::Cancelled,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Unsatisfied { label, .. }
            | Self::Satisfied { label, .. }
            | Self::TimedOut { label, .. }
            | Self::Cancelled { label, .. } => label,
        }
    }
}
