use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Phase of a single forecast call.
///
/// `Building -> Dispatching -> Awaiting(n) -> Reconciling -> Succeeded`;
/// any non-terminal phase may move to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallPhase {
    Building,
    Dispatching,
    Awaiting { batches: usize },
    Reconciling,
    Succeeded,
    Failed { error: String },
}

impl CallPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Dispatching => "dispatching",
            Self::Awaiting { .. } => "awaiting",
            Self::Reconciling => "reconciling",
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }

    pub fn can_transition_to(&self, next: &CallPhase) -> bool {
        use CallPhase::*;
        match (self, next) {
            (s, Failed { .. }) => !s.is_terminal(),
            (Building, Dispatching)
            | (Dispatching, Awaiting { .. })
            | (Awaiting { .. }, Reconciling)
            | (Reconciling, Succeeded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Awaiting { batches } => write!(f, "awaiting({})", batches),
            Self::Failed { error } => write!(f, "failed: {}", error),
            other => f.write_str(other.name()),
        }
    }
}

/// Records the phases a call went through.
#[derive(Debug)]
pub(crate) struct PhaseTracker {
    call_id: String,
    history: Vec<CallPhase>,
}

impl PhaseTracker {
    pub fn new(call_id: impl Into<String>) -> Self {
        let call_id = call_id.into();
        debug!(call_id = %call_id, phase = "building", "forecast call started");
        Self {
            call_id,
            history: vec![CallPhase::Building],
        }
    }

    pub fn current(&self) -> &CallPhase {
        // history always holds the initial phase
        &self.history[self.history.len() - 1]
    }

    /// Move to `next`. Invalid transitions are logged and ignored.
    pub fn advance(&mut self, next: CallPhase) {
        let from = self.current();
        if !from.can_transition_to(&next) {
            warn!(
                call_id = %self.call_id,
                from = from.name(),
                to = next.name(),
                "ignoring invalid call phase transition"
            );
            return;
        }
        match &next {
            CallPhase::Failed { error } => {
                info!(call_id = %self.call_id, from = from.name(), error = %error, "forecast call failed")
            }
            _ => debug!(call_id = %self.call_id, from = from.name(), to = %next, "call phase"),
        }
        self.history.push(next);
    }

    pub fn fail(&mut self, err: &crate::Error) {
        self.advance(CallPhase::Failed {
            error: err.to_string(),
        });
    }

    pub fn into_history(self) -> Vec<CallPhase> {
        self.history
    }
}

/// Per-call statistics returned by
/// [`TimeGptClient::forecast_with_stats`](crate::TimeGptClient::forecast_with_stats).
#[derive(Debug, Clone, PartialEq)]
pub struct CallStats {
    /// Correlation id of the call, also present in its log events.
    pub call_id: String,
    pub phases: Vec<CallPhase>,
    pub series: usize,
    pub batches: usize,
    /// Endpoint calls: one per batch, two when history was requested.
    pub requests: usize,
    /// Attempts summed over all requests.
    pub attempts: u32,
    pub duration: Duration,
}

impl CallStats {
    /// Retries beyond the first attempt of each request.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(self.requests as u32)
    }
}
