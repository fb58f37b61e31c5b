//! Endpoint lifecycle state.
//!
//! An endpoint is either publishing or terminally stopped:
//!
//! ```text
//!  Active ──► Stopped
//! ```
//!
//! There is no way back: a stopped endpoint stays stopped, and a new
//! server must be bound to publish under the name again.

use std::time::{Duration, Instant};

/// The lifecycle phase of a publishing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointPhase {
    /// The endpoint accepts publishes and serves consumers.
    Active {
        /// When the endpoint became active.
        since: Instant,
    },
    /// Terminal state; no further operations are valid.
    Stopped,
}

impl EndpointPhase {
    /// A freshly bound endpoint.
    pub fn new() -> Self {
        Self::Active {
            since: Instant::now(),
        }
    }

    /// Whether frames can still be published and served.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// How long the endpoint has been active. `None` once stopped.
    pub fn active_duration(&self) -> Option<Duration> {
        match self {
            Self::Active { since } => Some(since.elapsed()),
            Self::Stopped => None,
        }
    }

    /// Transition to `Stopped`.
    ///
    /// Returns `true` on the first call, `false` when the endpoint was
    /// already stopped.
    pub fn stop(&mut self) -> bool {
        match self {
            Self::Active { .. } => {
                *self = Self::Stopped;
                true
            }
            Self::Stopped => false,
        }
    }
}

impl Default for EndpointPhase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EndpointPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active { .. } => write!(f, "Active"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_active() {
        let phase = EndpointPhase::new();
        assert!(phase.is_active());
        assert!(phase.active_duration().is_some());
        assert_eq!(phase.to_string(), "Active");
    }

    #[test]
    fn stop_is_terminal_and_idempotent() {
        let mut phase = EndpointPhase::new();
        assert!(phase.stop());
        assert!(!phase.is_active());
        assert!(phase.active_duration().is_none());
        // Second stop is a no-op.
        assert!(!phase.stop());
        assert_eq!(phase, EndpointPhase::Stopped);
    }
}
