//! Lifecycle state machine for the interrupt bridge.
//!
//! State transitions follow the setup/start/stop/teardown sequence:
//! IDLE → CONFIGURED → RUNNING ⇄ STOPPED → IDLE
//!
//! Teardown is accepted from CONFIGURED and STOPPED; a running bridge
//! must be stopped first so GPIO resources are never released while the
//! watcher thread still polls them.

use crate::error::{HubError, HubResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Lifecycle states of the interrupt bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeState {
    /// No GPIO resources held.
    #[default]
    Idle,
    /// GPIO line requested, watcher not running.
    Configured,
    /// Watcher thread running.
    Running,
    /// Watcher joined, GPIO resources still held.
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Configured => write!(f, "CONFIGURED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl BridgeState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: BridgeState) -> bool {
        use BridgeState::{Configured, Idle, Running, Stopped};

        matches!(
            (self, target),
            (Idle, Configured)
                | (Configured, Running)
                | (Running, Stopped)
                // Restart after stop reuses the same line request
                | (Stopped, Running)
                | (Configured, Idle)
                | (Stopped, Idle)
        )
    }

    /// Returns true while GPIO resources are held.
    #[must_use]
    pub fn holds_resources(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: BridgeState,
    previous: Option<BridgeState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in IDLE.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<BridgeState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: BridgeState) -> HubResult<()> {
        if self.current.can_transition_to(target) {
            debug!(from = %self.current, to = %target, "Bridge state transition");
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(HubError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}
