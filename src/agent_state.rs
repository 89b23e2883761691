//! Remote agent state tracking
//!
//! The transport reports what the agent is doing; this module republishes
//! it as the single authoritative value for the rest of the controller.

use serde::{Deserialize, Serialize};

use crate::observer::{Observable, Subscription};

/// State reported by the remote agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// No session, or the agent left
    #[default]
    Disconnected,
    /// Session is being established
    Connecting,
    /// Agent joined and is starting up
    Initializing,
    /// Agent is waiting for user speech
    Listening,
    /// Agent is producing a response
    Thinking,
    /// Agent is speaking
    Speaking,
}

impl AgentState {
    /// Parse from the wire representation
    ///
    /// Unknown values map to `Connecting` so the UI stays in its minimal state
    /// until the agent reports something recognizable.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "disconnected" => Self::Disconnected,
            "initializing" => Self::Initializing,
            "listening" => Self::Listening,
            "thinking" => Self::Thinking,
            "speaking" => Self::Speaking,
            _ => Self::Connecting,
        }
    }

    /// Whether the agent is in a conversation (full controls apply)
    #[must_use]
    pub const fn is_conversing(self) -> bool {
        matches!(self, Self::Listening | Self::Thinking | Self::Speaking)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Initializing => write!(f, "initializing"),
            Self::Listening => write!(f, "listening"),
            Self::Thinking => write!(f, "thinking"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Pass-through of the transport's agent state
///
/// Holds only the last-seen value. Subscribers get `disconnected` (or
/// whatever is current) as soon as they subscribe.
#[derive(Clone)]
pub struct AgentStateTracker {
    state: Observable<AgentState>,
}

impl Default for AgentStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStateTracker {
    /// Create a tracker starting at `disconnected`
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Observable::new(AgentState::Disconnected),
        }
    }

    /// Current agent state
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.state.get()
    }

    /// Record a state reported by the transport
    ///
    /// Returns `true` if subscribers were notified.
    pub fn observe(&self, state: AgentState) -> bool {
        let changed = self.state.set(state);
        if changed {
            tracing::debug!(%state, "agent state changed");
        }
        changed
    }

    /// Return to `disconnected` after the session ends
    pub fn reset(&self) {
        self.observe(AgentState::Disconnected);
    }

    /// Subscribe to agent state, starting with the current value
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AgentState) + Send + Sync + 'static,
    {
        self.state.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn agent_state_roundtrip_strings() {
        for state in [
            AgentState::Disconnected,
            AgentState::Initializing,
            AgentState::Listening,
            AgentState::Thinking,
            AgentState::Speaking,
        ] {
            assert_eq!(AgentState::from_str(&state.to_string()), state);
        }
        assert_eq!(AgentState::from_str("SPEAKING"), AgentState::Speaking);
        assert_eq!(AgentState::from_str("pre-connect"), AgentState::Connecting);
    }

    #[test]
    fn agent_state_serde_is_snake_case() {
        let json = serde_json::to_string(&AgentState::Listening).unwrap();
        assert_eq!(json, "\"listening\"");
        let parsed: AgentState = serde_json::from_str("\"thinking\"").unwrap();
        assert_eq!(parsed, AgentState::Thinking);
    }

    #[test]
    fn conversing_states() {
        assert!(!AgentState::Disconnected.is_conversing());
        assert!(!AgentState::Connecting.is_conversing());
        assert!(!AgentState::Initializing.is_conversing());
        assert!(AgentState::Listening.is_conversing());
        assert!(AgentState::Thinking.is_conversing());
        assert!(AgentState::Speaking.is_conversing());
    }

    #[test]
    fn tracker_emits_initial_then_changes() {
        let tracker = AgentStateTracker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = Arc::clone(&seen);
            tracker.subscribe(move |s| seen.lock().unwrap().push(*s))
        };

        tracker.observe(AgentState::Listening);
        tracker.observe(AgentState::Listening);
        tracker.observe(AgentState::Speaking);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                AgentState::Disconnected,
                AgentState::Listening,
                AgentState::Speaking
            ]
        );
        assert_eq!(tracker.state(), AgentState::Speaking);
    }

    #[test]
    fn reset_returns_to_disconnected() {
        let tracker = AgentStateTracker::new();
        tracker.observe(AgentState::Thinking);
        tracker.reset();
        assert_eq!(tracker.state(), AgentState::Disconnected);
    }
}
