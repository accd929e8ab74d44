use crate::model::AgentSpec;
use crate::state::StreamState;

/// Read-only, display-ready snapshot of one agent's lane.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct AgentView {
    pub agent: AgentSpec,
    /// Live or pending text for the current exchange. Empty once persisted
    /// history is authoritative.
    pub display_text: String,
    /// Replies from earlier exchanges that are still waiting for persistence,
    /// oldest first.
    pub carried_text: Vec<String>,
    pub is_streaming: bool,
    pub is_pending_persistence: bool,
    pub is_reconciled: bool,
    pub is_failed: bool,
    pub error_message: Option<String>,
    /// Persisted history grew with a different reply than the one streamed.
    pub persistence_mismatch: bool,
}

impl AgentView {
    pub(crate) fn from_lane(agent: &AgentSpec, state: &StreamState, carried: Vec<String>) -> Self {
        let (error_message, persistence_mismatch) = match state {
            StreamState::Failed { failure, .. } => (Some(failure.user_message()), false),
            StreamState::PendingPersistence(pending) => (None, pending.mismatch.is_some()),
            _ => (None, false),
        };
        Self {
            agent: agent.clone(),
            display_text: state.display_text().to_string(),
            carried_text: carried,
            is_streaming: state.is_streaming(),
            is_pending_persistence: matches!(state, StreamState::PendingPersistence(_)),
            is_reconciled: matches!(state, StreamState::Reconciled),
            is_failed: matches!(state, StreamState::Failed { .. }),
            error_message,
            persistence_mismatch,
        }
    }
}
