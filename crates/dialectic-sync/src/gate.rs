//! Hand-off from locally streamed text to persisted history.
//!
//! A reply is released only when the history has grown past the length
//! recorded before its exchange began *and* the newest assistant entry in the
//! grown region equals it after trimming. A differing entry never replaces the
//! streamed text: the user keeps seeing what they watched stream in.

use tracing::{debug, info, warn};

use crate::history::{HistoryEntry, Role};
use crate::model::AgentId;
use crate::state::{InvalidTransition, LaneEvent, PendingReply, StreamState};

/// Result of comparing a pending reply with a history snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// History has not grown past the baseline, or only the user message landed.
    Waiting,
    Matched,
    Mismatch { persisted: String },
}

/// Result of `ReconciliationGate::on_history_updated` for the current exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    NotPending,
    Waiting,
    Reconciled,
    Mismatch { persisted: String },
}

fn normalize(text: &str) -> &str {
    text.trim()
}

/// Compares `pending` against the newest assistant entry appended after its baseline.
pub fn evaluate(pending: &PendingReply, history: &[HistoryEntry]) -> Verdict {
    let Some(grown) = history.get(pending.baseline_history_len..) else {
        return Verdict::Waiting;
    };
    match grown.iter().rev().find(|entry| entry.role == Role::Assistant) {
        None => Verdict::Waiting,
        Some(entry) if normalize(&entry.text) == normalize(&pending.final_text) => {
            Verdict::Matched
        }
        Some(entry) => Verdict::Mismatch {
            persisted: entry.text.clone(),
        },
    }
}

fn carried_is_persisted(pending: &PendingReply, history: &[HistoryEntry]) -> bool {
    history
        .get(pending.baseline_history_len..)
        .unwrap_or_default()
        .iter()
        .any(|entry| {
            entry.role == Role::Assistant
                && normalize(&entry.text) == normalize(&pending.final_text)
        })
}

/// Per-agent reconciliation bookkeeping.
///
/// The current exchange's pending reply lives in the agent's `StreamState`;
/// the gate additionally holds replies carried over from earlier exchanges that
/// were still unsaved when a new exchange began.
#[derive(Debug)]
pub struct ReconciliationGate {
    agent: AgentId,
    carried: Vec<PendingReply>,
}

impl ReconciliationGate {
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            carried: Vec::new(),
        }
    }

    pub fn carried(&self) -> &[PendingReply] {
        &self.carried
    }

    /// Captures the finished text. Repeating the call with the same arguments
    /// changes nothing.
    pub fn enter_pending(
        &self,
        state: &mut StreamState,
        final_text: &str,
        baseline_history_len: usize,
    ) -> Result<(), InvalidTransition> {
        state.apply(LaneEvent::Finished {
            final_text: final_text.to_string(),
            baseline_history_len,
        })?;
        debug!(agent = %self.agent, baseline_history_len, "reply pending persistence");
        Ok(())
    }

    /// Feeds a fresh history snapshot to the current and carried replies.
    pub fn on_history_updated(
        &mut self,
        state: &mut StreamState,
        history: &[HistoryEntry],
    ) -> GateOutcome {
        let before = self.carried.len();
        self.carried
            .retain(|pending| !carried_is_persisted(pending, history));
        if self.carried.len() != before {
            info!(agent = %self.agent, released = before - self.carried.len(), "carried replies persisted");
        }

        let verdict = match state.pending() {
            Some(pending) => evaluate(pending, history),
            None => return GateOutcome::NotPending,
        };
        match verdict {
            Verdict::Waiting => GateOutcome::Waiting,
            Verdict::Matched => {
                if state.apply(LaneEvent::Matched).is_ok() {
                    info!(agent = %self.agent, history_len = history.len(), "reply reconciled with history");
                }
                GateOutcome::Reconciled
            }
            Verdict::Mismatch { persisted } => {
                if let Some(pending) = state.pending_mut()
                    && pending.mismatch.as_deref() != Some(persisted.as_str())
                {
                    warn!(
                        agent = %self.agent,
                        streamed_len = pending.final_text.len(),
                        persisted_len = persisted.len(),
                        "persisted reply differs from streamed reply; keeping streamed text"
                    );
                    pending.mismatch = Some(persisted.clone());
                }
                GateOutcome::Mismatch { persisted }
            }
        }
    }

    /// Keeps a still-unsaved reply visible while the next exchange starts.
    pub fn carry_over(&mut self, state: &StreamState) {
        if let Some(pending) = state.pending() {
            debug!(agent = %self.agent, "carrying unsaved reply into next exchange");
            self.carried.push(pending.clone());
        }
    }

    pub fn clear(&mut self) {
        self.carried.clear();
    }
}
