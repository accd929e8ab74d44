//! Per-agent stream state machine.
//!
//! Every change to an agent's `StreamState` goes through `StreamState::apply`,
//! so illegal orderings (a delta after completion, a restart without passing
//! through `Idle`) are rejected in one place and can be tested without any
//! transport or runtime.

use std::fmt;

use crate::errors::StreamFailure;

/// A finished reply waiting to show up in persisted history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingReply {
    pub final_text: String,
    /// Persisted entry count observed before the exchange was submitted.
    pub baseline_history_len: usize,
    /// Last persisted text that grew past the baseline but did not match.
    pub mismatch: Option<String>,
}

impl PendingReply {
    pub fn new(final_text: impl Into<String>, baseline_history_len: usize) -> Self {
        Self {
            final_text: final_text.into(),
            baseline_history_len,
            mismatch: None,
        }
    }
}

/// Lifecycle of one agent's reply within one exchange.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming {
        partial_text: String,
    },
    PendingPersistence(PendingReply),
    Reconciled,
    Failed {
        partial_text: String,
        failure: StreamFailure,
    },
}

/// Coarse ordering used to check that transitions only move forward.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Stage {
    Idle = 0,
    Streaming = 1,
    Pending = 2,
    Terminal = 3,
}

/// Inputs to the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LaneEvent {
    /// A fresh exchange starts for this agent.
    Begin,
    Delta(String),
    /// The stream completed with its full text.
    Finished {
        final_text: String,
        baseline_history_len: usize,
    },
    Failed(StreamFailure),
    /// Persisted history now holds the pending reply.
    Matched,
    Reset,
}

impl LaneEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Delta(_) => "delta",
            Self::Finished { .. } => "finished",
            Self::Failed(_) => "failed",
            Self::Matched => "matched",
            Self::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: `{event}` while {from}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

impl StreamState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming { .. } => "streaming",
            Self::PendingPersistence(_) => "pending_persistence",
            Self::Reconciled => "reconciled",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Idle => Stage::Idle,
            Self::Streaming { .. } => Stage::Streaming,
            Self::PendingPersistence(_) => Stage::Pending,
            Self::Reconciled | Self::Failed { .. } => Stage::Terminal,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    pub fn pending(&self) -> Option<&PendingReply> {
        match self {
            Self::PendingPersistence(pending) => Some(pending),
            _ => None,
        }
    }

    pub(crate) fn pending_mut(&mut self) -> Option<&mut PendingReply> {
        match self {
            Self::PendingPersistence(pending) => Some(pending),
            _ => None,
        }
    }

    /// Text the renderer shows for the current exchange. Empty once history
    /// has become authoritative.
    pub fn display_text(&self) -> &str {
        match self {
            Self::Streaming { partial_text } | Self::Failed { partial_text, .. } => partial_text,
            Self::PendingPersistence(pending) => &pending.final_text,
            Self::Idle | Self::Reconciled => "",
        }
    }

    /// Applies `event` in place. The state is left untouched on error.
    pub fn apply(&mut self, event: LaneEvent) -> Result<(), InvalidTransition> {
        let invalid = InvalidTransition {
            from: self.name(),
            event: event.name(),
        };
        match event {
            LaneEvent::Reset => {
                *self = StreamState::Idle;
            }
            LaneEvent::Begin => match self {
                StreamState::Idle => {
                    *self = StreamState::Streaming {
                        partial_text: String::new(),
                    };
                }
                _ => return Err(invalid),
            },
            LaneEvent::Delta(text) => match self {
                StreamState::Streaming { partial_text } => partial_text.push_str(&text),
                _ => return Err(invalid),
            },
            LaneEvent::Finished {
                final_text,
                baseline_history_len,
            } => match self {
                StreamState::Streaming { .. } => {
                    *self = StreamState::PendingPersistence(PendingReply::new(
                        final_text,
                        baseline_history_len,
                    ));
                }
                StreamState::PendingPersistence(pending)
                    if pending.final_text == final_text
                        && pending.baseline_history_len == baseline_history_len => {}
                _ => return Err(invalid),
            },
            LaneEvent::Failed(failure) => match self {
                StreamState::Streaming { partial_text } => {
                    let partial_text = std::mem::take(partial_text);
                    *self = StreamState::Failed {
                        partial_text,
                        failure,
                    };
                }
                _ => return Err(invalid),
            },
            LaneEvent::Matched => match self {
                StreamState::PendingPersistence(_) => {
                    *self = StreamState::Reconciled;
                }
                _ => return Err(invalid),
            },
        }
        Ok(())
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pure form of `StreamState::apply`.
pub fn transition(state: &StreamState, event: LaneEvent) -> Result<StreamState, InvalidTransition> {
    let mut next = state.clone();
    next.apply(event)?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming(text: &str) -> StreamState {
        StreamState::Streaming {
            partial_text: text.into(),
        }
    }

    #[test]
    fn happy_path_moves_forward_one_stage_at_a_time() {
        let mut state = StreamState::Idle;
        let events = [
            LaneEvent::Begin,
            LaneEvent::Delta("Hel".into()),
            LaneEvent::Delta("lo".into()),
            LaneEvent::Finished {
                final_text: "Hello".into(),
                baseline_history_len: 0,
            },
            LaneEvent::Matched,
        ];
        let mut last = state.stage();
        for event in events {
            state.apply(event).expect("valid");
            assert!(state.stage() >= last);
            last = state.stage();
        }
        assert_eq!(state, StreamState::Reconciled);
    }

    #[test]
    fn deltas_append_in_order() {
        let next = transition(&streaming("Hel"), LaneEvent::Delta("lo".into())).expect("delta");
        assert_eq!(next.display_text(), "Hello");
    }

    #[test]
    fn reconciled_cannot_restart_without_idle() {
        let err = transition(&StreamState::Reconciled, LaneEvent::Begin).expect_err("rejected");
        assert_eq!(err.from, "reconciled");

        let idle = transition(&StreamState::Reconciled, LaneEvent::Reset).expect("reset");
        assert!(transition(&idle, LaneEvent::Begin).is_ok());
    }

    #[test]
    fn pending_and_failed_reject_late_stream_events() {
        let pending = StreamState::PendingPersistence(PendingReply::new("Hello", 0));
        assert!(transition(&pending, LaneEvent::Delta("x".into())).is_err());
        assert!(transition(&pending, LaneEvent::Failed(StreamFailure::Cancelled)).is_err());

        let failed = transition(&streaming("H"), LaneEvent::Failed(StreamFailure::Cancelled))
            .expect("fail");
        assert_eq!(failed.display_text(), "H");
        assert!(transition(&failed, LaneEvent::Matched).is_err());
        assert!(transition(&failed, LaneEvent::Delta("i".into())).is_err());
    }

    #[test]
    fn finished_twice_with_same_arguments_is_idempotent() {
        let finished = LaneEvent::Finished {
            final_text: "Hello".into(),
            baseline_history_len: 2,
        };
        let once = transition(&streaming("Hello"), finished.clone()).expect("once");
        let twice = transition(&once, finished).expect("twice");
        assert_eq!(once, twice);

        let different = LaneEvent::Finished {
            final_text: "Other".into(),
            baseline_history_len: 2,
        };
        assert!(transition(&once, different).is_err());
    }

    #[test]
    fn rejected_event_leaves_state_untouched() {
        let mut state = StreamState::Reconciled;
        assert!(state.apply(LaneEvent::Delta("x".into())).is_err());
        assert_eq!(state, StreamState::Reconciled);
    }
}
