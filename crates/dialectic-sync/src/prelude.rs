//! Common imports for typical synchronizer usage.
pub use crate::{
    AgentId, AgentSpec, AgentView, ChatTransport, Coordinator, Exchange, GenerationConfig,
    HistoryEntry, HistoryStore, MemoryHistory, StreamFailure, StreamState, SyncConfig, SyncError,
};
