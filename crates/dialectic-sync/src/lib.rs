//! Side-by-side streaming of one question to several personas.
//!
//! A [`Coordinator`] fans a single submission out to every registered agent,
//! drives each reply stream independently, and hands finished replies over to
//! persisted history only once the history provably contains them.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dialectic_sync::http::{HttpChatTransport, HttpClientConfig, HttpHistoryStore};
//! use dialectic_sync::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SyncError> {
//! let http = HttpClientConfig::from_env()?;
//! let coordinator = Coordinator::new(
//!     vec![AgentSpec::new("plato", "Plato"), AgentSpec::new("hume", "David Hume")],
//!     Arc::new(HttpChatTransport::new(http.clone())?),
//!     Arc::new(HttpHistoryStore::new(http)?),
//!     SyncConfig::default(),
//! )?;
//!
//! coordinator.submit("What is justice?");
//! coordinator.wait_until_ready().await;
//! for view in coordinator.views() {
//!     println!("{}: {}", view.agent.name, view.display_text);
//! }
//! # Ok(())
//! # }
//! ```

/// Multi-agent fan-out, submission gating, reset and delete.
pub mod coordinator;
/// Single-stream driver with cancellation.
pub mod driver;
/// Public error types.
pub mod errors;
/// Hand-off from streamed text to persisted history.
pub mod gate;
/// Persisted history contract and in-memory store.
pub mod history;
/// HTTP transport and history collaborators.
pub mod http;
/// Agent identifiers, generation settings and coordinator options.
pub mod model;
/// Global tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
mod sse;
/// Per-agent stream state machine.
pub mod state;
/// Plain-text comparison export.
pub mod transcript;
/// Streaming chat transport contract.
pub mod transport;
/// Display-ready lane snapshots.
pub mod view;

pub use coordinator::{Coordinator, Exchange};
pub use driver::{AbortHandle, DriverEvent, DriverStream, StreamDriver, Terminal};
pub use errors::{StorageError, StreamFailure, SyncError, TransportError};
pub use gate::{GateOutcome, ReconciliationGate, Verdict};
pub use history::{HistoryEntry, HistoryStore, MemoryHistory, Role};
pub use model::{AgentId, AgentSpec, GenerationConfig, SyncConfig};
pub use observability::init_observability;
pub use state::{LaneEvent, PendingReply, StreamState};
pub use transport::{ChatRequest, ChatStreamHandle, ChatTransport, TransportEvent, TransportStream};
pub use view::AgentView;
