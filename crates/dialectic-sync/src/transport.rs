use std::pin::Pin;

use futures::Stream;

use crate::errors::TransportError;
use crate::model::{AgentId, GenerationConfig};

/// One outbound chat request for a single agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    pub exchange_id: uuid::Uuid,
    pub agent: AgentId,
    pub input_text: String,
    pub generation: Option<GenerationConfig>,
}

/// Events produced by a transport stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Incremental text. Chunk boundaries carry no meaning.
    TextDelta { text: String },
    /// Explicit end-of-stream marker.
    EndOfStream,
}

/// Boxed event stream returned by a transport.
pub type TransportStream =
    Pin<Box<dyn Stream<Item = Result<TransportEvent, TransportError>> + Send + 'static>>;

/// Live connection for one request. Dropping it tears the connection down.
pub struct ChatStreamHandle {
    pub stream: TransportStream,
}

impl ChatStreamHandle {
    pub fn new(stream: impl Stream<Item = Result<TransportEvent, TransportError>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
        }
    }
}

/// Contract for the streaming chat collaborator.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Opens exactly one streaming connection for `request`.
    async fn open_stream(&self, request: ChatRequest) -> Result<ChatStreamHandle, TransportError>;
}
