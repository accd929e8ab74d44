use crate::model::AgentId;

/// Errors returned by a chat transport before they are normalized into a
/// terminal stream failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Server answered with a non-success status.
    #[error("http error ({agent}): {message}")]
    Http {
        agent: AgentId,
        message: String,
        status_code: Option<u16>,
    },
    /// Connection or body read failed.
    #[error("io error ({agent}): {message}")]
    Io { agent: AgentId, message: String },
    /// Frame shape or event sequencing was invalid, or the server reported an
    /// in-band error frame.
    #[error("protocol error ({agent}): {message}")]
    Protocol { agent: AgentId, message: String },
}

impl TransportError {
    /// Creates an HTTP-level error.
    pub fn http(
        agent: impl Into<AgentId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Http {
            agent: agent.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates an I/O-level error.
    pub fn io(agent: impl Into<AgentId>, message: impl Into<String>) -> Self {
        Self::Io {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(agent: impl Into<AgentId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Returns the agent whose stream failed.
    pub fn agent(&self) -> &AgentId {
        match self {
            Self::Http { agent, .. } | Self::Io { agent, .. } | Self::Protocol { agent, .. } => {
                agent
            }
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Http { message, .. }
            | Self::Io { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

/// Terminal stream failure carried by `Terminal::Error` and `StreamState::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum StreamFailure {
    /// Network or body read failed.
    #[error("transport failure ({agent}): {message}")]
    Transport { agent: String, message: String },
    /// Server refused the request.
    #[error("http failure ({agent}): {message}")]
    Http {
        agent: String,
        message: String,
        status_code: Option<u16>,
    },
    /// Malformed stream, in-band error frame or missing end-of-stream marker.
    #[error("protocol failure ({agent}): {message}")]
    Protocol { agent: String, message: String },
    /// Persisted history could not be read before the stream opened, so no
    /// baseline exists to recognise this exchange's reply.
    #[error("history unavailable ({agent}): {message}")]
    HistoryUnavailable { agent: String, message: String },
    /// No chunk arrived within the configured stream timeout.
    #[error("stream timed out ({agent})")]
    TimedOut { agent: String },
    /// The stream was cancelled by the caller.
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamFailure {
    /// Short message suitable for an inline error label.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { message, .. }
            | Self::Http { message, .. }
            | Self::Protocol { message, .. } => message.clone(),
            Self::HistoryUnavailable { .. } => "conversation history unavailable".to_string(),
            Self::TimedOut { .. } => "response timed out".to_string(),
            Self::Cancelled => "cancelled".to_string(),
        }
    }
}

impl From<&TransportError> for StreamFailure {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Http {
                agent,
                message,
                status_code,
            } => StreamFailure::Http {
                agent: agent.to_string(),
                message: message.clone(),
                status_code: *status_code,
            },
            TransportError::Io { agent, message } => StreamFailure::Transport {
                agent: agent.to_string(),
                message: message.clone(),
            },
            TransportError::Protocol { agent, message } => StreamFailure::Protocol {
                agent: agent.to_string(),
                message: message.clone(),
            },
        }
    }
}

/// Failures reported by the history collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Server answered with a non-success status.
    #[error("storage http error ({agent}): {message}")]
    Http {
        agent: AgentId,
        message: String,
        status_code: Option<u16>,
    },
    /// Request could not be sent or the body could not be read.
    #[error("storage io error ({agent}): {message}")]
    Io { agent: AgentId, message: String },
    /// Response body did not have the expected shape.
    #[error("storage decode error ({agent}): {message}")]
    Decode { agent: AgentId, message: String },
}

/// Top-level error type for the public synchronizer API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Invalid coordinator/client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// Requested agent is not part of this coordinator.
    #[error("agent not found: {agent}")]
    AgentNotFound { agent: AgentId },
    /// History collaborator failure.
    #[error(transparent)]
    Storage(StorageError),
    /// Terminal failure returned from a started stream.
    #[error(transparent)]
    StreamFailed(StreamFailure),
    /// Operation was cancelled before a terminal result was returned.
    #[error("cancelled")]
    Cancelled,
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<StreamFailure> for SyncError {
    fn from(value: StreamFailure) -> Self {
        match value {
            StreamFailure::Cancelled => SyncError::Cancelled,
            other => SyncError::StreamFailed(other),
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(value: StorageError) -> Self {
        SyncError::Storage(value)
    }
}
