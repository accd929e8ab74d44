use std::fmt;
use std::time::Duration;

use crate::errors::SyncError;

/// Stable identifier for one streaming persona (for example `plato`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Creates an agent id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the agent id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&AgentId> for AgentId {
    fn from(value: &AgentId) -> Self {
        value.clone()
    }
}

/// One agent participating in a comparison: its id plus the name shown to users.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AgentSpec {
    pub id: AgentId,
    pub name: String,
}

impl AgentSpec {
    pub fn new(id: impl Into<AgentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Persona generation settings forwarded with every chat request.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Target response length in words.
    pub response_length: u32,
    /// How often the persona quotes its sources (0-50).
    pub quote_frequency: u32,
    /// Backend model alias.
    pub selected_model: String,
    pub enhanced_mode: bool,
    pub dialogue_mode: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            response_length: 750,
            quote_frequency: 0,
            selected_model: "zhi5".to_string(),
            enhanced_mode: true,
            dialogue_mode: true,
        }
    }
}

impl GenerationConfig {
    pub const MAX_QUOTE_FREQUENCY: u32 = 50;

    pub fn response_length(mut self, words: u32) -> Self {
        self.response_length = words;
        self
    }

    pub fn quote_frequency(mut self, frequency: u32) -> Self {
        self.quote_frequency = frequency;
        self
    }

    pub fn selected_model(mut self, model: impl Into<String>) -> Self {
        self.selected_model = model.into();
        self
    }

    pub fn enhanced_mode(mut self, enabled: bool) -> Self {
        self.enhanced_mode = enabled;
        self
    }

    pub fn dialogue_mode(mut self, enabled: bool) -> Self {
        self.dialogue_mode = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.response_length == 0 {
            return Err(SyncError::Validation(
                "response_length must be greater than 0".into(),
            ));
        }
        if self.quote_frequency > Self::MAX_QUOTE_FREQUENCY {
            return Err(SyncError::Validation(format!(
                "quote_frequency must be at most {}",
                Self::MAX_QUOTE_FREQUENCY
            )));
        }
        if self.selected_model.trim().is_empty() {
            return Err(SyncError::Validation(
                "selected_model must not be empty".into(),
            ));
        }
        Ok(())
    }
}

const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Coordinator behavior options.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Bounded event buffer between a driver task and its consumer.
    pub stream_buffer_capacity: usize,
    /// Maximum wait for the next transport chunk before the stream fails;
    /// `None` waits forever.
    pub stream_timeout: Option<Duration>,
    /// Delay between history refreshes while a reply is pending persistence.
    pub history_poll_interval: Duration,
    /// Number of background refreshes after a stream finishes. Once exhausted
    /// the reply stays pending until `Coordinator::refresh_history` is called.
    pub history_poll_attempts: u32,
    /// Settings sent with every request; `None` lets the server decide.
    pub generation: Option<GenerationConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stream_buffer_capacity: 128,
            stream_timeout: Some(DEFAULT_STREAM_TIMEOUT),
            history_poll_interval: Duration::from_millis(500),
            history_poll_attempts: 20,
            generation: Some(GenerationConfig::default()),
        }
    }
}

impl SyncConfig {
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    /// Disables the idle timeout.
    pub fn without_stream_timeout(mut self) -> Self {
        self.stream_timeout = None;
        self
    }

    pub fn history_poll_interval(mut self, interval: Duration) -> Self {
        self.history_poll_interval = interval;
        self
    }

    pub fn history_poll_attempts(mut self, attempts: u32) -> Self {
        self.history_poll_attempts = attempts;
        self
    }

    pub fn generation(mut self, generation: Option<GenerationConfig>) -> Self {
        self.generation = generation;
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.stream_buffer_capacity == 0 {
            return Err(SyncError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if let Some(generation) = &self.generation {
            generation.validate()?;
        }
        Ok(())
    }
}
