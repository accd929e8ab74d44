use std::time::Duration;

use crate::errors::SyncError;
use crate::model::AgentId;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Connection settings shared by the HTTP transport and history store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpClientConfig {
    /// Server root, for example `http://localhost:5000`.
    pub base_url: String,
    /// Connect timeout for chat streams and total timeout for history calls.
    pub timeout: Duration,
}

impl HttpClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Builds a config from `DIALECTIC_BASE_URL` and the optional
    /// `DIALECTIC_HTTP_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let base_url = lookup("DIALECTIC_BASE_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(SyncError::Config(
                "missing DIALECTIC_BASE_URL for HTTP collaborators".into(),
            ));
        }
        let mut config = Self::new(base_url.trim());
        if let Some(raw) = lookup("DIALECTIC_HTTP_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                SyncError::Config(format!("invalid DIALECTIC_HTTP_TIMEOUT_SECS: {raw}"))
            })?;
            config = config.timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SyncError> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base_url must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(SyncError::Config("timeout must be greater than 0".into()));
        }
        Ok(())
    }

    fn figure_url(&self, agent: &AgentId, leaf: &str) -> String {
        format!(
            "{}/api/figures/{}/{leaf}",
            self.base_url.trim_end_matches('/'),
            agent
        )
    }

    pub(crate) fn chat_url(&self, agent: &AgentId) -> String {
        self.figure_url(agent, "chat")
    }

    pub(crate) fn messages_url(&self, agent: &AgentId) -> String {
        self.figure_url(agent, "messages")
    }
}
