use tracing::debug;

use crate::errors::{StorageError, SyncError};
use crate::history::{HistoryEntry, HistoryStore};
use crate::model::AgentId;

use super::config::HttpClientConfig;

/// Reads and deletes persisted conversations over HTTP.
pub struct HttpHistoryStore {
    client: reqwest::Client,
    config: HttpClientConfig,
}

impl HttpHistoryStore {
    pub fn new(config: HttpClientConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build history client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, SyncError> {
        Self::new(HttpClientConfig::from_env()?)
    }
}

async fn check_status(
    agent: &AgentId,
    response: reqwest::Response,
    action: &str,
) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(StorageError::Http {
        agent: agent.clone(),
        message: format!("{action} failed with status {status}: {body}"),
        status_code: Some(status.as_u16()),
    })
}

pub(crate) fn decode_entries(agent: &AgentId, body: &[u8]) -> Result<Vec<HistoryEntry>, StorageError> {
    serde_json::from_slice(body).map_err(|e| StorageError::Decode {
        agent: agent.clone(),
        message: format!("invalid history payload: {e}"),
    })
}

#[async_trait::async_trait]
impl HistoryStore for HttpHistoryStore {
    async fn fetch(&self, agent: &AgentId) -> Result<Vec<HistoryEntry>, StorageError> {
        let io = |e: reqwest::Error| StorageError::Io {
            agent: agent.clone(),
            message: format!("history request failed: {e}"),
        };
        let response = self
            .client
            .get(self.config.messages_url(agent))
            .send()
            .await
            .map_err(io)?;
        let response = check_status(agent, response, "history fetch").await?;
        let body = response.bytes().await.map_err(io)?;
        let entries = decode_entries(agent, &body)?;
        debug!(agent = %agent, entries = entries.len(), "history fetched");
        Ok(entries)
    }

    async fn delete(&self, agent: &AgentId) -> Result<(), StorageError> {
        let response = self
            .client
            .delete(self.config.messages_url(agent))
            .send()
            .await
            .map_err(|e| StorageError::Io {
                agent: agent.clone(),
                message: format!("history delete failed: {e}"),
            })?;
        check_status(agent, response, "history delete").await?;
        Ok(())
    }
}
