use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::errors::StorageError;
use crate::model::AgentId;

/// Author of a persisted message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One persisted message as reported by the storage collaborator.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    #[serde(rename = "content", alias = "text")]
    pub text: String,
    #[serde(rename = "createdAt", alias = "persistedAt", default)]
    pub persisted_at: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            persisted_at: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Read side and delete side of the per-agent persisted conversation log.
///
/// Implementations own refresh cadence and caching; every `fetch` is treated
/// as a "refresh now" request.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Returns the ordered persisted log for `agent`.
    async fn fetch(&self, agent: &AgentId) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Number of persisted entries. Override when a cheaper count exists.
    async fn len(&self, agent: &AgentId) -> Result<usize, StorageError> {
        Ok(self.fetch(agent).await?.len())
    }

    /// Durably removes the persisted log for `agent`.
    async fn delete(&self, agent: &AgentId) -> Result<(), StorageError>;
}

/// In-process history store.
#[derive(Default)]
pub struct MemoryHistory {
    logs: RwLock<HashMap<AgentId, Vec<HistoryEntry>>>,
    failing_deletes: RwLock<HashSet<AgentId>>,
    failing_fetches: RwLock<HashSet<AgentId>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, agent: impl Into<AgentId>, entry: HistoryEntry) {
        self.logs
            .write()
            .await
            .entry(agent.into())
            .or_default()
            .push(entry);
    }

    /// Appends the user message and the agent reply the way the chat server
    /// persists one exchange.
    pub async fn record_exchange(
        &self,
        agent: impl Into<AgentId>,
        user_text: impl Into<String>,
        reply: impl Into<String>,
    ) {
        let mut logs = self.logs.write().await;
        let log = logs.entry(agent.into()).or_default();
        log.push(HistoryEntry::user(user_text));
        log.push(HistoryEntry::assistant(reply));
    }

    pub async fn entries(&self, agent: &AgentId) -> Vec<HistoryEntry> {
        self.logs
            .read()
            .await
            .get(agent)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes every later `delete` for `agent` fail.
    pub async fn fail_deletes_for(&self, agent: impl Into<AgentId>) {
        self.failing_deletes.write().await.insert(agent.into());
    }

    /// Makes `fetch`/`len` for `agent` fail until `heal_fetches_for`.
    pub async fn fail_fetches_for(&self, agent: impl Into<AgentId>) {
        self.failing_fetches.write().await.insert(agent.into());
    }

    pub async fn heal_fetches_for(&self, agent: &AgentId) {
        self.failing_fetches.write().await.remove(agent);
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistory {
    async fn fetch(&self, agent: &AgentId) -> Result<Vec<HistoryEntry>, StorageError> {
        if self.failing_fetches.read().await.contains(agent) {
            return Err(StorageError::Io {
                agent: agent.clone(),
                message: "history unavailable".into(),
            });
        }
        Ok(self.entries(agent).await)
    }

    async fn delete(&self, agent: &AgentId) -> Result<(), StorageError> {
        if self.failing_deletes.read().await.contains(agent) {
            return Err(StorageError::Http {
                agent: agent.clone(),
                message: "failed to delete messages".into(),
                status_code: Some(500),
            });
        }
        self.logs.write().await.remove(agent);
        Ok(())
    }
}
