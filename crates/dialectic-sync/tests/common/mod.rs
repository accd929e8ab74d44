#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dialectic_sync::prelude::*;
use dialectic_sync::{ChatRequest, ChatStreamHandle, StorageError, TransportError, TransportEvent};
use futures::stream;
use tokio::sync::mpsc;

pub type Item = Result<TransportEvent, TransportError>;

/// What one `open_stream` call for an agent does.
pub enum Script {
    Events(Vec<Item>),
    /// Events arrive when the test sends them.
    Channel(mpsc::UnboundedReceiver<Item>),
    OpenError(TransportError),
    /// Opens, then never yields a chunk.
    Stall,
}

pub fn reply(chunks: &[&str]) -> Script {
    let mut events: Vec<Item> = chunks
        .iter()
        .map(|chunk| {
            Ok(TransportEvent::TextDelta {
                text: chunk.to_string(),
            })
        })
        .collect();
    events.push(Ok(TransportEvent::EndOfStream));
    Script::Events(events)
}

pub fn channel() -> (mpsc::UnboundedSender<Item>, Script) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Script::Channel(rx))
}

pub fn delta(text: &str) -> Item {
    Ok(TransportEvent::TextDelta {
        text: text.to_string(),
    })
}

pub fn end() -> Item {
    Ok(TransportEvent::EndOfStream)
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<AgentId, VecDeque<Script>>>,
    opened: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, agent: &str, script: Script) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(AgentId::new(agent))
            .or_default()
            .push_back(script);
    }

    pub fn opened(&self) -> Vec<ChatRequest> {
        self.opened.lock().expect("opened lock").clone()
    }
}

#[async_trait::async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open_stream(&self, request: ChatRequest) -> Result<ChatStreamHandle, TransportError> {
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get_mut(&request.agent)
            .and_then(VecDeque::pop_front);
        let agent = request.agent.clone();
        self.opened.lock().expect("opened lock").push(request);
        match script {
            Some(Script::Events(events)) => Ok(ChatStreamHandle::new(stream::iter(events))),
            Some(Script::Channel(rx)) => Ok(ChatStreamHandle::new(stream::unfold(
                rx,
                |mut rx| async move { rx.recv().await.map(|item| (item, rx)) },
            ))),
            Some(Script::OpenError(err)) => Err(err),
            Some(Script::Stall) => Ok(ChatStreamHandle::new(stream::pending())),
            None => Err(TransportError::protocol(agent, "no script queued")),
        }
    }
}

/// History whose first `failures` length lookups fail.
pub struct FlakyLenHistory {
    inner: Arc<MemoryHistory>,
    failures: AtomicU32,
}

impl FlakyLenHistory {
    pub fn new(inner: Arc<MemoryHistory>, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: AtomicU32::new(failures),
        })
    }
}

#[async_trait::async_trait]
impl HistoryStore for FlakyLenHistory {
    async fn fetch(&self, agent: &AgentId) -> Result<Vec<HistoryEntry>, StorageError> {
        self.inner.fetch(agent).await
    }

    async fn len(&self, agent: &AgentId) -> Result<usize, StorageError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Io {
                agent: agent.clone(),
                message: "timed out".into(),
            });
        }
        self.inner.len(agent).await
    }

    async fn delete(&self, agent: &AgentId) -> Result<(), StorageError> {
        self.inner.delete(agent).await
    }
}

pub fn agents() -> Vec<AgentSpec> {
    vec![
        AgentSpec::new("plato", "Plato"),
        AgentSpec::new("hume", "David Hume"),
    ]
}

pub fn test_config() -> SyncConfig {
    SyncConfig::default()
        .history_poll_interval(Duration::from_millis(10))
        .history_poll_attempts(3)
}

pub fn coordinator(
    transport: Arc<ScriptedTransport>,
    history: Arc<MemoryHistory>,
) -> Coordinator {
    Coordinator::new(agents(), transport, history, test_config()).expect("coordinator")
}

/// Waits (bounded) until `predicate` holds for the coordinator's views.
pub async fn eventually(coordinator: &Coordinator, predicate: impl Fn(&[AgentView]) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), coordinator.wait_for(predicate))
        .await
        .expect("condition not reached in time");
}

pub fn view(coordinator: &Coordinator, agent: &str) -> AgentView {
    coordinator
        .view(&AgentId::new(agent))
        .expect("registered agent")
}

pub fn plato() -> AgentId {
    AgentId::new("plato")
}

pub fn hume() -> AgentId {
    AgentId::new("hume")
}
