//! Offline walkthrough: scripted persona replies persisted into an in-memory
//! history shortly after each stream ends.
use std::sync::Arc;
use std::time::Duration;

use dialectic_sync::init_observability;
use dialectic_sync::prelude::*;
use dialectic_sync::{ChatRequest, ChatStreamHandle, TransportError, TransportEvent};
use futures::stream;

struct ScriptedPersonas {
    history: Arc<MemoryHistory>,
}

#[async_trait::async_trait]
impl ChatTransport for ScriptedPersonas {
    async fn open_stream(&self, request: ChatRequest) -> Result<ChatStreamHandle, TransportError> {
        let reply = match request.agent.as_str() {
            "plato" => "Justice is each part of the soul doing its own work.",
            _ => "Justice is an artificial virtue born of convention.",
        };
        let history = self.history.clone();
        let agent = request.agent.clone();
        let question = request.input_text.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            history.record_exchange(agent, question, reply).await;
        });

        let mut events: Vec<Result<TransportEvent, TransportError>> = reply
            .split_inclusive(' ')
            .map(|word| {
                Ok(TransportEvent::TextDelta {
                    text: word.to_string(),
                })
            })
            .collect();
        events.push(Ok(TransportEvent::EndOfStream));
        Ok(ChatStreamHandle::new(stream::iter(events)))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SyncError> {
    init_observability();

    let history = Arc::new(MemoryHistory::new());
    let coordinator = Coordinator::new(
        vec![
            AgentSpec::new("plato", "Plato"),
            AgentSpec::new("hume", "David Hume"),
        ],
        Arc::new(ScriptedPersonas {
            history: history.clone(),
        }),
        history,
        SyncConfig::default().history_poll_interval(Duration::from_millis(50)),
    )?;

    coordinator.submit("What is justice?");
    coordinator
        .wait_for(|views| views.iter().all(|view| view.is_reconciled))
        .await;

    print!("{}", coordinator.transcript(chrono::Utc::now()).await?);
    Ok(())
}
