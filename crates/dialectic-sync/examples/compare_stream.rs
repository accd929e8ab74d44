use std::sync::Arc;

use dialectic_sync::http::{HttpChatTransport, HttpClientConfig, HttpHistoryStore};
use dialectic_sync::init_observability;
use dialectic_sync::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SyncError> {
    let _ = dotenvy::dotenv();
    init_observability();

    let question = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let question = if question.trim().is_empty() {
        "What is the good life?".to_string()
    } else {
        question
    };

    let http = HttpClientConfig::from_env()?;
    let coordinator = Coordinator::new(
        vec![
            AgentSpec::new("plato", "Plato"),
            AgentSpec::new("hume", "David Hume"),
        ],
        Arc::new(HttpChatTransport::new(http.clone())?),
        Arc::new(HttpHistoryStore::new(http)?),
        SyncConfig::default(),
    )?;

    let Some(exchange) = coordinator.submit(&question) else {
        return Err(SyncError::Validation("question was not accepted".into()));
    };
    eprintln!("exchange {} submitted", exchange.id);
    coordinator.wait_until_ready().await;

    for view in coordinator.views() {
        println!("=== {} ===", view.agent.name);
        match view.error_message {
            Some(message) => println!("[error: {message}] {}", view.display_text),
            None => println!("{}", view.display_text),
        }
    }

    let transcript = coordinator.transcript(chrono::Utc::now()).await?;
    println!("\n{transcript}");
    Ok(())
}
