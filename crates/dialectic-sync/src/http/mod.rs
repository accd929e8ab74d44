//! HTTP collaborators for a persona chat server.
//!
//! `HttpChatTransport` streams replies from `POST /api/figures/{id}/chat`;
//! `HttpHistoryStore` reads and deletes `/api/figures/{id}/messages`.
mod config;
mod history;
mod transport;

pub use config::HttpClientConfig;
pub use history::HttpHistoryStore;
pub use transport::HttpChatTransport;
