use std::collections::VecDeque;
use std::fmt::Display;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::{SyncError, TransportError};
use crate::model::{AgentId, GenerationConfig};
use crate::sse::{ChatFrame, ChatSseDecoder, map_chat_frame};
use crate::transport::{ChatRequest, ChatStreamHandle, ChatTransport, TransportEvent};

use super::config::HttpClientConfig;

/// Streams persona replies over server-sent events.
pub struct HttpChatTransport {
    client: reqwest::Client,
    config: HttpClientConfig,
}

impl HttpChatTransport {
    pub fn new(config: HttpClientConfig) -> Result<Self, SyncError> {
        config.validate()?;
        // A total request timeout would cut long replies off; idle time is
        // bounded by `SyncConfig::stream_timeout` instead.
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build chat client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, SyncError> {
        Self::new(HttpClientConfig::from_env()?)
    }
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct ChatBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<&'a GenerationConfig>,
}

pub(crate) fn build_request_body(request: &ChatRequest) -> ChatBody<'_> {
    ChatBody {
        message: request.input_text.trim(),
        settings: request.generation.as_ref(),
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open_stream(&self, request: ChatRequest) -> Result<ChatStreamHandle, TransportError> {
        let agent = request.agent.clone();
        debug!(agent = %agent, exchange_id = %request.exchange_id, "opening chat stream");

        let response = self
            .client
            .post(self.config.chat_url(&agent))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&build_request_body(&request))
            .send()
            .await
            .map_err(|e| TransportError::io(agent.clone(), format!("chat request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::http(
                agent,
                format!("chat request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        Ok(ChatStreamHandle::new(chat_event_stream(
            agent,
            Box::pin(response.bytes_stream()),
        )))
    }
}

/// Decodes an SSE byte stream into transport events. Reading stops at the
/// end-of-stream marker.
pub(crate) fn chat_event_stream<S, E>(
    agent: AgentId,
    bytes_stream: S,
) -> impl futures::Stream<Item = Result<TransportEvent, TransportError>> + Send + 'static
where
    S: futures::Stream<Item = Result<bytes::Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    struct State<S> {
        agent: AgentId,
        bytes_stream: S,
        decoder: ChatSseDecoder,
        pending: VecDeque<TransportEvent>,
        done: bool,
    }

    fn queue_frame<S>(state: &mut State<S>, frame: &ChatFrame) -> Result<(), TransportError> {
        if let Some(event) = map_chat_frame(&state.agent, frame)? {
            if event == TransportEvent::EndOfStream {
                state.done = true;
            }
            state.pending.push_back(event);
        }
        Ok(())
    }

    stream::try_unfold(
        State {
            agent,
            bytes_stream,
            decoder: ChatSseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for frame in state.decoder.push_chunk(&chunk) {
                            queue_frame(&mut state, &frame)?;
                            if state.done {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        return Err(TransportError::io(
                            state.agent,
                            format!("chat stream read failed: {e}"),
                        ));
                    }
                    None => {
                        if let Some(frame) = state.decoder.finish() {
                            queue_frame(&mut state, &frame)?;
                        }
                        state.done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt as _;

    fn request(generation: Option<GenerationConfig>) -> ChatRequest {
        ChatRequest {
            exchange_id: uuid::Uuid::new_v4(),
            agent: AgentId::new("plato"),
            input_text: "  What is the good?  ".into(),
            generation,
        }
    }

    async fn collect(chunks: Vec<bytes::Bytes>) -> Result<Vec<TransportEvent>, TransportError> {
        let bytes = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        chat_event_stream(AgentId::new("plato"), bytes)
            .try_collect()
            .await
    }

    fn chunks(parts: &[&'static str]) -> Vec<bytes::Bytes> {
        parts
            .iter()
            .map(|part| bytes::Bytes::from_static(part.as_bytes()))
            .collect()
    }

    fn body(request: &ChatRequest) -> serde_json::Value {
        serde_json::to_value(build_request_body(request)).expect("serialize body")
    }

    #[test]
    fn body_carries_trimmed_message_and_settings() {
        let body = body(&request(Some(GenerationConfig::default())));
        assert_eq!(body["message"], "What is the good?");
        assert_eq!(body["settings"]["responseLength"], 750);
        assert_eq!(body["settings"]["selectedModel"], "zhi5");
    }

    #[test]
    fn body_omits_settings_when_unset() {
        let body = body(&request(None));
        assert!(body.get("settings").is_none());
    }

    #[tokio::test]
    async fn every_split_point_yields_the_same_events() {
        let wire: &'static [u8] = "data: {\"content\":\"Größe \"}\n\n: keep-alive\n\ndata: {\"trace\":{\"step\":1}}\n\ndata: {\"content\":\"matters\"}\n\ndata: [DONE]\n\n".as_bytes();
        let expected = vec![
            TransportEvent::TextDelta {
                text: "Größe ".into(),
            },
            TransportEvent::TextDelta {
                text: "matters".into(),
            },
            TransportEvent::EndOfStream,
        ];
        for split in 0..=wire.len() {
            let (head, tail) = wire.split_at(split);
            let parts = vec![
                bytes::Bytes::copy_from_slice(head),
                bytes::Bytes::copy_from_slice(tail),
            ];
            let events = collect(parts).await.expect("events");
            assert_eq!(events, expected, "split at {split}");
        }
    }

    #[tokio::test]
    async fn bytes_after_done_are_not_read() {
        let events = collect(chunks(&["data: [DONE]\n\n", "data: not json\n\n"]))
            .await
            .expect("events");
        assert_eq!(events, vec![TransportEvent::EndOfStream]);
    }

    #[tokio::test]
    async fn error_frame_fails_the_stream() {
        let err = collect(chunks(&[
            "data: {\"content\":\"Hel\"}\n\n",
            "data: {\"error\":\"model overloaded\"}\n\n",
        ]))
        .await
        .expect_err("error frame");
        assert!(matches!(err, TransportError::Protocol { ref message, .. } if message == "model overloaded"));
    }

    #[tokio::test]
    async fn trailing_done_without_blank_line_is_flushed() {
        let events = collect(chunks(&["data: {\"content\":\"Hi\"}\n\ndata: [DONE]"]))
            .await
            .expect("events");
        assert_eq!(events.last(), Some(&TransportEvent::EndOfStream));
    }

    #[tokio::test]
    async fn eof_without_marker_just_ends() {
        let events = collect(chunks(&["data: {\"content\":\"Hi\"}\n\n"]))
            .await
            .expect("events");
        assert_eq!(
            events,
            vec![TransportEvent::TextDelta { text: "Hi".into() }]
        );
    }

    #[tokio::test]
    #[ignore = "requires DIALECTIC_BASE_URL pointing at a running chat server"]
    async fn live_chat_stream_smoke() {
        let _ = dotenvy::dotenv();
        let transport = HttpChatTransport::from_env().expect("config");
        let handle = transport
            .open_stream(request(Some(GenerationConfig::default().response_length(50))))
            .await
            .expect("open");
        let events: Vec<_> = handle.stream.try_collect().await.expect("stream");
        assert_eq!(events.last(), Some(&TransportEvent::EndOfStream));
    }
}
