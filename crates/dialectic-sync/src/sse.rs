//! Server-sent-events framing for the chat stream.
//!
//! The chat endpoint writes one `data:` line per frame, separated by a blank
//! line. Payloads are `{"content": "..."}` deltas, `{"error": "..."}` failures
//! and the literal `[DONE]` end marker; anything else is ignored.

use crate::errors::TransportError;
use crate::model::AgentId;
use crate::transport::TransportEvent;

const DONE_MARKER: &str = "[DONE]";

/// One dispatched chat frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChatFrame {
    /// Joined `data:` lines of a frame, still JSON text.
    Payload(String),
    /// The `[DONE]` end marker.
    Done,
}

/// Line-oriented decoder for the chat stream.
///
/// Bytes are held until a line ends, so UTF-8 sequences and JSON payloads
/// split across chunks are reassembled. A blank line dispatches the frame.
#[derive(Default)]
pub(crate) struct ChatSseDecoder {
    line: Vec<u8>,
    data: Vec<String>,
}

impl ChatSseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<ChatFrame> {
        let mut frames = Vec::new();
        let mut rest = chunk;
        while let Some(newline) = rest.iter().position(|b| *b == b'\n') {
            self.line.extend_from_slice(&rest[..newline]);
            rest = &rest[newline + 1..];
            let line = std::mem::take(&mut self.line);
            if let Some(frame) = self.end_line(&line) {
                frames.push(frame);
            }
        }
        self.line.extend_from_slice(rest);
        frames
    }

    /// Flushes a trailing frame left without a closing blank line.
    pub fn finish(&mut self) -> Option<ChatFrame> {
        let line = std::mem::take(&mut self.line);
        if !line.is_empty() {
            let _ = self.end_line(&line);
        }
        self.dispatch()
    }

    fn end_line(&mut self, raw: &[u8]) -> Option<ChatFrame> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return self.dispatch();
        }
        let line = String::from_utf8_lossy(raw);
        // `event:`, `id:`, `retry:` and `:` comments carry nothing for chat.
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<ChatFrame> {
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        let trimmed = data.trim();
        if trimmed == DONE_MARKER {
            Some(ChatFrame::Done)
        } else if trimmed.is_empty() {
            None
        } else {
            Some(ChatFrame::Payload(data))
        }
    }
}

pub(crate) fn map_chat_frame(
    agent: &AgentId,
    frame: &ChatFrame,
) -> Result<Option<TransportEvent>, TransportError> {
    let payload = match frame {
        ChatFrame::Done => return Ok(Some(TransportEvent::EndOfStream)),
        ChatFrame::Payload(payload) => payload,
    };
    let value: serde_json::Value = serde_json::from_str(payload).map_err(|e| {
        TransportError::protocol(agent.clone(), format!("invalid SSE JSON frame: {e}"))
    })?;
    map_chat_json(agent, &value)
}

pub(crate) fn map_chat_json(
    agent: &AgentId,
    value: &serde_json::Value,
) -> Result<Option<TransportEvent>, TransportError> {
    if let Some(error) = value.get("error") {
        let message = error
            .as_str()
            .or_else(|| error.get("message").and_then(|v| v.as_str()))
            .unwrap_or("chat stream error");
        return Err(TransportError::protocol(agent.clone(), message));
    }
    match value.get("content").and_then(|v| v.as_str()) {
        Some(text) => Ok(Some(TransportEvent::TextDelta {
            text: text.to_string(),
        })),
        // trace / auditReport frames
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentId {
        AgentId::new("plato")
    }

    #[test]
    fn frames_survive_partial_chunk_boundaries() {
        let mut decoder = ChatSseDecoder::default();
        assert!(decoder.push_chunk(b"data: {\"content\":\"Hel").is_empty());
        let frames = decoder.push_chunk(b"lo\"}\n\ndata: [DO");
        assert_eq!(
            frames,
            vec![ChatFrame::Payload("{\"content\":\"Hello\"}".into())]
        );
        assert_eq!(decoder.push_chunk(b"NE]\n\n"), vec![ChatFrame::Done]);
    }

    #[test]
    fn split_multibyte_characters_are_reassembled() {
        let payload = "data: {\"content\":\"Größe\"}\n\n".as_bytes();
        let split = payload
            .iter()
            .position(|b| *b >= 0x80)
            .expect("has multibyte")
            + 1;
        let mut decoder = ChatSseDecoder::default();
        assert!(decoder.push_chunk(&payload[..split]).is_empty());
        let frames = decoder.push_chunk(&payload[split..]);
        let event = map_chat_frame(&agent(), &frames[0]).expect("maps");
        assert_eq!(
            event,
            Some(TransportEvent::TextDelta {
                text: "Größe".into()
            })
        );
    }

    #[test]
    fn crlf_comments_and_event_lines_are_tolerated() {
        let mut decoder = ChatSseDecoder::default();
        let frames = decoder
            .push_chunk(b": keep-alive\r\n\r\nevent: message\r\ndata: {\"content\":\"a\"}\r\n\r\n");
        assert_eq!(frames, vec![ChatFrame::Payload("{\"content\":\"a\"}".into())]);
    }

    #[test]
    fn multi_line_data_is_joined_with_one_leading_space_stripped() {
        let mut decoder = ChatSseDecoder::default();
        let frames = decoder.push_chunk(b"data: {\"content\":\ndata:  \"x\"}\n\n");
        assert_eq!(
            frames,
            vec![ChatFrame::Payload("{\"content\":\n \"x\"}".into())]
        );
    }

    #[test]
    fn finish_flushes_trailing_frame() {
        let mut decoder = ChatSseDecoder::default();
        assert!(decoder.push_chunk(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), Some(ChatFrame::Done));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn maps_content_done_error_and_ignores_trace() {
        let delta = map_chat_json(&agent(), &serde_json::json!({"content": " world"}))
            .expect("delta");
        assert_eq!(
            delta,
            Some(TransportEvent::TextDelta {
                text: " world".into()
            })
        );

        let trace = map_chat_json(&agent(), &serde_json::json!({"trace": {"step": 1}}))
            .expect("trace");
        assert_eq!(trace, None);

        let done = map_chat_frame(&agent(), &ChatFrame::Done).expect("done");
        assert_eq!(done, Some(TransportEvent::EndOfStream));

        let err = map_chat_json(&agent(), &serde_json::json!({"error": "Stream error"}))
            .expect_err("error frame");
        assert_eq!(err.message(), "Stream error");
    }

    #[test]
    fn invalid_json_is_a_protocol_error() {
        let err = map_chat_frame(&agent(), &ChatFrame::Payload("{not json".into()))
            .expect_err("invalid");
        assert!(matches!(err, TransportError::Protocol { .. }));
    }
}
