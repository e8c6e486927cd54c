//! API translation between the Chat Completions pivot format and the
//! Responses and Messages dialects.
//!
//! The core of the bridge: normalizes dialect requests into canonical ones,
//! projects complete canonical responses back out, and sequences streaming
//! chunks into each dialect's event protocol. All translation is pure (no I/O).

pub mod chat_types;
pub mod messages;
pub mod responses;

use serde::Serialize;

use chat_types::{ChatCompletionChunk, ChatCompletionRequest};

/// Text used for a tool result whose content collapsed to nothing.
pub const EMPTY_TOOL_RESULT: &str = "(no content)";

/// The client-facing dialect of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Responses,
    Messages,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Responses => "responses",
            Dialect::Messages => "messages",
        }
    }
}

/// Parse a raw dialect request body and normalize it into a canonical request.
///
/// Fails only when `raw` is not JSON of the dialect's request shape; once
/// parsed, normalization itself never fails.
pub fn normalize_request(dialect: Dialect, raw: &[u8]) -> serde_json::Result<ChatCompletionRequest> {
    match dialect {
        Dialect::Responses => {
            let req: responses::types::ResponsesRequest = serde_json::from_slice(raw)?;
            Ok(responses::request::responses_to_chat(&req))
        }
        Dialect::Messages => {
            let req: messages::types::MessagesRequest = serde_json::from_slice(raw)?;
            Ok(messages::request::messages_to_chat(&req))
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-exchange state machine turning canonical streaming chunks into a
/// dialect's ordered event sequence.
///
/// One instance serves exactly one stream. Call [`start`](Self::start) once,
/// feed every upstream record in arrival order, then call
/// [`finish`](Self::finish) when the upstream ends. Records fed after
/// `finish` produce nothing.
pub trait EventSequencer {
    type Event: Serialize;

    /// Opening events. Empty if the stream has already started.
    fn start(&mut self) -> Vec<Self::Event>;

    /// Translate one decoded record into zero or more events.
    fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<Self::Event>;

    /// Close whatever is still open and emit the terminal event, once.
    fn finish(&mut self) -> Vec<Self::Event>;

    /// SSE `event:` name for a translated event.
    fn event_name(event: &Self::Event) -> &'static str;

    /// Number of records discarded because they could not be decoded.
    fn skipped_chunks(&self) -> usize;

    fn record_skipped(&mut self);

    /// Decode a raw `data:` payload and translate it. Undecodable payloads are
    /// counted, logged and skipped so the rest of the stream keeps flowing.
    fn process_raw(&mut self, data: &str) -> Vec<Self::Event> {
        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => self.process_chunk(&chunk),
            Err(e) => {
                self.record_skipped();
                tracing::warn!(error = %e, payload_len = data.len(), "Skipping undecodable stream chunk");
                Vec::new()
            }
        }
    }
}
