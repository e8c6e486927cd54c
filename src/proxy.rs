use crate::backend::{Backend, BackendReply, ChunkStream};
use crate::error::{ProxyError, Result};
use crate::logging::{LogLevel, SharedLogger};
use crate::translate::chat_types::{ChatCompletionRequest, ChatErrorResponse};
use crate::translate::messages::response::{chat_error_to_messages, chat_to_messages};
use crate::translate::messages::streaming::MessagesStreamTranslator;
use crate::translate::messages::types::ErrorResponse;
use crate::translate::responses::response::{chat_error_to_responses, chat_to_responses};
use crate::translate::responses::streaming::ResponsesStreamTranslator;
use crate::translate::responses::types::ResponsesErrorResponse;
use crate::translate::{Dialect, EventSequencer};

use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

/// What an exchange produced: one JSON body or a live SSE event stream.
pub enum ProxyReply {
    Json(serde_json::Value),
    Stream(SseStream),
}

pub type SseStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Submit a normalized request and translate whatever comes back into `dialect`.
pub async fn forward<B: Backend>(
    backend: &B,
    dialect: Dialect,
    req: ChatCompletionRequest,
    exchange_id: &str,
    logger: &SharedLogger,
) -> Result<ProxyReply> {
    let model = req.model.clone();

    let reply = match backend.submit(req).await {
        Ok(reply) => reply,
        Err(e) => {
            logger.exchange(exchange_id, LogLevel::Error, "proxy", format!("Backend call failed: {e}"));
            return Err(e);
        }
    };

    match reply {
        BackendReply::Complete(resp) => {
            let body = match dialect {
                Dialect::Responses => {
                    let out = chat_to_responses(&resp, &model);
                    let (input, output) = out
                        .usage
                        .as_ref()
                        .map_or((0, 0), |u| (u.input_tokens, u.output_tokens));
                    log_completed(logger, exchange_id, out.output.len(), input, output);
                    serde_json::to_value(out)?
                }
                Dialect::Messages => {
                    let out = chat_to_messages(&resp, &model);
                    log_completed(
                        logger,
                        exchange_id,
                        out.content.len(),
                        out.usage.input_tokens,
                        out.usage.output_tokens,
                    );
                    serde_json::to_value(out)?
                }
            };
            Ok(ProxyReply::Json(body))
        }
        BackendReply::Stream(chunks) => {
            let stream = match dialect {
                Dialect::Responses => translate_stream(
                    chunks,
                    ResponsesStreamTranslator::new(&model),
                    exchange_id.to_string(),
                    logger.clone(),
                ),
                Dialect::Messages => translate_stream(
                    chunks,
                    MessagesStreamTranslator::new(&model),
                    exchange_id.to_string(),
                    logger.clone(),
                ),
            };
            Ok(ProxyReply::Stream(stream))
        }
    }
}

fn log_completed(logger: &SharedLogger, exchange_id: &str, items: usize, input: u64, output: u64) {
    logger.exchange(
        exchange_id,
        LogLevel::Info,
        "proxy",
        format!("Completed: items={items} in={input} out={output} tokens"),
    );
}

/// Drive one sequencer over a backend chunk stream.
///
/// A transport error ends the stream without the terminal event, so the client
/// can tell an interrupted answer from a finished one. Dropping the returned
/// stream drops the upstream with it.
pub fn translate_stream<S>(
    mut chunks: ChunkStream,
    mut sequencer: S,
    exchange_id: String,
    logger: SharedLogger,
) -> SseStream
where
    S: EventSequencer + Send + 'static,
    S::Event: Send,
{
    Box::pin(async_stream::stream! {
        for event in sequencer.start() {
            if let Some(sse) = to_sse::<S>(&event) {
                yield sse;
            }
        }

        while let Some(item) = chunks.next().await {
            let data = match item {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(exchange_id = %exchange_id, error = %e, "Backend stream failed");
                    logger.exchange(&exchange_id, LogLevel::Error, "stream", format!("Backend stream failed: {e}"));
                    return;
                }
            };

            for event in sequencer.process_raw(&data) {
                if let Some(sse) = to_sse::<S>(&event) {
                    yield sse;
                }
            }
        }

        for event in sequencer.finish() {
            if let Some(sse) = to_sse::<S>(&event) {
                yield sse;
            }
        }

        let skipped = sequencer.skipped_chunks();
        if skipped > 0 {
            logger.exchange(&exchange_id, LogLevel::Warn, "stream", format!("Skipped {skipped} undecodable chunks"));
        }
        logger.exchange(&exchange_id, LogLevel::Info, "stream", "Stream completed");
    })
}

fn to_sse<S: EventSequencer>(event: &S::Event) -> Option<SseEvent> {
    match serde_json::to_string(event) {
        Ok(data) => Some(SseEvent {
            event: S::event_name(event).to_string(),
            data,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize stream event");
            None
        }
    }
}

/// Status and dialect-shaped body for a failed exchange.
///
/// Backend error statuses pass through; everything else is a 502.
pub fn error_reply(dialect: Dialect, err: &ProxyError) -> (u16, serde_json::Value) {
    let (status, upstream) = match err {
        ProxyError::Upstream { status, body } => {
            (*status, Some(serde_json::from_str::<ChatErrorResponse>(body).map_err(|_| body)))
        }
        _ => (502, None),
    };

    let body = match (dialect, upstream) {
        (Dialect::Responses, Some(Ok(chat_err))) => to_json(chat_error_to_responses(&chat_err)),
        (Dialect::Messages, Some(Ok(chat_err))) => to_json(chat_error_to_messages(&chat_err)),
        (Dialect::Responses, Some(Err(raw))) => to_json(ResponsesErrorResponse::server_error(
            format!("Backend returned status {status}: {}", truncate(raw, 500)),
        )),
        (Dialect::Messages, Some(Err(raw))) => to_json(ErrorResponse::api_error(format!(
            "Backend returned status {status}: {}",
            truncate(raw, 500)
        ))),
        (Dialect::Responses, None) => to_json(ResponsesErrorResponse::server_error(format!("Proxy error: {err}"))),
        (Dialect::Messages, None) => to_json(ErrorResponse::api_error(format!("Proxy error: {err}"))),
    };

    (status, body)
}

/// Dialect-shaped body for a request that could not be parsed.
pub fn invalid_request_body(dialect: Dialect, message: impl Into<String>) -> serde_json::Value {
    match dialect {
        Dialect::Responses => to_json(ResponsesErrorResponse::invalid_request(message)),
        Dialect::Messages => to_json(ErrorResponse::invalid_request(message)),
    }
}

fn to_json<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
