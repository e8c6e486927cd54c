use dialect_bridge::backend::{chunk_stream_from, Backend, BackendReply};
use dialect_bridge::config::{BackendConfig, BridgeConfig};
use dialect_bridge::logging::SharedLogger;
use dialect_bridge::translate::chat_types::*;
use dialect_bridge::translate::messages::streaming::MessagesStreamTranslator;
use dialect_bridge::translate::responses::streaming::ResponsesStreamTranslator;
use dialect_bridge::{build_router, AppState, EventSequencer, HttpBackend, ProxyError};

use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

// ────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────

/// Scripted backend: answers every request with the same text, streamed or
/// not according to the request, and remembers what it was asked.
struct MockBackend {
    text: String,
    fail_with: Option<(u16, String)>,
    seen: Mutex<Vec<ChatCompletionRequest>>,
}

impl MockBackend {
    fn replying(text: &str) -> Self {
        Self {
            text: text.to_string(),
            fail_with: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing(status: u16, body: &str) -> Self {
        Self {
            fail_with: Some((status, body.to_string())),
            ..Self::replying("")
        }
    }
}

impl Backend for MockBackend {
    async fn submit(&self, req: ChatCompletionRequest) -> dialect_bridge::Result<BackendReply> {
        let streaming = req.is_streaming();
        self.seen.lock().unwrap().push(req);

        if let Some((status, body)) = &self.fail_with {
            return Err(ProxyError::upstream(*status, body.clone()));
        }

        if streaming {
            let mut chunks = Vec::new();
            for word in self.text.split_inclusive(' ') {
                chunks.push(Ok(text_chunk(word, None)));
            }
            chunks.push(Ok(text_chunk("", Some("stop"))));
            chunks.push(Ok(usage_chunk(7, 3)));
            return Ok(BackendReply::Stream(chunk_stream_from(chunks)));
        }

        Ok(BackendReply::Complete(ChatCompletionResponse {
            id: "chatcmpl-mock".to_string(),
            object: "chat.completion".to_string(),
            created: 1_700_000_000,
            model: "backend-model".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: Role::Assistant,
                    content: Some(ChatContent::Text(self.text.clone())),
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 7,
                completion_tokens: 3,
                total_tokens: 99,
            }),
        }))
    }
}

fn text_chunk(content: &str, finish: Option<&str>) -> String {
    serde_json::json!({
        "id": "chatcmpl-stream",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": finish}],
    })
    .to_string()
}

fn usage_chunk(prompt: u64, completion: u64) -> String {
    serde_json::json!({
        "id": "chatcmpl-stream",
        "choices": [],
        "usage": {"prompt_tokens": prompt, "completion_tokens": completion, "total_tokens": prompt + completion},
    })
    .to_string()
}

async fn spawn_bridge<B: Backend>(backend: B) -> (SocketAddr, Arc<AppState<B>>) {
    let state = Arc::new(AppState {
        backend,
        logger: SharedLogger::disabled(),
    });

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Split an SSE body into `(event, data)` pairs.
fn parse_sse(body: &str) -> Vec<(String, serde_json::Value)> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut event = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = serde_json::from_str(v.trim()).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────
// Sequencers driven directly
// ────────────────────────────────────────────────────────────────

#[test]
fn test_responses_sequencer_over_chunk_stream() {
    let chunks = chunk_stream_from(vec![
        Ok(text_chunk("Hello", None)),
        Ok(text_chunk(" world", Some("stop"))),
    ]);

    let mut translator = ResponsesStreamTranslator::new("m");
    let names = tokio_test::block_on(async {
        let mut names: Vec<&'static str> = translator
            .start()
            .iter()
            .map(ResponsesStreamTranslator::event_name)
            .collect();
        let payloads: Vec<_> = chunks.collect().await;
        for payload in payloads {
            for event in translator.process_raw(&payload.unwrap()) {
                names.push(ResponsesStreamTranslator::event_name(&event));
            }
        }
        for event in translator.finish() {
            names.push(ResponsesStreamTranslator::event_name(&event));
        }
        names
    });

    assert_eq!(
        names,
        vec![
            "response.created",
            "response.output_text.delta",
            "response.output_text.delta",
            "response.output_text.done",
            "response.completed",
        ]
    );
    assert_eq!(translator.response_id(), "resp_stream");
}

#[test]
fn test_messages_sequencer_counts_skipped_chunks() {
    let mut translator = MessagesStreamTranslator::new("m");
    translator.start();

    assert!(translator.process_raw("{broken").is_empty());
    assert!(!translator.process_raw(&text_chunk("ok", None)).is_empty());
    assert_eq!(translator.skipped_chunks(), 1);

    let last = translator.finish();
    assert_eq!(
        MessagesStreamTranslator::event_name(last.last().unwrap()),
        "message_stop"
    );
}

// ────────────────────────────────────────────────────────────────
// Full server with a mock backend
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let (addr, _) = spawn_bridge(MockBackend::replying("x")).await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_responses_json_roundtrip() {
    let (addr, state) = spawn_bridge(MockBackend::replying("4")).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/responses"))
        .json(&serde_json::json!({
            "model": "m",
            "instructions": "Answer tersely.",
            "input": "2+2?",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "response");
    assert_eq!(body["id"], "resp_mock");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["output_text"], "4");
    assert_eq!(body["output"][0]["type"], "message");
    assert_eq!(body["usage"]["total_tokens"], 10);

    let seen = state.backend.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].messages.len(), 2);
    assert_eq!(seen[0].messages[0].role, Role::System);
    assert_eq!(seen[0].messages[1].content, Some(ChatContent::Text("2+2?".into())));
    assert!(!seen[0].is_streaming());
}

#[tokio::test]
async fn test_responses_streaming_roundtrip() {
    let (addr, state) = spawn_bridge(MockBackend::replying("Hello world")).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/responses"))
        .json(&serde_json::json!({"model": "m", "input": "hi", "stream": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let events = parse_sse(&resp.text().await.unwrap());
    let names: Vec<&str> = events.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(names.first(), Some(&"response.created"));
    assert_eq!(names.last(), Some(&"response.completed"));
    assert_eq!(names.iter().filter(|n| **n == "response.output_text.done").count(), 1);

    let (_, completed) = events.last().unwrap();
    assert_eq!(completed["response"]["output_text"], "Hello world");
    assert_eq!(completed["response"]["usage"]["input_tokens"], 7);

    let seqs: Vec<u64> = events
        .iter()
        .map(|(_, d)| d["sequence_number"].as_u64().unwrap())
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    let seen = state.backend.seen.lock().unwrap();
    assert_eq!(
        seen[0].stream_options,
        Some(StreamOptions { include_usage: true })
    );
}

#[tokio::test]
async fn test_messages_json_roundtrip() {
    let (addr, _) = spawn_bridge(MockBackend::replying("pong")).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/messages"))
        .json(&serde_json::json!({
            "model": "m",
            "max_tokens": 30,
            "messages": [{"role": "user", "content": "Say 'pong'"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["id"], "msg_mock");
    assert_eq!(body["content"][0]["text"], "pong");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"]["output_tokens"], 3);
}

#[tokio::test]
async fn test_messages_streaming_roundtrip() {
    let (addr, _) = spawn_bridge(MockBackend::replying("one two")).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/messages"))
        .json(&serde_json::json!({
            "model": "m",
            "max_tokens": 30,
            "stream": true,
            "messages": [{"role": "user", "content": "count"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let events = parse_sse(&resp.text().await.unwrap());
    let names: Vec<&str> = events.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "ping",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    let (_, delta) = &events[6];
    assert_eq!(delta["delta"]["stop_reason"], "end_turn");
    assert_eq!(delta["usage"]["output_tokens"], 3);
}

#[tokio::test]
async fn test_invalid_body_is_bad_request() {
    let (addr, state) = spawn_bridge(MockBackend::replying("x")).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .header("content-type", "application/json")
        .body("{\"model\": 5}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let resp = client
        .post(format!("http://{addr}/v1/responses"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert!(state.backend.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upstream_error_keeps_status() {
    let (addr, _) = spawn_bridge(MockBackend::failing(
        429,
        r#"{"error":{"message":"Rate limit reached","type":"rate_limit_exceeded"}}"#,
    ))
    .await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/messages"))
        .json(&serde_json::json!({
            "model": "m",
            "max_tokens": 5,
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 429);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["message"], "Rate limit reached");
}

// ────────────────────────────────────────────────────────────────
// HttpBackend against a fake Chat Completions server
// ────────────────────────────────────────────────────────────────

async fn fake_completions(headers: HeaderMap, body: axum::body::Bytes) -> axum::response::Response {
    let req: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(headers.get("authorization").is_none());

    if req["model"] == "broken" {
        return (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "overloaded",
        )
            .into_response();
    }

    if req["stream"] == true {
        let sse = format!(
            "data: {}\n\ndata: {}\n\ndata: not-json\n\ndata: {}\n\ndata: [DONE]\n\n",
            text_chunk("Hi", None),
            text_chunk(" there", Some("stop")),
            usage_chunk(2, 2),
        );
        return ([("content-type", "text/event-stream")], sse).into_response();
    }

    axum::Json(serde_json::json!({
        "id": "chatcmpl-http",
        "object": "chat.completion",
        "created": 1,
        "model": "upstream",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"London\"}"}
                }]
            },
            "finish_reason": "tool_calls"
        }]
    }))
    .into_response()
}

async fn spawn_fake_upstream() -> SocketAddr {
    let app = axum::Router::new().route("/v1/chat/completions", axum::routing::post(fake_completions));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn http_backend(upstream: SocketAddr) -> HttpBackend {
    HttpBackend::from_config(&BridgeConfig {
        port: 0,
        backend: BackendConfig {
            base_url: format!("http://{upstream}/v1"),
            api_key_env: None,
            timeout_secs: 10,
        },
    })
    .unwrap()
}

#[tokio::test]
async fn test_http_backend_tool_call_projection() {
    let upstream = spawn_fake_upstream().await;
    let (addr, _) = spawn_bridge(http_backend(upstream)).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/responses"))
        .json(&serde_json::json!({
            "model": "m",
            "input": "weather?",
            "tools": [{"type": "function", "name": "get_weather", "parameters": {"type": "object"}}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let output = body["output"].as_array().unwrap();
    assert_eq!(output.len(), 1);
    assert_eq!(output[0]["type"], "function_call");
    assert_eq!(output[0]["call_id"], "call_1");
    assert_eq!(output[0]["arguments"], "{\"city\":\"London\"}");
    assert_eq!(body["output_text"], "");
}

#[tokio::test]
async fn test_http_backend_streaming_skips_bad_chunks() {
    let upstream = spawn_fake_upstream().await;
    let (addr, _) = spawn_bridge(http_backend(upstream)).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/responses"))
        .json(&serde_json::json!({"model": "m", "input": "hi", "stream": true}))
        .send()
        .await
        .unwrap();

    let events = parse_sse(&resp.text().await.unwrap());
    let (name, completed) = events.last().unwrap();
    assert_eq!(name, "response.completed");
    assert_eq!(completed["response"]["id"], "resp_stream");
    assert_eq!(completed["response"]["output_text"], "Hi there");
    assert_eq!(completed["response"]["usage"]["total_tokens"], 4);
}

#[tokio::test]
async fn test_http_backend_error_status_passes_through() {
    let upstream = spawn_fake_upstream().await;
    let (addr, _) = spawn_bridge(http_backend(upstream)).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/responses"))
        .json(&serde_json::json!({"model": "broken", "input": "hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("overloaded"));
}
