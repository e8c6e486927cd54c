//! The backend boundary: submit a canonical request, get back either a
//! complete response or a live stream of raw chunk payloads.

use crate::config::BridgeConfig;
use crate::error::{ProxyError, Result};
use crate::translate::chat_types::{ChatCompletionRequest, ChatCompletionResponse};

use eventsource_stream::Eventsource;
use futures::stream::{self, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Raw `data:` payloads from the backend, in arrival order, with the `[DONE]`
/// sentinel already stripped.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

pub enum BackendReply {
    Complete(ChatCompletionResponse),
    Stream(ChunkStream),
}

/// Anything that can answer a canonical request.
///
/// Whether the reply is complete or streamed follows the request's `stream` flag.
pub trait Backend: Send + Sync + 'static {
    fn submit(
        &self,
        req: ChatCompletionRequest,
    ) -> impl Future<Output = Result<BackendReply>> + Send;
}

/// A Chat Completions endpoint reached over HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.backend.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.completions_url(),
            api_key: config.resolve_api_key()?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, req: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let mut builder = self.client.post(&self.url).json(req);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body_len = body.len(), "Backend returned an error status");
            return Err(ProxyError::upstream(status.as_u16(), body));
        }

        Ok(response)
    }
}

impl Backend for HttpBackend {
    async fn submit(&self, req: ChatCompletionRequest) -> Result<BackendReply> {
        tracing::debug!(url = %self.url, model = %req.model, streaming = req.is_streaming(), "Submitting to backend");

        let response = self.send(&req).await?;

        if !req.is_streaming() {
            let body = response.text().await?;
            let parsed: ChatCompletionResponse = serde_json::from_str(&body)?;
            return Ok(BackendReply::Complete(parsed));
        }

        let chunks = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => Ok(event.data.trim().to_owned()),
                Err(e) => Err(ProxyError::stream(e.to_string())),
            })
            .take_while(|item| {
                let more = !matches!(item, Ok(data) if data == "[DONE]");
                futures::future::ready(more)
            })
            .filter(|item| futures::future::ready(!matches!(item, Ok(data) if data.is_empty())));

        Ok(BackendReply::Stream(Box::pin(chunks)))
    }
}

/// Wrap already-known payloads as a [`ChunkStream`].
pub fn chunk_stream_from<I>(payloads: I) -> ChunkStream
where
    I: IntoIterator<Item = Result<String>>,
    I::IntoIter: Send + 'static,
{
    Box::pin(stream::iter(payloads))
}
