use crate::backend::Backend;
use crate::logging::{new_exchange_id, LogLevel, SharedLogger};
use crate::proxy::{self, ProxyReply};
use crate::translate::{normalize_request, Dialect};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState<B> {
    pub backend: B,
    pub logger: SharedLogger,
}

pub fn build_router<B: Backend>(state: Arc<AppState<B>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/responses", post(handle_responses::<B>))
        .route("/v1/messages", post(handle_messages::<B>))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_responses<B: Backend>(State(state): State<Arc<AppState<B>>>, body: Bytes) -> Response {
    handle_exchange(state, Dialect::Responses, body).await
}

async fn handle_messages<B: Backend>(State(state): State<Arc<AppState<B>>>, body: Bytes) -> Response {
    handle_exchange(state, Dialect::Messages, body).await
}

async fn handle_exchange<B: Backend>(state: Arc<AppState<B>>, dialect: Dialect, body: Bytes) -> Response {
    let exchange_id = new_exchange_id();

    let req = match normalize_request(dialect, &body) {
        Ok(r) => r,
        Err(e) => {
            state.logger.exchange(
                &exchange_id,
                LogLevel::Error,
                "server",
                format!("Failed to parse {dialect} request: {e}"),
            );
            let err = proxy::invalid_request_body(dialect, format!("Invalid request body: {e}"));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    tracing::info!(
        exchange_id = %exchange_id,
        dialect = %dialect,
        model = %req.model,
        streaming = req.is_streaming(),
        "Handling exchange"
    );
    state.logger.exchange(
        &exchange_id,
        LogLevel::Info,
        "server",
        format!(
            "Request: dialect={} model={} streaming={} messages={} tools={}",
            dialect,
            req.model,
            req.is_streaming(),
            req.messages.len(),
            req.tools.as_ref().map_or(0, Vec::len)
        ),
    );

    match proxy::forward(&state.backend, dialect, req, &exchange_id, &state.logger).await {
        Ok(ProxyReply::Json(body)) => Json(body).into_response(),
        Ok(ProxyReply::Stream(events)) => {
            let events = events.map(|sse| -> Result<Event, Infallible> {
                Ok(Event::default().event(sse.event).data(sse.data))
            });
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
        Err(e) => {
            tracing::warn!(exchange_id = %exchange_id, error = %e, "Exchange failed");
            let (status, body) = proxy::error_reply(dialect, &e);
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(body)).into_response()
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
