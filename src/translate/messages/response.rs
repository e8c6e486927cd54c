use super::types::{ErrorResponse, MessagesResponse, ResponseContentBlock, Usage};
use crate::translate::chat_types::{ChatCompletionResponse, ChatErrorResponse};

/// Translate a complete Chat Completion into a Messages API response.
/// Pure function: `fallback_model` is the model the client originally requested.
pub fn chat_to_messages(resp: &ChatCompletionResponse, fallback_model: &str) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        if let Some(text) = c.message.text() {
            content.push(ResponseContentBlock::Text { text });
        }

        for tc in c.message.tool_calls.iter().flatten() {
            content.push(ResponseContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input: parse_tool_input(&tc.function.arguments),
            });
        }
    }

    // Clients expect at least one content block
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map_or_else(|| "end_turn".to_string(), map_finish_reason);

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    let model = if resp.model.is_empty() {
        fallback_model.to_string()
    } else {
        resp.model.clone()
    };

    MessagesResponse {
        id: message_id(&resp.id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model,
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    }
}

/// Map a canonical completion id to a `msg_`-prefixed message id.
pub fn message_id(chat_id: &str) -> String {
    format!("msg_{}", chat_id.trim_start_matches("chatcmpl-"))
}

/// Tool arguments are opaque upstream; only here do we need them as JSON.
fn parse_tool_input(arguments: &str) -> serde_json::Value {
    serde_json::from_str::<serde_json::Value>(arguments)
        .ok()
        .filter(serde_json::Value::is_object)
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
}

/// Map a Chat Completions `finish_reason` to a Messages `stop_reason`.
pub fn map_finish_reason(reason: &str) -> String {
    match reason {
        "stop" | "content_filter" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        "tool_calls" | "function_call" => "tool_use".to_string(),
        other => other.to_string(),
    }
}

/// Translate a Chat Completions error body into a Messages error response.
pub fn chat_error_to_messages(err: &ChatErrorResponse) -> ErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" => "invalid_request_error",
        "rate_limit_error" | "rate_limit_exceeded" => "rate_limit_error",
        _ => "api_error",
    };

    ErrorResponse::new(error_type, &err.error.message)
}
