use super::types::{
    OutputItem, ResponseStatus, ResponsesErrorResponse, ResponsesResponse, ResponsesUsage,
};
use crate::translate::chat_types::{ChatCompletionResponse, ChatErrorResponse, ChatUsage};

/// Translate a complete Chat Completion into a Responses API response.
/// `fallback_model` is the model the client originally requested. A backend
/// that reports no `created` time gets the current one.
pub fn chat_to_responses(resp: &ChatCompletionResponse, fallback_model: &str) -> ResponsesResponse {
    chat_to_responses_at(resp, fallback_model, now_epoch_seconds())
}

/// Like [`chat_to_responses`], with `now` standing in for a missing `created`.
/// Pure: the same inputs always give the same response.
pub fn chat_to_responses_at(
    resp: &ChatCompletionResponse,
    fallback_model: &str,
    now: u64,
) -> ResponsesResponse {
    let id = response_id(&resp.id);
    let mut output = Vec::new();
    let mut output_text = String::new();

    for (position, choice) in resp.choices.iter().enumerate() {
        if let Some(text) = choice.message.text() {
            output.push(OutputItem::message(message_item_id(&id, position), text.clone()));
            // Last choice with text wins the flattened field.
            output_text = text;
        }

        for tc in choice.message.tool_calls.iter().flatten() {
            output.push(OutputItem::FunctionCall {
                id: function_call_item_id(&tc.id),
                call_id: tc.id.clone(),
                name: tc.function.name.clone(),
                arguments: tc.function.arguments.clone(),
                status: ResponseStatus::Completed,
            });
        }
    }

    let model = if resp.model.is_empty() {
        fallback_model.to_string()
    } else {
        resp.model.clone()
    };

    let created_at = if resp.created == 0 {
        now
    } else {
        resp.created
    };

    ResponsesResponse {
        id,
        object: "response".to_string(),
        created_at,
        model,
        status: ResponseStatus::Completed,
        output,
        output_text,
        usage: resp.usage.as_ref().map(usage_to_responses),
    }
}

/// Re-express canonical usage; the total is always recomputed.
pub fn usage_to_responses(usage: &ChatUsage) -> ResponsesUsage {
    ResponsesUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.prompt_tokens.saturating_add(usage.completion_tokens),
    }
}

/// Map a canonical completion id to a `resp_`-prefixed response id.
pub fn response_id(chat_id: &str) -> String {
    format!("resp_{}", chat_id.trim_start_matches("chatcmpl-"))
}

pub fn message_item_id(response_id: &str, position: usize) -> String {
    let base = response_id.trim_start_matches("resp_");
    if position == 0 {
        format!("msg_{base}")
    } else {
        format!("msg_{base}_{position}")
    }
}

pub fn function_call_item_id(call_id: &str) -> String {
    format!("fc_{call_id}")
}

pub(crate) fn now_epoch_seconds() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

/// Translate a Chat Completions error body into the Responses error shape.
pub fn chat_error_to_responses(err: &ChatErrorResponse) -> ResponsesErrorResponse {
    let error_type = if err.error.error_type.is_empty() {
        "server_error"
    } else {
        err.error.error_type.as_str()
    };

    let mut out = ResponsesErrorResponse::new(error_type, &err.error.message);
    out.error.code = err.error.code.clone();
    out
}
