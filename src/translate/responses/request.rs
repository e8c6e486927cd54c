//! Normalize Responses API requests into canonical Chat Completions requests.
//!
//! Every input item is translated on its own and in order. Items that carry no
//! usable text, or whose shape we do not recognize, are dropped rather than
//! rejected.

use super::types::{
    FunctionCallItem, FunctionCallOutputItem, InputItem, InputMessage, ResponsesInput,
    ResponsesRequest, ResponsesTool, ResponsesToolChoice, ToolChoiceFunction,
};
use crate::translate::chat_types::{
    ChatCompletionRequest, ChatMessage, ChatTool, ChatToolCall, ChatToolChoice, Role,
    StreamOptions, ToolChoiceMode,
};
use crate::translate::EMPTY_TOOL_RESULT;

/// Translate a Responses API request into a Chat Completions request.
/// Pure function: no I/O, never fails.
pub fn responses_to_chat(req: &ResponsesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref instructions) = req.instructions {
        messages.push(ChatMessage::text(Role::System, instructions.clone()));
    }

    match &req.input {
        Some(ResponsesInput::Text(text)) => {
            messages.push(ChatMessage::text(Role::User, text.clone()));
        }
        Some(ResponsesInput::Items(items)) => {
            messages.extend(items.iter().filter_map(translate_item));
        }
        None => {}
    }

    let tools: Vec<ChatTool> = req
        .tools
        .iter()
        .flatten()
        .filter_map(translate_tool)
        .collect();

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens: req.max_output_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options,
        tools: if tools.is_empty() { None } else { Some(tools) },
        tool_choice: req.tool_choice.as_ref().and_then(translate_tool_choice),
        stop: None,
        user: req.user.clone(),
    }
}

fn translate_item(item: &InputItem) -> Option<ChatMessage> {
    match item {
        InputItem::FunctionCallOutput(output) => Some(translate_tool_result(output)),
        InputItem::FunctionCall(call) => Some(translate_function_call(call)),
        InputItem::Message(msg) => translate_message(msg),
        InputItem::Unknown(value) => {
            tracing::debug!(item = %value, "Dropping unrecognized input item");
            None
        }
    }
}

fn translate_message(msg: &InputMessage) -> Option<ChatMessage> {
    let role = match msg.role.as_str() {
        "system" | "developer" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        other => {
            tracing::debug!(role = other, "Dropping input message with unsupported role");
            return None;
        }
    };

    let text = msg.content.collapse()?;
    Some(ChatMessage::text(role, text))
}

fn translate_tool_result(output: &FunctionCallOutputItem) -> ChatMessage {
    let text = output
        .output
        .collapse()
        .unwrap_or_else(|| EMPTY_TOOL_RESULT.to_string());
    ChatMessage::tool_result(output.call_id.clone(), text)
}

fn translate_function_call(call: &FunctionCallItem) -> ChatMessage {
    ChatMessage::assistant_tool_calls(
        None,
        vec![ChatToolCall::function(
            call.call_id.clone(),
            call.name.clone(),
            call.arguments.clone(),
        )],
    )
}

fn translate_tool(tool: &ResponsesTool) -> Option<ChatTool> {
    if tool.tool_type != "function" {
        return None;
    }

    if let Some(ref function) = tool.function {
        return Some(ChatTool::function(
            function.name.clone(),
            function.description.clone(),
            function.parameters.clone(),
        ));
    }

    tool.name.as_ref().map(|name| {
        ChatTool::function(
            name.clone(),
            tool.description.clone(),
            tool.parameters.clone(),
        )
    })
}

fn translate_tool_choice(tc: &ResponsesToolChoice) -> Option<ChatToolChoice> {
    match tc {
        ResponsesToolChoice::Literal(s) => ToolChoiceMode::from_literal(s).map(ChatToolChoice::Mode),
        ResponsesToolChoice::Function(ToolChoiceFunction {
            choice_type,
            name,
            function,
        }) if choice_type == "function" => name
            .clone()
            .or_else(|| function.as_ref().and_then(|f| f.name.clone()))
            .filter(|n| !n.is_empty())
            .map(ChatToolChoice::pinned),
        ResponsesToolChoice::Function(_) | ResponsesToolChoice::Other(_) => None,
    }
}
