//! Normalize Messages API requests into canonical Chat Completions requests.
//!
//! A single Messages turn can expand into several canonical messages: a user
//! turn carrying `tool_result` blocks becomes separate `tool`-role messages,
//! with any surrounding text flushed as user messages in source order.

use super::types::{
    ContentBlock, Message, MessagesRequest, Role as MessagesRole, Tool, ToolChoice,
    ToolResultContent,
};
use crate::translate::chat_types::{
    ChatCompletionRequest, ChatMessage, ChatTool, ChatToolCall, ChatToolChoice, Role,
    StreamOptions, ToolChoiceMode,
};
use crate::translate::EMPTY_TOOL_RESULT;

/// Translate a Messages API request into a Chat Completions request.
/// Pure function: no I/O, never fails.
pub fn messages_to_chat(req: &MessagesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(ChatMessage::text(Role::System, system.as_text()));
    }

    for msg in &req.messages {
        messages.append(&mut translate_message(msg));
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

    let user = req.metadata.as_ref().and_then(|m| m.user_id.clone());

    ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options,
        tools: if tools.is_empty() { None } else { Some(tools) },
        tool_choice: req.tool_choice.as_ref().and_then(translate_tool_choice),
        stop: req.stop_sequences.clone(),
        user,
    }
}

fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    let blocks = msg.content.blocks();

    match msg.role {
        MessagesRole::User => translate_user_message(&blocks),
        MessagesRole::Assistant => translate_assistant_message(&blocks),
    }
}

fn translate_user_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut texts: Vec<&str> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                // Flush text seen so far so ordering survives the split
                flush_user_text(&mut texts, &mut messages);
                messages.push(ChatMessage::tool_result(
                    tool_use_id.clone(),
                    tool_result_to_string(content.as_ref(), *is_error),
                ));
            }
            ContentBlock::Image { .. }
            | ContentBlock::Thinking { .. }
            | ContentBlock::ToolUse { .. }
            | ContentBlock::Other => {}
        }
    }

    flush_user_text(&mut texts, &mut messages);
    messages
}

fn flush_user_text(texts: &mut Vec<&str>, messages: &mut Vec<ChatMessage>) {
    let joined = texts.join("\n");
    texts.clear();
    if !joined.is_empty() {
        messages.push(ChatMessage::text(Role::User, joined));
    }
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall::function(
                    id.clone(),
                    name.clone(),
                    serde_json::to_string(input).unwrap_or_default(),
                ));
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. }
            | ContentBlock::Other => {}
        }
    }

    let text = text_parts.join("\n");

    if tool_calls.is_empty() {
        if text.is_empty() {
            return Vec::new();
        }
        return vec![ChatMessage::text(Role::Assistant, text)];
    }

    let content = if text.is_empty() { None } else { Some(text) };
    vec![ChatMessage::assistant_tool_calls(content, tool_calls)]
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };

    let text = match content {
        Some(ToolResultContent::Text(t)) => t.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    };

    if text.is_empty() {
        format!("{prefix}{EMPTY_TOOL_RESULT}")
    } else {
        format!("{prefix}{text}")
    }
}

fn translate_tool(tool: &Tool) -> Option<ChatTool> {
    match tool.tool_type.as_deref() {
        None | Some("custom") => Some(ChatTool::function(
            tool.name.clone(),
            tool.description.clone(),
            tool.input_schema.clone(),
        )),
        Some(other) => {
            tracing::debug!(tool_type = other, name = %tool.name, "Dropping server tool");
            None
        }
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> Option<ChatToolChoice> {
    match tc {
        ToolChoice::Auto => Some(ChatToolChoice::Mode(ToolChoiceMode::Auto)),
        ToolChoice::Any => Some(ChatToolChoice::Mode(ToolChoiceMode::Required)),
        ToolChoice::None => Some(ChatToolChoice::Mode(ToolChoiceMode::None)),
        ToolChoice::Tool { name } if !name.is_empty() => Some(ChatToolChoice::pinned(name.clone())),
        ToolChoice::Tool { .. } | ToolChoice::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::chat_types::ChatContent;

    fn parse(json: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(json).unwrap()
    }

    fn text_of(msg: &ChatMessage) -> &str {
        match msg.content {
            Some(ChatContent::Text(ref t)) => t,
            _ => panic!("Expected text content"),
        }
    }

    #[test]
    fn test_simple_text_request() {
        let result = messages_to_chat(&parse(serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 1024,
            "system": "You are helpful",
            "messages": [{"role": "user", "content": "Hello"}]
        })));

        assert_eq!(result.model, "claude-sonnet-4-20250514");
        assert_eq!(result.max_tokens, Some(1024));
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, Role::System);
        assert_eq!(text_of(&result.messages[0]), "You are helpful");
        assert_eq!(result.messages[1].role, Role::User);
    }

    #[test]
    fn test_tool_result_splits_into_tool_messages() {
        let result = messages_to_chat(&parse(serde_json::json!({
            "model": "test",
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "Before"},
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "result 1"},
                    {"type": "tool_result", "tool_use_id": "toolu_2", "is_error": true,
                     "content": [{"type": "text", "text": "boom"}]},
                    {"type": "text", "text": "Now continue"}
                ]
            }]
        })));

        assert_eq!(result.messages.len(), 4);
        assert_eq!(result.messages[0].role, Role::User);
        assert_eq!(result.messages[1].role, Role::Tool);
        assert_eq!(result.messages[1].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(text_of(&result.messages[2]), "ERROR: boom");
        assert_eq!(text_of(&result.messages[3]), "Now continue");
    }

    #[test]
    fn test_empty_tool_result_gets_placeholder() {
        let result = messages_to_chat(&parse(serde_json::json!({
            "model": "test",
            "messages": [{
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "toolu_1"}]
            }]
        })));

        assert_eq!(text_of(&result.messages[0]), EMPTY_TOOL_RESULT);
    }

    #[test]
    fn test_images_dropped_and_text_newline_joined() {
        let result = messages_to_chat(&parse(serde_json::json!({
            "model": "test",
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AA"}},
                    {"type": "text", "text": "here"}
                ]},
                {"role": "user", "content": [
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AA"}}
                ]}
            ]
        })));

        assert_eq!(result.messages.len(), 1);
        assert_eq!(text_of(&result.messages[0]), "look\nhere");
    }

    #[test]
    fn test_assistant_tool_use_becomes_tool_call() {
        let result = messages_to_chat(&parse(serde_json::json!({
            "model": "test",
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "s"},
                    {"type": "text", "text": "Let me check."},
                    {"type": "tool_use", "id": "toolu_9", "name": "get_weather", "input": {"city": "London"}}
                ]
            }]
        })));

        assert_eq!(result.messages.len(), 1);
        let msg = &result.messages[0];
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(text_of(msg), "Let me check.");
        let calls = msg.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].function.arguments, "{\"city\":\"London\"}");
    }

    #[test]
    fn test_server_tools_dropped_and_choice_mapped() {
        let result = messages_to_chat(&parse(serde_json::json!({
            "model": "test",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"type": "web_search_20250305", "name": "web_search"},
                {"name": "lookup", "input_schema": {"type": "object"}},
                {"type": "custom", "name": "bare"}
            ],
            "tool_choice": {"type": "any"},
            "stop_sequences": ["END"],
            "metadata": {"user_id": "u-1"}
        })));

        let tools = result.tools.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].function.name, "lookup");
        assert_eq!(tools[1].function.parameters, serde_json::json!({}));
        assert_eq!(
            result.tool_choice,
            Some(ChatToolChoice::Mode(ToolChoiceMode::Required))
        );
        assert_eq!(result.stop, Some(vec!["END".to_string()]));
        assert_eq!(result.user.as_deref(), Some("u-1"));
    }

    #[test]
    fn test_tool_choice_variants() {
        assert_eq!(
            translate_tool_choice(&ToolChoice::Tool {
                name: "f".to_string()
            }),
            Some(ChatToolChoice::pinned("f"))
        );
        assert_eq!(
            translate_tool_choice(&ToolChoice::None),
            Some(ChatToolChoice::Mode(ToolChoiceMode::None))
        );
        assert_eq!(translate_tool_choice(&ToolChoice::Unknown), None);
    }
}
