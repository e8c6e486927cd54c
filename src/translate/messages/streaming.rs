//! State machine for translating Chat Completions chunks into Messages API SSE events.
//!
//! The [`MessagesStreamTranslator`] keeps at most one content block open at a
//! time. A `tool_use` block cannot start until the call's name is known, so
//! argument fragments that arrive first are buffered and flushed right after
//! the block opens.

use super::response::map_finish_reason;
use super::types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use crate::translate::chat_types::{ChatCompletionChunk, ChunkToolCall};
use crate::translate::EventSequencer;

/// Tracks state of a tool call being streamed
#[derive(Debug, Clone)]
struct ActiveToolCall {
    chunk_index: u64,
    id: String,
    name: String,
    block_index: Option<usize>,
    pending_args: String,
    closed: bool,
}

#[derive(Debug, Clone, Copy)]
enum OpenBlock {
    Text { index: usize },
    Tool { index: usize, position: usize },
}

/// State machine that translates Chat Completions chunks into Messages SSE events.
///
/// Usage:
///   let mut translator = MessagesStreamTranslator::new("claude-sonnet-4-20250514");
///   let mut events = translator.start();
///   for chunk in chunks {
///       events.extend(translator.process_chunk(&chunk));
///   }
///   events.extend(translator.finish());
#[derive(Debug)]
pub struct MessagesStreamTranslator {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    next_block_index: usize,
    open_block: Option<OpenBlock>,
    active_tool_calls: Vec<ActiveToolCall>,
    stop_reason: Option<String>,
    output_tokens: u64,
    skipped: usize,
}

impl MessagesStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            started: false,
            finished: false,
            next_block_index: 0,
            open_block: None,
            active_tool_calls: Vec::new(),
            stop_reason: None,
            output_tokens: 0,
            skipped: 0,
        }
    }

    fn make_message_start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }
    }

    fn take_block_index(&mut self) -> usize {
        let n = self.next_block_index;
        self.next_block_index += 1;
        n
    }

    fn close_open_block(&mut self) -> Option<StreamEvent> {
        let index = match self.open_block.take()? {
            OpenBlock::Text { index } => index,
            OpenBlock::Tool { index, position } => {
                self.active_tool_calls[position].closed = true;
                index
            }
        };
        Some(StreamEvent::ContentBlockStop { index })
    }

    fn on_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        let index = match self.open_block {
            Some(OpenBlock::Text { index }) => index,
            _ => {
                events.extend(self.close_open_block());
                let index = self.take_block_index();
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::Text {
                        text: String::new(),
                    },
                });
                self.open_block = Some(OpenBlock::Text { index });
                index
            }
        };

        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn on_tool_call(&mut self, tc: &ChunkToolCall, events: &mut Vec<StreamEvent>) {
        let position = match self
            .active_tool_calls
            .iter()
            .position(|c| c.chunk_index == tc.index)
        {
            Some(p) => p,
            None => {
                self.active_tool_calls.push(ActiveToolCall {
                    chunk_index: tc.index,
                    id: String::new(),
                    name: String::new(),
                    block_index: None,
                    pending_args: String::new(),
                    closed: false,
                });
                self.active_tool_calls.len() - 1
            }
        };

        {
            let call = &mut self.active_tool_calls[position];
            if let Some(id) = tc.id.as_deref().filter(|id| !id.is_empty()) {
                if call.id.is_empty() {
                    call.id = id.to_string();
                }
            }
            if let Some(name) = tc.name() {
                if call.name.is_empty() {
                    call.name = name.to_string();
                }
            }
            if let Some(args) = tc.arguments() {
                call.pending_args.push_str(args);
            }
        }

        let call = &self.active_tool_calls[position];
        if call.block_index.is_none() && !call.name.is_empty() {
            self.start_tool_block(position, events);
        }

        let call = &mut self.active_tool_calls[position];
        let Some(index) = call.block_index else {
            return;
        };
        if call.pending_args.is_empty() {
            return;
        }
        if call.closed {
            tracing::warn!(
                tool_index = call.chunk_index,
                "Discarding arguments for an already closed tool_use block"
            );
            call.pending_args.clear();
            return;
        }

        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::InputJsonDelta {
                partial_json: std::mem::take(&mut call.pending_args),
            },
        });
    }

    fn start_tool_block(&mut self, position: usize, events: &mut Vec<StreamEvent>) {
        events.extend(self.close_open_block());
        let index = self.take_block_index();

        let call = &mut self.active_tool_calls[position];
        if call.id.is_empty() {
            call.id = format!("toolu_{}", call.chunk_index);
        }
        call.block_index = Some(index);

        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: serde_json::Value::Object(serde_json::Map::new()),
            },
        });
        self.open_block = Some(OpenBlock::Tool { index, position });
    }

    fn close_all(&mut self) -> Vec<StreamEvent> {
        let events: Vec<StreamEvent> = self.close_open_block().into_iter().collect();

        for call in &self.active_tool_calls {
            if call.block_index.is_none() {
                tracing::warn!(
                    tool_index = call.chunk_index,
                    "Dropping tool call that never received a name"
                );
            }
        }

        events
    }
}

impl EventSequencer for MessagesStreamTranslator {
    type Event = StreamEvent;

    fn start(&mut self) -> Vec<StreamEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![self.make_message_start(), StreamEvent::Ping]
    }

    /// Process a single chunk, returning zero or more Messages SSE events.
    fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = self.start();

        // Capture usage if provided
        if let Some(ref usage) = chunk.usage {
            self.output_tokens = usage.completion_tokens;
        }

        let choice = match chunk.primary_choice() {
            Some(c) => c,
            None => return events,
        };

        if self.stop_reason.is_some() {
            return events;
        }

        if let Some(content) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            self.on_text(content, &mut events);
        }

        for tc in choice.delta.tool_calls.iter().flatten() {
            self.on_tool_call(tc, &mut events);
        }

        if let Some(ref reason) = choice.finish_reason {
            events.append(&mut self.close_all());
            self.stop_reason = Some(map_finish_reason(reason));
        }

        events
    }

    /// Call when the upstream ends to flush remaining events.
    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = self.start();
        events.append(&mut self.close_all());
        self.finished = true;

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(
                    self.stop_reason
                        .clone()
                        .unwrap_or_else(|| "end_turn".to_string()),
                ),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);

        events
    }

    fn event_name(event: &StreamEvent) -> &'static str {
        event.event_name()
    }

    fn skipped_chunks(&self) -> usize {
        self.skipped
    }

    fn record_skipped(&mut self) {
        self.skipped += 1;
    }
}
