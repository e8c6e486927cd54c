//! State machine for translating Chat Completions chunks into Responses API events.
//!
//! The [`ResponsesStreamTranslator`] follows choice 0 of each chunk. Text goes
//! into a single message slot that opens implicitly on its first delta; every
//! tool-call index becomes its own `function_call` slot, introduced once with
//! `response.output_item.added`. Deltas are forwarded raw, never re-parsed.

use super::response::{
    function_call_item_id, message_item_id, now_epoch_seconds, response_id, usage_to_responses,
};
use super::types::{OutputItem, ResponseStatus, ResponsesResponse, ResponsesStreamEvent};
use crate::translate::chat_types::{ChatCompletionChunk, ChatUsage, ChunkToolCall};
use crate::translate::EventSequencer;

#[derive(Debug, Clone)]
struct TextSlot {
    item_id: String,
    output_index: usize,
    text: String,
    closed: bool,
}

#[derive(Debug, Clone)]
struct ToolCallSlot {
    chunk_index: u64,
    item_id: String,
    output_index: usize,
    call_id: String,
    /// False while `call_id` is the `call_<index>` stand-in.
    call_id_known: bool,
    name: String,
    arguments: String,
    closed: bool,
}

/// Translates one streaming exchange into Responses API events.
///
/// Usage:
///   let mut translator = ResponsesStreamTranslator::new("gpt-4o");
///   let mut events = translator.start();
///   for chunk in chunks {
///       events.extend(translator.process_chunk(&chunk));
///   }
///   events.extend(translator.finish());
#[derive(Debug)]
pub struct ResponsesStreamTranslator {
    model: String,
    response_id: String,
    created_at: u64,
    sequence_number: u64,
    started: bool,
    finished: bool,
    next_output_index: usize,
    text: Option<TextSlot>,
    tool_calls: Vec<ToolCallSlot>,
    finish_reason: Option<String>,
    usage: Option<ChatUsage>,
    skipped: usize,
}

impl ResponsesStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_id: format!("resp_{}", uuid::Uuid::new_v4().simple()),
            created_at: now_epoch_seconds(),
            sequence_number: 0,
            started: false,
            finished: false,
            next_output_index: 0,
            text: None,
            tool_calls: Vec::new(),
            finish_reason: None,
            usage: None,
            skipped: 0,
        }
    }

    /// The id subsequent events will carry.
    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    fn next_sequence(&mut self) -> u64 {
        let n = self.sequence_number;
        self.sequence_number += 1;
        n
    }

    fn next_output_index(&mut self) -> usize {
        let n = self.next_output_index;
        self.next_output_index += 1;
        n
    }

    fn on_text(&mut self, delta: &str) -> ResponsesStreamEvent {
        let mut slot = match self.text.take() {
            Some(slot) => slot,
            None => TextSlot {
                item_id: message_item_id(&self.response_id, 0),
                output_index: self.next_output_index(),
                text: String::new(),
                closed: false,
            },
        };
        slot.text.push_str(delta);

        let event = ResponsesStreamEvent::OutputTextDelta {
            sequence_number: self.next_sequence(),
            item_id: slot.item_id.clone(),
            output_index: slot.output_index,
            content_index: 0,
            delta: delta.to_string(),
        };
        self.text = Some(slot);
        event
    }

    fn on_tool_call(&mut self, tc: &ChunkToolCall, events: &mut Vec<ResponsesStreamEvent>) {
        let position = match self.tool_calls.iter().position(|s| s.chunk_index == tc.index) {
            Some(p) => p,
            None => {
                let known_id = tc.id.clone().filter(|id| !id.is_empty());
                let call_id_known = known_id.is_some();
                let call_id = known_id.unwrap_or_else(|| format!("call_{}", tc.index));
                let slot = ToolCallSlot {
                    chunk_index: tc.index,
                    item_id: function_call_item_id(&call_id),
                    output_index: self.next_output_index(),
                    call_id,
                    call_id_known,
                    name: tc.name().unwrap_or_default().to_string(),
                    arguments: String::new(),
                    closed: false,
                };

                events.push(ResponsesStreamEvent::OutputItemAdded {
                    sequence_number: self.next_sequence(),
                    output_index: slot.output_index,
                    item: OutputItem::FunctionCall {
                        id: slot.item_id.clone(),
                        call_id: slot.call_id.clone(),
                        name: slot.name.clone(),
                        arguments: String::new(),
                        status: ResponseStatus::InProgress,
                    },
                });
                self.tool_calls.push(slot);
                self.tool_calls.len() - 1
            }
        };

        // An id or name delivered after the start event still belongs in the
        // final item. The item id stays put so earlier events keep matching.
        if let Some(id) = tc.id.as_deref().filter(|id| !id.is_empty()) {
            let slot = &mut self.tool_calls[position];
            if !slot.call_id_known {
                slot.call_id = id.to_string();
                slot.call_id_known = true;
            }
        }

        if let Some(name) = tc.name() {
            if self.tool_calls[position].name.is_empty() {
                self.tool_calls[position].name = name.to_string();
            }
        }

        if let Some(args) = tc.arguments() {
            let sequence_number = self.next_sequence();
            let slot = &mut self.tool_calls[position];
            slot.arguments.push_str(args);
            events.push(ResponsesStreamEvent::FunctionCallArgumentsDelta {
                sequence_number,
                item_id: slot.item_id.clone(),
                output_index: slot.output_index,
                delta: args.to_string(),
            });
        }
    }

    /// Emit the done events for every slot that saw at least one delta.
    fn close_slots(&mut self) -> Vec<ResponsesStreamEvent> {
        let mut events = Vec::new();

        if let Some(slot) = self.text.as_mut() {
            if !slot.closed {
                slot.closed = true;
                let (item_id, output_index, text) =
                    (slot.item_id.clone(), slot.output_index, slot.text.clone());
                events.push(ResponsesStreamEvent::OutputTextDone {
                    sequence_number: self.next_sequence(),
                    item_id,
                    output_index,
                    content_index: 0,
                    text,
                });
            }
        }

        for i in 0..self.tool_calls.len() {
            if self.tool_calls[i].closed || self.tool_calls[i].arguments.is_empty() {
                continue;
            }
            self.tool_calls[i].closed = true;
            let sequence_number = self.next_sequence();
            let slot = &self.tool_calls[i];
            events.push(ResponsesStreamEvent::FunctionCallArgumentsDone {
                sequence_number,
                item_id: slot.item_id.clone(),
                output_index: slot.output_index,
                arguments: slot.arguments.clone(),
            });
        }

        events
    }

    fn snapshot(&self, status: ResponseStatus) -> ResponsesResponse {
        let mut items: Vec<(usize, OutputItem)> = Vec::new();

        if let Some(ref slot) = self.text {
            items.push((
                slot.output_index,
                OutputItem::message(slot.item_id.clone(), slot.text.clone()),
            ));
        }

        for slot in &self.tool_calls {
            items.push((
                slot.output_index,
                OutputItem::FunctionCall {
                    id: slot.item_id.clone(),
                    call_id: slot.call_id.clone(),
                    name: slot.name.clone(),
                    arguments: slot.arguments.clone(),
                    status: ResponseStatus::Completed,
                },
            ));
        }
        items.sort_by_key(|(index, _)| *index);

        ResponsesResponse {
            id: self.response_id.clone(),
            object: "response".to_string(),
            created_at: self.created_at,
            model: self.model.clone(),
            status,
            output: if status == ResponseStatus::InProgress {
                Vec::new()
            } else {
                items.into_iter().map(|(_, item)| item).collect()
            },
            output_text: self
                .text
                .as_ref()
                .map(|s| s.text.clone())
                .unwrap_or_default(),
            usage: self.usage.as_ref().map(usage_to_responses),
        }
    }
}

impl EventSequencer for ResponsesStreamTranslator {
    type Event = ResponsesStreamEvent;

    fn start(&mut self) -> Vec<ResponsesStreamEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        let response = self.snapshot(ResponseStatus::InProgress);
        vec![ResponsesStreamEvent::Created {
            sequence_number: self.next_sequence(),
            response,
        }]
    }

    fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<ResponsesStreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = self.start();

        if !chunk.id.is_empty() {
            self.response_id = response_id(&chunk.id);
        }

        if let Some(ref usage) = chunk.usage {
            self.usage = Some(usage.clone());
        }

        let choice = match chunk.primary_choice() {
            Some(c) => c,
            None => return events,
        };

        if self.finish_reason.is_some() {
            tracing::debug!("Ignoring delta after finish_reason");
            return events;
        }

        if let Some(content) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            events.push(self.on_text(content));
        }

        for tc in choice.delta.tool_calls.iter().flatten() {
            self.on_tool_call(tc, &mut events);
        }

        if let Some(ref reason) = choice.finish_reason {
            events.append(&mut self.close_slots());
            self.finish_reason = Some(reason.clone());
        }

        events
    }

    fn finish(&mut self) -> Vec<ResponsesStreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = self.start();
        events.append(&mut self.close_slots());
        self.finished = true;

        let response = self.snapshot(ResponseStatus::Completed);
        events.push(ResponsesStreamEvent::Completed {
            sequence_number: self.next_sequence(),
            response,
        });

        events
    }

    fn event_name(event: &ResponsesStreamEvent) -> &'static str {
        event.event_name()
    }

    fn skipped_chunks(&self) -> usize {
        self.skipped
    }

    fn record_skipped(&mut self) {
        self.skipped += 1;
    }
}
