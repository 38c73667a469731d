//! SSE line-framing: one shared decoder every provider client drives off
//! raw HTTP chunks, plus the reverse direction — rendering canonical
//! stream events back into whichever wire format the client declared.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use relaygate_core::schema::{ClientFormat, FinishReason};
use relaygate_core::stream::{CanonicalStreamEvent, ContentPartKind, StreamEventKind};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::client::ProviderResult;

/// Incrementally decodes a byte stream into SSE `data:` payloads. Anthropic
/// additionally prefixes each event with an `event:` line; we don't need
/// the event name separately since every Anthropic payload carries its own
/// `type` field, so it's dropped rather than threaded through.
#[derive(Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes, returning zero or more decoded payloads.
    /// A payload is the literal sentinel `"[DONE]"` or a JSON value parsed
    /// from a `data: ...` line. Malformed JSON lines are dropped rather
    /// than surfaced as stream errors — providers occasionally emit
    /// keep-alive comment lines (`: ping`) that carry no payload.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);

            let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                out.push(Value::String("[DONE]".to_string()));
                continue;
            }
            match serde_json::from_str::<Value>(data) {
                Ok(v) => out.push(v),
                Err(_) => continue,
            }
        }

        out
    }
}

/// Spawn a task that folds a raw byte stream through an [`SseDecoder`],
/// yielding parsed JSON payloads. This is the adapter path's view of an
/// upstream stream; the passthrough path consumes the byte channel
/// directly. Transport errors pass through; the task ends when either side
/// hangs up.
pub fn spawn_json_decode(
    mut bytes_rx: mpsc::Receiver<ProviderResult<Bytes>>,
) -> mpsc::Receiver<ProviderResult<Value>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut decoder = SseDecoder::new();
        while let Some(item) = bytes_rx.recv().await {
            match item {
                Ok(chunk) => {
                    for event in decoder.push(&chunk) {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
    });
    rx
}

fn openai_finish_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::StopSequence => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::Error => "stop",
    }
}

fn anthropic_stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::StopSequence => "stop_sequence",
        FinishReason::ContentFilter | FinishReason::Error => "end_turn",
    }
}

/// Renders canonical stream events into the SSE payload shape the client's
/// declared wire format expects. One instance per streamed request — it
/// tracks the handful of fields (response id, start time) that every chunk
/// of a given format needs to repeat.
pub struct ClientStreamRenderer {
    format: ClientFormat,
    id: String,
    model: String,
    created: i64,
    /// Most recent usage seen on the stream, folded into the Anthropic
    /// dialect's terminal `message_delta` (which is where that format
    /// reports cumulative usage).
    last_usage: Option<relaygate_core::schema::Usage>,
}

impl ClientStreamRenderer {
    pub fn new(format: ClientFormat, id: impl Into<String>, model: impl Into<String>) -> Self {
        let created = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
        Self { format, id: id.into(), model: model.into(), created, last_usage: None }
    }

    /// Render one canonical event into zero, one, or two client-format SSE
    /// payloads (Anthropic's `ResponseCompleted` maps onto two distinct
    /// Anthropic events: `message_delta` then `message_stop`).
    pub fn render(&mut self, event: &CanonicalStreamEvent) -> Vec<Value> {
        if let StreamEventKind::Usage { usage } | StreamEventKind::MessageDelta { usage, .. } = &event.kind {
            self.last_usage = Some(*usage);
        }
        match self.format {
            ClientFormat::OpenAiChat => self.render_openai_chat(&event.kind),
            ClientFormat::OpenAiResponses => self.render_openai_responses(&event.kind),
            ClientFormat::AnthropicMessages => self.render_anthropic(&event.kind),
        }
    }

    fn chat_chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}],
        })
    }

    fn render_openai_chat(&self, kind: &StreamEventKind) -> Vec<Value> {
        match kind {
            StreamEventKind::ResponseCreated { .. } => vec![self.chat_chunk(json!({"role": "assistant"}), None)],
            StreamEventKind::ContentDelta { part: ContentPartKind::Text, value, .. } => {
                vec![self.chat_chunk(json!({"content": value}), None)]
            }
            StreamEventKind::ToolCallStart { index, id, name } => vec![self.chat_chunk(
                json!({"tool_calls": [{"index": index, "id": id, "type": "function", "function": {"name": name, "arguments": ""}}]}),
                None,
            )],
            StreamEventKind::FunctionCallArgumentsDelta { index, delta, .. } => vec![self.chat_chunk(
                json!({"tool_calls": [{"index": index, "function": {"arguments": delta}}]}),
                None,
            )],
            StreamEventKind::Usage { usage } => vec![json!({
                "id": self.id,
                "object": "chat.completion.chunk",
                "created": self.created,
                "model": self.model,
                "choices": [],
                "usage": usage,
            })],
            // An Anthropic-shaped upstream terminates with message_delta +
            // message_stop instead of a [DONE]-driven completion event; map
            // those onto the chat dialect's finish chunk and usage chunk.
            StreamEventKind::MessageDelta { stop_reason, usage } => vec![
                self.chat_chunk(json!({}), Some(openai_finish_reason(*stop_reason))),
                json!({
                    "id": self.id,
                    "object": "chat.completion.chunk",
                    "created": self.created,
                    "model": self.model,
                    "choices": [],
                    "usage": usage,
                }),
            ],
            StreamEventKind::ResponseCompleted { finish_reason, .. } => {
                vec![self.chat_chunk(json!({}), Some(openai_finish_reason(*finish_reason)))]
            }
            _ => vec![],
        }
    }

    fn render_openai_responses(&self, kind: &StreamEventKind) -> Vec<Value> {
        match kind {
            StreamEventKind::ResponseCreated { id, model } => vec![json!({
                "type": "response.created",
                "response": {"id": id, "model": model, "status": "in_progress"},
            })],
            StreamEventKind::OutputItemAdded { index } => {
                vec![json!({"type": "response.output_item.added", "output_index": index})]
            }
            StreamEventKind::OutputItemDone { index } => {
                vec![json!({"type": "response.output_item.done", "output_index": index})]
            }
            StreamEventKind::ContentPartStart { index } => {
                vec![json!({"type": "response.content_part.added", "content_index": index})]
            }
            StreamEventKind::ContentPartDone { index } => {
                vec![json!({"type": "response.content_part.done", "content_index": index})]
            }
            StreamEventKind::ContentDelta { part: ContentPartKind::Text, value, index } => vec![json!({
                "type": "response.output_text.delta",
                "content_index": index.unwrap_or(0),
                "delta": value,
            })],
            StreamEventKind::OutputTextDone { index, text } => vec![json!({
                "type": "response.output_text.done",
                "content_index": index,
                "text": text,
            })],
            StreamEventKind::FileSearchCall { index, phase } => vec![json!({
                "type": format!("response.file_search_call.{phase}"),
                "output_index": index,
            })],
            StreamEventKind::WebSearchCall { index, phase } => vec![json!({
                "type": format!("response.web_search_call.{phase}"),
                "output_index": index,
            })],
            StreamEventKind::FunctionCallArgumentsDelta { call_id, delta, .. } => vec![json!({
                "type": "response.function_call_arguments.delta",
                "item_id": call_id,
                "delta": delta,
            })],
            StreamEventKind::FunctionCallArgumentsDone { call_id, arguments, .. } => vec![json!({
                "type": "response.function_call_arguments.done",
                "item_id": call_id,
                "arguments": arguments,
            })],
            StreamEventKind::RefusalDelta { delta } => {
                vec![json!({"type": "response.refusal.delta", "delta": delta})]
            }
            StreamEventKind::RefusalDone { refusal } => {
                vec![json!({"type": "response.refusal.done", "refusal": refusal})]
            }
            StreamEventKind::ReasoningSummaryTextDelta { delta } => {
                vec![json!({"type": "response.reasoning_summary_text.delta", "delta": delta})]
            }
            StreamEventKind::ReasoningSummaryTextDone { text } => {
                vec![json!({"type": "response.reasoning_summary_text.done", "text": text})]
            }
            StreamEventKind::Usage { usage } => {
                vec![json!({"type": "response.usage", "usage": usage})]
            }
            StreamEventKind::MessageDelta { stop_reason, usage } => {
                let event_type = if *stop_reason == FinishReason::Length { "response.incomplete" } else { "response.completed" };
                vec![json!({
                    "type": event_type,
                    "response": {"id": self.id, "model": self.model, "status": "completed", "usage": usage},
                })]
            }
            StreamEventKind::ResponseCompleted { finish_reason, .. } => {
                let event_type = if *finish_reason == FinishReason::Length { "response.incomplete" } else { "response.completed" };
                vec![json!({"type": event_type, "response": {"id": self.id, "model": self.model, "status": "completed"}})]
            }
            _ => vec![],
        }
    }

    fn render_anthropic(&self, kind: &StreamEventKind) -> Vec<Value> {
        match kind {
            StreamEventKind::ResponseCreated { id, model } => vec![json!({
                "type": "message_start",
                "message": {"id": id, "type": "message", "role": "assistant", "model": model, "content": []},
            })],
            StreamEventKind::ContentPartStart { index } => vec![json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "text", "text": ""},
            })],
            StreamEventKind::ContentPartDone { index } => {
                vec![json!({"type": "content_block_stop", "index": index})]
            }
            StreamEventKind::ContentDelta { part: ContentPartKind::Text, value, index } => vec![json!({
                "type": "content_block_delta",
                "index": index.unwrap_or(0),
                "delta": {"type": "text_delta", "text": value},
            })],
            StreamEventKind::ContentDelta { part: ContentPartKind::Thinking, value, index } => vec![json!({
                "type": "content_block_delta",
                "index": index.unwrap_or(0),
                "delta": {"type": "thinking_delta", "thinking": value},
            })],
            StreamEventKind::ToolCallStart { index, id, name } => vec![json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}},
            })],
            StreamEventKind::FunctionCallArgumentsDelta { index, delta, .. } => vec![json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "input_json_delta", "partial_json": delta},
            })],
            StreamEventKind::MessageDelta { stop_reason, usage } => vec![json!({
                "type": "message_delta",
                "delta": {"stop_reason": anthropic_stop_reason(*stop_reason)},
                "usage": usage,
            })],
            StreamEventKind::ResponseCompleted { finish_reason, .. } => vec![
                json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": anthropic_stop_reason(*finish_reason)},
                    "usage": self.last_usage,
                }),
                json!({"type": "message_stop"}),
            ],
            StreamEventKind::MessageDone => vec![json!({"type": "message_stop"})],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_payload_split_across_two_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let events = decoder.push(b"1}\n\n");
        assert_eq!(events, vec![serde_json::json!({"a": 1})]);
    }

    #[test]
    fn recognizes_done_sentinel() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: [DONE]\n");
        assert_eq!(events, vec![Value::String("[DONE]".into())]);
    }

    #[test]
    fn ignores_comment_and_event_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\nevent: content_block_delta\ndata: {\"x\":2}\n\n");
        assert_eq!(events, vec![serde_json::json!({"x": 2})]);
    }

    fn text_delta(value: &str, index: u32) -> CanonicalStreamEvent {
        CanonicalStreamEvent::new(StreamEventKind::ContentDelta {
            part: ContentPartKind::Text,
            value: value.to_string(),
            index: Some(index),
        })
    }

    #[test]
    fn openai_chat_renders_role_then_content_delta() {
        let mut renderer = ClientStreamRenderer::new(ClientFormat::OpenAiChat, "resp-1", "gpt-4o");
        let created = renderer.render(&CanonicalStreamEvent::new(StreamEventKind::ResponseCreated {
            id: "resp-1".into(),
            model: "gpt-4o".into(),
        }));
        assert_eq!(created[0]["choices"][0]["delta"]["role"], "assistant");

        let delta = renderer.render(&text_delta("hi", 0));
        assert_eq!(delta[0]["choices"][0]["delta"]["content"], "hi");
        assert_eq!(delta[0]["object"], "chat.completion.chunk");
    }

    #[test]
    fn openai_chat_maps_finish_reason_to_client_vocabulary() {
        let mut renderer = ClientStreamRenderer::new(ClientFormat::OpenAiChat, "resp-1", "gpt-4o");
        let done = renderer.render(&CanonicalStreamEvent::new(StreamEventKind::ResponseCompleted {
            finish_reason: FinishReason::ToolCalls,
            response: None,
        }));
        assert_eq!(done[0]["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn anthropic_completed_splits_into_message_delta_and_message_stop() {
        let mut renderer = ClientStreamRenderer::new(ClientFormat::AnthropicMessages, "msg-1", "claude-3");
        let events = renderer.render(&CanonicalStreamEvent::new(StreamEventKind::ResponseCompleted {
            finish_reason: FinishReason::Stop,
            response: None,
        }));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "message_delta");
        assert_eq!(events[0]["delta"]["stop_reason"], "end_turn");
        assert_eq!(events[1]["type"], "message_stop");
    }

    #[test]
    fn anthropic_content_delta_uses_text_delta_shape() {
        let mut renderer = ClientStreamRenderer::new(ClientFormat::AnthropicMessages, "msg-1", "claude-3");
        let events = renderer.render(&text_delta("world", 2));
        assert_eq!(events[0]["type"], "content_block_delta");
        assert_eq!(events[0]["index"], 2);
        assert_eq!(events[0]["delta"]["type"], "text_delta");
        assert_eq!(events[0]["delta"]["text"], "world");
    }

    #[test]
    fn openai_responses_created_event_carries_response_id() {
        let mut renderer = ClientStreamRenderer::new(ClientFormat::OpenAiResponses, "resp-9", "o3");
        let events = renderer.render(&CanonicalStreamEvent::new(StreamEventKind::ResponseCreated {
            id: "resp-9".into(),
            model: "o3".into(),
        }));
        assert_eq!(events[0]["type"], "response.created");
        assert_eq!(events[0]["response"]["id"], "resp-9");
    }

    #[test]
    fn openai_responses_incomplete_on_length_finish_reason() {
        let mut renderer = ClientStreamRenderer::new(ClientFormat::OpenAiResponses, "resp-9", "o3");
        let events = renderer.render(&CanonicalStreamEvent::new(StreamEventKind::ResponseCompleted {
            finish_reason: FinishReason::Length,
            response: None,
        }));
        assert_eq!(events[0]["type"], "response.incomplete");
    }

    #[test]
    fn ping_and_error_events_produce_no_payload_in_openai_chat() {
        let mut renderer = ClientStreamRenderer::new(ClientFormat::OpenAiChat, "resp-1", "gpt-4o");
        assert!(renderer.render(&CanonicalStreamEvent::new(StreamEventKind::Ping)).is_empty());
    }
}
