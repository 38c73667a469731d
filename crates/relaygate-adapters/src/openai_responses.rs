//! OpenAI `responses` wire format ↔ canonical schema. The `input` item
//! list plays the role `messages` plays in `openai_chat`; `instructions`
//! plays the role of canonical `system`; tool calls, tool outputs, and
//! reasoning blocks travel as typed top-level items rather than message
//! content.

use std::collections::HashMap;

use relaygate_core::schema::{
    ContentPart, FinishReason, GenerationParams, Message, Role, Tool, ToolCall, ToolChoice, Usage,
};
use relaygate_core::stream::{ContentPartKind, StreamEventKind};
use relaygate_core::{CanonicalRequest, CanonicalResponse, CanonicalStreamEvent, Choice};
use serde_json::{json, Value};

use crate::traits::{AdapterError, AdapterResult, FormatAdapter, StreamProcessor};

pub struct OpenAiResponsesAdapter;

/// The responses API reports `input_tokens` inclusive of cached tokens;
/// the canonical vocabulary keeps the non-cached and cached portions
/// apart so per-class cost math doesn't double-bill the cached share. The
/// raw provider total is preserved in the OpenAI-vocabulary mirror.
fn split_cached_usage(usage_data: &Value) -> Usage {
    let raw_input = usage_data["input_tokens"].as_u64().unwrap_or(0);
    let cached = usage_data["input_tokens_details"]["cached_tokens"].as_u64().unwrap_or(0);
    Usage {
        input_tokens: raw_input.saturating_sub(cached),
        output_tokens: usage_data["output_tokens"].as_u64().unwrap_or(0),
        cached_tokens: cached,
        reasoning_tokens: usage_data["output_tokens_details"]["reasoning_tokens"]
            .as_u64()
            .unwrap_or(0),
        prompt_tokens: Some(raw_input),
        ..Default::default()
    }
    .with_openai_mirror()
}

fn parse_input_content(value: &Value) -> Vec<ContentPart> {
    match value {
        Value::String(s) => vec![ContentPart::text(s.clone())],
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| match p["type"].as_str() {
                Some("input_text") | Some("output_text") | Some("text") => {
                    p["text"].as_str().map(ContentPart::text)
                }
                Some("input_image") => p["image_url"].as_str().map(|url| ContentPart::ImageUrl {
                    url: url.to_string(),
                    media_type: None,
                }),
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}

fn render_input_content(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(json!({"type": "input_text", "text": text})),
            ContentPart::ImageUrl { url, .. } => {
                Some(json!({"type": "input_image", "image_url": url}))
            }
            _ => None,
        })
        .collect()
}

fn render_output_content(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(json!({"type": "output_text", "text": text, "annotations": []})),
            _ => None,
        })
        .collect()
}

impl FormatAdapter for OpenAiResponsesAdapter {
    type Stream = OpenAiResponsesStreamProcessor;

    fn format_name(&self) -> &'static str {
        "openai_responses"
    }

    fn client_to_canonical(&self, client_req: &Value) -> AdapterResult<CanonicalRequest> {
        let model = client_req["model"]
            .as_str()
            .ok_or_else(|| AdapterError::InvalidInput("missing model".into()))?
            .to_string();

        let mut messages = Vec::new();
        match &client_req["input"] {
            Value::String(s) => messages.push(Message::text(Role::User, s.clone())),
            Value::Array(items) => {
                for item in items {
                    // Tool-call items carry a `type` and no `role` — check
                    // them first, or the role match below drops them.
                    if item["type"].as_str() == Some("function_call") {
                        messages.push(Message {
                            role: Role::Assistant,
                            content: vec![],
                            name: None,
                            tool_call_id: None,
                            tool_calls: Some(vec![ToolCall {
                                id: item["call_id"].as_str().unwrap_or_default().to_string(),
                                name: item["name"].as_str().unwrap_or_default().to_string(),
                                arguments: item["arguments"].as_str().unwrap_or("{}").to_string(),
                            }]),
                        });
                        continue;
                    }
                    if item["type"].as_str() == Some("reasoning") {
                        let summary = item["summary"]
                            .as_array()
                            .map(|parts| {
                                parts
                                    .iter()
                                    .filter_map(|p| p["text"].as_str())
                                    .collect::<Vec<_>>()
                                    .join("\n")
                            })
                            .filter(|s| !s.is_empty());
                        messages.push(Message {
                            role: Role::Assistant,
                            content: vec![ContentPart::Reasoning {
                                summary,
                                content: item["content"].as_str().map(String::from),
                                encrypted_content: item["encrypted_content"].as_str().map(String::from),
                            }],
                            name: None,
                            tool_call_id: None,
                            tool_calls: None,
                        });
                        continue;
                    }
                    if item["type"].as_str() == Some("function_call_output") {
                        messages.push(Message {
                            role: Role::Tool,
                            content: vec![ContentPart::ToolResult {
                                tool_call_id: item["call_id"].as_str().unwrap_or_default().to_string(),
                                content: item["output"].as_str().unwrap_or_default().to_string(),
                                is_error: false,
                            }],
                            name: None,
                            tool_call_id: item["call_id"].as_str().map(String::from),
                            tool_calls: None,
                        });
                        continue;
                    }
                    let role = match item["role"].as_str() {
                        Some("user") => Role::User,
                        Some("assistant") => Role::Assistant,
                        Some("system") | Some("developer") => Role::System,
                        _ => continue,
                    };
                    messages.push(Message {
                        role,
                        content: parse_input_content(&item["content"]),
                        name: None,
                        tool_call_id: None,
                        tool_calls: None,
                    });
                }
            }
            _ => return Err(AdapterError::InvalidInput("missing input".into())),
        }

        let tools = client_req["tools"]
            .as_array()
            .map(|ts| {
                ts.iter()
                    .filter_map(|t| {
                        Some(Tool {
                            name: t["name"].as_str()?.to_string(),
                            description: t["description"].as_str().map(String::from),
                            parameters: t["parameters"].clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let tool_choice = match &client_req["tool_choice"] {
            Value::String(s) if s == "auto" => Some(ToolChoice::Auto),
            Value::String(s) if s == "required" => Some(ToolChoice::Required),
            Value::String(s) if s == "none" => Some(ToolChoice::None),
            Value::Object(_) => client_req["tool_choice"]["name"]
                .as_str()
                .map(|name| ToolChoice::Function { name: name.into() }),
            _ => None,
        };

        Ok(CanonicalRequest {
            schema_version: relaygate_core::CANONICAL_SCHEMA_VERSION.into(),
            model,
            system: client_req["instructions"].as_str().map(String::from),
            messages,
            tools,
            tool_choice,
            generation: GenerationParams {
                max_tokens: client_req["max_output_tokens"].as_u64().map(|v| v as u32),
                temperature: client_req["temperature"].as_f64().map(|v| v as f32),
                top_p: client_req["top_p"].as_f64().map(|v| v as f32),
                top_k: None,
                stop_sequences: None,
                seed: None,
            },
            stream: client_req["stream"].as_bool().unwrap_or(false),
            user: client_req["user"].as_str().map(String::from),
            provider_params: HashMap::new(),
            reasoning_effort: None,
        })
    }

    fn canonical_to_provider(&self, req: &CanonicalRequest) -> Value {
        let mut input = Vec::new();
        for m in &req.messages {
            if let Some(ContentPart::Reasoning { summary, content, encrypted_content }) =
                m.content.iter().find(|p| matches!(p, ContentPart::Reasoning { .. }))
            {
                let mut item = json!({"type": "reasoning"});
                if let Some(summary) = summary {
                    item["summary"] = json!([{"type": "summary_text", "text": summary}]);
                }
                if let Some(content) = content {
                    item["content"] = json!(content);
                }
                if let Some(encrypted) = encrypted_content {
                    item["encrypted_content"] = json!(encrypted);
                }
                input.push(item);
                continue;
            }
            if let Some(tool_calls) = &m.tool_calls {
                for tc in tool_calls {
                    input.push(json!({
                        "type": "function_call",
                        "call_id": tc.id,
                        "name": tc.name,
                        "arguments": tc.arguments,
                    }));
                }
                continue;
            }
            if m.role == Role::Tool {
                for part in &m.content {
                    if let ContentPart::ToolResult {
                        tool_call_id,
                        content,
                        ..
                    } = part
                    {
                        input.push(json!({
                            "type": "function_call_output",
                            "call_id": tool_call_id,
                            "output": content,
                        }));
                    }
                }
                continue;
            }
            let role = match m.role {
                Role::Assistant => "assistant",
                Role::System => "system",
                _ => "user",
            };
            input.push(json!({
                "role": role,
                "content": render_input_content(&m.content),
            }));
        }

        let mut body = json!({
            "model": req.bare_model(),
            "input": input,
            "stream": req.stream,
        });

        if let Some(system) = &req.system {
            body["instructions"] = json!(system);
        }
        if let Some(t) = req.generation.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = req.generation.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(max_tokens) = req.generation.max_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        match &req.tool_choice {
            Some(ToolChoice::Auto) => body["tool_choice"] = json!("auto"),
            Some(ToolChoice::Required) => body["tool_choice"] = json!("required"),
            Some(ToolChoice::None) => body["tool_choice"] = json!("none"),
            Some(ToolChoice::Function { name }) => {
                body["tool_choice"] = json!({"type": "function", "name": name})
            }
            None => {}
        }
        if let Some(extra) = req.provider_params.get("openai").and_then(Value::as_object) {
            for (k, v) in extra {
                body[k] = v.clone();
            }
        }

        body
    }

    fn provider_to_canonical(&self, provider_resp: &Value) -> AdapterResult<CanonicalResponse> {
        let output = provider_resp["output"].as_array().cloned().unwrap_or_default();

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for item in &output {
            match item["type"].as_str() {
                Some("message") => {
                    if let Some(content) = item["content"].as_array() {
                        for c in content {
                            if let Some(t) = c["text"].as_str() {
                                text_parts.push(ContentPart::text(t));
                            }
                        }
                    }
                }
                Some("function_call") => {
                    tool_calls.push(ToolCall {
                        id: item["call_id"].as_str().unwrap_or_default().to_string(),
                        name: item["name"].as_str().unwrap_or_default().to_string(),
                        arguments: item["arguments"].as_str().unwrap_or("{}").to_string(),
                    });
                }
                _ => {}
            }
        }

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else {
            match provider_resp["status"].as_str() {
                Some("incomplete") => FinishReason::Length,
                _ => FinishReason::Stop,
            }
        };

        let usage = split_cached_usage(&provider_resp["usage"]);

        Ok(CanonicalResponse {
            id: provider_resp["id"].as_str().unwrap_or_default().to_string(),
            model: provider_resp["model"].as_str().unwrap_or_default().to_string(),
            created: provider_resp["created_at"].as_i64().unwrap_or(0),
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: Role::Assistant,
                    content: text_parts,
                    name: None,
                    tool_call_id: None,
                    tool_calls: None,
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                finish_reason,
            }],
            usage,
        })
    }

    fn canonical_to_client(&self, resp: &CanonicalResponse) -> Value {
        let choice = &resp.choices[0];
        let mut output = Vec::new();
        if !choice.message.content.is_empty() {
            output.push(json!({
                "type": "message",
                "role": "assistant",
                "status": "completed",
                "content": render_output_content(&choice.message.content),
            }));
        }
        if let Some(tool_calls) = &choice.tool_calls {
            for tc in tool_calls {
                output.push(json!({
                    "type": "function_call",
                    "call_id": tc.id,
                    "name": tc.name,
                    "arguments": tc.arguments,
                }));
            }
        }

        json!({
            "id": resp.id,
            "object": "response",
            "created_at": resp.created,
            "model": resp.model,
            "status": "completed",
            "output": output,
            "usage": {
                "input_tokens": resp.usage.input_tokens,
                "output_tokens": resp.usage.output_tokens,
                "total_tokens": resp.usage.total_tokens(),
            }
        })
    }

    fn new_stream_processor(&self) -> OpenAiResponsesStreamProcessor {
        OpenAiResponsesStreamProcessor::default()
    }
}

/// Per-request folding state: the open content-part index, per-item
/// accumulated tool-call argument buffers, and the accumulated refusal
/// string — kept so `*.done` events can be synthesized with the full value
/// even when the provider's terminal event omits it.
#[derive(Default)]
pub struct OpenAiResponsesStreamProcessor {
    open_content_index: u32,
    arg_buffers: HashMap<String, String>,
    refusal_buffer: String,
}

impl StreamProcessor for OpenAiResponsesStreamProcessor {
    fn process(&mut self, event: &Value) -> AdapterResult<Vec<CanonicalStreamEvent>> {
        let mut out = Vec::new();

        // Built-in tool progress events carry their phase as the last dotted
        // segment of the event type, so they're matched by prefix.
        if let Some(event_type) = event["type"].as_str() {
            let index = event["output_index"].as_u64().unwrap_or(0) as u32;
            if let Some(phase) = event_type.strip_prefix("response.file_search_call.") {
                return Ok(vec![CanonicalStreamEvent::new(StreamEventKind::FileSearchCall {
                    index,
                    phase: phase.to_string(),
                })]);
            }
            if let Some(phase) = event_type.strip_prefix("response.web_search_call.") {
                return Ok(vec![CanonicalStreamEvent::new(StreamEventKind::WebSearchCall {
                    index,
                    phase: phase.to_string(),
                })]);
            }
        }

        match event["type"].as_str() {
            Some("response.created") => {
                let resp = &event["response"];
                out.push(CanonicalStreamEvent::new(StreamEventKind::ResponseCreated {
                    id: resp["id"].as_str().unwrap_or_default().to_string(),
                    model: resp["model"].as_str().unwrap_or_default().to_string(),
                }));
            }
            Some("response.output_item.added") => {
                out.push(CanonicalStreamEvent::new(StreamEventKind::OutputItemAdded {
                    index: event["output_index"].as_u64().unwrap_or(0) as u32,
                }));
            }
            Some("response.output_item.done") => {
                out.push(CanonicalStreamEvent::new(StreamEventKind::OutputItemDone {
                    index: event["output_index"].as_u64().unwrap_or(0) as u32,
                }));
                if event["item"]["type"].as_str() == Some("function_call") {
                    let call_id = event["item"]["call_id"].as_str().unwrap_or_default().to_string();
                    let arguments = event["item"]["arguments"]
                        .as_str()
                        .map(String::from)
                        .or_else(|| self.arg_buffers.remove(&call_id))
                        .unwrap_or_else(|| "{}".to_string());
                    out.push(CanonicalStreamEvent::new(
                        StreamEventKind::FunctionCallArgumentsDone {
                            index: event["output_index"].as_u64().unwrap_or(0) as u32,
                            call_id,
                            arguments,
                        },
                    ));
                }
            }
            Some("response.content_part.added") => {
                self.open_content_index = event["content_index"].as_u64().unwrap_or(0) as u32;
                out.push(CanonicalStreamEvent::new(StreamEventKind::ContentPartStart {
                    index: self.open_content_index,
                }));
            }
            Some("response.content_part.done") => {
                out.push(CanonicalStreamEvent::new(StreamEventKind::ContentPartDone {
                    index: event["content_index"].as_u64().unwrap_or(0) as u32,
                }));
            }
            Some("response.output_text.delta") => {
                out.push(CanonicalStreamEvent::new(StreamEventKind::ContentDelta {
                    part: ContentPartKind::Text,
                    value: event["delta"].as_str().unwrap_or_default().to_string(),
                    index: Some(event["content_index"].as_u64().unwrap_or(self.open_content_index as u64) as u32),
                }));
            }
            Some("response.output_text.done") => {
                out.push(CanonicalStreamEvent::new(StreamEventKind::OutputTextDone {
                    index: event["content_index"].as_u64().unwrap_or(self.open_content_index as u64) as u32,
                    text: event["text"].as_str().unwrap_or_default().to_string(),
                }));
            }
            Some("response.function_call_arguments.delta") => {
                let call_id = event["item_id"].as_str().unwrap_or_default().to_string();
                let delta = event["delta"].as_str().unwrap_or_default().to_string();
                self.arg_buffers.entry(call_id.clone()).or_default().push_str(&delta);
                out.push(CanonicalStreamEvent::new(
                    StreamEventKind::FunctionCallArgumentsDelta {
                        index: event["output_index"].as_u64().unwrap_or(0) as u32,
                        call_id,
                        delta,
                    },
                ));
            }
            Some("response.function_call_arguments.done") => {
                let call_id = event["item_id"].as_str().unwrap_or_default().to_string();
                let arguments = event["arguments"]
                    .as_str()
                    .map(String::from)
                    .or_else(|| self.arg_buffers.remove(&call_id))
                    .unwrap_or_else(|| "{}".to_string());
                out.push(CanonicalStreamEvent::new(
                    StreamEventKind::FunctionCallArgumentsDone {
                        index: event["output_index"].as_u64().unwrap_or(0) as u32,
                        call_id,
                        arguments,
                    },
                ));
            }
            Some("response.refusal.delta") => {
                let delta = event["delta"].as_str().unwrap_or_default().to_string();
                self.refusal_buffer.push_str(&delta);
                out.push(CanonicalStreamEvent::new(StreamEventKind::RefusalDelta { delta }));
            }
            Some("response.refusal.done") => {
                let refusal = event["refusal"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| std::mem::take(&mut self.refusal_buffer));
                out.push(CanonicalStreamEvent::new(StreamEventKind::RefusalDone { refusal }));
            }
            Some("response.reasoning_summary_text.delta") => {
                out.push(CanonicalStreamEvent::new(
                    StreamEventKind::ReasoningSummaryTextDelta {
                        delta: event["delta"].as_str().unwrap_or_default().to_string(),
                    },
                ));
            }
            Some("response.reasoning_summary_text.done") => {
                out.push(CanonicalStreamEvent::new(
                    StreamEventKind::ReasoningSummaryTextDone {
                        text: event["text"].as_str().unwrap_or_default().to_string(),
                    },
                ));
            }
            Some("response.usage") => {
                out.push(CanonicalStreamEvent::new(StreamEventKind::Usage {
                    usage: split_cached_usage(&event["usage"]),
                }));
            }
            Some("response.completed") => {
                let usage = split_cached_usage(&event["response"]["usage"]);
                out.push(CanonicalStreamEvent::new(StreamEventKind::Usage { usage }));
                out.push(CanonicalStreamEvent::new(StreamEventKind::ResponseCompleted {
                    finish_reason: FinishReason::Stop,
                    response: None,
                }));
            }
            Some("response.incomplete") => {
                out.push(CanonicalStreamEvent::new(StreamEventKind::ResponseCompleted {
                    finish_reason: FinishReason::Length,
                    response: None,
                }));
            }
            Some("error") | Some("response.error") => {
                out.push(CanonicalStreamEvent::new(StreamEventKind::Error {
                    message: event["message"]
                        .as_str()
                        .or_else(|| event["error"]["message"].as_str())
                        .unwrap_or("unknown upstream error")
                        .to_string(),
                }));
            }
            _ => {}
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_round_trip_as_canonical_system() {
        let adapter = OpenAiResponsesAdapter;
        let client_req = json!({
            "model": "gpt-4o",
            "instructions": "Be terse",
            "input": "hi",
        });
        let canonical = adapter.client_to_canonical(&client_req).unwrap();
        assert_eq!(canonical.system.as_deref(), Some("Be terse"));
        let rendered = adapter.canonical_to_provider(&canonical);
        assert_eq!(rendered["instructions"], "Be terse");
    }

    #[test]
    fn function_call_output_item_maps_to_tool_message() {
        let adapter = OpenAiResponsesAdapter;
        let client_req = json!({
            "model": "gpt-4o",
            "input": [
                {"role": "user", "content": [{"type": "input_text", "text": "weather?"}]},
                {"type": "function_call", "call_id": "call_1", "name": "get_weather", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "call_1", "output": "sunny"},
            ],
        });
        let canonical = adapter.client_to_canonical(&client_req).unwrap();
        assert_eq!(canonical.messages.len(), 3);
        assert_eq!(canonical.messages[2].role, Role::Tool);
    }

    #[test]
    fn reasoning_items_round_trip_with_encrypted_content() {
        let adapter = OpenAiResponsesAdapter;
        let client_req = json!({
            "model": "o3",
            "input": [
                {"type": "reasoning",
                 "summary": [{"type": "summary_text", "text": "thought about it"}],
                 "encrypted_content": "opaque"},
                {"role": "user", "content": [{"type": "input_text", "text": "hi"}]},
            ],
        });
        let canonical = adapter.client_to_canonical(&client_req).unwrap();
        assert!(matches!(
            &canonical.messages[0].content[0],
            ContentPart::Reasoning { encrypted_content: Some(e), .. } if e == "opaque"
        ));

        let rendered = adapter.canonical_to_provider(&canonical);
        assert_eq!(rendered["input"][0]["type"], "reasoning");
        assert_eq!(rendered["input"][0]["encrypted_content"], "opaque");
        assert_eq!(rendered["input"][0]["summary"][0]["text"], "thought about it");
    }

    #[test]
    fn streaming_text_delta_maps_to_content_delta() {
        let mut proc = OpenAiResponsesStreamProcessor::default();
        let events = proc
            .process(&json!({
                "type": "response.output_text.delta",
                "content_index": 0,
                "delta": "Hello",
            }))
            .unwrap();
        assert!(matches!(
            events[0].kind,
            StreamEventKind::ContentDelta { ref value, .. } if value == "Hello"
        ));
    }

    #[test]
    fn response_completed_emits_usage_then_completion() {
        let mut proc = OpenAiResponsesStreamProcessor::default();
        let events = proc
            .process(&json!({
                "type": "response.completed",
                "response": {"usage": {"input_tokens": 10, "output_tokens": 5}},
            }))
            .unwrap();
        assert!(matches!(events[0].kind, StreamEventKind::Usage { .. }));
        assert!(matches!(events[1].kind, StreamEventKind::ResponseCompleted { .. }));
    }

    #[test]
    fn completed_usage_splits_cached_from_noncached_input() {
        let mut proc = OpenAiResponsesStreamProcessor::default();
        let events = proc
            .process(&json!({
                "type": "response.completed",
                "response": {"usage": {
                    "input_tokens": 120,
                    "input_tokens_details": {"cached_tokens": 20},
                    "output_tokens": 5,
                }},
            }))
            .unwrap();
        let usage = match &events[0].kind {
            StreamEventKind::Usage { usage } => *usage,
            other => panic!("expected usage event, got {other:?}"),
        };
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.cached_tokens, 20);
        assert_eq!(usage.prompt_tokens, Some(120));
    }

    #[test]
    fn argument_deltas_accumulate_when_done_event_omits_the_full_string() {
        let mut proc = OpenAiResponsesStreamProcessor::default();
        proc.process(&json!({
            "type": "response.function_call_arguments.delta",
            "output_index": 0, "item_id": "call_1", "delta": "{\"loc\":",
        }))
        .unwrap();
        proc.process(&json!({
            "type": "response.function_call_arguments.delta",
            "output_index": 0, "item_id": "call_1", "delta": "\"sf\"}",
        }))
        .unwrap();
        let events = proc
            .process(&json!({
                "type": "response.function_call_arguments.done",
                "output_index": 0, "item_id": "call_1",
            }))
            .unwrap();
        assert!(matches!(
            &events[0].kind,
            StreamEventKind::FunctionCallArgumentsDone { arguments, .. } if arguments == "{\"loc\":\"sf\"}"
        ));
    }

    #[test]
    fn file_search_progress_maps_by_phase_suffix() {
        let mut proc = OpenAiResponsesStreamProcessor::default();
        let events = proc
            .process(&json!({
                "type": "response.file_search_call.searching",
                "output_index": 2,
            }))
            .unwrap();
        assert!(matches!(
            &events[0].kind,
            StreamEventKind::FileSearchCall { index: 2, phase } if phase == "searching"
        ));
    }
}
