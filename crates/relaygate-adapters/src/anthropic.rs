//! Anthropic `messages` wire format ↔ canonical schema: the `system`
//! top-level field, the `content` block vocabulary
//! (`text`/`tool_use`/`tool_result`/`thinking`/`image`), the required
//! `max_tokens` with per-model-family defaults, and the extended-thinking
//! token budget table.

use std::collections::HashMap;

use relaygate_core::schema::{
    ContentPart, FinishReason, GenerationParams, Message, ReasoningEffort, Role, Tool, ToolCall,
    ToolChoice, Usage,
};
use relaygate_core::stream::{ContentPartKind, StreamEventKind};
use relaygate_core::{CanonicalRequest, CanonicalResponse, CanonicalStreamEvent, Choice};
use serde_json::{json, Value};

use crate::traits::{AdapterError, AdapterResult, FormatAdapter, StreamProcessor};

pub struct AnthropicAdapter;

/// Anthropic requires an explicit `max_tokens`; when a client omits it the
/// adapter fills in a per-model-family default: `claude-3-5-sonnet*` gets
/// the larger 8192 ceiling, every other id falls back to 4096.
fn default_max_tokens(model: &str) -> u32 {
    let bare = model.rsplit('/').next().unwrap_or(model);
    if bare.starts_with("claude-3-5-sonnet") {
        8192
    } else {
        4096
    }
}

fn thinking_budget(effort: ReasoningEffort) -> Option<u32> {
    match effort {
        ReasoningEffort::Off => None,
        ReasoningEffort::Low => Some(2048),
        ReasoningEffort::Medium => Some(8192),
        ReasoningEffort::High => Some(16384),
        ReasoningEffort::Xhigh => Some(32768),
    }
}

fn content_block_to_parts(blocks: &[Value]) -> Vec<ContentPart> {
    blocks
        .iter()
        .filter_map(|b| match b["type"].as_str() {
            Some("text") => b["text"].as_str().map(ContentPart::text),
            Some("tool_result") => Some(ContentPart::ToolResult {
                tool_call_id: b["tool_use_id"].as_str().unwrap_or_default().to_string(),
                content: match &b["content"] {
                    Value::String(s) => s.clone(),
                    Value::Array(parts) => parts
                        .iter()
                        .filter_map(|p| p["text"].as_str())
                        .collect::<Vec<_>>()
                        .join("\n"),
                    other => other.to_string(),
                },
                is_error: b["is_error"].as_bool().unwrap_or(false),
            }),
            Some("thinking") => Some(ContentPart::Reasoning {
                summary: None,
                content: b["thinking"].as_str().map(String::from),
                encrypted_content: b["signature"].as_str().map(String::from),
            }),
            Some("image") => Some(ContentPart::ImageBytes {
                data: b["source"]["data"].as_str().unwrap_or_default().to_string(),
                media_type: b["source"]["media_type"]
                    .as_str()
                    .unwrap_or("image/png")
                    .to_string(),
            }),
            _ => None,
        })
        .collect()
}

fn parts_to_content_blocks(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
            ContentPart::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => Some(json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
                "is_error": is_error,
            })),
            ContentPart::ImageBytes { data, media_type } => Some(json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data},
            })),
            ContentPart::ImageUrl { url, .. } => Some(json!({
                "type": "image",
                "source": {"type": "url", "url": url},
            })),
            ContentPart::Reasoning { content, encrypted_content, .. } => Some(json!({
                "type": "thinking",
                "thinking": content.clone().unwrap_or_default(),
                "signature": encrypted_content,
            })),
            _ => None,
        })
        .collect()
}

impl FormatAdapter for AnthropicAdapter {
    type Stream = AnthropicStreamProcessor;

    fn format_name(&self) -> &'static str {
        "anthropic_messages"
    }

    fn client_to_canonical(&self, client_req: &Value) -> AdapterResult<CanonicalRequest> {
        let model = client_req["model"]
            .as_str()
            .ok_or_else(|| AdapterError::InvalidInput("missing model".into()))?
            .to_string();

        let raw_messages = client_req["messages"]
            .as_array()
            .ok_or_else(|| AdapterError::InvalidInput("missing messages".into()))?;

        let mut messages = Vec::new();
        for m in raw_messages {
            let role = match m["role"].as_str() {
                Some("user") => Role::User,
                Some("assistant") => Role::Assistant,
                Some(other) => {
                    return Err(AdapterError::InvalidInput(format!("unknown role: {other}")))
                }
                None => return Err(AdapterError::InvalidInput("message missing role".into())),
            };

            let blocks = match &m["content"] {
                Value::String(s) => vec![ContentPart::text(s.clone())],
                Value::Array(arr) => content_block_to_parts(arr),
                _ => vec![],
            };

            let tool_calls = match &m["content"] {
                Value::Array(arr) => {
                    let calls: Vec<ToolCall> = arr
                        .iter()
                        .filter(|b| b["type"] == "tool_use")
                        .filter_map(|b| {
                            Some(ToolCall {
                                id: b["id"].as_str()?.to_string(),
                                name: b["name"].as_str()?.to_string(),
                                arguments: b["input"].to_string(),
                            })
                        })
                        .collect();
                    if calls.is_empty() {
                        None
                    } else {
                        Some(calls)
                    }
                }
                _ => None,
            };

            messages.push(Message {
                role,
                content: blocks,
                name: None,
                tool_call_id: None,
                tool_calls,
            });
        }

        let tools = client_req["tools"]
            .as_array()
            .map(|ts| {
                ts.iter()
                    .filter_map(|t| {
                        Some(Tool {
                            name: t["name"].as_str()?.to_string(),
                            description: t["description"].as_str().map(String::from),
                            parameters: t["input_schema"].clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let tool_choice = match client_req["tool_choice"]["type"].as_str() {
            Some("auto") => Some(ToolChoice::Auto),
            Some("any") => Some(ToolChoice::Required),
            Some("none") => Some(ToolChoice::None),
            Some("tool") => client_req["tool_choice"]["name"]
                .as_str()
                .map(|name| ToolChoice::Function { name: name.into() }),
            _ => None,
        };

        Ok(CanonicalRequest {
            schema_version: relaygate_core::CANONICAL_SCHEMA_VERSION.into(),
            model,
            system: client_req["system"].as_str().map(String::from),
            messages,
            tools,
            tool_choice,
            generation: GenerationParams {
                max_tokens: client_req["max_tokens"].as_u64().map(|v| v as u32),
                temperature: client_req["temperature"].as_f64().map(|v| v as f32),
                top_p: client_req["top_p"].as_f64().map(|v| v as f32),
                top_k: client_req["top_k"].as_u64().map(|v| v as u32),
                stop_sequences: client_req["stop_sequences"].as_array().map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                }),
                seed: None,
            },
            stream: client_req["stream"].as_bool().unwrap_or(false),
            user: None,
            provider_params: HashMap::new(),
            reasoning_effort: None,
        })
    }

    fn canonical_to_provider(&self, req: &CanonicalRequest) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                if m.role == Role::Tool {
                    json!({
                        "role": "user",
                        "content": parts_to_content_blocks(&m.content),
                    })
                } else if let Some(tool_calls) = &m.tool_calls {
                    let mut blocks = parts_to_content_blocks(&m.content);
                    for tc in tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": serde_json::from_str::<Value>(&tc.arguments).unwrap_or(json!({})),
                        }));
                    }
                    json!({
                        "role": "assistant",
                        "content": blocks,
                    })
                } else {
                    json!({
                        "role": if m.role == Role::Assistant { "assistant" } else { "user" },
                        "content": parts_to_content_blocks(&m.content),
                    })
                }
            })
            .collect();

        let max_tokens = req.generation.max_tokens.unwrap_or_else(|| default_max_tokens(&req.model));

        let mut body = json!({
            "model": req.bare_model(),
            "messages": messages,
            "max_tokens": max_tokens,
            "stream": req.stream,
        });

        if let Some(system) = &req.system {
            body["system"] = json!(system);
        }
        if let Some(t) = req.generation.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = req.generation.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(k) = req.generation.top_k {
            body["top_k"] = json!(k);
        }
        if let Some(stop) = &req.generation.stop_sequences {
            body["stop_sequences"] = json!(stop);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        match &req.tool_choice {
            Some(ToolChoice::Auto) => body["tool_choice"] = json!({"type": "auto"}),
            Some(ToolChoice::Required) => body["tool_choice"] = json!({"type": "any"}),
            // Anthropic has no "none" value; the field is omitted entirely.
            Some(ToolChoice::None) | None => {}
            Some(ToolChoice::Function { name }) => {
                body["tool_choice"] = json!({"type": "tool", "name": name})
            }
        }
        if let Some(effort) = req.reasoning_effort {
            if let Some(budget) = thinking_budget(effort) {
                body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
            }
        }
        if let Some(extra) = req.provider_params.get("anthropic").and_then(Value::as_object) {
            for (k, v) in extra {
                body[k] = v.clone();
            }
        }

        body
    }

    fn provider_to_canonical(&self, provider_resp: &Value) -> AdapterResult<CanonicalResponse> {
        let blocks = provider_resp["content"].as_array().cloned().unwrap_or_default();
        let content = content_block_to_parts(&blocks);
        let tool_calls: Vec<ToolCall> = blocks
            .iter()
            .filter(|b| b["type"] == "tool_use")
            .filter_map(|b| {
                Some(ToolCall {
                    id: b["id"].as_str()?.to_string(),
                    name: b["name"].as_str()?.to_string(),
                    arguments: b["input"].to_string(),
                })
            })
            .collect();

        let finish_reason = match provider_resp["stop_reason"].as_str() {
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolCalls,
            Some("stop_sequence") => FinishReason::StopSequence,
            _ => FinishReason::Stop,
        };

        let usage_data = &provider_resp["usage"];
        let usage = Usage {
            input_tokens: usage_data["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage_data["output_tokens"].as_u64().unwrap_or(0),
            cache_write_tokens: usage_data["cache_creation_input_tokens"].as_u64().unwrap_or(0),
            cached_tokens: usage_data["cache_read_input_tokens"].as_u64().unwrap_or(0),
            ..Default::default()
        }
        .with_openai_mirror();

        Ok(CanonicalResponse {
            id: provider_resp["id"].as_str().unwrap_or_default().to_string(),
            model: provider_resp["model"].as_str().unwrap_or_default().to_string(),
            created: 0,
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: Role::Assistant,
                    content,
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
        let mut content = parts_to_content_blocks(&choice.message.content);
        if let Some(tool_calls) = &choice.tool_calls {
            for tc in tool_calls {
                content.push(json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.name,
                    "input": serde_json::from_str::<Value>(&tc.arguments).unwrap_or(json!({})),
                }));
            }
        }

        let stop_reason = match choice.finish_reason {
            FinishReason::Length => "max_tokens",
            FinishReason::ToolCalls => "tool_use",
            FinishReason::StopSequence => "stop_sequence",
            _ => "end_turn",
        };

        json!({
            "id": resp.id,
            "type": "message",
            "role": "assistant",
            "model": resp.model,
            "content": content,
            "stop_reason": stop_reason,
            "usage": {
                "input_tokens": resp.usage.input_tokens,
                "output_tokens": resp.usage.output_tokens,
                "cache_creation_input_tokens": resp.usage.cache_write_tokens,
                "cache_read_input_tokens": resp.usage.cached_tokens,
            }
        })
    }

    fn new_stream_processor(&self) -> AnthropicStreamProcessor {
        AnthropicStreamProcessor::default()
    }
}

#[derive(Default)]
pub struct AnthropicStreamProcessor {
    current_tool_id: Option<String>,
    current_tool_name: Option<String>,
    block_index: u32,
    input_tokens: u64,
    cache_write_tokens: u64,
    cached_tokens: u64,
    completed: bool,
}

impl StreamProcessor for AnthropicStreamProcessor {
    fn process(&mut self, event: &Value) -> AdapterResult<Vec<CanonicalStreamEvent>> {
        let mut out = Vec::new();
        match event["type"].as_str() {
            Some("message_start") => {
                let msg = &event["message"];
                out.push(CanonicalStreamEvent::new(StreamEventKind::ResponseCreated {
                    id: msg["id"].as_str().unwrap_or_default().to_string(),
                    model: msg["model"].as_str().unwrap_or_default().to_string(),
                }));
                let usage = &msg["usage"];
                self.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
                self.cache_write_tokens = usage["cache_creation_input_tokens"].as_u64().unwrap_or(0);
                self.cached_tokens = usage["cache_read_input_tokens"].as_u64().unwrap_or(0);
            }
            Some("content_block_start") => {
                self.block_index = event["index"].as_u64().unwrap_or(0) as u32;
                let block = &event["content_block"];
                if block["type"] == "tool_use" {
                    self.current_tool_id = block["id"].as_str().map(String::from);
                    self.current_tool_name = block["name"].as_str().map(String::from);
                    out.push(CanonicalStreamEvent::new(StreamEventKind::ToolCallStart {
                        index: self.block_index,
                        id: self.current_tool_id.clone().unwrap_or_default(),
                        name: self.current_tool_name.clone().unwrap_or_default(),
                    }));
                } else {
                    out.push(CanonicalStreamEvent::new(StreamEventKind::ContentPartStart {
                        index: self.block_index,
                    }));
                }
            }
            Some("content_block_delta") => {
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => out.push(CanonicalStreamEvent::new(
                        StreamEventKind::ContentDelta {
                            part: ContentPartKind::Text,
                            value: delta["text"].as_str().unwrap_or_default().to_string(),
                            index: Some(self.block_index),
                        },
                    )),
                    Some("thinking_delta") => out.push(CanonicalStreamEvent::new(
                        StreamEventKind::ContentDelta {
                            part: ContentPartKind::Thinking,
                            value: delta["thinking"].as_str().unwrap_or_default().to_string(),
                            index: Some(self.block_index),
                        },
                    )),
                    Some("input_json_delta") => {
                        out.push(CanonicalStreamEvent::new(
                            StreamEventKind::FunctionCallArgumentsDelta {
                                index: self.block_index,
                                call_id: self.current_tool_id.clone().unwrap_or_default(),
                                delta: delta["partial_json"].as_str().unwrap_or_default().to_string(),
                            },
                        ));
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                if self.current_tool_id.take().is_some() {
                    self.current_tool_name = None;
                } else {
                    out.push(CanonicalStreamEvent::new(StreamEventKind::ContentPartDone {
                        index: self.block_index,
                    }));
                }
            }
            // `message_delta` is the first terminal event on this wire: it
            // carries the stop reason and the cumulative output count, so
            // the completion is lowered here. The later `message_stop` is
            // then pure framing.
            Some("message_delta") => {
                let finish_reason = match event["delta"]["stop_reason"].as_str() {
                    Some("max_tokens") => FinishReason::Length,
                    Some("tool_use") => FinishReason::ToolCalls,
                    Some("stop_sequence") => FinishReason::StopSequence,
                    _ => FinishReason::Stop,
                };
                let usage = Usage {
                    input_tokens: self.input_tokens,
                    output_tokens: event["usage"]["output_tokens"].as_u64().unwrap_or(0),
                    cache_write_tokens: self.cache_write_tokens,
                    cached_tokens: self.cached_tokens,
                    ..Default::default()
                }
                .with_openai_mirror();
                out.push(CanonicalStreamEvent::new(StreamEventKind::Usage { usage }));
                out.push(CanonicalStreamEvent::new(StreamEventKind::ResponseCompleted {
                    finish_reason,
                    response: None,
                }));
                self.completed = true;
            }
            Some("message_stop") => {
                // Only terminal when the stream never sent a message_delta.
                if !self.completed {
                    out.push(CanonicalStreamEvent::new(StreamEventKind::ResponseCompleted {
                        finish_reason: FinishReason::Stop,
                        response: None,
                    }));
                    self.completed = true;
                }
            }
            Some("error") => {
                out.push(CanonicalStreamEvent::new(StreamEventKind::Error {
                    message: event["error"]["message"]
                        .as_str()
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
    fn s2_missing_max_tokens_gets_default() {
        let adapter = AnthropicAdapter;
        let req = CanonicalRequest {
            schema_version: relaygate_core::CANONICAL_SCHEMA_VERSION.into(),
            model: "anthropic/claude-sonnet-4".into(),
            system: None,
            messages: vec![Message::text(Role::User, "hi")],
            tools: vec![],
            tool_choice: None,
            generation: GenerationParams::default(),
            stream: false,
            user: None,
            provider_params: HashMap::new(),
            reasoning_effort: None,
        };
        let body = adapter.canonical_to_provider(&req);
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn claude_3_5_sonnet_gets_the_larger_default() {
        assert_eq!(default_max_tokens("claude-3-5-sonnet-20241022"), 8192);
        assert_eq!(default_max_tokens("anthropic/claude-3-5-sonnet-20241022"), 8192);
        assert_eq!(default_max_tokens("claude-3-opus-20240229"), 4096);
    }

    #[test]
    fn tool_choice_required_maps_to_any() {
        let adapter = AnthropicAdapter;
        let client_req = json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "hi"}],
            "tool_choice": {"type": "any"},
        });
        let canonical = adapter.client_to_canonical(&client_req).unwrap();
        assert!(matches!(canonical.tool_choice, Some(ToolChoice::Required)));
    }

    #[test]
    fn s3_required_renders_as_any_and_none_is_omitted() {
        let adapter = AnthropicAdapter;
        let mut req = CanonicalRequest {
            schema_version: relaygate_core::CANONICAL_SCHEMA_VERSION.into(),
            model: "claude-sonnet-4".into(),
            system: None,
            messages: vec![Message::text(Role::User, "weather?")],
            tools: vec![Tool {
                name: "get_weather".into(),
                description: None,
                parameters: json!({"type": "object", "properties": {"location": {"type": "string"}}}),
            }],
            tool_choice: Some(ToolChoice::Required),
            generation: GenerationParams::default(),
            stream: false,
            user: None,
            provider_params: HashMap::new(),
            reasoning_effort: None,
        };
        let body = adapter.canonical_to_provider(&req);
        assert_eq!(body["tools"][0]["name"], "get_weather");
        assert_eq!(body["tool_choice"]["type"], "any");

        req.tool_choice = Some(ToolChoice::None);
        let body = adapter.canonical_to_provider(&req);
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn thinking_delta_streams_as_thinking_content() {
        let mut proc = AnthropicStreamProcessor::default();
        proc.process(&json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "thinking", "thinking": ""},
        }))
        .unwrap();
        let events = proc
            .process(&json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "thinking_delta", "thinking": "hmm"},
            }))
            .unwrap();
        assert!(matches!(
            &events[0].kind,
            StreamEventKind::ContentDelta { part: ContentPartKind::Thinking, value, .. } if value == "hmm"
        ));
    }

    #[test]
    fn system_field_round_trips() {
        let adapter = AnthropicAdapter;
        let client_req = json!({
            "model": "claude-sonnet-4",
            "system": "Be terse",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 100,
        });
        let canonical = adapter.client_to_canonical(&client_req).unwrap();
        assert_eq!(canonical.system.as_deref(), Some("Be terse"));
        let rendered = adapter.canonical_to_provider(&canonical);
        assert_eq!(rendered["system"], "Be terse");
    }

    #[test]
    fn s6_streaming_usage_sniff_from_message_start_and_delta() {
        let mut proc = AnthropicStreamProcessor::default();
        proc.process(&json!({
            "type": "message_start",
            "message": {
                "id": "msg_1",
                "model": "claude-sonnet-4",
                "usage": {"input_tokens": 100, "cache_read_input_tokens": 20},
            },
        }))
        .unwrap();
        let events = proc
            .process(&json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn"},
                "usage": {"output_tokens": 42},
            }))
            .unwrap();

        let usage = events
            .iter()
            .find_map(|e| match &e.kind {
                StreamEventKind::Usage { usage } => Some(*usage),
                _ => None,
            })
            .unwrap();
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.cached_tokens, 20);
        assert_eq!(usage.output_tokens, 42);
    }

    #[test]
    fn first_terminal_event_lowers_to_response_completed_exactly_once() {
        let mut proc = AnthropicStreamProcessor::default();
        let delta_events = proc
            .process(&json!({
                "type": "message_delta",
                "delta": {"stop_reason": "tool_use"},
                "usage": {"output_tokens": 7},
            }))
            .unwrap();
        assert!(matches!(
            delta_events.last().unwrap().kind,
            StreamEventKind::ResponseCompleted { finish_reason: FinishReason::ToolCalls, .. }
        ));

        // message_stop after the completion is pure framing.
        let stop_events = proc.process(&json!({"type": "message_stop"})).unwrap();
        assert!(stop_events.is_empty());
    }

    #[test]
    fn message_stop_without_a_delta_still_completes_the_stream() {
        let mut proc = AnthropicStreamProcessor::default();
        let events = proc.process(&json!({"type": "message_stop"})).unwrap();
        assert!(matches!(
            events[0].kind,
            StreamEventKind::ResponseCompleted { finish_reason: FinishReason::Stop, .. }
        ));
    }
}
