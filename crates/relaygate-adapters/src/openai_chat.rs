//! OpenAI `chat/completions` wire format ↔ canonical schema: multi-part
//! content, JSON-schema tool definitions, tool_choice, and the
//! provider_params escape hatch, in both directions, plus the stateful
//! per-request stream folder.

use std::collections::HashMap;

use relaygate_core::schema::{
    ContentPart, FinishReason, GenerationParams, Message, Role, Tool, ToolCall, ToolChoice, Usage,
};
use relaygate_core::stream::{ContentPartKind, StreamEventKind};
use relaygate_core::{CanonicalRequest, CanonicalResponse, CanonicalStreamEvent, Choice};
use serde_json::{json, Value};

use crate::traits::{AdapterError, AdapterResult, FormatAdapter, StreamProcessor};

pub struct OpenAiChatAdapter;

/// Models whose id matches the `o1`/`o3`/`o4` (or `gpt-5`) family require
/// `max_completion_tokens` instead of `max_tokens`.
fn uses_max_completion_tokens(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("o1") || m.starts_with("o3") || m.starts_with("o4") || m.contains("gpt-5")
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn parse_role(s: &str) -> AdapterResult<Role> {
    match s {
        "system" | "developer" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(AdapterError::InvalidInput(format!("unknown role: {other}"))),
    }
}

/// OpenAI chat message `content` may be a bare string or an array of typed
/// parts (`{type:"text",text}` / `{type:"image_url",image_url:{url}}`).
fn parse_content(value: &Value) -> Vec<ContentPart> {
    match value {
        Value::String(s) => vec![ContentPart::text(s.clone())],
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| match p.get("type").and_then(Value::as_str) {
                Some("text") => p
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|t| ContentPart::text(t)),
                Some("image_url") => p["image_url"]["url"]
                    .as_str()
                    .map(|url| ContentPart::ImageUrl {
                        url: url.to_string(),
                        media_type: None,
                    }),
                _ => None,
            })
            .collect(),
        Value::Null => vec![],
        _ => vec![],
    }
}

fn render_content(parts: &[ContentPart]) -> Value {
    if parts.len() == 1 {
        if let Some(text) = parts[0].as_text() {
            return json!(text);
        }
    }
    let rendered: Vec<Value> = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
            ContentPart::ImageUrl { url, .. } => {
                Some(json!({"type": "image_url", "image_url": {"url": url}}))
            }
            _ => None,
        })
        .collect();
    if rendered.is_empty() {
        Value::Null
    } else {
        json!(rendered)
    }
}

impl FormatAdapter for OpenAiChatAdapter {
    type Stream = OpenAiChatStreamProcessor;

    fn format_name(&self) -> &'static str {
        "openai_chat"
    }

    fn client_to_canonical(&self, client_req: &Value) -> AdapterResult<CanonicalRequest> {
        let model = client_req["model"]
            .as_str()
            .ok_or_else(|| AdapterError::InvalidInput("missing model".into()))?
            .to_string();

        let raw_messages = client_req["messages"]
            .as_array()
            .ok_or_else(|| AdapterError::InvalidInput("missing messages".into()))?;

        let mut system_parts = Vec::new();
        let mut messages = Vec::new();

        for m in raw_messages {
            let role_str_val = m["role"]
                .as_str()
                .ok_or_else(|| AdapterError::InvalidInput("message missing role".into()))?;
            let role = parse_role(role_str_val)?;

            if role == Role::System {
                if let Some(text) = m["content"].as_str() {
                    system_parts.push(text.to_string());
                }
                continue;
            }

            let tool_calls = m["tool_calls"].as_array().map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        Some(ToolCall {
                            id: c["id"].as_str()?.to_string(),
                            name: c["function"]["name"].as_str()?.to_string(),
                            arguments: c["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                        })
                    })
                    .collect::<Vec<_>>()
            });

            let content = if role == Role::Tool {
                vec![ContentPart::ToolResult {
                    tool_call_id: m["tool_call_id"].as_str().unwrap_or_default().to_string(),
                    content: m["content"].as_str().unwrap_or_default().to_string(),
                    is_error: false,
                }]
            } else {
                parse_content(&m["content"])
            };

            messages.push(Message {
                role,
                content,
                name: m["name"].as_str().map(String::from),
                tool_call_id: m["tool_call_id"].as_str().map(String::from),
                tool_calls,
            });
        }

        let tools = client_req["tools"]
            .as_array()
            .map(|ts| {
                ts.iter()
                    .filter_map(|t| {
                        let f = &t["function"];
                        Some(Tool {
                            name: f["name"].as_str()?.to_string(),
                            description: f["description"].as_str().map(String::from),
                            parameters: f["parameters"].clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let tool_choice = match &client_req["tool_choice"] {
            Value::String(s) if s == "auto" => Some(ToolChoice::Auto),
            Value::String(s) if s == "required" => Some(ToolChoice::Required),
            Value::String(s) if s == "none" => Some(ToolChoice::None),
            Value::Object(_) => client_req["tool_choice"]["function"]["name"]
                .as_str()
                .map(|name| ToolChoice::Function { name: name.into() }),
            _ => None,
        };

        let max_tokens = client_req["max_completion_tokens"]
            .as_u64()
            .or_else(|| client_req["max_tokens"].as_u64())
            .map(|v| v as u32);

        let stop_sequences = match &client_req["stop"] {
            Value::String(s) => Some(vec![s.clone()]),
            Value::Array(arr) => Some(
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect(),
            ),
            _ => None,
        };

        Ok(CanonicalRequest {
            schema_version: relaygate_core::CANONICAL_SCHEMA_VERSION.into(),
            model,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n"))
            },
            messages,
            tools,
            tool_choice,
            generation: GenerationParams {
                max_tokens,
                temperature: client_req["temperature"].as_f64().map(|v| v as f32),
                top_p: client_req["top_p"].as_f64().map(|v| v as f32),
                top_k: None,
                stop_sequences,
                seed: client_req["seed"].as_i64(),
            },
            stream: client_req["stream"].as_bool().unwrap_or(false),
            user: client_req["user"].as_str().map(String::from),
            provider_params: HashMap::new(),
            reasoning_effort: None,
        })
    }

    fn canonical_to_provider(&self, req: &CanonicalRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        for m in &req.messages {
            match m.role {
                Role::Tool => {
                    for part in &m.content {
                        if let ContentPart::ToolResult {
                            tool_call_id,
                            content,
                            ..
                        } = part
                        {
                            messages.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_call_id,
                                "content": content,
                            }));
                        }
                    }
                }
                Role::Assistant if m.tool_calls.is_some() => {
                    let tool_calls: Vec<Value> = m
                        .tool_calls
                        .as_ref()
                        .unwrap()
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {"name": tc.name, "arguments": tc.arguments},
                            })
                        })
                        .collect();
                    messages.push(json!({
                        "role": "assistant",
                        "content": render_content(&m.content),
                        "tool_calls": tool_calls,
                    }));
                }
                _ => {
                    messages.push(json!({
                        "role": role_str(m.role),
                        "content": render_content(&m.content),
                    }));
                }
            }
        }

        let mut body = json!({
            "model": req.bare_model(),
            "messages": messages,
            "stream": req.stream,
        });

        if let Some(t) = req.generation.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = req.generation.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(stop) = &req.generation.stop_sequences {
            body["stop"] = json!(stop);
        }
        if let Some(seed) = req.generation.seed {
            body["seed"] = json!(seed);
        }
        if let Some(max_tokens) = req.generation.max_tokens {
            if uses_max_completion_tokens(req.bare_model()) {
                body["max_completion_tokens"] = json!(max_tokens);
            } else {
                body["max_tokens"] = json!(max_tokens);
            }
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
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
                body["tool_choice"] = json!({"type": "function", "function": {"name": name}})
            }
            None => {}
        }
        if req.stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        if let Some(extra) = req.provider_params.get("openai").and_then(Value::as_object) {
            for (k, v) in extra {
                body[k] = v.clone();
            }
        }

        body
    }

    fn provider_to_canonical(&self, provider_resp: &Value) -> AdapterResult<CanonicalResponse> {
        let choice = &provider_resp["choices"][0];
        let content = choice["message"]["content"].as_str().unwrap_or("");
        let tool_calls: Vec<ToolCall> = choice["message"]["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        Some(ToolCall {
                            id: c["id"].as_str()?.to_string(),
                            name: c["function"]["name"].as_str()?.to_string(),
                            arguments: c["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = match choice["finish_reason"].as_str() {
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some("tool_calls") => FinishReason::ToolCalls,
            _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        };

        let usage_data = &provider_resp["usage"];
        // `prompt_tokens` is inclusive of the cached share; keep the
        // non-cached and cached portions apart for per-class cost math and
        // preserve the raw provider total in the mirror vocabulary.
        let raw_prompt = usage_data["prompt_tokens"].as_u64().unwrap_or(0);
        let cached = usage_data["prompt_tokens_details"]["cached_tokens"].as_u64().unwrap_or(0);
        let usage = Usage {
            input_tokens: raw_prompt.saturating_sub(cached),
            output_tokens: usage_data["completion_tokens"].as_u64().unwrap_or(0),
            cached_tokens: cached,
            reasoning_tokens: usage_data["completion_tokens_details"]["reasoning_tokens"]
                .as_u64()
                .unwrap_or(0),
            prompt_tokens: Some(raw_prompt),
            ..Default::default()
        }
        .with_openai_mirror();

        Ok(CanonicalResponse {
            id: provider_resp["id"].as_str().unwrap_or_default().to_string(),
            model: provider_resp["model"].as_str().unwrap_or_default().to_string(),
            created: provider_resp["created"].as_i64().unwrap_or(0),
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: Role::Assistant,
                    content: if content.is_empty() {
                        vec![]
                    } else {
                        vec![ContentPart::text(content)]
                    },
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
        let finish_reason = match choice.finish_reason {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::StopSequence => "stop",
            FinishReason::Error => "stop",
        };

        let tool_calls = choice.tool_calls.as_ref().map(|tcs| {
            tcs.iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {"name": tc.name, "arguments": tc.arguments},
                    })
                })
                .collect::<Vec<_>>()
        });

        json!({
            "id": resp.id,
            "object": "chat.completion",
            "created": resp.created,
            "model": resp.model,
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": choice.message.text_content_or_null(),
                    "tool_calls": tool_calls,
                },
                "finish_reason": finish_reason,
            }],
            "usage": {
                "prompt_tokens": resp.usage.input_tokens,
                "completion_tokens": resp.usage.output_tokens,
                "total_tokens": resp.usage.total_tokens(),
            }
        })
    }

    fn new_stream_processor(&self) -> OpenAiChatStreamProcessor {
        OpenAiChatStreamProcessor::default()
    }
}

/// Shim so `canonical_to_client` can render an empty-content assistant
/// message as `content: null`, matching the OpenAI wire convention for
/// tool-call-only turns.
trait TextOrNull {
    fn text_content_or_null(&self) -> Value;
}

impl TextOrNull for Message {
    fn text_content_or_null(&self) -> Value {
        let text = self.text_content();
        if text.is_empty() {
            Value::Null
        } else {
            json!(text)
        }
    }
}

#[derive(Default)]
pub struct OpenAiChatStreamProcessor {
    sent_created: bool,
    tool_calls: HashMap<u64, (String, String, String)>,
    input_tokens: u64,
    output_tokens: u64,
    cached_tokens: u64,
    finish_reason_str: Option<String>,
}

impl StreamProcessor for OpenAiChatStreamProcessor {
    fn process(&mut self, event: &Value) -> AdapterResult<Vec<CanonicalStreamEvent>> {
        if event.as_str() == Some("[DONE]") {
            let mut out = Vec::new();
            for (id, name, args) in self.tool_calls.values() {
                out.push(CanonicalStreamEvent::new(
                    StreamEventKind::FunctionCallArgumentsDone {
                        index: 0,
                        call_id: id.clone(),
                        arguments: args.clone(),
                    },
                ));
                let _ = name; // name already carried by ToolCallStart
            }
            let finish_reason = match self.finish_reason_str.as_deref() {
                Some("length") => FinishReason::Length,
                Some("content_filter") => FinishReason::ContentFilter,
                _ if !self.tool_calls.is_empty() => FinishReason::ToolCalls,
                _ => FinishReason::Stop,
            };
            out.push(CanonicalStreamEvent::new(StreamEventKind::Usage {
                usage: Usage {
                    input_tokens: self.input_tokens.saturating_sub(self.cached_tokens),
                    output_tokens: self.output_tokens,
                    cached_tokens: self.cached_tokens,
                    prompt_tokens: Some(self.input_tokens),
                    ..Default::default()
                }
                .with_openai_mirror(),
            }));
            out.push(CanonicalStreamEvent::new(StreamEventKind::ResponseCompleted {
                finish_reason,
                response: None,
            }));
            return Ok(out);
        }

        let mut out = Vec::new();
        if !self.sent_created {
            if let (Some(id), Some(model)) = (event["id"].as_str(), event["model"].as_str()) {
                out.push(CanonicalStreamEvent::new(StreamEventKind::ResponseCreated {
                    id: id.to_string(),
                    model: model.to_string(),
                }));
                self.sent_created = true;
            }
        }

        let delta = &event["choices"][0]["delta"];
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                out.push(CanonicalStreamEvent::new(StreamEventKind::ContentDelta {
                    part: ContentPartKind::Text,
                    value: text.to_string(),
                    index: Some(0),
                }));
            }
        }

        if let Some(tcs) = delta["tool_calls"].as_array() {
            for tc in tcs {
                let idx = tc["index"].as_u64().unwrap_or(0);
                let is_new = !self.tool_calls.contains_key(&idx);
                let entry = self
                    .tool_calls
                    .entry(idx)
                    .or_insert_with(|| (String::new(), String::new(), String::new()));
                if let Some(id) = tc["id"].as_str() {
                    entry.0 = id.to_string();
                }
                if let Some(name) = tc["function"]["name"].as_str() {
                    entry.1.push_str(name);
                }
                if is_new {
                    out.push(CanonicalStreamEvent::new(StreamEventKind::ToolCallStart {
                        index: idx as u32,
                        id: entry.0.clone(),
                        name: entry.1.clone(),
                    }));
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    entry.2.push_str(args);
                    out.push(CanonicalStreamEvent::new(
                        StreamEventKind::FunctionCallArgumentsDelta {
                            index: idx as u32,
                            call_id: entry.0.clone(),
                            delta: args.to_string(),
                        },
                    ));
                }
            }
        }

        if let Some(fr) = event["choices"][0]["finish_reason"].as_str() {
            self.finish_reason_str = Some(fr.to_string());
        }

        if let Some(usage) = event.get("usage") {
            if let Some(pt) = usage["prompt_tokens"].as_u64() {
                self.input_tokens = pt;
            }
            if let Some(ct) = usage["completion_tokens"].as_u64() {
                self.output_tokens = ct;
            }
            if let Some(cached) = usage["prompt_tokens_details"]["cached_tokens"].as_u64() {
                self.cached_tokens = cached;
            }
        }

        Ok(out)
    }
}
