//! Canonical request/response schema — the single IR every client wire
//! format normalises into and every provider wire format renders from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::ops::AddAssign;

/// Bumped when a breaking change lands in the canonical shapes below.
/// Adapters log a warning on mismatch rather than rejecting the request —
/// canonicalization failures should surface as `AdapterFailure`, not a
/// version check.
pub const CANONICAL_SCHEMA_VERSION: &str = "2024-06-canonical-v1";

/// The wire format a client declared (by which endpoint it called), or a
/// provider's native format for passthrough decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientFormat {
    OpenAiChat,
    OpenAiResponses,
    AnthropicMessages,
}

impl ClientFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientFormat::OpenAiChat => "openai_chat",
            ClientFormat::OpenAiResponses => "openai_responses",
            ClientFormat::AnthropicMessages => "anthropic_messages",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One typed part of a message's content. Canonical messages always carry
/// content as a sequence of parts, even when a wire format allows a bare
/// string — adapters normalise a bare string to a single `Text` part.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    ImageBytes {
        data: String,
        media_type: String,
    },
    Audio {
        data: String,
        media_type: String,
    },
    Document {
        data: String,
        media_type: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Reasoning {
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
    },
}

impl ContentPart {
    pub fn text(s: impl Into<String>) -> Self {
        ContentPart::Text { text: s.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A requested tool/function call surfaced in an assistant message, or
/// accumulated incrementally across streaming argument deltas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text. Kept as a string (not a parsed `Value`) because
    /// streaming providers deliver it as concatenated argument fragments;
    /// callers parse once accumulation is complete.
    pub arguments: String,
}

impl ToolCall {
    pub fn arguments_value(&self) -> serde_json::Result<Value> {
        if self.arguments.is_empty() {
            Ok(Value::Object(Default::default()))
        } else {
            serde_json::from_str(&self.arguments)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Concatenate every text part, in order. Non-text parts are skipped —
    /// callers that need the full structured content should read `content`
    /// directly.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    Function { name: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Off,
    Low,
    Medium,
    High,
    Xhigh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// May carry a leading `"<provider>/"` qualifier; the router strips it
    /// before dispatch.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub generation: GenerationParams,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user: Option<String>,
    /// Per-provider escape hatch: opaque fields copied verbatim into the
    /// outbound request for the named provider. The only place arbitrary,
    /// unvalidated data is allowed to live in the canonical schema.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub provider_params: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reasoning_effort: Option<ReasoningEffort>,
}

fn default_schema_version() -> String {
    CANONICAL_SCHEMA_VERSION.to_string()
}

impl CanonicalRequest {
    /// Strip a leading `"<provider>/"` qualifier from `model`, if present
    /// and `provider` matches. Returns the bare model name either way.
    pub fn bare_model(&self) -> &str {
        match self.model.split_once('/') {
            Some((_, rest)) => rest,
            None => &self.model,
        }
    }

    pub fn explicit_provider(&self) -> Option<&str> {
        self.model.split_once('/').map(|(provider, _)| provider)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    StopSequence,
    Error,
}

/// Token accounting, carrying both the Anthropic-style vocabulary
/// (`input_tokens`/`output_tokens`) and the OpenAI-style mirror
/// (`prompt_tokens`/`completion_tokens`) so a consumer reading either
/// vocabulary sees a filled-in record regardless of upstream provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completion_tokens: Option<u64>,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Fill in the OpenAI-vocabulary mirror fields from the canonical ones.
    pub fn with_openai_mirror(mut self) -> Self {
        self.prompt_tokens.get_or_insert(self.input_tokens);
        self.completion_tokens.get_or_insert(self.output_tokens);
        self
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_model_strips_provider_prefix() {
        let req = CanonicalRequest {
            schema_version: CANONICAL_SCHEMA_VERSION.into(),
            model: "anthropic/claude-sonnet-4-20250514".into(),
            system: None,
            messages: vec![],
            tools: vec![],
            tool_choice: None,
            generation: GenerationParams::default(),
            stream: false,
            user: None,
            provider_params: HashMap::new(),
            reasoning_effort: None,
        };
        assert_eq!(req.bare_model(), "claude-sonnet-4-20250514");
        assert_eq!(req.explicit_provider(), Some("anthropic"));
    }

    #[test]
    fn bare_model_passthrough_when_unqualified() {
        let req = CanonicalRequest {
            schema_version: CANONICAL_SCHEMA_VERSION.into(),
            model: "gpt-4o".into(),
            system: None,
            messages: vec![],
            tools: vec![],
            tool_choice: None,
            generation: GenerationParams::default(),
            stream: false,
            user: None,
            provider_params: HashMap::new(),
            reasoning_effort: None,
        };
        assert_eq!(req.bare_model(), "gpt-4o");
        assert_eq!(req.explicit_provider(), None);
    }

    #[test]
    fn usage_openai_mirror_fills_from_canonical() {
        let usage = Usage {
            input_tokens: 100,
            output_tokens: 42,
            ..Default::default()
        }
        .with_openai_mirror();
        assert_eq!(usage.prompt_tokens, Some(100));
        assert_eq!(usage.completion_tokens, Some(42));
    }

    #[test]
    fn usage_add_assign_sums_classes() {
        let mut a = Usage {
            input_tokens: 10,
            output_tokens: 5,
            cached_tokens: 2,
            ..Default::default()
        };
        let b = Usage {
            input_tokens: 20,
            output_tokens: 15,
            cached_tokens: 3,
            ..Default::default()
        };
        a += b;
        assert_eq!(a.input_tokens, 30);
        assert_eq!(a.output_tokens, 20);
        assert_eq!(a.cached_tokens, 5);
    }
}
