//! Canonical streaming events — the tagged union every provider's SSE/NDJSON
//! stream folds into, and every client format's stream renders from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{FinishReason, Usage};

/// Which content channel a `ContentDelta` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPartKind {
    Text,
    ToolCall,
    Thinking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEventKind {
    ResponseCreated {
        id: String,
        model: String,
    },
    ContentDelta {
        part: ContentPartKind,
        value: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<u32>,
    },
    ContentPartStart {
        index: u32,
    },
    ContentPartDone {
        index: u32,
    },
    OutputTextDone {
        index: u32,
        text: String,
    },
    OutputItemAdded {
        index: u32,
    },
    OutputItemDone {
        index: u32,
    },
    ToolCallStart {
        index: u32,
        id: String,
        name: String,
    },
    FunctionCallArgumentsDelta {
        index: u32,
        call_id: String,
        delta: String,
    },
    FunctionCallArgumentsDone {
        index: u32,
        call_id: String,
        arguments: String,
    },
    RefusalDelta {
        delta: String,
    },
    RefusalDone {
        refusal: String,
    },
    ReasoningSummaryTextDelta {
        delta: String,
    },
    ReasoningSummaryTextDone {
        text: String,
    },
    /// Built-in tool progress notifications from the OpenAI responses
    /// stream (`response.file_search_call.*` / `response.web_search_call.*`).
    /// `phase` is the dotted suffix (`in_progress`, `searching`, `completed`).
    FileSearchCall {
        index: u32,
        phase: String,
    },
    WebSearchCall {
        index: u32,
        phase: String,
    },
    Usage {
        usage: Usage,
    },
    ResponseCompleted {
        finish_reason: FinishReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Box<crate::schema::CanonicalResponse>>,
    },
    MessageDelta {
        stop_reason: FinishReason,
        usage: Usage,
    },
    MessageDone,
    Ping,
    Error {
        message: String,
    },
}

/// One event in a canonical stream, plus the untranslated provider event
/// (when cheap to capture) for debugging and `CANONICAL_MODE` diffing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalStreamEvent {
    #[serde(flatten)]
    pub kind: StreamEventKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider_raw: Option<Value>,
}

impl CanonicalStreamEvent {
    pub fn new(kind: StreamEventKind) -> Self {
        Self {
            kind,
            provider_raw: None,
        }
    }

    pub fn with_raw(kind: StreamEventKind, raw: Value) -> Self {
        Self {
            kind,
            provider_raw: Some(raw),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            StreamEventKind::ResponseCompleted { .. }
                | StreamEventKind::MessageDone
                | StreamEventKind::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_events_are_flagged() {
        let done = CanonicalStreamEvent::new(StreamEventKind::MessageDone);
        assert!(done.is_terminal());

        let delta = CanonicalStreamEvent::new(StreamEventKind::ContentDelta {
            part: ContentPartKind::Text,
            value: "hi".into(),
            index: None,
        });
        assert!(!delta.is_terminal());
    }
}
