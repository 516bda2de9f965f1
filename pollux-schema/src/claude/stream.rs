use super::content::ContentBlock;
use super::response::{ClaudeMessagesResponse, Usage};
use serde::{Deserialize, Serialize};

/// A Claude streaming `content_block_delta.delta` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MessageDeltaPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaUsage {
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaudeStreamError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// A single SSE event emitted on the Claude Messages streaming wire.
///
/// The `type` discriminant doubles as the SSE `event:` line name
/// (see `ClaudeStreamEvent::event_name`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeStreamEvent {
    MessageStart {
        message: ClaudeMessagesResponse,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaPayload,
        usage: DeltaUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: ClaudeStreamError,
    },
}

impl ClaudeStreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClaudeStreamEvent::MessageStart { .. } => "message_start",
            ClaudeStreamEvent::ContentBlockStart { .. } => "content_block_start",
            ClaudeStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            ClaudeStreamEvent::ContentBlockStop { .. } => "content_block_stop",
            ClaudeStreamEvent::MessageDelta { .. } => "message_delta",
            ClaudeStreamEvent::MessageStop => "message_stop",
            ClaudeStreamEvent::Ping => "ping",
            ClaudeStreamEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_name_matches_serialized_type_tag() {
        let event = ClaudeStreamEvent::ContentBlockStop { index: 0 };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], json!(event.event_name()));
    }

    #[test]
    fn content_delta_tags_roundtrip() {
        let delta = ContentDelta::ThinkingDelta {
            thinking: "reasoning...".to_string(),
        };
        let v = serde_json::to_value(&delta).unwrap();
        assert_eq!(v["type"], json!("thinking_delta"));
        assert_eq!(v["thinking"], json!("reasoning..."));
    }
}
