//! OpenAI Responses API response schema: the non-streaming `ResponsesBody`
//! and the SSE event shapes for `POST /v1/responses` and `POST /responses`.
//!
//! Mirrors `chat_response.rs`'s split between a full, non-streaming body and
//! small per-event structs; the Responses API streams named events
//! (`response.created`, `response.output_text.delta`, ...) rather than
//! Chat Completions' single repeated `chunk` shape, so each event gets its
//! own struct instead of one shared `..Chunk` type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResponsesUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl ResponsesUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// One piece of an assistant message's content array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesOutputText {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub annotations: Vec<Value>,
}

impl ResponsesOutputText {
    pub fn new(text: String) -> Self {
        Self {
            kind: "output_text".to_string(),
            text,
            annotations: Vec::new(),
        }
    }
}

/// One top-level item of `ResponsesBody.output`: either an assistant
/// `message` (text content) or a `function_call` the client must execute
/// and answer with a `function_call_output` input item on the next turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesOutputItem {
    Message {
        id: String,
        status: String,
        role: String,
        content: Vec<ResponsesOutputText>,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
        status: String,
    },
    #[serde(other)]
    Unknown,
}

impl ResponsesOutputItem {
    pub fn message(id: String, text: String) -> Self {
        ResponsesOutputItem::Message {
            id,
            status: "completed".to_string(),
            role: "assistant".to_string(),
            content: vec![ResponsesOutputText::new(text)],
        }
    }

    pub fn function_call(id: String, call_id: String, name: String, arguments: String) -> Self {
        ResponsesOutputItem::FunctionCall {
            id,
            call_id,
            name,
            arguments,
            status: "completed".to_string(),
        }
    }
}

/// Non-streaming `POST /v1/responses` response body, and the shape embedded
/// in the streaming `response.completed` event's `response` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesBody {
    pub id: String,
    pub object: String,
    pub created_at: u64,
    pub model: String,
    pub status: String,
    pub output: Vec<ResponsesOutputItem>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ResponsesBody {
    pub fn new(id: String, created_at: u64, model: String) -> Self {
        Self {
            id,
            object: "response".to_string(),
            created_at,
            model,
            status: "in_progress".to_string(),
            output: Vec::new(),
            usage: None,
            extra: BTreeMap::new(),
        }
    }
}

/// One `response.output_text.delta` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesTextDeltaEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub item_id: String,
    pub output_index: u32,
    pub delta: String,
}

/// One `response.function_call_arguments.delta` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesFunctionCallDeltaEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub item_id: String,
    pub output_index: u32,
    pub delta: String,
}

/// One `response.output_item.added` / `.done` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesOutputItemEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub output_index: u32,
    pub item: ResponsesOutputItem,
}

/// Terminal `response.completed` SSE event, embedding the full body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesCompletedEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub response: ResponsesBody,
}

/// Initial `response.created` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesCreatedEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub response: ResponsesBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_output_item_round_trips() {
        let item = ResponsesOutputItem::message("msg_1".to_string(), "hi".to_string());
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], json!("message"));
        assert_eq!(value["content"][0]["text"], json!("hi"));

        let back: ResponsesOutputItem = serde_json::from_value(value).unwrap();
        match back {
            ResponsesOutputItem::Message { role, .. } => assert_eq!(role, "assistant"),
            _ => panic!("expected message variant"),
        }
    }

    #[test]
    fn function_call_output_item_round_trips() {
        let item = ResponsesOutputItem::function_call(
            "fc_1".to_string(),
            "call_1".to_string(),
            "get_weather".to_string(),
            r#"{"city":"ny"}"#.to_string(),
        );
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], json!("function_call"));
        assert_eq!(value["call_id"], json!("call_1"));
    }

    #[test]
    fn responses_body_defaults_status_in_progress() {
        let body = ResponsesBody::new("resp_1".to_string(), 1700000000, "gpt-4o".to_string());
        assert_eq!(body.status, "in_progress");
        assert!(body.output.is_empty());
    }
}
