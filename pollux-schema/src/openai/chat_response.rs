//! OpenAI Chat Completions response schema: the non-streaming
//! `ChatCompletionResponse` body and the `ChatCompletionChunk` SSE frame
//! shape for `POST /v1/chat/completions`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{ChatToolCall, ChatToolCallFunction};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ChatUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionMessage {
    pub role: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChatCompletionMessage {
    pub fn assistant(content: Option<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatCompletionMessage,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatUsage>,
}

impl ChatCompletionResponse {
    pub fn new(id: String, created: u64, model: String) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: Vec::new(),
            usage: None,
        }
    }
}

/// One streaming delta: a partial assistant message plus, optionally, a
/// partial tool-call argument fragment (OpenAI streams tool-call arguments
/// incrementally, indexed by `tool_calls[].index`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatCompletionDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCallDelta>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatToolCallDelta {
    pub index: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<ChatToolCallFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunkChoice {
    pub index: u32,
    pub delta: ChatCompletionDelta,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatCompletionChunkChoice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatUsage>,
}

impl ChatCompletionChunk {
    pub fn new(id: String, created: u64, model: String, choices: Vec<ChatCompletionChunkChoice>) -> Self {
        Self {
            id,
            object: "chat.completion.chunk".to_string(),
            created,
            model,
            choices,
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_stream_response_serializes_expected_shape() {
        let mut resp = ChatCompletionResponse::new("chatcmpl-1".to_string(), 1700000000, "gpt-4o".to_string());
        resp.choices.push(ChatCompletionChoice {
            index: 0,
            message: ChatCompletionMessage::assistant(Some("hi".to_string())),
            finish_reason: Some("stop".to_string()),
        });
        resp.usage = Some(ChatUsage::new(5, 2));

        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["object"], json!("chat.completion"));
        assert_eq!(value["choices"][0]["message"]["content"], json!("hi"));
        assert_eq!(value["usage"]["total_tokens"], json!(7));
    }

    #[test]
    fn chunk_round_trips_tool_call_delta() {
        let chunk = ChatCompletionChunk::new(
            "chatcmpl-1".to_string(),
            1700000000,
            "gpt-4o".to_string(),
            vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ChatToolCallDelta {
                        index: 0,
                        id: Some("call_1".to_string()),
                        call_type: Some("function".to_string()),
                        function: Some(ChatToolCallFunction {
                            name: "get_weather".to_string(),
                            arguments: "{\"city\":\"ny\"}".to_string(),
                        }),
                    }]),
                },
                finish_reason: None,
            }],
        );
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["object"], json!("chat.completion.chunk"));
        assert_eq!(
            value["choices"][0]["delta"]["tool_calls"][0]["function"]["name"],
            json!("get_weather")
        );
    }
}
