use super::content::ContentBlock;
use super::message::{Message, MessageContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `system` accepts either a bare string or a block array (text blocks only
/// in practice, but modeled the same way as message content for symmetry).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl SystemPrompt {
    pub fn to_plain_text(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub thinking_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

impl ThinkingConfig {
    pub fn is_enabled(&self) -> bool {
        self.thinking_type == "enabled"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeMessagesRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ClaudeTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_config: Option<OutputConfig>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ClaudeMessagesRequest {
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn user_id(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("user_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn effort(&self) -> Option<&str> {
        self.output_config.as_ref().and_then(|o| o.effort.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_request_parses() {
        let req: ClaudeMessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-5-sonnet-20241022",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10
        }))
        .unwrap();
        assert_eq!(req.messages.len(), 1);
        assert!(!req.is_stream());
    }

    #[test]
    fn user_id_hoisted_from_metadata() {
        let req: ClaudeMessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-5-sonnet-20241022",
            "messages": [],
            "max_tokens": 10,
            "metadata": {"user_id": "user_123"}
        }))
        .unwrap();
        assert_eq!(req.user_id().as_deref(), Some("user_123"));
    }

    #[test]
    fn thinking_config_parses() {
        let req: ClaudeMessagesRequest = serde_json::from_value(json!({
            "model": "claude-opus-4-5-20251101",
            "messages": [],
            "max_tokens": 10,
            "thinking": {"type": "enabled", "budget_tokens": 2048}
        }))
        .unwrap();
        assert!(req.thinking.as_ref().unwrap().is_enabled());
    }

    #[test]
    fn effort_level_parses_from_output_config() {
        let req: ClaudeMessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-5",
            "messages": [],
            "max_tokens": 10,
            "output_config": {"effort": "high"}
        }))
        .unwrap();
        assert_eq!(req.effort(), Some("high"));
    }

    #[test]
    fn unknown_top_level_fields_preserved() {
        let req: ClaudeMessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-5",
            "messages": [],
            "max_tokens": 10,
            "some_future_field": true
        }))
        .unwrap();
        assert_eq!(req.extra.get("some_future_field"), Some(&json!(true)));
    }
}
