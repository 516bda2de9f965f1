use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single block inside a Claude `content` array.
///
/// Modeled as a flexible struct-of-options (mirroring `gemini::Part`) rather
/// than a tagged enum: the same block shape is mutated in place by the
/// request transform (stripping `cache_control`, downgrading invalid
/// thinking blocks to text, etc.), which is awkward across enum variants.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// `image` source object (`{type: "base64", media_type, data}` or a URL form).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,

    /// `tool_use` id, also reused as `tool_result.tool_use_id` target on the
    /// Gemini side during conversion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// `tool_use` arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,

    /// `tool_result` content: a plain string or a nested block array.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,

    /// `thinking` block text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Opaque signature carried by `thinking` blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// `redacted_thinking` opaque payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn thinking(thinking: impl Into<String>, signature: Option<String>) -> Self {
        Self {
            block_type: "thinking".to_string(),
            thinking: Some(thinking.into()),
            signature,
            ..Default::default()
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            block_type: "tool_use".to_string(),
            id: Some(id.into()),
            name: Some(name.into()),
            input: Some(input),
            ..Default::default()
        }
    }

    pub fn is_thinking(&self) -> bool {
        self.block_type == "thinking"
    }

    pub fn is_redacted_thinking(&self) -> bool {
        self.block_type == "redacted_thinking"
    }

    pub fn is_tool_use(&self) -> bool {
        self.block_type == "tool_use"
    }

    pub fn is_tool_result(&self) -> bool {
        self.block_type == "tool_result"
    }

    pub fn is_text(&self) -> bool {
        self.block_type == "text"
    }

    /// Strips `cache_control` from this block and (recursively) from any
    /// `tool_result` nested block array. Claude clients attach this for
    /// prompt-caching hints that the Antigravity upstream does not accept.
    pub fn strip_cache_control(&mut self) {
        self.cache_control = None;
        self.extra.remove("cache_control");

        if let Some(Value::Array(items)) = self.content.as_mut() {
            for item in items.iter_mut() {
                if let Ok(mut block) = serde_json::from_value::<ContentBlock>(item.clone()) {
                    block.strip_cache_control();
                    if let Ok(v) = serde_json::to_value(&block) {
                        *item = v;
                    }
                } else if let Some(obj) = item.as_object_mut() {
                    obj.remove("cache_control");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_block_roundtrips() {
        let input = json!({"type": "text", "text": "hi"});
        let block: ContentBlock = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(block.text.as_deref(), Some("hi"));
        assert_eq!(serde_json::to_value(&block).unwrap(), input);
    }

    #[test]
    fn strip_cache_control_removes_top_level_and_nested() {
        let input = json!({
            "type": "tool_result",
            "tool_use_id": "abc",
            "cache_control": {"type": "ephemeral"},
            "content": [
                {"type": "text", "text": "result", "cache_control": {"type": "ephemeral"}}
            ]
        });
        let mut block: ContentBlock = serde_json::from_value(input).unwrap();
        block.strip_cache_control();
        assert!(block.cache_control.is_none());
        let nested = block.content.as_ref().unwrap().as_array().unwrap();
        assert!(nested[0].as_object().unwrap().get("cache_control").is_none());
    }

    #[test]
    fn tool_use_helper_builds_expected_shape() {
        let block = ContentBlock::tool_use("toolu_1", "get_weather", json!({"city": "ny"}));
        assert_eq!(block.block_type, "tool_use");
        assert_eq!(block.id.as_deref(), Some("toolu_1"));
        assert_eq!(block.input, Some(json!({"city": "ny"})));
    }
}
