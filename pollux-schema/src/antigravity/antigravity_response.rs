use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::gemini::{Candidate, GeminiResponseBody};

/// Antigravity upstream response envelope (`v1internal:generateContent`/`streamGenerateContent`).
///
/// Wraps the same `GeminiResponseBody` shape other Cloud Code v1internal endpoints use.
#[derive(Debug, Deserialize)]
pub struct AntigravityResponseBody {
    #[serde(rename = "response")]
    pub inner: AntigravityResponseObject,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
pub struct AntigravityResponseObject {
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub promptFeedback: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usageMetadata: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub modelVersion: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub responseId: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub createTime: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl From<AntigravityResponseBody> for GeminiResponseBody {
    fn from(body: AntigravityResponseBody) -> Self {
        let inner = body.inner;
        GeminiResponseBody {
            candidates: inner.candidates,
            promptFeedback: inner.promptFeedback,
            usageMetadata: inner.usageMetadata,
            modelVersion: inner.modelVersion,
            responseId: inner.responseId,
            extra: inner.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_response_envelope_into_gemini_response() {
        let input = json!({
            "response": {
                "candidates": [
                    {
                        "content": {
                            "role": "model",
                            "parts": [{"text": "hi"}]
                        },
                        "finishReason": "STOP"
                    }
                ],
                "modelVersion": "claude-sonnet-4-5-thinking"
            }
        });

        let body: AntigravityResponseBody = serde_json::from_value(input).unwrap();
        let gemini: GeminiResponseBody = body.into();
        assert_eq!(gemini.candidates.len(), 1);
        assert_eq!(gemini.modelVersion.as_deref(), Some("claude-sonnet-4-5-thinking"));
    }
}
