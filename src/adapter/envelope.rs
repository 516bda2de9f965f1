//! Inner-request cleanup and `v1internal` envelope wrapping, per spec.md §4.1.1.

use pollux_schema::gemini::GeminiGenerateContentRequest;
use serde_json::Value;

const UNDEFINED_LITERAL: &str = "[undefined]";

/// Safety categories Antigravity expects an explicit threshold for.
const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Recursively drops any object key (or array element) whose value is the
/// literal string `"[undefined]"`. Clients occasionally serialize JS
/// `undefined` this way; the upstream rejects it outright.
pub fn deep_remove_undefined(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !matches!(v, Value::String(s) if s == UNDEFINED_LITERAL));
            for v in map.values_mut() {
                deep_remove_undefined(v);
            }
        }
        Value::Array(items) => {
            items.retain(|v| !matches!(v, Value::String(s) if s == UNDEFINED_LITERAL));
            for v in items.iter_mut() {
                deep_remove_undefined(v);
            }
        }
        _ => {}
    }
}

/// Builds the fixed Antigravity safety-settings list at the given threshold
/// (e.g. `"BLOCK_NONE"`), read once at config-resolution time from the
/// `MAXX_SAFETY_THRESHOLD` environment variable (see DESIGN.md).
pub fn safety_settings(threshold: &str) -> Value {
    Value::Array(
        SAFETY_CATEGORIES
            .iter()
            .map(|category| {
                serde_json::json!({
                    "category": category,
                    "threshold": threshold,
                })
            })
            .collect(),
    )
}

/// Cleans an already-converted Gemini request in place before it is wrapped
/// into the `v1internal` envelope:
/// - removes a stray top-level `model` key (lives on the envelope instead),
/// - deep-removes `"[undefined]"` sentinels anywhere in the structure,
/// - hoists `metadata.user_id` to a top-level `sessionId`,
/// - injects `safetySettings` at the given default threshold if absent.
pub fn clean_inner_request(request: &mut GeminiGenerateContentRequest, safety_threshold: &str) {
    request.extra.remove("model");

    if let Some(metadata) = request.extra.remove("metadata") {
        if let Some(user_id) = metadata.get("user_id").and_then(Value::as_str) {
            request
                .extra
                .entry("sessionId".to_string())
                .or_insert_with(|| Value::String(user_id.to_string()));
        }
    }

    request
        .extra
        .entry("safetySettings".to_string())
        .or_insert_with(|| safety_settings(safety_threshold));

    let mut as_value = serde_json::to_value(&*request).expect("gemini request always serializes");
    deep_remove_undefined(&mut as_value);
    if let Ok(cleaned) = serde_json::from_value(as_value) {
        *request = cleaned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_remove_undefined_drops_nested_sentinel() {
        let mut value = json!({
            "a": "[undefined]",
            "b": {"c": "[undefined]", "d": "keep"},
            "e": ["[undefined]", "keep", {"f": "[undefined]"}]
        });
        deep_remove_undefined(&mut value);
        assert_eq!(
            value,
            json!({"b": {"d": "keep"}, "e": ["keep", {}]})
        );
    }

    #[test]
    fn deep_remove_undefined_is_idempotent() {
        let mut value = json!({"a": "[undefined]", "b": {"c": 1}});
        deep_remove_undefined(&mut value);
        let mut twice = value.clone();
        deep_remove_undefined(&mut twice);
        assert_eq!(value, twice);
    }

    #[test]
    fn clean_inner_request_hoists_user_id_and_strips_model() {
        let mut request: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "model": "claude-sonnet-4-5",
            "metadata": {"user_id": "user_42"}
        }))
        .unwrap();

        clean_inner_request(&mut request, "BLOCK_NONE");

        assert!(!request.extra.contains_key("model"));
        assert!(!request.extra.contains_key("metadata"));
        assert_eq!(request.extra.get("sessionId"), Some(&json!("user_42")));
        assert!(request.extra.contains_key("safetySettings"));
    }

}
