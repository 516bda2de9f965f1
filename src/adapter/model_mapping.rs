//! Model-alias mapping: Claude/OpenAI/Gemini client-facing model names to the
//! canonical Gemini-family name the Antigravity `v1internal` endpoint accepts.

use std::collections::HashMap;
use std::sync::LazyLock;

const HAIKU_DOWNGRADE_TARGET: &str = "gemini-2.5-flash-lite";
const DEFAULT_FALLBACK_MODEL: &str = "claude-sonnet-4-5";

/// Static alias table. Left-hand side is matched case-sensitively against
/// the `-online`-stripped input; see `map_model` for the full rule order.
static MODEL_TABLE: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("claude-3-5-sonnet-20241022", "claude-sonnet-4-5"),
        ("claude-3-5-sonnet-latest", "claude-sonnet-4-5"),
        ("claude-3-7-sonnet-20250219", "claude-sonnet-4-5"),
        ("claude-sonnet-4-20250514", "claude-sonnet-4-5"),
        ("claude-sonnet-4-5-20250929", "claude-sonnet-4-5"),
        ("claude-sonnet-4-5", "claude-sonnet-4-5"),
        ("claude-opus-4-20250514", "claude-opus-4-5"),
        ("claude-opus-4-1-20250805", "claude-opus-4-5"),
        ("claude-opus-4-5", "claude-opus-4-5"),
        ("gpt-4o", "claude-sonnet-4-5"),
        ("gpt-4o-mini", "gemini-2.5-flash"),
        ("gpt-4.1", "claude-sonnet-4-5"),
        ("gpt-4.1-mini", "gemini-2.5-flash"),
        ("o3", "claude-opus-4-5"),
        ("o4-mini", "gemini-2.5-flash"),
        ("gemini-2.5-pro", "gemini-2.5-pro"),
        ("gemini-2.5-flash", "gemini-2.5-flash"),
        ("gemini-2.5-flash-lite", "gemini-2.5-flash-lite"),
    ])
});

/// Strips a trailing `-online` suffix (web-search opt-in marker), returning
/// the stripped name and whether the suffix was present.
pub fn strip_online_suffix(model: &str) -> (&str, bool) {
    model
        .strip_suffix("-online")
        .map(|stripped| (stripped, true))
        .unwrap_or((model, false))
}

/// Maps a client-facing model alias to the canonical upstream Gemini-family
/// model name, per spec.md §4.1.3's ordered rule list.
pub fn map_model(input: &str) -> String {
    let (stripped, _) = strip_online_suffix(input);

    if let Some(mapped) = MODEL_TABLE.get(stripped) {
        return (*mapped).to_string();
    }

    if stripped.to_ascii_lowercase().contains("haiku") {
        return HAIKU_DOWNGRADE_TARGET.to_string();
    }

    if stripped.starts_with("gemini-") || stripped.to_ascii_lowercase().contains("thinking") {
        return stripped.to_string();
    }

    DEFAULT_FALLBACK_MODEL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_table_match_wins() {
        assert_eq!(map_model("claude-3-5-sonnet-20241022"), "claude-sonnet-4-5");
    }

    #[test]
    fn online_suffix_stripped_before_lookup() {
        assert_eq!(
            map_model("claude-3-5-sonnet-20241022-online"),
            "claude-sonnet-4-5"
        );
    }

    #[test]
    fn haiku_downgrades_to_flash_lite() {
        assert_eq!(map_model("claude-3-haiku-20240307"), "gemini-2.5-flash-lite");
        assert_eq!(map_model("Claude-3-HAIKU"), "gemini-2.5-flash-lite");
    }

    #[test]
    fn gemini_prefixed_models_pass_through() {
        assert_eq!(map_model("gemini-3-pro-preview"), "gemini-3-pro-preview");
    }

    #[test]
    fn thinking_models_pass_through() {
        assert_eq!(
            map_model("claude-sonnet-4-5-thinking"),
            "claude-sonnet-4-5-thinking"
        );
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(map_model("some-unknown-model"), "claude-sonnet-4-5");
    }

    #[test]
    fn haiku_rule_precedes_thinking_passthrough() {
        // "haiku" rule is rule 2; "thinking" passthrough is rule 3 — haiku wins.
        assert_eq!(map_model("claude-haiku-thinking"), "gemini-2.5-flash-lite");
    }
}
