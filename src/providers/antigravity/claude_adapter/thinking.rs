//! Thinking-block validity, broken-tool-loop recovery, and thinking-mode
//! resolution, per spec.md §4.1.5–§4.1.7.

use pollux_schema::claude::{ContentBlock, Message, MessageContent};

/// Signature length floor below which a *non-trailing* thinking block (one
/// with non-empty `thinking` text) is considered invalid. A trailing
/// signature (empty `thinking` text) only needs to be non-empty.
const MIN_THINKING_SIGNATURE_LENGTH: usize = 10;

/// Floor used when searching request history for *any* usable signature
/// during thinking-mode resolution (spec.md §4.1.7): matches the two-layer
/// cache's admission floor.
pub const HISTORY_SIGNATURE_FLOOR: usize = 50;

/// A thinking block is valid iff (a) it carries non-empty `thinking` text and
/// a signature of length >= 10, or (b) it carries empty `thinking` text and
/// any non-empty signature (the "trailing signature" case).
pub fn is_valid_thinking_block(block: &ContentBlock) -> bool {
    debug_assert!(block.is_thinking());
    let thinking_nonempty = block.thinking.as_deref().is_some_and(|t| !t.is_empty());
    let sig_len = block.signature.as_deref().map(str::len).unwrap_or(0);

    if thinking_nonempty {
        sig_len >= MIN_THINKING_SIGNATURE_LENGTH
    } else {
        sig_len > 0
    }
}

/// Downgrades invalid thinking blocks attached to assistant messages to
/// plain text (preserving content), or drops them if empty. Also removes
/// any trailing unsigned thinking block at the end of an assistant turn.
pub fn normalize_thinking_blocks(messages: &mut Vec<Message>) {
    for message in messages.iter_mut() {
        if message.role != "assistant" {
            continue;
        }

        let mut blocks = message.content.as_blocks();
        blocks.retain_mut(|block| {
            if !block.is_thinking() {
                return true;
            }
            if is_valid_thinking_block(block) {
                return true;
            }
            match block.thinking.clone() {
                Some(text) if !text.is_empty() => {
                    *block = ContentBlock::text(text);
                    true
                }
                _ => false,
            }
        });

        // Trailing unsigned thinking block: thinking present, but no valid
        // signature, sitting at the very end of the turn.
        if let Some(last) = blocks.last() {
            if last.is_thinking() && !is_valid_thinking_block(last) {
                blocks.pop();
            }
        }

        message.content = MessageContent::Blocks(blocks);
    }
}

/// Detects the broken-tool-loop condition: the last message is a user turn
/// containing a `tool_result`, and the most recent assistant turn contains
/// no thinking block at all.
pub fn has_broken_tool_loop(messages: &[Message]) -> bool {
    let Some(last) = messages.last() else {
        return false;
    };
    if last.role != "user" {
        return false;
    }
    let last_has_tool_result = last.blocks().iter().any(ContentBlock::is_tool_result);
    if !last_has_tool_result {
        return false;
    }

    let last_assistant = messages.iter().rev().find(|m| m.role == "assistant");
    match last_assistant {
        Some(assistant) => !assistant.blocks().iter().any(ContentBlock::is_thinking),
        None => false,
    }
}

/// Synthetic filler text appended to force the upstream into opening a
/// fresh reasoning turn after a broken tool loop (spec.md §4.1.6).
pub const RECOVERY_MODEL_TEXT: &str = "[Tool execution completed. Please proceed.]";
pub const RECOVERY_USER_TEXT: &str = "Proceed.";

/// True if the target model supports thinking at all: only `claude-*`
/// models or models whose name contains `-thinking`.
pub fn model_supports_thinking(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    lower.contains("-thinking") || lower.starts_with("claude-")
}

/// True if the client requested thinking via `thinking.type = enabled`, or
/// implicitly via a known opus-4.5/4-5/-thinking model name.
pub fn thinking_requested(thinking_enabled_field: bool, model: &str) -> bool {
    if thinking_enabled_field {
        return true;
    }
    let lower = model.to_ascii_lowercase();
    lower.contains("opus-4-5") || lower.contains("opus-4.5") || lower.contains("-thinking")
}

/// True if the last assistant turn has tool-use blocks but no thinking
/// block — a history shape incompatible with thinking mode.
pub fn last_assistant_turn_incompatible_with_thinking(messages: &[Message]) -> bool {
    let Some(assistant) = messages.iter().rev().find(|m| m.role == "assistant") else {
        return false;
    };
    let blocks = assistant.blocks();
    let has_tool_use = blocks.iter().any(ContentBlock::is_tool_use);
    let has_thinking = blocks.iter().any(ContentBlock::is_thinking);
    has_tool_use && !has_thinking
}

/// True iff the conversation contains function-call history (any
/// `tool_use`/`tool_result`) with no valid signature reachable anywhere: not
/// in the global fallback store, not in the per-tool cache, and no
/// in-history thinking block carries a signature >= 50 bytes.
pub fn has_unreachable_signature_for_function_history(
    messages: &[Message],
    any_tool_use_has_cached_signature: impl Fn(&str) -> bool,
    global_fallback_available: bool,
) -> bool {
    let mut has_function_history = false;
    let mut has_any_reachable_signature = global_fallback_available;

    for message in messages {
        for block in message.blocks() {
            if block.is_tool_use() || block.is_tool_result() {
                has_function_history = true;
            }
            if block.is_tool_use() {
                if let Some(id) = block.id.as_deref() {
                    if any_tool_use_has_cached_signature(id) {
                        has_any_reachable_signature = true;
                    }
                }
            }
            if block.is_thinking() {
                let sig_len = block.signature.as_deref().map(str::len).unwrap_or(0);
                if sig_len >= HISTORY_SIGNATURE_FLOOR {
                    has_any_reachable_signature = true;
                }
            }
        }
    }

    has_function_history && !has_any_reachable_signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(role: &str, blocks: Vec<ContentBlock>) -> Message {
        Message {
            role: role.to_string(),
            content: MessageContent::Blocks(blocks),
        }
    }

    #[test]
    fn thinking_block_with_short_signature_is_invalid() {
        let block = ContentBlock::thinking("some reasoning", Some("short".to_string()));
        assert!(!is_valid_thinking_block(&block));
    }

    #[test]
    fn thinking_block_with_long_signature_is_valid() {
        let block = ContentBlock::thinking("some reasoning", Some("x".repeat(12)));
        assert!(is_valid_thinking_block(&block));
    }

    #[test]
    fn trailing_signature_with_empty_thinking_is_valid_at_any_length() {
        let block = ContentBlock::thinking("", Some("a".to_string()));
        assert!(is_valid_thinking_block(&block));
    }

    #[test]
    fn normalize_downgrades_invalid_thinking_to_text() {
        let mut messages = vec![message(
            "assistant",
            vec![ContentBlock::thinking("reasoning text", Some("short".into()))],
        )];
        normalize_thinking_blocks(&mut messages);
        let blocks = messages[0].blocks();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_text());
        assert_eq!(blocks[0].text.as_deref(), Some("reasoning text"));
    }

    #[test]
    fn normalize_drops_empty_invalid_thinking() {
        let mut messages = vec![message(
            "assistant",
            vec![ContentBlock::thinking("", None)],
        )];
        normalize_thinking_blocks(&mut messages);
        assert!(messages[0].blocks().is_empty());
    }

    #[test]
    fn normalize_removes_trailing_unsigned_thinking_block() {
        let mut messages = vec![message(
            "assistant",
            vec![
                ContentBlock::text("hello"),
                ContentBlock::thinking("", None),
            ],
        )];
        // Trailing block here has no signature at all, so it is both
        // invalid and trailing; either rule drops it.
        normalize_thinking_blocks(&mut messages);
        assert_eq!(messages[0].blocks().len(), 1);
    }

    #[test]
    fn broken_tool_loop_detected_when_last_assistant_has_no_thinking() {
        let messages = vec![
            message(
                "assistant",
                vec![ContentBlock::tool_use("t1", "foo", json!({}))],
            ),
            message(
                "user",
                vec![ContentBlock {
                    block_type: "tool_result".to_string(),
                    tool_use_id: Some("t1".to_string()),
                    ..Default::default()
                }],
            ),
        ];
        assert!(has_broken_tool_loop(&messages));
    }

    #[test]
    fn broken_tool_loop_not_detected_when_thinking_present() {
        let messages = vec![
            message(
                "assistant",
                vec![
                    ContentBlock::thinking("why", Some("x".repeat(12))),
                    ContentBlock::tool_use("t1", "foo", json!({})),
                ],
            ),
            message(
                "user",
                vec![ContentBlock {
                    block_type: "tool_result".to_string(),
                    tool_use_id: Some("t1".to_string()),
                    ..Default::default()
                }],
            ),
        ];
        assert!(!has_broken_tool_loop(&messages));
    }

    #[test]
    fn model_support_rules() {
        assert!(model_supports_thinking("claude-sonnet-4-5"));
        assert!(model_supports_thinking("gemini-2.5-pro-thinking"));
        assert!(!model_supports_thinking("gemini-2.5-pro"));
    }

    #[test]
    fn thinking_requested_from_model_name() {
        assert!(thinking_requested(false, "claude-opus-4-5"));
        assert!(thinking_requested(false, "claude-sonnet-4-5-thinking"));
        assert!(!thinking_requested(false, "claude-sonnet-4-5"));
        assert!(thinking_requested(true, "claude-sonnet-4-5"));
    }

    #[test]
    fn unreachable_signature_true_only_with_function_history_and_no_source() {
        let messages = vec![message(
            "assistant",
            vec![ContentBlock::tool_use("t1", "foo", json!({}))],
        )];
        assert!(has_unreachable_signature_for_function_history(
            &messages,
            |_| false,
            false
        ));
        assert!(!has_unreachable_signature_for_function_history(
            &messages,
            |_| true,
            false
        ));
        assert!(!has_unreachable_signature_for_function_history(
            &messages,
            |_| false,
            true
        ));
    }
}
