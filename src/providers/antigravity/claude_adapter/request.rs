//! Claude Messages → Gemini `generateContent` request transform, per
//! spec.md §4.1.4–§4.1.7.

use super::thinking;
use super::tool_args::remap_tool_arguments;
use crate::adapter::background_task;
use crate::adapter::model_mapping::map_model;
use crate::adapter::request_type::{self, RequestType};
use pollux_schema::claude::{
    ClaudeMessagesRequest, ClaudeTool, ContentBlock, Message, SystemPrompt,
};
use pollux_schema::gemini::{Content, GeminiGenerateContentRequest, GenerationConfig, Part, Tool};
use pollux_thoughtsig_core::SignatureCache;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Keys a strict JSON Schema validator accepts that Gemini's function-
/// declaration parser rejects outright.
const SCHEMA_KEYS_TO_STRIP: &[&str] = &[
    "$schema",
    "additionalProperties",
    "$id",
    "$ref",
    "$defs",
    "definitions",
    "const",
    "exclusiveMinimum",
    "exclusiveMaximum",
];

pub struct ClaudeTransformOutcome {
    pub gemini_request: GeminiGenerateContentRequest,
    pub thinking_enabled: bool,
    pub request_type: RequestType,
    pub final_model: String,
}

/// Transforms a client-facing Claude Messages request into the Gemini
/// `generateContent` shape the Antigravity upstream accepts.
///
/// `signature_for_tool_use` and `any_signature_available` let the caller
/// supply the signature-cache lookups spec.md §4.1.7 needs without this
/// function taking a hard dependency on how the cache is stored.
pub fn transform_claude_request(
    req: &ClaudeMessagesRequest,
    sig_cache: &SignatureCache,
) -> ClaudeTransformOutcome {
    let tool_names: Vec<String> = req
        .tools
        .as_ref()
        .map(|tools| tools.iter().map(|t| t.name.clone()).collect())
        .unwrap_or_default();

    let mapped_model = map_model(&req.model);
    let resolution = request_type::resolve(&req.model, &mapped_model, &tool_names);

    let last_user_text = last_user_plain_text(&req.messages);
    let background_task = background_task::detect(&last_user_text);

    let final_model = background_task
        .map(|kind| kind.forced_model().to_string())
        .unwrap_or_else(|| resolution.final_model.clone());

    let mut messages = req.messages.clone();
    strip_cache_control_all(&mut messages);
    thinking::normalize_thinking_blocks(&mut messages);

    let broken_tool_loop = thinking::has_broken_tool_loop(&messages);

    let requested = thinking::thinking_requested(
        req.thinking.as_ref().is_some_and(|t| t.is_enabled()),
        &final_model,
    );
    let force_disabled = background_task.is_some()
        || !thinking::model_supports_thinking(&final_model)
        || thinking::last_assistant_turn_incompatible_with_thinking(&messages)
        || thinking::has_unreachable_signature_for_function_history(
            &messages,
            |tool_use_id| sig_cache.signature_for_tool_use(tool_use_id).is_some(),
            sig_cache.fallback_signature().is_some(),
        );
    let thinking_enabled = requested && !force_disabled;

    if !thinking_enabled {
        strip_thinking_blocks(&mut messages);
    }

    let mut contents = convert_messages_to_contents(&messages);
    merge_adjacent_roles(&mut contents);

    if broken_tool_loop {
        contents.push(Content {
            role: Some("model".to_string()),
            parts: vec![Part {
                text: Some(thinking::RECOVERY_MODEL_TEXT.to_string()),
                ..Default::default()
            }],
            extra: BTreeMap::new(),
        });
        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(thinking::RECOVERY_USER_TEXT.to_string()),
                ..Default::default()
            }],
            extra: BTreeMap::new(),
        });
    }

    let system_instruction = req.system.as_ref().map(system_prompt_to_content);

    let tools_input = if background_task.is_some() { None } else { req.tools.as_ref() };
    let mut tools = tools_input.map(|tools| {
        vec![Tool {
            function_declarations: Some(
                tools
                    .iter()
                    .map(claude_tool_to_function_declaration)
                    .collect(),
            ),
            extra: BTreeMap::new(),
        }]
    });

    if background_task.is_none() && matches!(resolution.request_type, RequestType::WebSearch) {
        let has_function_declarations = tools
            .as_ref()
            .map(|t| t.iter().any(|tool| tool.function_declarations.is_some()))
            .unwrap_or(false);
        if !has_function_declarations {
            tools = Some(vec![Tool {
                function_declarations: None,
                extra: BTreeMap::from([("googleSearch".to_string(), json!({}))]),
            }]);
        }
    }

    let tool_config = if tools.is_some() {
        Some(pollux_schema::gemini::ToolConfig {
            function_calling_config: Some(json!({"mode": "VALIDATED"})),
            retrieval_config: None,
            extra: BTreeMap::new(),
        })
    } else {
        None
    };

    let generation_config = build_generation_config(req, thinking_enabled, &resolution);

    let gemini_request = GeminiGenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(generation_config),
        tools,
        tool_config,
        extra: BTreeMap::new(),
    };

    ClaudeTransformOutcome {
        gemini_request,
        thinking_enabled,
        request_type: resolution.request_type,
        final_model,
    }
}

/// Joins the text blocks of the last `user`-role turn, for the
/// background-task keyword scan. Tool-result/image blocks carry no text
/// relevant to that heuristic and are skipped.
fn last_user_plain_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| {
            m.blocks()
                .iter()
                .filter_map(|b| b.text.clone())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn strip_cache_control_all(messages: &mut [Message]) {
    for message in messages.iter_mut() {
        let mut blocks = message.content.as_blocks();
        for block in blocks.iter_mut() {
            block.strip_cache_control();
        }
        message.content = pollux_schema::claude::MessageContent::Blocks(blocks);
    }
}

fn strip_thinking_blocks(messages: &mut [Message]) {
    for message in messages.iter_mut() {
        let mut blocks = message.content.as_blocks();
        blocks.retain(|b| !b.is_thinking() && !b.is_redacted_thinking());
        message.content = pollux_schema::claude::MessageContent::Blocks(blocks);
    }
}

fn system_prompt_to_content(system: &SystemPrompt) -> Content {
    Content {
        role: None,
        parts: vec![Part {
            text: Some(system.to_plain_text()),
            ..Default::default()
        }],
        extra: BTreeMap::new(),
    }
}

/// Maps `tool_use_id -> tool name` by scanning turns in order, needed to
/// resolve the `name` a `tool_result` block's `functionResponse` must carry
/// (Gemini requires it; Claude's `tool_result` only carries the id).
fn convert_messages_to_contents(messages: &[Message]) -> Vec<Content> {
    let mut tool_names_by_id: BTreeMap<String, String> = BTreeMap::new();
    for message in messages {
        for block in message.blocks() {
            if block.is_tool_use() {
                if let (Some(id), Some(name)) = (block.id.clone(), block.name.clone()) {
                    tool_names_by_id.insert(id, name);
                }
            }
        }
    }

    messages
        .iter()
        .map(|message| {
            let role = match message.role.as_str() {
                "assistant" => "model",
                other => other,
            };
            let parts = message
                .blocks()
                .iter()
                .filter_map(|block| block_to_part(block, &tool_names_by_id))
                .collect();
            Content {
                role: Some(role.to_string()),
                parts,
                extra: BTreeMap::new(),
            }
        })
        .collect()
}

fn block_to_part(block: &ContentBlock, tool_names_by_id: &BTreeMap<String, String>) -> Option<Part> {
    if block.is_text() {
        return Some(Part {
            text: block.text.clone(),
            ..Default::default()
        });
    }
    if block.is_thinking() {
        return Some(Part {
            thought: Some(true),
            text: block.thinking.clone(),
            thought_signature: block.signature.clone(),
            ..Default::default()
        });
    }
    if block.is_redacted_thinking() {
        return Some(Part {
            thought: Some(true),
            thought_signature: block.data.clone(),
            ..Default::default()
        });
    }
    if block.is_tool_use() {
        let name = block.name.clone().unwrap_or_default();
        let mut args = block.input.clone().unwrap_or_else(|| json!({}));
        remap_tool_arguments(&name, &mut args);
        return Some(Part {
            function_call: Some(json!({"name": name, "args": args})),
            ..Default::default()
        });
    }
    if block.is_tool_result() {
        let name = block
            .tool_use_id
            .as_deref()
            .and_then(|id| tool_names_by_id.get(id))
            .cloned()
            .unwrap_or_default();
        let response_text = tool_result_content_to_text(block.content.as_ref());
        return Some(Part {
            function_response: Some(json!({
                "name": name,
                "response": {"result": response_text}
            })),
            ..Default::default()
        });
    }
    if block.block_type == "image" {
        return Some(Part {
            inline_data: block.source.clone(),
            ..Default::default()
        });
    }
    None
}

fn tool_result_content_to_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Merges adjacent `Content` entries sharing the same role, concatenating
/// their parts. Gemini requires strict user/model alternation.
fn merge_adjacent_roles(contents: &mut Vec<Content>) {
    let mut merged: Vec<Content> = Vec::with_capacity(contents.len());
    for content in contents.drain(..) {
        match merged.last_mut() {
            Some(prev) if prev.role == content.role => {
                prev.parts.extend(content.parts);
            }
            _ => merged.push(content),
        }
    }
    *contents = merged;
}

fn claude_tool_to_function_declaration(
    tool: &ClaudeTool,
) -> pollux_schema::gemini::FunctionDeclaration {
    let mut parameters = tool.input_schema.clone();
    if let Some(schema) = parameters.as_mut() {
        clean_json_schema(schema);
    }
    pollux_schema::gemini::FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone().unwrap_or_default(),
        behavior: None,
        parameters,
        parameters_json_schema: None,
        response: None,
        response_json_schema: None,
        extra: BTreeMap::new(),
    }
}

/// Recursively strips JSON-Schema constructs Gemini's function-declaration
/// parser rejects (spec.md §4.1.4).
fn clean_json_schema(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for key in SCHEMA_KEYS_TO_STRIP {
                map.remove(*key);
            }
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(v) = map.get_mut(&key) {
                    clean_json_schema(v);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                clean_json_schema(item);
            }
        }
        _ => {}
    }
}

fn build_generation_config(
    req: &ClaudeMessagesRequest,
    thinking_enabled: bool,
    resolution: &request_type::RequestTypeResolution,
) -> GenerationConfig {
    let mut extra: BTreeMap<String, Value> = BTreeMap::new();

    if let Some(stop) = req.stop_sequences.as_ref() {
        extra.insert("stopSequences".to_string(), json!(stop));
    }
    extra.insert("maxOutputTokens".to_string(), json!(req.max_tokens));

    if let Some(effort) = req.effort() {
        let mapped = match effort.to_ascii_lowercase().as_str() {
            "low" => "LOW",
            "medium" => "MEDIUM",
            "high" => "HIGH",
            other => {
                extra.insert("effortLevelRaw".to_string(), json!(other));
                "MEDIUM"
            }
        };
        extra.insert("effortLevel".to_string(), json!(mapped));
    }

    let thinking_config = if thinking_enabled {
        let budget = req
            .thinking
            .as_ref()
            .and_then(|t| t.budget_tokens)
            .unwrap_or(8096);
        Some(json!({"includeThoughts": true, "thinkingBudget": budget}))
    } else {
        None
    };

    GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        max_output_tokens: Some(req.max_tokens),
        thinking_config,
        image_config: resolution.image_config.clone(),
        extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollux_thoughtsig_core::SignatureCache;
    use serde_json::json;

    fn cache() -> SignatureCache {
        SignatureCache::new(3600, 1000)
    }

    fn minimal_request(model: &str, messages: Vec<Message>) -> ClaudeMessagesRequest {
        ClaudeMessagesRequest {
            model: model.to_string(),
            messages,
            max_tokens: 10,
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: None,
            stream: Some(true),
            output_config: None,
            extra: BTreeMap::new(),
        }
    }

    fn user_text(text: &str) -> Message {
        Message {
            role: "user".to_string(),
            content: pollux_schema::claude::MessageContent::Text(text.to_string()),
        }
    }

    #[test]
    fn simple_request_maps_model_and_role() {
        let req = minimal_request("claude-3-5-sonnet-20241022", vec![user_text("hi")]);
        let outcome = transform_claude_request(&req, &cache());
        assert_eq!(outcome.final_model, "claude-sonnet-4-5");
        assert_eq!(outcome.gemini_request.contents.len(), 1);
        assert_eq!(
            outcome.gemini_request.contents[0].role.as_deref(),
            Some("user")
        );
        assert_eq!(
            outcome.gemini_request.contents[0].parts[0].text.as_deref(),
            Some("hi")
        );
    }

    #[test]
    fn online_suffix_triggers_web_search_and_flash_model() {
        let req = minimal_request("claude-3-5-sonnet-20241022-online", vec![user_text("hi")]);
        let outcome = transform_claude_request(&req, &cache());
        assert_eq!(outcome.final_model, "gemini-2.5-flash");
        assert!(matches!(outcome.request_type, RequestType::WebSearch));
        let tools = outcome.gemini_request.tools.expect("tools present");
        assert!(tools[0].extra.contains_key("googleSearch"));
    }

    #[test]
    fn adjacent_same_role_messages_are_merged() {
        let req = minimal_request(
            "claude-sonnet-4-5",
            vec![user_text("first"), user_text("second")],
        );
        let outcome = transform_claude_request(&req, &cache());
        assert_eq!(outcome.gemini_request.contents.len(), 1);
        assert_eq!(outcome.gemini_request.contents[0].parts.len(), 2);
    }

    #[test]
    fn broken_tool_loop_appends_recovery_turns() {
        let messages = vec![
            Message {
                role: "assistant".to_string(),
                content: pollux_schema::claude::MessageContent::Blocks(vec![
                    ContentBlock::tool_use("t1", "foo", json!({})),
                ]),
            },
            Message {
                role: "user".to_string(),
                content: pollux_schema::claude::MessageContent::Blocks(vec![ContentBlock {
                    block_type: "tool_result".to_string(),
                    tool_use_id: Some("t1".to_string()),
                    content: Some(json!("done")),
                    ..Default::default()
                }]),
            },
        ];
        let req = minimal_request("claude-sonnet-4-5", messages);
        let outcome = transform_claude_request(&req, &cache());
        let contents = outcome.gemini_request.contents;
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[2].role.as_deref(), Some("model"));
        assert_eq!(
            contents[2].parts[0].text.as_deref(),
            Some(thinking::RECOVERY_MODEL_TEXT)
        );
        assert_eq!(contents[3].role.as_deref(), Some("user"));
        assert_eq!(
            contents[3].parts[0].text.as_deref(),
            Some(thinking::RECOVERY_USER_TEXT)
        );
    }

    #[test]
    fn thinking_disabled_for_model_without_support() {
        let mut req = minimal_request("gemini-2.5-pro", vec![user_text("hi")]);
        req.thinking = Some(pollux_schema::claude::ThinkingConfig {
            thinking_type: "enabled".to_string(),
            budget_tokens: Some(2048),
        });
        let outcome = transform_claude_request(&req, &cache());
        assert!(!outcome.thinking_enabled);
        assert!(
            outcome
                .gemini_request
                .generation_config
                .unwrap()
                .thinking_config
                .is_none()
        );
    }

    #[test]
    fn thinking_enabled_injects_thinking_config() {
        let mut req = minimal_request("claude-opus-4-5", vec![user_text("hi")]);
        req.thinking = Some(pollux_schema::claude::ThinkingConfig {
            thinking_type: "enabled".to_string(),
            budget_tokens: Some(4096),
        });
        let outcome = transform_claude_request(&req, &cache());
        assert!(outcome.thinking_enabled);
        let gc = outcome.gemini_request.generation_config.unwrap();
        assert_eq!(
            gc.thinking_config,
            Some(json!({"includeThoughts": true, "thinkingBudget": 4096}))
        );
    }

    #[test]
    fn background_task_keyword_downgrades_model_disables_thinking_strips_tools() {
        let mut req = ClaudeMessagesRequest {
            tools: Some(vec![ClaudeTool {
                name: "search".to_string(),
                description: None,
                input_schema: None,
                extra: BTreeMap::new(),
            }]),
            ..minimal_request(
                "claude-opus-4-5",
                vec![user_text("Summarize the conversation above in two sentences.")],
            )
        };
        req.thinking = Some(pollux_schema::claude::ThinkingConfig {
            thinking_type: "enabled".to_string(),
            budget_tokens: Some(4096),
        });
        let outcome = transform_claude_request(&req, &cache());
        assert_eq!(outcome.final_model, "gemini-2.5-flash-lite");
        assert!(!outcome.thinking_enabled);
        assert!(outcome.gemini_request.tools.is_none());
    }

    #[test]
    fn json_schema_rejects_stripped_from_tool_parameters() {
        let req = ClaudeMessagesRequest {
            tools: Some(vec![ClaudeTool {
                name: "search".to_string(),
                description: Some("search tool".to_string()),
                input_schema: Some(json!({
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"q": {"type": "string"}}
                })),
                extra: BTreeMap::new(),
            }]),
            ..minimal_request("claude-sonnet-4-5", vec![user_text("hi")])
        };
        let outcome = transform_claude_request(&req, &cache());
        let tools = outcome.gemini_request.tools.unwrap();
        let decl = &tools[0].function_declarations.as_ref().unwrap()[0];
        let params = decl.parameters.as_ref().unwrap();
        assert!(params.get("$schema").is_none());
        assert!(params.get("additionalProperties").is_none());
        assert_eq!(params["properties"]["q"]["type"], json!("string"));
    }
}
