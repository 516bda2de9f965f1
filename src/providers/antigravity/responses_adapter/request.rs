//! OpenAI Responses (Codex) API → Gemini `generateContent` request
//! transform.
//!
//! Reuses the same model-mapping/request-type/background-task rules as the
//! Claude and OpenAI Chat Completions adapters (spec.md §4.1.2/§4.1.3 are
//! protocol-agnostic). The Responses wire shape differs from Chat
//! Completions in two ways this module has to bridge: conversation turns
//! are an `input` array of "input items" (some of which are function calls
//! or function-call outputs rather than messages), and tool declarations
//! are flat objects (`{"type":"function","name":...}`) rather than
//! Chat-Completions-style `{"type":"function","function":{...}}` wrappers.

use crate::adapter::background_task;
use crate::adapter::model_mapping::map_model;
use crate::adapter::request_type::{self, RequestType};
use pollux_schema::gemini::{
    Content, FunctionDeclaration, GeminiGenerateContentRequest, GenerationConfig, Part, Tool,
    ToolConfig,
};
use pollux_schema::openai::{OpenaiInput, OpenaiInputContent, OpenaiInputItem, OpenaiRequestBody};
use serde_json::{Value, json};
use std::collections::BTreeMap;

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

pub struct ResponsesTransformOutcome {
    pub gemini_request: GeminiGenerateContentRequest,
    pub request_type: RequestType,
    pub final_model: String,
}

/// Transforms a client-facing OpenAI Responses API request into the Gemini
/// `generateContent` shape the Antigravity upstream accepts.
pub fn transform_responses_request(req: &OpenaiRequestBody) -> ResponsesTransformOutcome {
    let items = input_items(req);
    let tool_defs = tool_declarations(req);
    let tool_names: Vec<String> = tool_defs.iter().map(|(name, _, _)| name.clone()).collect();

    let mapped_model = map_model(&req.model);
    let resolution = request_type::resolve(&req.model, &mapped_model, &tool_names);

    let last_user_text = items
        .iter()
        .rev()
        .find(|item| item.role.as_deref() == Some("user"))
        .map(item_plain_text)
        .unwrap_or_default();
    let background_task = background_task::detect(&last_user_text);

    let final_model = background_task
        .map(|kind| kind.forced_model().to_string())
        .unwrap_or_else(|| resolution.final_model.clone());

    let call_names = function_call_name_index(&items);

    let system_text = req.instructions.clone().unwrap_or_default();
    let system_instruction = (!system_text.is_empty()).then(|| Content {
        role: None,
        parts: vec![Part {
            text: Some(system_text),
            ..Default::default()
        }],
        extra: BTreeMap::new(),
    });

    let mut contents: Vec<Content> = items
        .iter()
        .map(|item| input_item_to_content(item, &call_names))
        .collect();
    merge_adjacent_roles(&mut contents);

    let mut tools = (!tool_defs.is_empty()).then(|| {
        vec![Tool {
            function_declarations: Some(
                tool_defs
                    .iter()
                    .map(|(name, description, parameters)| {
                        let mut parameters = parameters.clone();
                        if let Some(schema) = parameters.as_mut() {
                            clean_json_schema(schema);
                        }
                        FunctionDeclaration {
                            name: name.clone(),
                            description: description.clone().unwrap_or_default(),
                            behavior: None,
                            parameters,
                            parameters_json_schema: None,
                            response: None,
                            response_json_schema: None,
                            extra: BTreeMap::new(),
                        }
                    })
                    .collect(),
            ),
            extra: BTreeMap::new(),
        }]
    });

    if matches!(resolution.request_type, RequestType::WebSearch) {
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

    if background_task.is_some() {
        tools = None;
    }

    let tool_config = tools.is_some().then(|| ToolConfig {
        function_calling_config: Some(json!({"mode": "VALIDATED"})),
        retrieval_config: None,
        extra: BTreeMap::new(),
    });

    let thinking_config = req.reasoning.as_ref().and_then(|reasoning| {
        reasoning.effort.as_deref().map(|effort| {
            let level = match effort.to_ascii_lowercase().as_str() {
                "low" => "LOW",
                "high" => "HIGH",
                _ => "MEDIUM",
            };
            json!({"effortLevel": level})
        })
    });

    let generation_config = GenerationConfig {
        temperature: req.temperature.map(f64::from),
        top_p: req.top_p.map(f64::from),
        top_k: None,
        max_output_tokens: req.max_output_tokens,
        thinking_config,
        image_config: resolution.image_config.clone(),
        extra: BTreeMap::new(),
    };

    let gemini_request = GeminiGenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(generation_config),
        tools,
        tool_config,
        extra: BTreeMap::new(),
    };

    ResponsesTransformOutcome {
        gemini_request,
        request_type: resolution.request_type,
        final_model,
    }
}

fn input_items(req: &OpenaiRequestBody) -> Vec<OpenaiInputItem> {
    match req.input.as_ref() {
        Some(OpenaiInput::Items(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Extracts the item-kind discriminator OpenAI stores in `extra["type"]`
/// (`"function_call"`, `"function_call_output"`, `"message"`, or absent for
/// a bare message-shaped item).
fn item_kind(item: &OpenaiInputItem) -> &str {
    item.extra
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("message")
}

fn item_plain_text(item: &OpenaiInputItem) -> String {
    match item.content.as_ref() {
        Some(OpenaiInputContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Maps `call_id -> function name` from any `function_call` items seen,
/// needed because `function_call_output` items only carry the `call_id`
/// while Gemini's `functionResponse` part requires the name.
fn function_call_name_index(items: &[OpenaiInputItem]) -> BTreeMap<String, String> {
    let mut index = BTreeMap::new();
    for item in items {
        if item_kind(item) == "function_call" {
            let call_id = item.extra.get("call_id").and_then(Value::as_str);
            let name = item.extra.get("name").and_then(Value::as_str);
            if let (Some(call_id), Some(name)) = (call_id, name) {
                index.insert(call_id.to_string(), name.to_string());
            }
        }
    }
    index
}

fn input_item_to_content(item: &OpenaiInputItem, call_names: &BTreeMap<String, String>) -> Content {
    match item_kind(item) {
        "function_call" => {
            let name = item
                .extra
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let args: Value = item
                .extra
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_else(|| json!({}));
            Content {
                role: Some("model".to_string()),
                parts: vec![Part {
                    function_call: Some(json!({"name": name, "args": args})),
                    ..Default::default()
                }],
                extra: BTreeMap::new(),
            }
        }
        "function_call_output" => {
            let call_id = item.extra.get("call_id").and_then(Value::as_str).unwrap_or_default();
            let name = call_names.get(call_id).cloned().unwrap_or_default();
            let output = item
                .extra
                .get("output")
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    function_response: Some(json!({
                        "name": name,
                        "response": {"result": output}
                    })),
                    ..Default::default()
                }],
                extra: BTreeMap::new(),
            }
        }
        _ => {
            let role = match item.role.as_deref() {
                Some("assistant") => "model",
                Some(other) => other,
                None => "user",
            };
            let text = item_plain_text(item);
            let parts = if text.is_empty() {
                Vec::new()
            } else {
                vec![Part {
                    text: Some(text),
                    ..Default::default()
                }]
            };
            Content {
                role: Some(role.to_string()),
                parts,
                extra: BTreeMap::new(),
            }
        }
    }
}

/// Extracts `(name, description, parameters)` from the request's raw
/// `extra["tools"]` array — the Responses API's tool schema is flat
/// (`{"type":"function","name":...,"parameters":...}`), unlike Chat
/// Completions' nested `{"type":"function","function":{...}}` wrapper, so
/// this can't reuse `pollux_schema::openai::ChatTool`.
fn tool_declarations(req: &OpenaiRequestBody) -> Vec<(String, Option<String>, Option<Value>)> {
    let Some(Value::Array(tools)) = req.extra.get("tools") else {
        return Vec::new();
    };

    tools
        .iter()
        .filter(|tool| tool.get("type").and_then(Value::as_str) == Some("function"))
        .filter_map(|tool| {
            let name = tool.get("name").and_then(Value::as_str)?.to_string();
            let description = tool
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            let parameters = tool.get("parameters").cloned();
            Some((name, description, parameters))
        })
        .collect()
}

/// Merges adjacent `Content` entries sharing the same role; Gemini requires
/// strict user/model alternation. Duplicated from the sibling adapters
/// rather than shared, matching their existing "no common dependency edge"
/// reasoning.
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(model: &str, input: Value) -> OpenaiRequestBody {
        serde_json::from_value(json!({
            "model": model,
            "input": input,
        }))
        .expect("valid request fixture")
    }

    #[test]
    fn string_input_maps_model_and_builds_single_user_turn() {
        let req = request("claude-3-5-sonnet-20241022", json!("hi"));
        let outcome = transform_responses_request(&req);
        assert_eq!(outcome.final_model, "claude-sonnet-4-5");
        assert_eq!(outcome.gemini_request.contents.len(), 1);
        assert_eq!(outcome.gemini_request.contents[0].role.as_deref(), Some("user"));
        assert_eq!(
            outcome.gemini_request.contents[0].parts[0].text.as_deref(),
            Some("hi")
        );
    }

    #[test]
    fn instructions_become_system_instruction() {
        let mut req = request("gpt-4o", json!([{"role": "user", "content": "hi"}]));
        req.instructions = Some("be terse".to_string());
        let outcome = transform_responses_request(&req);
        assert_eq!(
            outcome.gemini_request.system_instruction.unwrap().parts[0]
                .text
                .as_deref(),
            Some("be terse")
        );
    }

    #[test]
    fn function_call_and_output_round_trip_name() {
        let req = request(
            "gpt-4o",
            json!([
                {"role": "user", "content": "weather?"},
                {"type": "function_call", "call_id": "call_1", "name": "get_weather", "arguments": "{\"city\":\"ny\"}"},
                {"type": "function_call_output", "call_id": "call_1", "output": "{\"temp\":70}"},
            ]),
        );
        let outcome = transform_responses_request(&req);
        let contents = outcome.gemini_request.contents;
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].role.as_deref(), Some("model"));
        let call = contents[1].parts[0].function_call.as_ref().unwrap();
        assert_eq!(call["name"], json!("get_weather"));
        let response = contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response["name"], json!("get_weather"));
    }

    #[test]
    fn flat_tool_schema_is_parsed_and_cleaned() {
        let mut req = request("gpt-4o", json!([{"role": "user", "content": "hi"}]));
        req.extra.insert(
            "tools".to_string(),
            json!([{
                "type": "function",
                "name": "search",
                "description": "search the web",
                "parameters": {
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"q": {"type": "string"}}
                }
            }]),
        );
        let outcome = transform_responses_request(&req);
        let tools = outcome.gemini_request.tools.unwrap();
        let decl = &tools[0].function_declarations.as_ref().unwrap()[0];
        assert_eq!(decl.name, "search");
        let params = decl.parameters.as_ref().unwrap();
        assert!(params.get("$schema").is_none());
        assert!(params.get("additionalProperties").is_none());
    }

    #[test]
    fn reasoning_effort_maps_to_thinking_config() {
        let mut req = request("claude-opus-4-5", json!([{"role": "user", "content": "hi"}]));
        req.reasoning = Some(pollux_schema::openai::Reasoning {
            effort: Some("high".to_string()),
            summary: None,
        });
        let outcome = transform_responses_request(&req);
        let thinking = outcome
            .gemini_request
            .generation_config
            .unwrap()
            .thinking_config
            .unwrap();
        assert_eq!(thinking["effortLevel"], json!("HIGH"));
    }

    #[test]
    fn background_task_keyword_downgrades_model_and_strips_tools() {
        let mut req = request(
            "claude-3-5-sonnet-20241022",
            json!([{"role": "user", "content": "Please generate a title for this conversation."}]),
        );
        req.extra.insert(
            "tools".to_string(),
            json!([{"type": "function", "name": "search"}]),
        );
        let outcome = transform_responses_request(&req);
        assert_eq!(outcome.final_model, "gemini-2.5-flash-lite");
        assert!(outcome.gemini_request.tools.is_none());
    }

    #[test]
    fn online_suffix_forces_web_search() {
        let req = request("gpt-4o-online", json!([{"role": "user", "content": "hi"}]));
        let outcome = transform_responses_request(&req);
        assert!(matches!(outcome.request_type, RequestType::WebSearch));
        assert_eq!(outcome.final_model, "gemini-2.5-flash");
        let tools = outcome.gemini_request.tools.expect("tools present");
        assert!(tools[0].extra.contains_key("googleSearch"));
    }
}
