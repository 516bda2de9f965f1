//! OpenAI Chat Completions → Gemini `generateContent` request transform.
//!
//! Reuses the same model-mapping and request-type resolution rules as the
//! Claude adapter (spec.md §4.1.2/§4.1.3 are protocol-agnostic); only the
//! message-shape conversion differs; OpenAI chat has no `thinking`/
//! `cache_control` concept to translate.

use crate::adapter::background_task;
use crate::adapter::model_mapping::map_model;
use crate::adapter::request_type::{self, RequestType};
use pollux_schema::gemini::{Content, FunctionDeclaration, GeminiGenerateContentRequest, GenerationConfig, Tool, ToolConfig};
use pollux_schema::gemini::Part;
use pollux_schema::openai::{ChatMessage, ChatMessageContent, OpenaiChatRequest};
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

pub struct OpenaiChatTransformOutcome {
    pub gemini_request: GeminiGenerateContentRequest,
    pub request_type: RequestType,
    pub final_model: String,
}

/// Transforms a client-facing OpenAI Chat Completions request into the
/// Gemini `generateContent` shape the Antigravity upstream accepts.
pub fn transform_openai_chat_request(req: &OpenaiChatRequest) -> OpenaiChatTransformOutcome {
    let tool_names: Vec<String> = req
        .tools
        .as_ref()
        .map(|tools| tools.iter().map(|t| t.function.name.clone()).collect())
        .unwrap_or_default();

    let mapped_model = map_model(&req.model);
    let resolution = request_type::resolve(&req.model, &mapped_model, &tool_names);

    let last_user_text = req
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .and_then(|m| m.content.as_ref())
        .map(ChatMessageContent::to_plain_text)
        .unwrap_or_default();
    let background_task = background_task::detect(&last_user_text);

    let final_model = background_task
        .map(|kind| kind.forced_model().to_string())
        .unwrap_or_else(|| resolution.final_model.clone());

    let tool_call_names = tool_call_name_index(&req.messages);

    let system_text = system_text(&req.messages);
    let system_instruction = (!system_text.is_empty()).then(|| Content {
        role: None,
        parts: vec![Part {
            text: Some(system_text),
            ..Default::default()
        }],
        extra: BTreeMap::new(),
    });

    let mut contents: Vec<Content> = req
        .messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| chat_message_to_content(m, &tool_call_names))
        .collect();
    merge_adjacent_roles(&mut contents);

    let mut tools = req.tools.as_ref().map(|tools| {
        vec![Tool {
            function_declarations: Some(
                tools
                    .iter()
                    .map(|t| {
                        let mut parameters = t.function.parameters.clone();
                        if let Some(schema) = parameters.as_mut() {
                            clean_json_schema(schema);
                        }
                        FunctionDeclaration {
                            name: t.function.name.clone(),
                            description: t.function.description.clone().unwrap_or_default(),
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

    let max_tokens = req.max_completion_tokens.or(req.max_tokens);
    let generation_config = GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        max_output_tokens: max_tokens,
        thinking_config: None,
        image_config: resolution.image_config.clone(),
        extra: req
            .stop
            .clone()
            .map(|stop| BTreeMap::from([("stopSequences".to_string(), stop)]))
            .unwrap_or_default(),
    };

    let gemini_request = GeminiGenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(generation_config),
        tools,
        tool_config,
        extra: BTreeMap::new(),
    };

    OpenaiChatTransformOutcome {
        gemini_request,
        request_type: resolution.request_type,
        final_model,
    }
}

fn system_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_ref().map(ChatMessageContent::to_plain_text).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Maps `tool_call_id -> function name`, needed because OpenAI's `role:
/// "tool"` messages only carry the id, while Gemini's `functionResponse`
/// part requires the name.
fn tool_call_name_index(messages: &[ChatMessage]) -> BTreeMap<String, String> {
    let mut index = BTreeMap::new();
    for message in messages {
        if let Some(tool_calls) = message.tool_calls.as_ref() {
            for call in tool_calls {
                index.insert(call.id.clone(), call.function.name.clone());
            }
        }
    }
    index
}

fn chat_message_to_content(message: &ChatMessage, tool_call_names: &BTreeMap<String, String>) -> Content {
    let role = match message.role.as_str() {
        "assistant" => "model",
        "tool" => "user",
        other => other,
    };

    let mut parts = Vec::new();

    if let Some(tool_calls) = message.tool_calls.as_ref() {
        for call in tool_calls {
            let args: Value = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| json!({}));
            parts.push(Part {
                function_call: Some(json!({"name": call.function.name, "args": args})),
                ..Default::default()
            });
        }
    } else if message.role == "tool" {
        let name = message
            .tool_call_id
            .as_deref()
            .and_then(|id| tool_call_names.get(id))
            .cloned()
            .unwrap_or_default();
        let text = message
            .content
            .as_ref()
            .map(ChatMessageContent::to_plain_text)
            .unwrap_or_default();
        parts.push(Part {
            function_response: Some(json!({
                "name": name,
                "response": {"result": text}
            })),
            ..Default::default()
        });
    } else {
        let text = message
            .content
            .as_ref()
            .map(ChatMessageContent::to_plain_text)
            .unwrap_or_default();
        if !text.is_empty() {
            parts.push(Part {
                text: Some(text),
                ..Default::default()
            });
        }
    }

    Content {
        role: Some(role.to_string()),
        parts,
        extra: BTreeMap::new(),
    }
}

/// Merges adjacent `Content` entries sharing the same role; Gemini requires
/// strict user/model alternation. Identical logic to the Claude adapter's
/// `merge_adjacent_roles`, duplicated rather than shared since the two
/// modules otherwise have no common dependency edge.
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
    use pollux_schema::openai::{ChatFunctionDef, ChatTool};
    use serde_json::json;

    fn minimal_request(model: &str, messages: Vec<ChatMessage>) -> OpenaiChatRequest {
        OpenaiChatRequest {
            model: model.to_string(),
            messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
            max_completion_tokens: None,
            stop: None,
            stream: Some(false),
            tools: None,
            tool_choice: None,
            extra: BTreeMap::new(),
        }
    }

    fn user(text: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: Some(ChatMessageContent::Text(text.to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn simple_request_maps_model_and_system_instruction() {
        let mut messages = vec![ChatMessage {
            role: "system".to_string(),
            content: Some(ChatMessageContent::Text("be terse".to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            extra: BTreeMap::new(),
        }];
        messages.push(user("hi"));
        let req = minimal_request("claude-3-5-sonnet-20241022", messages);
        let outcome = transform_openai_chat_request(&req);
        assert_eq!(outcome.final_model, "claude-sonnet-4-5");
        assert_eq!(
            outcome.gemini_request.system_instruction.unwrap().parts[0]
                .text
                .as_deref(),
            Some("be terse")
        );
        assert_eq!(outcome.gemini_request.contents.len(), 1);
        assert_eq!(outcome.gemini_request.contents[0].role.as_deref(), Some("user"));
    }

    #[test]
    fn tool_call_and_tool_result_round_trip_name() {
        let messages = vec![
            user("weather?"),
            ChatMessage {
                role: "assistant".to_string(),
                content: None,
                name: None,
                tool_calls: Some(vec![pollux_schema::openai::ChatToolCall {
                    id: "call_1".to_string(),
                    call_type: "function".to_string(),
                    function: pollux_schema::openai::ChatToolCallFunction {
                        name: "get_weather".to_string(),
                        arguments: r#"{"city":"ny"}"#.to_string(),
                    },
                }]),
                tool_call_id: None,
                extra: BTreeMap::new(),
            },
            ChatMessage {
                role: "tool".to_string(),
                content: Some(ChatMessageContent::Text(r#"{"temp":70}"#.to_string())),
                name: None,
                tool_calls: None,
                tool_call_id: Some("call_1".to_string()),
                extra: BTreeMap::new(),
            },
        ];
        let req = minimal_request("gpt-4o", messages);
        let outcome = transform_openai_chat_request(&req);
        let contents = outcome.gemini_request.contents;
        // assistant(model)+tool_call, then tool->user functionResponse, not merged since roles differ
        assert_eq!(contents.len(), 3);
        let func_response = contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(func_response["name"], json!("get_weather"));
    }

    #[test]
    fn tool_schema_constructs_stripped() {
        let req = OpenaiChatRequest {
            tools: Some(vec![ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunctionDef {
                    name: "search".to_string(),
                    description: Some("search".to_string()),
                    parameters: Some(json!({
                        "$schema": "http://json-schema.org/draft-07/schema#",
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {"q": {"type": "string"}}
                    })),
                },
            }]),
            ..minimal_request("gpt-4o", vec![user("hi")])
        };
        let outcome = transform_openai_chat_request(&req);
        let tools = outcome.gemini_request.tools.unwrap();
        let decl = &tools[0].function_declarations.as_ref().unwrap()[0];
        let params = decl.parameters.as_ref().unwrap();
        assert!(params.get("$schema").is_none());
        assert!(params.get("additionalProperties").is_none());
    }

    #[test]
    fn background_task_keyword_downgrades_model_and_strips_tools() {
        let req = OpenaiChatRequest {
            tools: Some(vec![ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunctionDef {
                    name: "search".to_string(),
                    description: None,
                    parameters: None,
                },
            }]),
            ..minimal_request("claude-3-5-sonnet-20241022", vec![user("Please generate a title for this conversation.")])
        };
        let outcome = transform_openai_chat_request(&req);
        assert_eq!(outcome.final_model, "gemini-2.5-flash-lite");
        assert!(outcome.gemini_request.tools.is_none());
        assert!(outcome.gemini_request.tool_config.is_none());
    }

    #[test]
    fn online_suffix_forces_web_search() {
        let req = minimal_request("gpt-4o-online", vec![user("hi")]);
        let outcome = transform_openai_chat_request(&req);
        assert!(matches!(outcome.request_type, RequestType::WebSearch));
        assert_eq!(outcome.final_model, "gemini-2.5-flash");
        let tools = outcome.gemini_request.tools.expect("tools present");
        assert!(tools[0].extra.contains_key("googleSearch"));
    }
}
