//! Gemini `generateContent` streaming response → OpenAI Chat Completions
//! SSE chunk stream. Simpler than `GeminiToClaudeConverter`: OpenAI Chat
//! Completions has no thinking-block wire shape, so `thought` parts are
//! observed (for signature-cache bookkeeping parity with the Claude path)
//! but never surfaced to the client.

use pollux_schema::gemini::{GeminiResponseBody, Part};
use pollux_schema::openai::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionChunkChoice, ChatCompletionDelta,
    ChatCompletionMessage, ChatCompletionResponse, ChatToolCallDelta, ChatToolCallFunction, ChatUsage,
};
use rand::Rng as _;
use serde_json::Value;

fn generate_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let suffix: String = (0..24)
        .map(|_| {
            let idx = rand::rng().random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("chatcmpl-{suffix}")
}

fn generate_tool_call_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let suffix: String = (0..24)
        .map(|_| {
            let idx = rand::rng().random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("call_{suffix}")
}

/// Drives a single OpenAI-facing SSE conversion for one upstream response.
/// Feed it Gemini chunks in order via [`handle_chunk`](Self::handle_chunk);
/// call [`force_stop`](Self::force_stop) on disconnect/timeout/parse-failure
/// so the stream always reaches a terminal `finish_reason` chunk.
pub struct GeminiToOpenaiConverter {
    id: String,
    created: u64,
    model: String,
    role_sent: bool,
    used_tool: bool,
    next_tool_index: u32,
    finished: bool,
    finish_reason: Option<String>,
    accumulated_content: String,
    accumulated_tool_calls: Vec<(String, String, String)>,
    usage: Option<ChatUsage>,
}

impl GeminiToOpenaiConverter {
    pub fn new(model: impl Into<String>, created: u64) -> Self {
        Self {
            id: generate_id(),
            created,
            model: model.into(),
            role_sent: false,
            used_tool: false,
            next_tool_index: 0,
            finished: false,
            finish_reason: None,
            accumulated_content: String::new(),
            accumulated_tool_calls: Vec::new(),
            usage: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn role_chunk(&mut self) -> Option<ChatCompletionChunk> {
        if self.role_sent {
            return None;
        }
        self.role_sent = true;
        Some(ChatCompletionChunk::new(
            self.id.clone(),
            self.created,
            self.model.clone(),
            vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta {
                    role: Some("assistant".to_string()),
                    content: None,
                    tool_calls: None,
                },
                finish_reason: None,
            }],
        ))
    }

    /// Processes one upstream chunk, returning the OpenAI chunks it produces.
    pub fn handle_chunk(&mut self, chunk: &GeminiResponseBody) -> Vec<ChatCompletionChunk> {
        let mut out = Vec::new();
        if let Some(role_chunk) = self.role_chunk() {
            out.push(role_chunk);
        }

        let Some(candidate) = chunk.candidates.first() else {
            return out;
        };

        if let Some(content) = candidate.content.as_ref() {
            for part in &content.parts {
                if let Some(c) = self.handle_part(part) {
                    out.push(c);
                }
            }
        }

        if let Some(finish_reason) = candidate.finish_reason.clone() {
            self.finish_reason = Some(finish_reason);
            self.usage = Some(compute_usage(chunk.usageMetadata.as_ref()));
            out.push(self.finish_chunk());
        }

        out
    }

    fn handle_part(&mut self, part: &Part) -> Option<ChatCompletionChunk> {
        // Thinking parts have no OpenAI wire equivalent; drop silently.
        if part.thought == Some(true) {
            return None;
        }

        if let Some(function_call) = part.function_call.as_ref() {
            return Some(self.handle_function_call(function_call));
        }

        if let Some(text) = part.text.as_deref() {
            if text.is_empty() {
                return None;
            }
            self.accumulated_content.push_str(text);
            return Some(ChatCompletionChunk::new(
                self.id.clone(),
                self.created,
                self.model.clone(),
                vec![ChatCompletionChunkChoice {
                    index: 0,
                    delta: ChatCompletionDelta {
                        role: None,
                        content: Some(text.to_string()),
                        tool_calls: None,
                    },
                    finish_reason: None,
                }],
            ));
        }

        None
    }

    fn handle_function_call(&mut self, function_call: &Value) -> ChatCompletionChunk {
        self.used_tool = true;
        let name = function_call
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown_tool")
            .to_string();
        let args = function_call
            .get("args")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
            .to_string();
        let call_id = generate_tool_call_id();
        let index = self.next_tool_index;
        self.next_tool_index += 1;
        self.accumulated_tool_calls.push((call_id.clone(), name.clone(), args.clone()));

        ChatCompletionChunk::new(
            self.id.clone(),
            self.created,
            self.model.clone(),
            vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ChatToolCallDelta {
                        index,
                        id: Some(call_id),
                        call_type: Some("function".to_string()),
                        function: Some(ChatToolCallFunction { name, arguments: args }),
                    }]),
                },
                finish_reason: None,
            }],
        )
    }

    fn finish_chunk(&mut self) -> ChatCompletionChunk {
        self.finished = true;
        let reason = if self.used_tool {
            "tool_calls"
        } else {
            match self.finish_reason.as_deref() {
                Some("MAX_TOKENS") => "length",
                _ => "stop",
            }
        };
        let mut chunk = ChatCompletionChunk::new(
            self.id.clone(),
            self.created,
            self.model.clone(),
            vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta::default(),
                finish_reason: Some(reason.to_string()),
            }],
        );
        chunk.usage = self.usage.clone();
        chunk
    }

    /// Accumulates the full response into the non-streaming
    /// `ChatCompletionResponse` shape, once `is_finished()`.
    pub fn accumulated_response(&self) -> ChatCompletionResponse {
        let mut resp = ChatCompletionResponse::new(self.id.clone(), self.created, self.model.clone());
        let tool_calls = (!self.accumulated_tool_calls.is_empty()).then(|| {
            self.accumulated_tool_calls
                .iter()
                .map(|(id, name, args)| pollux_schema::openai::ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: args.clone(),
                    },
                })
                .collect()
        });
        let content = (!self.accumulated_content.is_empty()).then(|| self.accumulated_content.clone());
        let mut message = ChatCompletionMessage::assistant(content);
        message.tool_calls = tool_calls;

        let reason = if self.used_tool {
            "tool_calls"
        } else {
            match self.finish_reason.as_deref() {
                Some("MAX_TOKENS") => "length",
                _ => "stop",
            }
        };
        resp.choices.push(ChatCompletionChoice {
            index: 0,
            message,
            finish_reason: Some(reason.to_string()),
        });
        resp.usage = self.usage.clone();
        resp
    }

    /// Guarantees stream termination on disconnect, upstream timeout, or an
    /// unrecoverable parse error. Idempotent.
    pub fn force_stop(&mut self) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }
        let mut out = Vec::new();
        if let Some(role_chunk) = self.role_chunk() {
            out.push(role_chunk);
        }
        out.push(self.finish_chunk());
        out
    }
}

fn compute_usage(usage_metadata: Option<&Value>) -> ChatUsage {
    let Some(meta) = usage_metadata else {
        return ChatUsage::default();
    };
    let prompt = meta.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0) as u32;
    let completion = meta.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0) as u32;
    ChatUsage::new(prompt, completion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk_with_parts(parts: Vec<Part>, finish_reason: Option<&str>) -> GeminiResponseBody {
        let content_json = json!({"role": "model", "parts": parts});
        let candidate_json = json!({"content": content_json, "finishReason": finish_reason});
        serde_json::from_value(json!({"candidates": [candidate_json]})).unwrap()
    }

    #[test]
    fn plain_text_emits_role_then_content_delta() {
        let mut converter = GeminiToOpenaiConverter::new("gpt-4o", 1700000000);
        let chunk = chunk_with_parts(
            vec![Part {
                text: Some("hi".to_string()),
                ..Default::default()
            }],
            None,
        );
        let chunks = converter.handle_chunk(&chunk);
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("hi"));
    }

    #[test]
    fn finish_reason_emits_terminal_chunk() {
        let mut converter = GeminiToOpenaiConverter::new("gpt-4o", 1700000000);
        let chunk = chunk_with_parts(
            vec![Part {
                text: Some("done".to_string()),
                ..Default::default()
            }],
            Some("STOP"),
        );
        let chunks = converter.handle_chunk(&chunk);
        assert!(converter.is_finished());
        let last = chunks.last().unwrap();
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn function_call_sets_tool_calls_finish_reason() {
        let mut converter = GeminiToOpenaiConverter::new("gpt-4o", 1700000000);
        let chunk = chunk_with_parts(
            vec![Part {
                function_call: Some(json!({"name": "get_weather", "args": {"city": "ny"}})),
                ..Default::default()
            }],
            Some("STOP"),
        );
        let chunks = converter.handle_chunk(&chunk);
        let finish = chunks.last().unwrap();
        assert_eq!(finish.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        let resp = converter.accumulated_response();
        assert_eq!(
            resp.choices[0].message.tool_calls.as_ref().unwrap()[0].function.name,
            "get_weather"
        );
    }

    #[test]
    fn thinking_part_is_silently_dropped() {
        let mut converter = GeminiToOpenaiConverter::new("gpt-4o", 1700000000);
        let chunk = chunk_with_parts(
            vec![
                Part {
                    thought: Some(true),
                    text: Some("reasoning".to_string()),
                    ..Default::default()
                },
                Part {
                    text: Some("answer".to_string()),
                    ..Default::default()
                },
            ],
            None,
        );
        let chunks = converter.handle_chunk(&chunk);
        assert!(
            chunks
                .iter()
                .all(|c| c.choices[0].delta.content.as_deref() != Some("reasoning"))
        );
    }

    #[test]
    fn force_stop_is_idempotent() {
        let mut converter = GeminiToOpenaiConverter::new("gpt-4o", 1700000000);
        let first = converter.force_stop();
        assert!(!first.is_empty());
        assert!(converter.is_finished());
        let second = converter.force_stop();
        assert!(second.is_empty());
    }
}
