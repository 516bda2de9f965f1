//! Gemini `generateContent` streaming response → Claude Messages SSE event
//! stream, per spec.md §4.1.10. This is the central conversion algorithm of
//! the Antigravity adapter: each upstream chunk carries zero or more Gemini
//! `Part`s that must be re-expressed as a sequence of Claude content blocks,
//! tracking a handful of pieces of state across the whole stream.

use super::tool_args::unmap_tool_arguments;
use pollux_schema::claude::stream::{
    ClaudeStreamError, ClaudeStreamEvent, ContentDelta, DeltaUsage, MessageDeltaPayload,
};
use pollux_schema::claude::{ClaudeMessagesResponse, ContentBlock, Usage};
use pollux_schema::gemini::GeminiResponseBody;
use pollux_thoughtsig_core::SignatureCache;
use rand::Rng as _;
use serde_json::Value;
use uuid::Uuid;

fn generate_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

fn generate_tool_use_id(name: &str) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let suffix: String = (0..8)
        .map(|_| {
            let idx = rand::rng().random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("{name}-{suffix}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text,
    Thinking,
    ToolUse,
}

/// Drives a single Claude-facing SSE conversion for one upstream response.
/// Feed it Gemini chunks in order via [`handle_chunk`](Self::handle_chunk);
/// call [`force_stop`](Self::force_stop) on disconnect/timeout/parse-failure
/// to guarantee the stream still terminates cleanly for the client.
pub struct GeminiToClaudeConverter {
    model: String,
    open: OpenBlock,
    next_index: usize,
    message_started: bool,
    message_stopped: bool,
    used_tool: bool,
    pending_thinking_signature: Option<String>,
    trailing_signature: Option<String>,
    grounding: Option<Value>,
    final_response: ClaudeMessagesResponse,
    finish_reason: Option<String>,
}

impl GeminiToClaudeConverter {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            final_response: ClaudeMessagesResponse::new(generate_message_id(), model.clone()),
            model,
            open: OpenBlock::None,
            next_index: 0,
            message_started: false,
            message_stopped: false,
            used_tool: false,
            pending_thinking_signature: None,
            trailing_signature: None,
            grounding: None,
            finish_reason: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.message_stopped
    }

    /// Snapshot of the message accumulated so far, for non-streaming Claude
    /// requests that internally promote to the streaming upstream call and
    /// reconstitute a single JSON response at the end (spec.md §4.1.9).
    pub fn accumulated_response(&self) -> &ClaudeMessagesResponse {
        &self.final_response
    }

    fn ensure_message_start(&mut self, events: &mut Vec<ClaudeStreamEvent>) {
        if self.message_started {
            return;
        }
        self.message_started = true;
        events.push(ClaudeStreamEvent::MessageStart {
            message: self.final_response.clone(),
        });
    }

    fn close_current_block(&mut self, events: &mut Vec<ClaudeStreamEvent>) {
        if self.open == OpenBlock::None {
            return;
        }
        if self.open == OpenBlock::Thinking {
            if let Some(sig) = self.pending_thinking_signature.take() {
                events.push(ClaudeStreamEvent::ContentBlockDelta {
                    index: self.next_index - 1,
                    delta: ContentDelta::SignatureDelta { signature: sig },
                });
            }
        }
        events.push(ClaudeStreamEvent::ContentBlockStop {
            index: self.next_index - 1,
        });
        self.open = OpenBlock::None;
    }

    fn open_block(
        &mut self,
        kind: OpenBlock,
        content_block: ContentBlock,
        events: &mut Vec<ClaudeStreamEvent>,
    ) -> usize {
        if self.open != kind || kind == OpenBlock::ToolUse {
            self.close_current_block(events);
            let index = self.next_index;
            self.next_index += 1;
            self.final_response.content.push(content_block.clone());
            events.push(ClaudeStreamEvent::ContentBlockStart {
                index,
                content_block,
            });
            self.open = kind;
            index
        } else {
            self.next_index - 1
        }
    }

    /// Emits an empty thinking block carrying a signature that arrived with
    /// no surrounding `thinking` text (spec.md §4.1.10's "trailing
    /// signature" case): a function-call's own signature, or a text part's
    /// signature, handled outside any open thinking block.
    fn flush_trailing_signature(&mut self, events: &mut Vec<ClaudeStreamEvent>) {
        let Some(sig) = self.trailing_signature.take() else {
            return;
        };
        self.close_current_block(events);
        let index = self.next_index;
        self.next_index += 1;
        let block = ContentBlock::thinking("", Some(sig.clone()));
        self.final_response.content.push(block.clone());
        events.push(ClaudeStreamEvent::ContentBlockStart {
            index,
            content_block: block,
        });
        events.push(ClaudeStreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::SignatureDelta { signature: sig },
        });
        events.push(ClaudeStreamEvent::ContentBlockStop { index });
        self.open = OpenBlock::None;
    }

    /// Processes one upstream chunk, returning the Claude SSE events it
    /// produces. `model_family` is this response's resolved model, used to
    /// file observed signatures under the right compatibility family.
    pub fn handle_chunk(
        &mut self,
        chunk: &GeminiResponseBody,
        sig_cache: &SignatureCache,
        model_family: &str,
    ) -> Vec<ClaudeStreamEvent> {
        let mut events = Vec::new();
        self.ensure_message_start(&mut events);

        let Some(candidate) = chunk.candidates.first() else {
            return events;
        };

        if let Some(reason) = candidate.extra.get("groundingMetadata") {
            self.grounding = Some(reason.clone());
        }

        if let Some(content) = candidate.content.as_ref() {
            for part in &content.parts {
                self.handle_part(part, sig_cache, model_family, &mut events);
            }
        }

        if let Some(finish_reason) = candidate.finish_reason.clone() {
            self.finish_reason = Some(finish_reason);
            self.finalize(chunk.usageMetadata.as_ref(), &mut events);
        }

        events
    }

    fn handle_part(
        &mut self,
        part: &pollux_schema::gemini::Part,
        sig_cache: &SignatureCache,
        model_family: &str,
        events: &mut Vec<ClaudeStreamEvent>,
    ) {
        if let Some(function_call) = part.function_call.as_ref() {
            self.handle_function_call(
                function_call,
                part.thought_signature.as_deref(),
                sig_cache,
                model_family,
                events,
            );
            return;
        }

        if part.thought == Some(true) {
            self.handle_thinking(
                part.text.as_deref().unwrap_or(""),
                part.thought_signature.as_deref(),
                sig_cache,
                model_family,
                events,
            );
            return;
        }

        if let Some(text) = part.text.as_deref() {
            self.handle_text(text, part.thought_signature.as_deref(), events);
            return;
        }

        if let Some(inline) = part.inline_data.as_ref() {
            let mime = inline
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("application/octet-stream");
            let data = inline.get("data").and_then(Value::as_str).unwrap_or("");
            let markdown = format!("![image](data:{mime};base64,{data})");
            self.handle_text(&markdown, None, events);
        }
    }

    fn handle_function_call(
        &mut self,
        function_call: &Value,
        own_signature: Option<&str>,
        sig_cache: &SignatureCache,
        model_family: &str,
        events: &mut Vec<ClaudeStreamEvent>,
    ) {
        self.flush_trailing_signature(events);

        let name = function_call
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown_tool")
            .to_string();
        let tool_use_id = function_call
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| generate_tool_use_id(&name));

        let mut args = function_call
            .get("args")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        unmap_tool_arguments(&name, &mut args);

        let mut block = ContentBlock::tool_use(tool_use_id.clone(), name, Value::Object(Default::default()));
        block.signature = own_signature.map(str::to_string);
        let index = self.open_block(OpenBlock::ToolUse, block, events);

        events.push(ClaudeStreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::InputJsonDelta {
                partial_json: args.to_string(),
            },
        });
        if let Some(block) = self.final_response.content.get_mut(index) {
            block.input = Some(args);
        }
        self.close_current_block(events);

        if let Some(sig) = own_signature {
            sig_cache.observe(&tool_use_id, sig, model_family);
        }
        self.used_tool = true;
    }

    fn handle_thinking(
        &mut self,
        text: &str,
        signature: Option<&str>,
        sig_cache: &SignatureCache,
        model_family: &str,
        events: &mut Vec<ClaudeStreamEvent>,
    ) {
        self.flush_trailing_signature(events);

        let index = self.open_block(OpenBlock::Thinking, ContentBlock::thinking("", None), events);
        if !text.is_empty() {
            events.push(ClaudeStreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::ThinkingDelta {
                    thinking: text.to_string(),
                },
            });
            if let Some(block) = self.final_response.content.get_mut(index) {
                let existing = block.thinking.get_or_insert_with(String::new);
                existing.push_str(text);
            }
        }

        if let Some(sig) = signature {
            self.pending_thinking_signature = Some(sig.to_string());
            if let Some(block) = self.final_response.content.get_mut(index) {
                block.signature = Some(sig.to_string());
            }
            sig_cache.observe_thinking(sig, model_family);
        }
    }

    fn handle_text(&mut self, text: &str, signature: Option<&str>, events: &mut Vec<ClaudeStreamEvent>) {
        if text.is_empty() {
            if let Some(sig) = signature {
                self.trailing_signature = Some(sig.to_string());
            }
            return;
        }

        self.flush_trailing_signature(events);

        let index = self.open_block(OpenBlock::Text, ContentBlock::text(""), events);
        events.push(ClaudeStreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta {
                text: text.to_string(),
            },
        });
        if let Some(block) = self.final_response.content.get_mut(index) {
            let existing = block.text.get_or_insert_with(String::new);
            existing.push_str(text);
        }

        if let Some(sig) = signature {
            self.trailing_signature = Some(sig.to_string());
        }
    }

    fn grounding_markdown(&self) -> Option<String> {
        let grounding = self.grounding.as_ref()?;
        let chunks = grounding.get("groundingChunks")?.as_array()?;
        if chunks.is_empty() {
            return None;
        }

        let mut out = String::new();
        if let Some(queries) = grounding.get("webSearchQueries").and_then(Value::as_array) {
            let queries: Vec<&str> = queries.iter().filter_map(Value::as_str).collect();
            if !queries.is_empty() {
                out.push_str(&format!("\n\n*Searched for: {}*\n", queries.join(", ")));
            }
        }
        out.push_str("\n**Sources:**\n");
        for (i, chunk) in chunks.iter().enumerate() {
            let web = chunk.get("web");
            let uri = web.and_then(|w| w.get("uri")).and_then(Value::as_str).unwrap_or("");
            let title = web
                .and_then(|w| w.get("title"))
                .and_then(Value::as_str)
                .unwrap_or(uri);
            out.push_str(&format!("{}. [{title}]({uri})\n", i + 1));
        }
        Some(out)
    }

    fn finalize(&mut self, usage_metadata: Option<&Value>, events: &mut Vec<ClaudeStreamEvent>) {
        if let Some(markdown) = self.grounding_markdown() {
            self.handle_text(&markdown, None, events);
        }

        self.close_current_block(events);

        let stop_reason = if self.used_tool {
            "tool_use"
        } else {
            match self.finish_reason.as_deref() {
                Some("MAX_TOKENS") => "max_tokens",
                Some("SAFETY") | Some("RECITATION") => "end_turn",
                _ => "end_turn",
            }
        };
        self.final_response.stop_reason = Some(stop_reason.to_string());

        let usage = self.compute_usage(usage_metadata);
        self.final_response.usage = usage.clone();

        events.push(ClaudeStreamEvent::MessageDelta {
            delta: MessageDeltaPayload {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: usage.output_tokens,
            },
        });
        events.push(ClaudeStreamEvent::MessageStop);
        self.message_stopped = true;
    }

    fn compute_usage(&self, usage_metadata: Option<&Value>) -> Usage {
        let Some(meta) = usage_metadata else {
            return Usage::default();
        };
        let prompt = meta.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0);
        let cached = meta
            .get("cachedContentTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let output = meta
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let input = prompt.saturating_sub(cached);

        Usage {
            input_tokens: input as u32,
            output_tokens: output as u32,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: if cached > 0 { Some(cached as u32) } else { None },
        }
    }

    /// Guarantees stream termination on disconnect, upstream timeout, or an
    /// unrecoverable parse error: closes any open block, flushes a pending
    /// trailing signature, and emits `message_delta`/`message_stop` if they
    /// have not already been sent. Idempotent.
    pub fn force_stop(&mut self) -> Vec<ClaudeStreamEvent> {
        let mut events = Vec::new();
        if self.message_stopped {
            return events;
        }
        self.ensure_message_start(&mut events);
        self.flush_trailing_signature(&mut events);
        self.close_current_block(&mut events);

        let stop_reason = if self.used_tool { "tool_use" } else { "end_turn" };
        self.final_response.stop_reason = Some(stop_reason.to_string());

        events.push(ClaudeStreamEvent::MessageDelta {
            delta: MessageDeltaPayload {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.final_response.usage.output_tokens,
            },
        });
        events.push(ClaudeStreamEvent::MessageStop);
        self.message_stopped = true;
        events
    }

    /// Current resolved model, for error-event construction at the call site.
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Builds a Claude stream `error` event out of a raw SSE `data:` line this
/// converter could not parse as a Gemini chunk, following spec.md §4.1.10's
/// parse-error recovery rule: try to pull a structured `{error: {message,
/// code, status}}` shape out of it first, else synthesize a generic message.
pub fn parse_error_event(raw: &str) -> ClaudeStreamEvent {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if let Some(error) = value.get("error") {
            let message = error.get("message").and_then(Value::as_str).unwrap_or("upstream error");
            let code = error.get("code").and_then(Value::as_u64);
            let status = error.get("status").and_then(Value::as_str);
            let formatted = match (code, status) {
                (Some(c), Some(s)) => format!("[API Error: {message} (code: {c}, status: {s})]"),
                (Some(c), None) => format!("[API Error: {message} (code: {c})]"),
                _ => format!("[API Error: {message}]"),
            };
            return ClaudeStreamEvent::Error {
                error: ClaudeStreamError {
                    error_type: "api_error".to_string(),
                    message: formatted,
                },
            };
        }
    }

    ClaudeStreamEvent::Error {
        error: ClaudeStreamError {
            error_type: "api_error".to_string(),
            message: format!("[API Error: malformed upstream chunk: {raw}]"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollux_schema::gemini::Part;
    use serde_json::json;

    fn cache() -> SignatureCache {
        SignatureCache::new(3600, 1000)
    }

    fn chunk_with_parts(parts: Vec<Part>, finish_reason: Option<&str>) -> GeminiResponseBody {
        let content_json = json!({"role": "model", "parts": parts});
        let candidate_json = json!({
            "content": content_json,
            "finishReason": finish_reason,
        });
        let body_json = json!({"candidates": [candidate_json]});
        serde_json::from_value(body_json).unwrap()
    }

    #[test]
    fn plain_text_chunk_emits_message_start_and_text_delta() {
        let mut converter = GeminiToClaudeConverter::new("claude-sonnet-4-5");
        let chunk = chunk_with_parts(
            vec![Part {
                text: Some("hello".to_string()),
                ..Default::default()
            }],
            None,
        );
        let events = converter.handle_chunk(&chunk, &cache(), "claude-4");
        assert!(matches!(events[0], ClaudeStreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], ClaudeStreamEvent::ContentBlockStart { index: 0, .. }));
        assert!(matches!(
            &events[2],
            ClaudeStreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::TextDelta { text }
            } if text == "hello"
        ));
    }

    #[test]
    fn finish_reason_closes_block_and_stops_message() {
        let mut converter = GeminiToClaudeConverter::new("claude-sonnet-4-5");
        let chunk = chunk_with_parts(
            vec![Part {
                text: Some("done".to_string()),
                ..Default::default()
            }],
            Some("STOP"),
        );
        let events = converter.handle_chunk(&chunk, &cache(), "claude-4");
        assert!(converter.is_finished());
        let last = events.last().unwrap();
        assert!(matches!(last, ClaudeStreamEvent::MessageStop));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ClaudeStreamEvent::ContentBlockStop { index: 0 }))
        );
    }

    #[test]
    fn function_call_emits_tool_use_block_with_remapped_args() {
        let mut converter = GeminiToClaudeConverter::new("claude-sonnet-4-5");
        let chunk = chunk_with_parts(
            vec![Part {
                function_call: Some(json!({"name": "grep", "args": {"pattern": "TODO", "path": "src/"}})),
                ..Default::default()
            }],
            None,
        );
        let events = converter.handle_chunk(&chunk, &cache(), "claude-4");
        let delta = events.iter().find_map(|e| match e {
            ClaudeStreamEvent::ContentBlockDelta {
                delta: ContentDelta::InputJsonDelta { partial_json },
                ..
            } => Some(partial_json.clone()),
            _ => None,
        });
        let parsed: Value = serde_json::from_str(&delta.unwrap()).unwrap();
        assert_eq!(parsed["query"], json!("TODO"));
        assert_eq!(parsed["paths"], json!(["src/"]));
        assert!(converter.used_tool);
    }

    #[test]
    fn thinking_part_with_signature_sets_pending_and_flushes_on_close() {
        let mut converter = GeminiToClaudeConverter::new("claude-sonnet-4-5");
        let sig = "x".repeat(60);
        let chunk = chunk_with_parts(
            vec![
                Part {
                    thought: Some(true),
                    text: Some("reasoning".to_string()),
                    thought_signature: Some(sig.clone()),
                    ..Default::default()
                },
                Part {
                    text: Some("answer".to_string()),
                    ..Default::default()
                },
            ],
            None,
        );
        let events = converter.handle_chunk(&chunk, &cache(), "claude-4");
        let has_sig_delta = events.iter().any(|e| {
            matches!(e, ClaudeStreamEvent::ContentBlockDelta { delta: ContentDelta::SignatureDelta { signature }, .. } if signature == &sig)
        });
        assert!(has_sig_delta);
    }

    #[test]
    fn force_stop_is_idempotent_and_terminates() {
        let mut converter = GeminiToClaudeConverter::new("claude-sonnet-4-5");
        let chunk = chunk_with_parts(
            vec![Part {
                text: Some("partial".to_string()),
                ..Default::default()
            }],
            None,
        );
        converter.handle_chunk(&chunk, &cache(), "claude-4");
        let first = converter.force_stop();
        assert!(!first.is_empty());
        assert!(converter.is_finished());
        let second = converter.force_stop();
        assert!(second.is_empty());
    }

    #[test]
    fn parse_error_event_extracts_structured_message() {
        let raw = r#"{"error": {"message": "quota exceeded", "code": 429, "status": "RESOURCE_EXHAUSTED"}}"#;
        let event = parse_error_event(raw);
        match event {
            ClaudeStreamEvent::Error { error } => {
                assert!(error.message.contains("quota exceeded"));
                assert!(error.message.contains("429"));
            }
            _ => panic!("expected error event"),
        }
    }

    #[test]
    fn parse_error_event_falls_back_for_malformed_input() {
        let event = parse_error_event("not json at all");
        match event {
            ClaudeStreamEvent::Error { error } => {
                assert!(error.message.contains("malformed upstream chunk"));
            }
            _ => panic!("expected error event"),
        }
    }

    #[test]
    fn grounding_metadata_appends_sources_block() {
        let mut converter = GeminiToClaudeConverter::new("gemini-2.5-flash");
        let content_json = json!({"role": "model", "parts": [{"text": "answer"}]});
        let candidate_json = json!({
            "content": content_json,
            "finishReason": "STOP",
            "groundingMetadata": {
                "webSearchQueries": ["rust async"],
                "groundingChunks": [{"web": {"uri": "https://example.com", "title": "Example"}}]
            }
        });
        let chunk: GeminiResponseBody =
            serde_json::from_value(json!({"candidates": [candidate_json]})).unwrap();
        let events = converter.handle_chunk(&chunk, &cache(), "gemini-2.5");
        let has_sources = events.iter().any(|e| {
            matches!(e, ClaudeStreamEvent::ContentBlockDelta { delta: ContentDelta::TextDelta { text }, .. } if text.contains("Sources"))
        });
        assert!(has_sources);
    }
}
