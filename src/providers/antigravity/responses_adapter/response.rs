//! Gemini `generateContent` streaming response → OpenAI Responses API SSE
//! event stream.
//!
//! Structurally similar to `openai_adapter::response::GeminiToOpenaiConverter`
//! (an explicit state machine driven one Gemini chunk at a time, force-stop
//! on disconnect), but the Responses wire format streams *named* events
//! (`response.created`, `response.output_text.delta`,
//! `response.output_item.done`, `response.completed`, …) instead of
//! Chat Completions' single repeated chunk shape, and its non-streaming
//! body is an `output` array of typed items rather than a `choices` array.

use pollux_schema::gemini::{GeminiResponseBody, Part};
use pollux_schema::openai::{
    ResponsesBody, ResponsesCompletedEvent, ResponsesCreatedEvent, ResponsesFunctionCallDeltaEvent,
    ResponsesOutputItem, ResponsesOutputItemEvent, ResponsesTextDeltaEvent, ResponsesUsage,
};
use rand::Rng as _;
use serde_json::Value;

fn generate_id(prefix: &str) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let suffix: String = (0..24)
        .map(|_| {
            let idx = rand::rng().random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("{prefix}_{suffix}")
}

/// One named Responses-API SSE event, pre-serialized into its `event:`/
/// `data:` pair by the route layer (each variant carries its own `type`
/// discriminator in its JSON body, as the real API does).
pub enum ResponsesEvent {
    Created(ResponsesCreatedEvent),
    OutputItemAdded(ResponsesOutputItemEvent),
    TextDelta(ResponsesTextDeltaEvent),
    FunctionCallDelta(ResponsesFunctionCallDeltaEvent),
    OutputItemDone(ResponsesOutputItemEvent),
    Completed(ResponsesCompletedEvent),
}

impl ResponsesEvent {
    /// The Responses API's SSE `event:` line name, mirroring its `type` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            ResponsesEvent::Created(_) => "response.created",
            ResponsesEvent::OutputItemAdded(_) => "response.output_item.added",
            ResponsesEvent::TextDelta(_) => "response.output_text.delta",
            ResponsesEvent::FunctionCallDelta(_) => "response.function_call_arguments.delta",
            ResponsesEvent::OutputItemDone(_) => "response.output_item.done",
            ResponsesEvent::Completed(_) => "response.completed",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ResponsesEvent::Created(e) => serde_json::to_value(e),
            ResponsesEvent::OutputItemAdded(e) => serde_json::to_value(e),
            ResponsesEvent::TextDelta(e) => serde_json::to_value(e),
            ResponsesEvent::FunctionCallDelta(e) => serde_json::to_value(e),
            ResponsesEvent::OutputItemDone(e) => serde_json::to_value(e),
            ResponsesEvent::Completed(e) => serde_json::to_value(e),
        }
        .unwrap_or(Value::Null)
    }
}

enum OpenItem {
    None,
    Text { item_id: String, text: String },
    FunctionCall { item_id: String, call_id: String, name: String, arguments: String },
}

/// Drives a single Responses-API-facing SSE conversion for one upstream
/// response. Feed it Gemini chunks in order via
/// [`handle_chunk`](Self::handle_chunk); call
/// [`force_stop`](Self::force_stop) on disconnect/timeout/parse-failure so
/// the stream always reaches a terminal `response.completed` event.
pub struct GeminiToResponsesConverter {
    id: String,
    created_at: u64,
    model: String,
    created_sent: bool,
    finished: bool,
    next_output_index: u32,
    open_item: OpenItem,
    output: Vec<ResponsesOutputItem>,
    usage: Option<ResponsesUsage>,
}

impl GeminiToResponsesConverter {
    pub fn new(model: impl Into<String>, created_at: u64) -> Self {
        Self {
            id: generate_id("resp"),
            created_at,
            model: model.into(),
            created_sent: false,
            finished: false,
            next_output_index: 0,
            open_item: OpenItem::None,
            output: Vec::new(),
            usage: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn created_event(&mut self) -> Option<ResponsesEvent> {
        if self.created_sent {
            return None;
        }
        self.created_sent = true;
        Some(ResponsesEvent::Created(ResponsesCreatedEvent {
            kind: "response.created".to_string(),
            response: ResponsesBody::new(self.id.clone(), self.created_at, self.model.clone()),
        }))
    }

    /// Processes one upstream chunk, returning the Responses-API events it
    /// produces.
    pub fn handle_chunk(&mut self, chunk: &GeminiResponseBody) -> Vec<ResponsesEvent> {
        let mut out = Vec::new();
        if let Some(created) = self.created_event() {
            out.push(created);
        }

        let Some(candidate) = chunk.candidates.first() else {
            return out;
        };

        if let Some(content) = candidate.content.as_ref() {
            for part in &content.parts {
                out.extend(self.handle_part(part));
            }
        }

        if let Some(finish_reason) = candidate.finish_reason.clone() {
            out.extend(self.close_open_item());
            self.usage = Some(compute_usage(chunk.usageMetadata.as_ref()));
            out.push(self.completed_event(&finish_reason));
        }

        out
    }

    fn handle_part(&mut self, part: &Part) -> Vec<ResponsesEvent> {
        // Thinking parts have no Responses-API wire equivalent; drop silently.
        if part.thought == Some(true) {
            return Vec::new();
        }

        if let Some(function_call) = part.function_call.as_ref() {
            return self.handle_function_call(function_call);
        }

        if let Some(text) = part.text.as_deref() {
            if text.is_empty() {
                return Vec::new();
            }
            return self.handle_text_delta(text);
        }

        Vec::new()
    }

    fn handle_text_delta(&mut self, text: &str) -> Vec<ResponsesEvent> {
        let mut out = Vec::new();
        let item_id = match &mut self.open_item {
            OpenItem::Text { item_id, text: acc } => {
                acc.push_str(text);
                item_id.clone()
            }
            _ => {
                out.extend(self.close_open_item());
                let item_id = generate_id("msg");
                let index = self.next_output_index;
                self.next_output_index += 1;
                out.push(ResponsesEvent::OutputItemAdded(ResponsesOutputItemEvent {
                    kind: "response.output_item.added".to_string(),
                    output_index: index,
                    item: ResponsesOutputItem::message(item_id.clone(), String::new()),
                }));
                self.open_item = OpenItem::Text {
                    item_id: item_id.clone(),
                    text: text.to_string(),
                };
                item_id
            }
        };

        out.push(ResponsesEvent::TextDelta(ResponsesTextDeltaEvent {
            kind: "response.output_text.delta".to_string(),
            item_id,
            output_index: self.next_output_index.saturating_sub(1),
            delta: text.to_string(),
        }));
        out
    }

    fn handle_function_call(&mut self, function_call: &Value) -> Vec<ResponsesEvent> {
        let mut out = self.close_open_item();

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
        let item_id = generate_id("fc");
        let call_id = generate_id("call");
        let index = self.next_output_index;
        self.next_output_index += 1;

        out.push(ResponsesEvent::OutputItemAdded(ResponsesOutputItemEvent {
            kind: "response.output_item.added".to_string(),
            output_index: index,
            item: ResponsesOutputItem::function_call(
                item_id.clone(),
                call_id.clone(),
                name.clone(),
                String::new(),
            ),
        }));
        out.push(ResponsesEvent::FunctionCallDelta(ResponsesFunctionCallDeltaEvent {
            kind: "response.function_call_arguments.delta".to_string(),
            item_id: item_id.clone(),
            output_index: index,
            delta: args.clone(),
        }));

        self.open_item = OpenItem::FunctionCall {
            item_id,
            call_id,
            name,
            arguments: args,
        };
        out.extend(self.close_open_item());
        out
    }

    fn close_open_item(&mut self) -> Vec<ResponsesEvent> {
        let index = self.next_output_index.saturating_sub(1);
        match std::mem::replace(&mut self.open_item, OpenItem::None) {
            OpenItem::None => Vec::new(),
            OpenItem::Text { item_id, text } => {
                let item = ResponsesOutputItem::message(item_id, text);
                self.output.push(item.clone());
                vec![ResponsesEvent::OutputItemDone(ResponsesOutputItemEvent {
                    kind: "response.output_item.done".to_string(),
                    output_index: index,
                    item,
                })]
            }
            OpenItem::FunctionCall { item_id, call_id, name, arguments } => {
                let item = ResponsesOutputItem::function_call(item_id, call_id, name, arguments);
                self.output.push(item.clone());
                vec![ResponsesEvent::OutputItemDone(ResponsesOutputItemEvent {
                    kind: "response.output_item.done".to_string(),
                    output_index: index,
                    item,
                })]
            }
        }
    }

    fn completed_event(&mut self, finish_reason: &str) -> ResponsesEvent {
        self.finished = true;
        let mut body = ResponsesBody::new(self.id.clone(), self.created_at, self.model.clone());
        body.status = "completed".to_string();
        body.output = self.output.clone();
        body.usage = self.usage.clone();
        let _ = finish_reason;
        ResponsesEvent::Completed(ResponsesCompletedEvent {
            kind: "response.completed".to_string(),
            response: body,
        })
    }

    /// Accumulates the full response into the non-streaming `ResponsesBody`
    /// shape, once `is_finished()`.
    pub fn accumulated_response(&self) -> ResponsesBody {
        let mut body = ResponsesBody::new(self.id.clone(), self.created_at, self.model.clone());
        body.status = if self.finished { "completed" } else { "in_progress" }.to_string();
        body.output = self.output.clone();
        body.usage = self.usage.clone();
        body
    }

    /// Guarantees stream termination on disconnect, upstream timeout, or an
    /// unrecoverable parse error. Idempotent.
    pub fn force_stop(&mut self) -> Vec<ResponsesEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut out = Vec::new();
        if let Some(created) = self.created_event() {
            out.push(created);
        }
        out.extend(self.close_open_item());
        self.usage.get_or_insert_with(ResponsesUsage::default);
        out.push(self.completed_event("STOP"));
        out
    }
}

fn compute_usage(usage_metadata: Option<&Value>) -> ResponsesUsage {
    let Some(meta) = usage_metadata else {
        return ResponsesUsage::default();
    };
    let input = meta.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0) as u32;
    let output = meta.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0) as u32;
    ResponsesUsage::new(input, output)
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
    fn plain_text_emits_created_item_added_then_delta() {
        let mut converter = GeminiToResponsesConverter::new("gpt-4o", 1700000000);
        let chunk = chunk_with_parts(
            vec![Part {
                text: Some("hi".to_string()),
                ..Default::default()
            }],
            None,
        );
        let events = converter.handle_chunk(&chunk);
        assert_eq!(events[0].event_name(), "response.created");
        assert_eq!(events[1].event_name(), "response.output_item.added");
        assert_eq!(events[2].event_name(), "response.output_text.delta");
    }

    #[test]
    fn finish_reason_closes_item_and_emits_completed() {
        let mut converter = GeminiToResponsesConverter::new("gpt-4o", 1700000000);
        let chunk = chunk_with_parts(
            vec![Part {
                text: Some("done".to_string()),
                ..Default::default()
            }],
            Some("STOP"),
        );
        let events = converter.handle_chunk(&chunk);
        assert!(converter.is_finished());
        let names: Vec<_> = events.iter().map(|e| e.event_name()).collect();
        assert!(names.contains(&"response.output_item.done"));
        assert_eq!(names.last(), Some(&"response.completed"));

        let resp = converter.accumulated_response();
        assert_eq!(resp.status, "completed");
        assert_eq!(resp.output.len(), 1);
    }

    #[test]
    fn function_call_emits_item_then_arguments_delta_then_done() {
        let mut converter = GeminiToResponsesConverter::new("gpt-4o", 1700000000);
        let chunk = chunk_with_parts(
            vec![Part {
                function_call: Some(json!({"name": "get_weather", "args": {"city": "ny"}})),
                ..Default::default()
            }],
            Some("STOP"),
        );
        let events = converter.handle_chunk(&chunk);
        let names: Vec<_> = events.iter().map(|e| e.event_name()).collect();
        assert!(names.contains(&"response.function_call_arguments.delta"));
        let resp = converter.accumulated_response();
        match &resp.output[0] {
            ResponsesOutputItem::FunctionCall { name, .. } => assert_eq!(name, "get_weather"),
            other => panic!("expected function_call, got {other:?}"),
        }
    }

    #[test]
    fn force_stop_is_idempotent() {
        let mut converter = GeminiToResponsesConverter::new("gpt-4o", 1700000000);
        let first = converter.force_stop();
        assert!(!first.is_empty());
        assert!(converter.is_finished());
        let second = converter.force_stop();
        assert!(second.is_empty());
    }

    #[test]
    fn thinking_part_is_silently_dropped() {
        let mut converter = GeminiToResponsesConverter::new("gpt-4o", 1700000000);
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
        let events = converter.handle_chunk(&chunk);
        assert!(
            events
                .iter()
                .filter_map(|e| match e {
                    ResponsesEvent::TextDelta(d) => Some(d.delta.clone()),
                    _ => None,
                })
                .all(|delta| delta != "reasoning")
        );
    }
}
