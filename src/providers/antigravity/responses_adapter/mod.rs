//! OpenAI Responses (Codex) API ↔ Gemini `generateContent` protocol adapter
//! for the Antigravity upstream: request transform (`request`) and the
//! streaming/non-streaming response converter (`response`).
//!
//! Mirrors `openai_adapter`'s module shape; the Responses wire format has
//! distinct input-item and SSE-event shapes (see `request`/`response` doc
//! comments), so it is not a thin reuse of the Chat Completions adapter.

mod request;
mod response;

pub use request::{ResponsesTransformOutcome, transform_responses_request};
pub use response::{GeminiToResponsesConverter, ResponsesEvent};
