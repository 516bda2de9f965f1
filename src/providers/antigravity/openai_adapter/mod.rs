//! OpenAI Chat Completions ↔ Gemini `generateContent` protocol adapter for
//! the Antigravity upstream: request transform (`request`) and the
//! streaming/non-streaming response converter (`response`).
//!
//! Mirrors `claude_adapter`'s module shape; the OpenAI Chat Completions wire
//! format has no thinking-block or cache-control concept, so this adapter is
//! considerably smaller than its Claude sibling.

mod request;
mod response;

pub use request::{OpenaiChatTransformOutcome, transform_openai_chat_request};
pub use response::GeminiToOpenaiConverter;
