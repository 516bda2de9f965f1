//! Claude Messages ↔ Gemini `generateContent` protocol adapter for the
//! Antigravity upstream: request transform (`request`), thinking-block and
//! broken-tool-loop handling (`thinking`), tool-argument remapping
//! (`tool_args`), and the streaming response converter (`response`).

mod request;
mod response;
mod thinking;
mod tool_args;

pub use request::{ClaudeTransformOutcome, transform_claude_request};
pub use response::{GeminiToClaudeConverter, parse_error_event};
