pub mod antigravity;
pub mod claude;
pub mod codex;
pub mod gemini;
pub mod geminicli;
pub mod openai;

pub use antigravity::{AntigravityRequestBody, AntigravityRequestMeta, AntigravityResponseBody};
pub use claude::{ClaudeMessagesRequest, ClaudeMessagesResponse};
pub use codex::{CodexErrorBody, CodexRequestBody};
pub use geminicli::{GeminiCliRequest, GeminiCliRequestMeta, GeminiCliResponseBody};
pub use openai::{OpenaiChatRequest, OpenaiRequestBody, OpenaiResponsesErrorBody, OpenaiResponsesErrorObject};
