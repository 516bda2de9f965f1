//! Typed Claude Messages API schema (request, response, and SSE stream events).

mod content;
mod message;
mod request;
mod response;
mod stream;

pub use content::ContentBlock;
pub use message::{Message, MessageContent};
pub use request::{ClaudeMessagesRequest, ClaudeTool, OutputConfig, SystemPrompt, ThinkingConfig};
pub use response::{ClaudeMessagesResponse, Usage};
pub use stream::{
    ClaudeStreamError, ClaudeStreamEvent, ContentDelta, DeltaUsage, MessageDeltaPayload,
};
