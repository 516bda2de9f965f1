use crate::config::AntigravityResolvedConfig;
use crate::db::DbActorHandle;
use std::sync::Arc;

pub mod claude_adapter;
pub mod client;
pub mod manager;
pub mod openai_adapter;
pub mod resource;
pub mod responses_adapter;
mod thoughtsig;
pub mod workers;

/// Fixed Antigravity-style User-Agent string.
pub(crate) const ANTIGRAVITY_USER_AGENT: &str = "antigravity/1.15.8 (Windows; AMD64)";

pub use claude_adapter::{
    ClaudeTransformOutcome, GeminiToClaudeConverter, parse_error_event, transform_claude_request,
};
pub use openai_adapter::{GeminiToOpenaiConverter, OpenaiChatTransformOutcome, transform_openai_chat_request};
pub use responses_adapter::{GeminiToResponsesConverter, ResponsesEvent, ResponsesTransformOutcome, transform_responses_request};
pub use client::{AntigravityClient, AntigravityContext};
pub use manager::actor::AntigravityActorHandle;
pub use thoughtsig::AntigravityThoughtSigService;

pub(in crate::providers) async fn spawn(
    db: DbActorHandle,
    cfg: Arc<AntigravityResolvedConfig>,
) -> AntigravityActorHandle {
    manager::spawn(db, cfg).await
}
