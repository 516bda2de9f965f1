//! Claude Messages ingress (spec.md §4.1): accepts `POST /v1/messages`,
//! transforms into the Gemini `generateContent` shape, and dispatches
//! through the [`crate::executor::Executor`] rather than calling an
//! upstream client directly.

pub mod extract;
pub mod handlers;
pub mod respond;

use crate::server::router::PolluxState;
use axum::{Router, routing::post};

use handlers::claude_messages_handler;

pub fn router() -> Router<PolluxState> {
    Router::new().route("/v1/messages", post(claude_messages_handler))
}
