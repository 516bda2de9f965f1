//! OpenAI Responses/Codex ingress (spec.md §6): accepts `POST /v1/responses`
//! and `POST /responses`, transforms into the Gemini `generateContent`
//! shape, and dispatches through the [`crate::executor::Executor`]. Mirrors
//! `server::routes::openai_chat`'s shape; the wire format/route paths
//! differ, the executor/router/cooldown wiring does not.

pub mod extract;
pub mod handlers;
pub mod respond;

use crate::server::router::PolluxState;
use axum::{Router, routing::post};

use handlers::openai_responses_handler;

pub fn router() -> Router<PolluxState> {
    Router::new()
        .route("/v1/responses", post(openai_responses_handler))
        .route("/responses", post(openai_responses_handler))
}
