//! OpenAI Chat Completions ingress (spec.md §6): accepts `POST
//! /v1/chat/completions`, transforms into the Gemini `generateContent`
//! shape, and dispatches through the [`crate::executor::Executor`].
//! Mirrors `server::routes::claude`'s shape.

pub mod extract;
pub mod handlers;
pub mod respond;

use crate::server::router::PolluxState;
use axum::{Router, routing::post};

use handlers::openai_chat_handler;

pub fn router() -> Router<PolluxState> {
    Router::new().route("/v1/chat/completions", post(openai_chat_handler))
}
