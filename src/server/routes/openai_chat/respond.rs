use crate::error::ProxyError;
use crate::providers::antigravity::GeminiToOpenaiConverter;
use axum::Json;
use axum::response::{
    IntoResponse,
    sse::{Event, KeepAlive, Sse},
};
use chrono::Utc;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt as _};
use pollux_schema::antigravity::AntigravityResponseBody;
use pollux_schema::gemini::GeminiResponseBody;
use pollux_schema::openai::{ChatCompletionChunk, ChatCompletionResponse};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{error, warn};

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DONE_MARKER: &str = "[DONE]";

fn openai_chunk_to_sse(chunk: &ChatCompletionChunk) -> Event {
    Event::default().json_data(chunk).unwrap_or_else(|err| {
        warn!("failed to serialize OpenAI stream chunk: {err}");
        Event::default().data("{}")
    })
}

struct OpenaiStreamState<S> {
    raw: S,
    converter: GeminiToOpenaiConverter,
    pending: VecDeque<ChatCompletionChunk>,
    finished: bool,
    done_sent: bool,
}

async fn advance<S, E>(state: &mut OpenaiStreamState<S>)
where
    S: Stream<Item = Result<eventsource_stream::Event, E>> + Unpin,
    E: std::fmt::Display,
{
    match tokio::time::timeout(IDLE_TIMEOUT, state.raw.next()).await {
        Ok(Some(Ok(upstream_event))) => {
            if upstream_event.data.is_empty() {
                return;
            }
            match serde_json::from_str::<AntigravityResponseBody>(&upstream_event.data) {
                Ok(envelope) => {
                    let chunk: GeminiResponseBody = envelope.into();
                    let events = state.converter.handle_chunk(&chunk);
                    state.pending.extend(events);
                    if state.converter.is_finished() {
                        state.finished = true;
                    }
                }
                Err(_) => {
                    warn!(
                        "Skipping invalid OpenAI-facing SSE JSON data: {:.50}...",
                        upstream_event.data
                    );
                }
            }
        }
        Ok(Some(Err(err))) => {
            warn!("OpenAI upstream SSE stream error: {err}");
            state.pending.extend(state.converter.force_stop());
            state.finished = true;
        }
        Ok(None) => {
            if !state.converter.is_finished() {
                state.pending.extend(state.converter.force_stop());
            }
            state.finished = true;
        }
        Err(_elapsed) => {
            error!("OpenAI upstream SSE stream timed out (idle > 60s)");
            state.pending.extend(state.converter.force_stop());
            state.finished = true;
        }
    }
}

/// Builds an OpenAI Chat Completions SSE response out of the
/// (always-streaming) Antigravity upstream call, terminated with the
/// protocol's literal `data: [DONE]` frame.
pub fn build_openai_chat_stream_response(
    upstream_resp: reqwest::Response,
    model: String,
) -> impl IntoResponse {
    let raw = upstream_resp.bytes_stream().eventsource();
    let created = Utc::now().timestamp().max(0) as u64;
    let state = OpenaiStreamState {
        raw,
        converter: GeminiToOpenaiConverter::new(model, created),
        pending: VecDeque::new(),
        finished: false,
        done_sent: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((openai_chunk_to_sse(&chunk), state));
            }
            if state.finished {
                if state.done_sent {
                    return None;
                }
                state.done_sent = true;
                return Some((Event::default().data(DONE_MARKER), state));
            }
            advance(&mut state).await;
        }
    });

    Sse::new(stream.map(Ok::<Event, Infallible>)).keep_alive(KeepAlive::default())
}

/// Drives the same Antigravity SSE stream to completion without surfacing
/// individual chunks, for a client that asked for a non-streaming response.
pub async fn build_openai_chat_json_response(
    upstream_resp: reqwest::Response,
    model: String,
) -> Result<Json<ChatCompletionResponse>, ProxyError> {
    let raw = upstream_resp.bytes_stream().eventsource();
    let created = Utc::now().timestamp().max(0) as u64;
    let mut state = OpenaiStreamState {
        raw,
        converter: GeminiToOpenaiConverter::new(model, created),
        pending: VecDeque::new(),
        finished: false,
        done_sent: false,
    };

    while !state.finished {
        state.pending.clear();
        advance(&mut state).await;
    }

    Ok(Json(state.converter.accumulated_response()))
}
