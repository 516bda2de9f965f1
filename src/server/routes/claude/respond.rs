use crate::error::ProxyError;
use crate::providers::antigravity::{GeminiToClaudeConverter, parse_error_event};
use axum::Json;
use axum::response::{
    IntoResponse,
    sse::{Event, KeepAlive, Sse},
};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt as _};
use pollux_schema::antigravity::AntigravityResponseBody;
use pollux_schema::claude::{ClaudeMessagesResponse, ClaudeStreamEvent};
use pollux_schema::gemini::GeminiResponseBody;
use pollux_thoughtsig_core::{SignatureCache, model_family};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

fn claude_event_to_sse(event: &ClaudeStreamEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .json_data(event)
        .unwrap_or_else(|err| {
            warn!("failed to serialize Claude stream event: {err}");
            Event::default().event("error").data("{}")
        })
}

struct ClaudeStreamState<S> {
    raw: S,
    converter: GeminiToClaudeConverter,
    sig_cache: Arc<SignatureCache>,
    model_family: String,
    pending: VecDeque<ClaudeStreamEvent>,
    finished: bool,
}

/// Pulls the next batch of Claude SSE events out of the upstream Antigravity
/// stream, driving `force_stop` on disconnect, parse failure, or idle
/// timeout so the state machine always reaches a terminal event.
async fn advance<S, E>(state: &mut ClaudeStreamState<S>)
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
                    let events =
                        state
                            .converter
                            .handle_chunk(&chunk, &state.sig_cache, &state.model_family);
                    state.pending.extend(events);
                    if state.converter.is_finished() {
                        state.finished = true;
                    }
                }
                Err(_) => {
                    warn!(
                        "Skipping invalid Claude-facing SSE JSON data: {:.50}...",
                        upstream_event.data
                    );
                    state.pending.push_back(parse_error_event(&upstream_event.data));
                }
            }
        }
        Ok(Some(Err(err))) => {
            warn!("Claude upstream SSE stream error: {err}");
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
            error!("Claude upstream SSE stream timed out (idle > 60s)");
            state.pending.extend(state.converter.force_stop());
            state.finished = true;
        }
    }
}

/// Builds a Claude Messages SSE response out of the (always-streaming)
/// Antigravity upstream call, sniffing/rewriting thought signatures along
/// the way via `sig_cache`.
pub fn build_claude_stream_response(
    upstream_resp: reqwest::Response,
    model: String,
    sig_cache: Arc<SignatureCache>,
) -> impl IntoResponse {
    let raw = upstream_resp.bytes_stream().eventsource();
    let model_family = model_family(&model);
    let state = ClaudeStreamState {
        raw,
        converter: GeminiToClaudeConverter::new(model),
        sig_cache,
        model_family,
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((claude_event_to_sse(&event), state));
            }
            if state.finished {
                return None;
            }
            advance(&mut state).await;
        }
    });

    Sse::new(stream.map(Ok::<Event, Infallible>)).keep_alive(KeepAlive::default())
}

/// Drives the same Antigravity SSE stream to completion without surfacing
/// individual events, for a client that asked for a non-streaming response
/// (spec.md §4.1.9's internal streaming promotion).
pub async fn build_claude_json_response(
    upstream_resp: reqwest::Response,
    model: String,
    sig_cache: Arc<SignatureCache>,
) -> Result<Json<ClaudeMessagesResponse>, ProxyError> {
    let raw = upstream_resp.bytes_stream().eventsource();
    let model_family = model_family(&model);
    let mut state = ClaudeStreamState {
        raw,
        converter: GeminiToClaudeConverter::new(model),
        sig_cache,
        model_family,
        pending: VecDeque::new(),
        finished: false,
    };

    while !state.finished {
        state.pending.clear();
        advance(&mut state).await;
    }

    Ok(Json(state.converter.accumulated_response().clone()))
}
