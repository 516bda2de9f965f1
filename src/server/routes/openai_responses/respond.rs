use crate::error::ProxyError;
use crate::providers::antigravity::{GeminiToResponsesConverter, ResponsesEvent};
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
use pollux_schema::openai::ResponsesBody;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{error, warn};

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

fn responses_event_to_sse(event: &ResponsesEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .json_data(event.to_json())
        .unwrap_or_else(|err| {
            warn!("failed to serialize Responses stream event: {err}");
            Event::default().event(event.event_name()).data("{}")
        })
}

struct ResponsesStreamState<S> {
    raw: S,
    converter: GeminiToResponsesConverter,
    pending: VecDeque<ResponsesEvent>,
    finished: bool,
}

async fn advance<S, E>(state: &mut ResponsesStreamState<S>)
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
                        "Skipping invalid Responses-facing SSE JSON data: {:.50}...",
                        upstream_event.data
                    );
                }
            }
        }
        Ok(Some(Err(err))) => {
            warn!("Responses upstream SSE stream error: {err}");
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
            error!("Responses upstream SSE stream timed out (idle > 60s)");
            state.pending.extend(state.converter.force_stop());
            state.finished = true;
        }
    }
}

/// Builds an OpenAI Responses API SSE response out of the (always-streaming)
/// Antigravity upstream call, terminated by the converter's own
/// `response.completed` event (the Responses API has no `[DONE]` marker).
pub fn build_responses_stream_response(
    upstream_resp: reqwest::Response,
    model: String,
) -> impl IntoResponse {
    let raw = upstream_resp.bytes_stream().eventsource();
    let created = Utc::now().timestamp().max(0) as u64;
    let state = ResponsesStreamState {
        raw,
        converter: GeminiToResponsesConverter::new(model, created),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((responses_event_to_sse(&event), state));
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
/// individual events, for a client that asked for a non-streaming response.
pub async fn build_responses_json_response(
    upstream_resp: reqwest::Response,
    model: String,
) -> Result<Json<ResponsesBody>, ProxyError> {
    let raw = upstream_resp.bytes_stream().eventsource();
    let created = Utc::now().timestamp().max(0) as u64;
    let mut state = ResponsesStreamState {
        raw,
        converter: GeminiToResponsesConverter::new(model, created),
        pending: VecDeque::new(),
        finished: false,
    };

    while !state.finished {
        state.pending.clear();
        advance(&mut state).await;
    }

    Ok(Json(state.converter.accumulated_response()))
}
