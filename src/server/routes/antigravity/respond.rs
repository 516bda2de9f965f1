use crate::error::GeminiCliError;
use crate::server::router::PolluxState;
use axum::{
    Json,
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use eventsource_stream::Eventsource;
use futures::{Stream, TryStreamExt};
use pollux_schema::{antigravity::AntigravityResponseBody, gemini::GeminiResponseBody};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{error, warn};

/// Build JSON response from an Antigravity upstream response, sniffing thought signatures
/// along the way so future requests can reuse them.
pub async fn build_json_response(
    upstream_resp: reqwest::Response,
    state: &PolluxState,
) -> Result<(StatusCode, Json<GeminiResponseBody>), GeminiCliError> {
    let status = upstream_resp.status();
    let envelope = upstream_resp.json::<AntigravityResponseBody>().await?;
    let response_body: GeminiResponseBody = envelope.into();

    let mut sniffer = state.providers.antigravity_thoughtsig.build_sniffer();
    state
        .providers
        .antigravity_thoughtsig
        .sniff_response(&response_body, &mut sniffer);

    Ok((status, Json(response_body)))
}

/// Build SSE stream response with idle timeout and thought-signature sniffing.
pub fn build_stream_response(upstream_resp: reqwest::Response, state: PolluxState) -> impl IntoResponse {
    let raw_stream = upstream_resp.bytes_stream().eventsource();
    let sniffer = state.providers.antigravity_thoughtsig.build_sniffer();
    let thoughtsig = state.providers.antigravity_thoughtsig.clone();
    let timed_stream = transform_stream(raw_stream, thoughtsig, sniffer)
        .timeout(Duration::from_secs(60))
        .map(|item| match item {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(e)) => Err(GeminiCliError::StreamProtocolError(e.to_string())),
            Err(_) => {
                error!("Upstream SSE stream timed out (idle > 60s)");
                Err(GeminiCliError::StreamProtocolError(
                    "Stream idle timeout".to_string(),
                ))
            }
        });

    Sse::new(timed_stream).keep_alive(KeepAlive::default())
}

/// Convert upstream SSE events carrying Antigravity envelopes into SSE `Event`s for clients,
/// sniffing each chunk for thought signatures as it passes through.
fn transform_stream<I, E>(
    s: I,
    thoughtsig: crate::providers::antigravity::AntigravityThoughtSigService,
    sniffer: pollux_thoughtsig_core::SignatureSniffer,
) -> impl Stream<Item = Result<Event, E>>
where
    I: Stream<Item = Result<eventsource_stream::Event, E>>,
{
    let sniffer = Arc::new(Mutex::new(sniffer));
    s.try_filter_map(move |upstream_event| {
        let thoughtsig = thoughtsig.clone();
        let sniffer = sniffer.clone();
        async move {
            if upstream_event.data.is_empty() {
                return Ok(None);
            }

            let Ok(envelope) = serde_json::from_str::<AntigravityResponseBody>(&upstream_event.data)
            else {
                warn!(
                    "Skipping invalid SSE JSON data: {:.50}...",
                    upstream_event.data
                );
                return Ok(None);
            };
            let gemini_resp: GeminiResponseBody = envelope.into();
            thoughtsig.sniff_response(&gemini_resp, &mut sniffer.lock().expect("sniffer mutex poisoned"));

            match Event::default().json_data(gemini_resp) {
                Ok(ev) => Ok(Some(ev)),
                Err(e) => {
                    warn!("Failed to serialize GeminiResponse: {}", e);
                    Ok(None)
                }
            }
        }
    })
}
