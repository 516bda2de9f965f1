use crate::adapter::envelope::clean_inner_request;
use crate::config::AntigravityResolvedConfig;
use crate::error::{GeminiCliErrorBody, IsRetryable, PolluxError};
use crate::providers::antigravity::AntigravityActorHandle;
use crate::providers::policy::{classify_upstream_error, classify_upstream_error_bytes};
use crate::providers::provider_endpoints::ProviderEndpoints;
use crate::providers::upstream_retry::post_json_with_retry;
use crate::utils::logging::with_pretty_json_debug;
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use pollux_schema::{
    antigravity::AntigravityRequestMeta, gemini::GeminiGenerateContentRequest,
    gemini::GenerationConfig,
};
use rand::Rng as _;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

const REQUEST_ID_PREFIX: &str = "agent";
const SESSION_ID_MAX_EXCLUSIVE: i64 = 9_000_000_000_000_000_000;
const CLAUDE_THINKING_BUDGET: u32 = 8096;

#[derive(Debug, Clone)]
pub struct AntigravityContext {
    pub model: String,
    pub stream: bool,
    pub path: String,
    pub model_mask: u64,
    /// One of `agent` / `web_search` / `image_gen`, resolved per-request by
    /// `adapter::request_type::resolve`. Callers that never resolve a
    /// request type (e.g. the raw Gemini passthrough route) pass
    /// `AntigravityRequestBody::REQUEST_TYPE` (`"agent"`) directly.
    pub request_type: String,
}

pub struct AntigravityClient {
    client: reqwest::Client,
    retry_policy: ExponentialBuilder,
    endpoints: ProviderEndpoints,
    fallback_endpoints: ProviderEndpoints,
    safety_threshold: String,
}

/// Upstream statuses that trigger a same-request fallback to the secondary
/// base URL rather than simply bubbling up (spec.md §4.1.9).
fn is_fallback_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::NOT_FOUND
    ) || status.is_server_error()
}

/// A 400 body mentioning a broken thought signature gets exactly one
/// recovery retry with every `thoughtSignature` stripped from the request,
/// rather than being surfaced to the caller (spec.md §4.1.11).
fn is_signature_failure_body(body: &str) -> bool {
    const SIGNATURE_FAILURE_MARKERS: &[&str] = &[
        "invalid signature",
        "signature is invalid",
        "thinking.signature",
        "thinking.thinking",
        "corrupted thought signature",
        "failed to deserialise",
    ];
    let lower = body.to_ascii_lowercase();
    SIGNATURE_FAILURE_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn strip_thought_signatures(request: &mut GeminiGenerateContentRequest) {
    for content in request.contents.iter_mut() {
        for part in content.parts.iter_mut() {
            *part.thought_signature_mut() = None;
        }
    }
}

impl AntigravityClient {
    /// `base_url_override` lets callers pin a single explicit base (tests,
    /// or a future admin override); `None` uses `cfg.api_url`/
    /// `cfg.fallback_api_url` in order.
    pub fn new(
        cfg: &AntigravityResolvedConfig,
        client: reqwest::Client,
        base_url_override: Option<Url>,
    ) -> Self {
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300))
            .with_max_times(cfg.retry_max_times)
            .with_jitter();

        let (primary_base, fallback_base) = match base_url_override {
            Some(base) => (base.clone(), base),
            None => (cfg.api_url.clone(), cfg.fallback_api_url.clone()),
        };

        Self {
            client,
            retry_policy,
            endpoints: Self::endpoints_for_base(primary_base),
            fallback_endpoints: Self::endpoints_for_base(fallback_base),
            safety_threshold: cfg.safety_threshold.clone(),
        }
    }

    fn endpoints_for_base(base: Url) -> ProviderEndpoints {
        ProviderEndpoints::new(
            base,
            "/v1internal:streamGenerateContent",
            Some("alt=sse"),
            "/v1internal:generateContent",
            None,
        )
    }

    pub async fn call_antigravity(
        &self,
        handle: &AntigravityActorHandle,
        ctx: &AntigravityContext,
        body: &GeminiGenerateContentRequest,
    ) -> Result<reqwest::Response, PolluxError> {
        let handle = handle.clone();
        let client = self.client.clone();
        let endpoint_urls = [
            self.endpoints.select(ctx.stream).clone(),
            self.fallback_endpoints.select(ctx.stream).clone(),
        ];
        let safety_threshold = self.safety_threshold.clone();
        let stream = ctx.stream;
        let model = ctx.model.clone();
        let model_mask = ctx.model_mask;
        let path = ctx.path.clone();
        let request_type = ctx.request_type.clone();
        let gemini_request = body.clone();

        let op = {
            let gemini_request = gemini_request.clone();
            move || {
                let handle = handle.clone();
                let client = client.clone();
                let endpoint_urls = endpoint_urls.clone();
                let safety_threshold = safety_threshold.clone();
                let gemini_request = gemini_request.clone();
                let model = model.clone();
                let path = path.clone();
                let request_type = request_type.clone();
                async move {
                    let start = Instant::now();
                    let assigned = handle
                        .get_credential(model_mask)
                        .await?
                        .ok_or(PolluxError::NoAvailableCredential)?;

                    let actor_took = start.elapsed();
                    info!(
                        channel = "antigravity",
                        lease.id = assigned.id,
                        lease.waited_us = actor_took.as_micros() as u64,
                        req.model = %model,
                        req.stream = stream,
                        req.path = %path,
                        "[Antigravity] [ID: {}] [{:?}] Post -> {}",
                        assigned.id,
                        actor_took,
                        model
                    );

                    let mut meta = AntigravityRequestMeta::new(
                        assigned.project_id.clone(),
                        Self::generate_request_id(),
                        model.clone(),
                    );
                    meta.request_type = request_type.clone();
                    let mut payload = meta.into_request(gemini_request.clone());

                    Self::apply_claude_thinking_defaults(model.as_str(), &mut payload.request);

                    payload.prepend_system_instruction(crate::config::CLAUDE_SYSTEM_PREAMBLE);

                    clean_inner_request(&mut payload.request, &safety_threshold);
                    payload
                        .request
                        .extra
                        .entry("sessionId".to_string())
                        .or_insert_with(|| {
                            serde_json::Value::String(Self::generate_session_id())
                        });

                    with_pretty_json_debug(&payload, |pretty_payload| {
                        debug!(
                            channel = "antigravity",
                            lease.id = assigned.id,
                            req.model = %model,
                            req.stream = stream,
                            req.path = %path,
                            body = %pretty_payload,
                            "[Antigravity] Prepared upstream payload"
                        );
                    });

                    let headers = Self::headers(assigned.access_token.as_str());
                    let mut last_err: Option<PolluxError> = None;
                    let mut signature_recovery_attempted = false;
                    let mut idx = 0usize;

                    while idx < endpoint_urls.len() {
                        let url = &endpoint_urls[idx];
                        let is_last = idx + 1 == endpoint_urls.len();
                        let resp = post_json_with_retry(
                            "Antigravity",
                            &client,
                            url,
                            Some(headers.clone()),
                            &payload,
                        )
                        .await?;

                        if resp.status().is_success() {
                            return Ok(resp);
                        }

                        let status = resp.status();

                        let (action, final_error) = if status == StatusCode::BAD_REQUEST
                            && !signature_recovery_attempted
                        {
                            let bytes = resp.bytes().await.unwrap_or_default();
                            if is_signature_failure_body(&String::from_utf8_lossy(&bytes)) {
                                signature_recovery_attempted = true;
                                strip_thought_signatures(&mut payload.request);
                                warn!(
                                    lease_id = assigned.id,
                                    url = %url,
                                    "[Antigravity] Signature failure, retrying once with signatures stripped"
                                );
                                continue;
                            }
                            classify_upstream_error_bytes(
                                status,
                                &bytes,
                                |_json: GeminiCliErrorBody| PolluxError::UpstreamStatus(status),
                                |status, _body| PolluxError::UpstreamStatus(status),
                            )
                        } else {
                            classify_upstream_error(
                                resp,
                                |_json: GeminiCliErrorBody| PolluxError::UpstreamStatus(status),
                                |status, _body| PolluxError::UpstreamStatus(status),
                            )
                            .await
                        };

                        match &action {
                            crate::providers::ActionForError::RateLimit(duration) => {
                                handle
                                    .report_rate_limit(assigned.id, model_mask, *duration)
                                    .await;
                                info!(
                                    "Project: {}, rate limited, retry in {:?}",
                                    assigned.project_id, duration
                                );
                            }
                            crate::providers::ActionForError::Ban => {
                                handle.report_baned(assigned.id).await;
                                info!("Project: {}, banned", assigned.project_id);
                            }
                            crate::providers::ActionForError::ModelUnsupported => {
                                handle
                                    .report_model_unsupported(assigned.id, model_mask)
                                    .await;
                                info!("Project: {}, model unsupported", assigned.project_id);
                            }
                            crate::providers::ActionForError::Invalid => {
                                handle.report_invalid(assigned.id).await;
                                info!("Project: {}, invalid", assigned.project_id);
                            }
                            crate::providers::ActionForError::None => {}
                        }

                        warn!(
                            lease_id = assigned.id,
                            model = %model,
                            status = %status,
                            action = ?action,
                            url = %url,
                            "[Antigravity] Upstream error"
                        );

                        if is_last || !is_fallback_status(status) {
                            return Err(final_error);
                        }

                        info!(
                            lease_id = assigned.id,
                            status = %status,
                            "[Antigravity] Falling back to secondary base URL"
                        );
                        last_err = Some(final_error);
                        idx += 1;
                    }

                    Err(last_err.unwrap_or(PolluxError::NoAvailableCredential))
                }
            }
        };

        op.retry(&self.retry_policy)
            .when(|err: &PolluxError| err.is_retryable())
            .notify(|err, dur: Duration| {
                error!(
                    "[Antigravity] Upstream Error {} retry after {:?}",
                    err.to_string(),
                    dur
                );
            })
            .await
    }

    fn headers(access_token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .expect("invalid fixed auth header value"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("antigravity"));
        headers
    }

    fn request_id_from_parts(timestamp_ms: i64, request_uuid: Uuid) -> String {
        format!("{REQUEST_ID_PREFIX}/{timestamp_ms}/{request_uuid}")
    }

    fn generate_request_id() -> String {
        Self::request_id_from_parts(Utc::now().timestamp_millis(), Uuid::new_v4())
    }

    fn session_id_from_int(value: i64) -> String {
        format!("-{value}")
    }

    fn generate_session_id() -> String {
        let value = rand::rng().random_range(0..SESSION_ID_MAX_EXCLUSIVE);
        Self::session_id_from_int(value)
    }

    fn apply_claude_thinking_defaults(model: &str, request: &mut GeminiGenerateContentRequest) {
        if !model.starts_with("claude") {
            return;
        }

        let gen_config = request
            .generation_config
            .get_or_insert_with(GenerationConfig::default);

        if gen_config.thinking_config.is_none() {
            gen_config.thinking_config = Some(json!({
                "includeThoughts": true,
                "thinkingBudget": CLAUDE_THINKING_BUDGET,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_id_uses_agent_timestamp_uuid_shape() {
        let id = AntigravityClient::request_id_from_parts(
            1234,
            Uuid::parse_str("00000000-0000-4000-8000-000000000000").unwrap(),
        );
        assert_eq!(id, "agent/1234/00000000-0000-4000-8000-000000000000");
    }

    #[test]
    fn endpoints_use_expected_literals() {
        let endpoints = AntigravityClient::endpoints_for_base(
            Url::parse("https://cloudcode-pa.googleapis.com").unwrap(),
        );
        assert_eq!(
            endpoints.select(false).as_str(),
            "https://cloudcode-pa.googleapis.com/v1internal:generateContent"
        );
        assert_eq!(
            endpoints.select(true).as_str(),
            "https://cloudcode-pa.googleapis.com/v1internal:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn signature_failure_body_detected_case_insensitively() {
        assert!(is_signature_failure_body(
            "{\"error\":{\"message\":\"Invalid Signature for thought part\"}}"
        ));
        assert!(is_signature_failure_body("signature is invalid for this turn"));
        assert!(is_signature_failure_body("{\"error\":{\"message\":\"thinking.signature: invalid\"}}"));
        assert!(is_signature_failure_body("{\"error\":{\"message\":\"THINKING.THINKING field missing\"}}"));
        assert!(is_signature_failure_body(
            "{\"error\":{\"message\":\"Corrupted Thought Signature detected\"}}"
        ));
        assert!(is_signature_failure_body(
            "{\"error\":{\"message\":\"Failed to deserialise request\"}}"
        ));
        assert!(!is_signature_failure_body("{\"error\":{\"message\":\"bad request\"}}"));
    }

    #[test]
    fn strip_thought_signatures_clears_all_parts() {
        let mut request: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [{
                "role": "model",
                "parts": [
                    {"thought": true, "thoughtSignature": "abc"},
                    {"text": "hi"}
                ]
            }]
        }))
        .expect("request must parse");

        strip_thought_signatures(&mut request);

        for part in &request.contents[0].parts {
            assert!(part.thought_signature.is_none());
        }
    }

    #[test]
    fn fallback_status_covers_429_408_404_and_5xx() {
        assert!(is_fallback_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_fallback_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_fallback_status(StatusCode::NOT_FOUND));
        assert!(is_fallback_status(StatusCode::BAD_GATEWAY));
        assert!(!is_fallback_status(StatusCode::BAD_REQUEST));
        assert!(!is_fallback_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn session_id_is_negative_decimal_string() {
        assert_eq!(AntigravityClient::session_id_from_int(42), "-42");
        assert_eq!(AntigravityClient::session_id_from_int(0), "-0");
    }

    #[test]
    fn claude_requests_get_default_thinking_config_when_missing() {
        let mut request: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "hello"}]}]
        }))
        .expect("request must parse");

        AntigravityClient::apply_claude_thinking_defaults(
            "claude-sonnet-4-5-thinking",
            &mut request,
        );

        assert_eq!(
            request
                .generation_config
                .as_ref()
                .and_then(|cfg| cfg.thinking_config.as_ref()),
            Some(&json!({
                "includeThoughts": true,
                "thinkingBudget": CLAUDE_THINKING_BUDGET,
            }))
        );
    }

    #[test]
    fn claude_requests_keep_existing_thinking_config() {
        let mut request: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "hello"}]}],
            "generationConfig": {
                "thinkingConfig": {
                    "includeThoughts": false,
                    "thinkingBudget": 2048
                }
            }
        }))
        .expect("request must parse");

        AntigravityClient::apply_claude_thinking_defaults(
            "claude-sonnet-4-5-thinking",
            &mut request,
        );

        assert_eq!(
            request
                .generation_config
                .as_ref()
                .and_then(|cfg| cfg.thinking_config.as_ref()),
            Some(&json!({
                "includeThoughts": false,
                "thinkingBudget": 2048
            }))
        );
    }

    #[test]
    fn non_claude_requests_do_not_get_thinking_config_default() {
        let request: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "hello"}]}]
        }))
        .expect("request must parse");

        let model = "gemini-2.5-pro";
        let mut request = request;
        AntigravityClient::apply_claude_thinking_defaults(model, &mut request);

        assert!(request.generation_config.is_none());
    }
}
