use super::{
    extract::ClaudePreprocess,
    respond::{build_claude_json_response, build_claude_stream_response},
};
use crate::error::ProxyError;
use crate::executor::ProxyRequest;
use crate::providers::antigravity::{AntigravityClient, AntigravityContext, transform_claude_request};
use crate::server::router::PolluxState;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
};

const CLIENT_TYPE: &str = "claude";
const ROUTE_PATH: &str = "/v1/messages";

pub async fn claude_messages_handler(
    State(state): State<PolluxState>,
    ClaudePreprocess(req): ClaudePreprocess,
) -> Result<Response, ProxyError> {
    let sig_cache = state.providers.claude_sig_cache.clone();
    let outcome = transform_claude_request(&req, &sig_cache);
    let wants_stream = req.is_stream();

    let model_mask = crate::model_catalog::mask(&outcome.final_model).unwrap_or(0);
    let request_type = outcome.request_type.as_str().to_string();
    let gemini_request = outcome.gemini_request.clone();

    let proxy_request = ProxyRequest {
        client_type: CLIENT_TYPE.to_string(),
        path: ROUTE_PATH.to_string(),
        model: outcome.final_model.clone(),
    };

    let antigravity_cfg = state.providers.antigravity_cfg.clone();
    let antigravity_handle = state.providers.antigravity.clone();
    let antigravity_client = state.antigravity_client.clone();
    let final_model = outcome.final_model.clone();

    let upstream_resp = state
        .providers
        .claude_executor
        .execute(&proxy_request, move |provider_id| {
            let antigravity_cfg = antigravity_cfg.clone();
            let antigravity_handle = antigravity_handle.clone();
            let antigravity_client = antigravity_client.clone();
            let gemini_request = gemini_request.clone();
            let request_type = request_type.clone();
            let final_model = final_model.clone();
            async move {
                if provider_id != "antigravity" {
                    return Err(ProxyError::no_eligible_provider());
                }

                let caller = AntigravityClient::new(antigravity_cfg.as_ref(), antigravity_client, None);
                let ctx = AntigravityContext {
                    model: final_model,
                    // Always stream from Antigravity: non-streaming Claude
                    // requests are served by accumulating this same stream
                    // (see `build_claude_json_response`).
                    stream: true,
                    path: ROUTE_PATH.to_string(),
                    model_mask,
                    request_type,
                };
                caller
                    .call_antigravity(&antigravity_handle, &ctx, &gemini_request)
                    .await
                    .map_err(ProxyError::from)
            }
        })
        .await?;

    if wants_stream {
        Ok(build_claude_stream_response(upstream_resp, outcome.final_model, sig_cache).into_response())
    } else {
        Ok(build_claude_json_response(upstream_resp, outcome.final_model, sig_cache)
            .await?
            .into_response())
    }
}
