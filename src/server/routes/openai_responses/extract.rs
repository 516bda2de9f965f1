use crate::error::ProxyError;
use crate::server::router::PolluxState;
use crate::utils::logging::with_pretty_json_debug;
use axum::{Json, extract::FromRequest, extract::Request};
use pollux_schema::openai::OpenaiRequestBody;
use std::borrow::Borrow;
use tracing::debug;

pub struct OpenaiResponsesPreprocess(pub OpenaiRequestBody);

impl<S> FromRequest<S> for OpenaiResponsesPreprocess
where
    S: Send + Sync + Borrow<PolluxState>,
{
    type Rejection = ProxyError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<OpenaiRequestBody>::from_request(req, _state)
            .await
            .map_err(|rejection| ProxyError::format_conversion(rejection.to_string()))?;

        with_pretty_json_debug(&body, |pretty_body| {
            debug!(
                channel = "codex",
                req.model = %body.model,
                req.stream = body.stream,
                body = %pretty_body,
                "[Responses] Extracted request body"
            );
        });

        Ok(OpenaiResponsesPreprocess(body))
    }
}
