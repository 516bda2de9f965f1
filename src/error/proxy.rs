use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error as ThisError;

use super::IsRetryable;
use super::pollux::{ApiErrorBody, ApiErrorObject, PolluxError};

/// Error taxonomy used by the executor, independent of which provider
/// adapter produced the underlying failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyErrorKind {
    /// TCP/TLS failure, 5xx, 408, 429.
    UpstreamError,
    /// JSON unmarshal failure, schema mismatch.
    FormatConversion,
    /// 400 with a signature-related message; retryable exactly once.
    SignatureFailure,
    /// 401; retryable exactly once, after a token refresh.
    AuthFailure,
    /// Context cancelled by the client.
    ClientDisconnect,
    /// 429 with `QUOTA_EXHAUSTED`; retryable, but cooldown is long.
    QuotaExhausted,
    /// The router returned an empty candidate list.
    NoEligibleProvider,
}

impl ProxyErrorKind {
    pub fn is_retryable(self) -> bool {
        match self {
            ProxyErrorKind::UpstreamError
            | ProxyErrorKind::SignatureFailure
            | ProxyErrorKind::AuthFailure
            | ProxyErrorKind::QuotaExhausted => true,
            ProxyErrorKind::FormatConversion
            | ProxyErrorKind::ClientDisconnect
            | ProxyErrorKind::NoEligibleProvider => false,
        }
    }
}

/// An error wrapped by the executor's error taxonomy: every underlying
/// adapter error carries a [`ProxyErrorKind`], a human message, and an
/// optional retry-after duration.
#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct ProxyError {
    pub kind: ProxyErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl ProxyError {
    pub fn new(kind: ProxyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ProxyErrorKind::UpstreamError, message)
    }

    pub fn format_conversion(message: impl Into<String>) -> Self {
        Self::new(ProxyErrorKind::FormatConversion, message)
    }

    pub fn no_eligible_provider() -> Self {
        Self::new(
            ProxyErrorKind::NoEligibleProvider,
            "no eligible provider: all candidates are in cooldown or unconfigured",
        )
    }

    pub fn client_disconnect() -> Self {
        Self::new(ProxyErrorKind::ClientDisconnect, "client disconnected")
    }
}

/// Classifies an existing provider-adapter error into the executor's
/// taxonomy. This is the seam spec.md §7 calls "the adapter wraps every
/// underlying error with the kind" — callers that have a finer-grained
/// classification (e.g. a parsed `Retry-After`) should build a
/// [`ProxyError`] directly instead of going through this generic mapping.
impl From<PolluxError> for ProxyError {
    fn from(err: PolluxError) -> Self {
        match &err {
            PolluxError::NoAvailableCredential => ProxyError::no_eligible_provider(),
            PolluxError::UpstreamStatus(status) if *status == StatusCode::UNAUTHORIZED => {
                ProxyError::new(ProxyErrorKind::AuthFailure, err.to_string())
            }
            PolluxError::UpstreamStatus(status) if *status == StatusCode::TOO_MANY_REQUESTS => {
                ProxyError::new(ProxyErrorKind::QuotaExhausted, err.to_string())
            }
            PolluxError::JsonError(_) => {
                ProxyError::new(ProxyErrorKind::FormatConversion, err.to_string())
            }
            _ => ProxyError::new(ProxyErrorKind::UpstreamError, err.to_string()),
        }
    }
}

impl IsRetryable for ProxyError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match self.kind {
            ProxyErrorKind::UpstreamError => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            ProxyErrorKind::FormatConversion => (StatusCode::BAD_REQUEST, "FORMAT_CONVERSION"),
            ProxyErrorKind::SignatureFailure => (StatusCode::BAD_GATEWAY, "SIGNATURE_FAILURE"),
            ProxyErrorKind::AuthFailure => (StatusCode::BAD_GATEWAY, "AUTH_FAILURE"),
            // 499 is nginx's convention for "client closed request"; axum has
            // no named constant so it's built from the raw code.
            ProxyErrorKind::ClientDisconnect => (
                StatusCode::from_u16(499).expect("499 is a valid status code"),
                "CLIENT_DISCONNECT",
            ),
            ProxyErrorKind::QuotaExhausted => {
                (StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXHAUSTED")
            }
            ProxyErrorKind::NoEligibleProvider => {
                (StatusCode::SERVICE_UNAVAILABLE, "NO_ELIGIBLE_PROVIDER")
            }
        };

        let body = ApiErrorBody {
            inner: ApiErrorObject {
                code: code.to_string(),
                message: self.message,
                details: None,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = retry_after.as_secs().to_string().parse() {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Request-scoped record of one provider attempt, kept in memory and
/// surfaced only via tracing (spec's data model keeps `ProxyRequest` /
/// `UpstreamAttempt` non-persisted).
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamAttemptOutcome {
    pub provider_id: String,
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub retryable: bool,
}

impl UpstreamAttemptOutcome {
    pub fn success(provider_id: impl Into<String>, status: u16) -> Self {
        Self {
            provider_id: provider_id.into(),
            status: Some(status),
            error_kind: None,
            retryable: false,
        }
    }

    pub fn failure(provider_id: impl Into<String>, error: &ProxyError) -> Self {
        Self {
            provider_id: provider_id.into(),
            status: None,
            error_kind: Some(kind_name(error.kind)),
            retryable: error.is_retryable(),
        }
    }
}

fn kind_name(kind: ProxyErrorKind) -> &'static str {
    match kind {
        ProxyErrorKind::UpstreamError => "upstream_error",
        ProxyErrorKind::FormatConversion => "format_conversion",
        ProxyErrorKind::SignatureFailure => "signature_failure",
        ProxyErrorKind::AuthFailure => "auth_failure",
        ProxyErrorKind::ClientDisconnect => "client_disconnect",
        ProxyErrorKind::QuotaExhausted => "quota_exhausted",
        ProxyErrorKind::NoEligibleProvider => "no_eligible_provider",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_matches_taxonomy_table() {
        assert!(ProxyErrorKind::UpstreamError.is_retryable());
        assert!(ProxyErrorKind::SignatureFailure.is_retryable());
        assert!(ProxyErrorKind::AuthFailure.is_retryable());
        assert!(ProxyErrorKind::QuotaExhausted.is_retryable());
        assert!(!ProxyErrorKind::FormatConversion.is_retryable());
        assert!(!ProxyErrorKind::ClientDisconnect.is_retryable());
        assert!(!ProxyErrorKind::NoEligibleProvider.is_retryable());
    }

    #[test]
    fn into_response_maps_status_codes() {
        let cases = [
            (ProxyErrorKind::UpstreamError, 502),
            (ProxyErrorKind::FormatConversion, 400),
            (ProxyErrorKind::ClientDisconnect, 499),
            (ProxyErrorKind::QuotaExhausted, 429),
            (ProxyErrorKind::NoEligibleProvider, 503),
        ];
        for (kind, expected) in cases {
            let err = ProxyError::new(kind, "boom");
            let resp = err.into_response();
            assert_eq!(resp.status().as_u16(), expected);
        }
    }

    #[test]
    fn quota_exhausted_carries_retry_after_header() {
        let err = ProxyError::new(ProxyErrorKind::QuotaExhausted, "exhausted")
            .with_retry_after(Duration::from_secs(90));
        let resp = err.into_response();
        assert_eq!(
            resp.headers()
                .get(axum::http::header::RETRY_AFTER)
                .unwrap(),
            "90"
        );
    }

    #[test]
    fn pollux_error_classification_maps_into_taxonomy() {
        let err: ProxyError = PolluxError::NoAvailableCredential.into();
        assert_eq!(err.kind, ProxyErrorKind::NoEligibleProvider);

        let err: ProxyError = PolluxError::UpstreamStatus(StatusCode::UNAUTHORIZED).into();
        assert_eq!(err.kind, ProxyErrorKind::AuthFailure);

        let err: ProxyError = PolluxError::UpstreamStatus(StatusCode::TOO_MANY_REQUESTS).into();
        assert_eq!(err.kind, ProxyErrorKind::QuotaExhausted);

        let err: ProxyError = PolluxError::UpstreamStatus(StatusCode::BAD_GATEWAY).into();
        assert_eq!(err.kind, ProxyErrorKind::UpstreamError);
    }

    #[test]
    fn attempt_outcome_reports_retryability() {
        let err = ProxyError::new(ProxyErrorKind::UpstreamError, "timeout");
        let outcome = UpstreamAttemptOutcome::failure("antigravity", &err);
        assert!(outcome.retryable);
        assert_eq!(outcome.error_kind, Some("upstream_error"));
    }
}
