mod codex;
mod gemini;
mod oauth;
mod pollux;
mod proxy;

pub(crate) use codex::CodexError;
pub use gemini::{
    GeminiCliError, GeminiCliErrorBody, GeminiCliErrorObject, GeminiErrorBody, GeminiErrorObject,
};
pub use oauth::OauthError;
pub use pollux::{ApiErrorBody, ApiErrorObject, PolluxError};
pub use proxy::{ProxyError, ProxyErrorKind, UpstreamAttemptOutcome};

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
