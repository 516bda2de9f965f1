//! Router (spec.md §4.4): resolves `(clientType, requestPath, requestedModel)`
//! to an ordered list of provider-id candidates, filtering out anything
//! currently in cooldown for that client type.
//!
//! The route table is static and seeded from [`ProvidersConfig`] at startup
//! rather than loaded from a database — this crate wires one upstream
//! (Antigravity) behind every ingress protocol, so there is no admin surface
//! for adding routes at runtime yet (spec.md's Non-goals exclude a
//! multi-tenant route editor).

use crate::config::ProvidersConfig;
use crate::cooldown::CooldownManager;
use crate::error::ProxyError;
use std::sync::Arc;

/// A single routing rule: requests matching `path_prefix` (and, if set, a
/// specific `client_type`) are dispatched to `provider_ids` in order.
#[derive(Debug, Clone)]
pub struct Route {
    pub path_prefix: &'static str,
    pub client_type: &'static str,
    pub provider_ids: Vec<String>,
}

/// Static, in-process route table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Builds the route table from resolved provider configuration. Every
    /// ingress protocol this crate serves (`claude`, `openai`, `gemini`)
    /// currently resolves to the single Antigravity upstream, but the table
    /// keeps each protocol as its own `Route` so additional upstreams can be
    /// appended per protocol without touching callers.
    pub fn from_providers_config(_cfg: &ProvidersConfig) -> Self {
        let antigravity = vec!["antigravity".to_string()];
        Self {
            routes: vec![
                Route {
                    path_prefix: "/v1/messages",
                    client_type: "claude",
                    provider_ids: antigravity.clone(),
                },
                Route {
                    path_prefix: "/v1/chat/completions",
                    client_type: "openai",
                    provider_ids: antigravity.clone(),
                },
                Route {
                    path_prefix: "/v1/responses",
                    client_type: "codex",
                    provider_ids: antigravity.clone(),
                },
                Route {
                    path_prefix: "/responses",
                    client_type: "codex",
                    provider_ids: antigravity.clone(),
                },
                Route {
                    path_prefix: "/antigravity",
                    client_type: "gemini",
                    provider_ids: antigravity,
                },
            ],
        }
    }

    fn find(&self, client_type: &str, request_path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|r| r.client_type == client_type && request_path.starts_with(r.path_prefix))
            .max_by_key(|r| r.path_prefix.len())
    }
}

/// Resolves candidate provider lists from a [`RouteTable`], filtering out
/// providers currently in cooldown for the requesting client type.
pub struct Router {
    table: RouteTable,
    cooldowns: Arc<CooldownManager>,
}

impl Router {
    pub fn new(table: RouteTable, cooldowns: Arc<CooldownManager>) -> Self {
        Self { table, cooldowns }
    }

    /// Resolves the ordered, cooldown-filtered candidate list for a
    /// request. Returns [`crate::error::ProxyErrorKind::NoEligibleProvider`]
    /// if the route has no match, or every matching provider is cooled
    /// down.
    pub async fn candidates(
        &self,
        client_type: &str,
        request_path: &str,
        _requested_model: &str,
    ) -> Result<Vec<String>, ProxyError> {
        let route = self
            .table
            .find(client_type, request_path)
            .ok_or_else(ProxyError::no_eligible_provider)?;

        let mut candidates = Vec::with_capacity(route.provider_ids.len());
        for provider_id in &route.provider_ids {
            if !self.cooldowns.is_in_cooldown(provider_id, client_type).await {
                candidates.push(provider_id.clone());
            }
        }

        if candidates.is_empty() {
            return Err(ProxyError::no_eligible_provider());
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::CooldownReason;

    async fn router() -> Router {
        let db = crate::db::spawn("sqlite::memory:").await;
        let cooldowns = Arc::new(CooldownManager::new(db));
        let table = RouteTable::from_providers_config(&ProvidersConfig::default());
        Router::new(table, cooldowns)
    }

    #[tokio::test]
    async fn resolves_known_route_to_its_provider() {
        let router = router().await;
        let candidates = router
            .candidates("claude", "/v1/messages", "claude-sonnet-4-5")
            .await
            .unwrap();
        assert_eq!(candidates, vec!["antigravity".to_string()]);
    }

    #[tokio::test]
    async fn unknown_path_yields_no_eligible_provider() {
        let router = router().await;
        let err = router
            .candidates("claude", "/v1/unknown", "claude-sonnet-4-5")
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ProxyErrorKind::NoEligibleProvider);
    }

    #[tokio::test]
    async fn cooled_down_provider_is_filtered_out() {
        let db = crate::db::spawn("sqlite::memory:").await;
        let cooldowns = Arc::new(CooldownManager::new(db));
        cooldowns
            .record_failure("antigravity", "claude", CooldownReason::ServerError, None)
            .await;
        let table = RouteTable::from_providers_config(&ProvidersConfig::default());
        let router = Router::new(table, cooldowns);

        let err = router
            .candidates("claude", "/v1/messages", "claude-sonnet-4-5")
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ProxyErrorKind::NoEligibleProvider);
    }

    #[tokio::test]
    async fn nested_path_prefers_longest_matching_route() {
        let db = crate::db::spawn("sqlite::memory:").await;
        let cooldowns = Arc::new(CooldownManager::new(db));
        let table = RouteTable::from_providers_config(&ProvidersConfig::default());
        let router = Router::new(table, cooldowns);

        let candidates = router
            .candidates("gemini", "/antigravity/v1beta/models/gemini-2.5-pro", "gemini-2.5-pro")
            .await
            .unwrap();
        assert_eq!(candidates, vec!["antigravity".to_string()]);
    }
}
