use crate::config::{
    AntigravityResolvedConfig, CodexResolvedConfig, Config, GeminiCliResolvedConfig,
};
use crate::cooldown::CooldownManager;
use crate::db::DbActorHandle;
use crate::executor::Executor;
use crate::providers::antigravity::AntigravityActorHandle;
use crate::providers::antigravity::AntigravityThoughtSigService;
use crate::providers::codex::CodexActorHandle;
use crate::providers::geminicli::{GeminiCliActorHandle, GeminiThoughtSigService};
use crate::routing::{RouteTable, Router};
use pollux_thoughtsig_core::SignatureCache;
use std::sync::Arc;
use tracing::info;

/// Aggregates handles for all enabled providers.
///
/// Keep this as a simple struct (vs. a dynamic registry) to preserve
/// compile-time ergonomics and avoid over-abstracting too early.
#[derive(Clone)]
pub struct Providers {
    pub geminicli: GeminiCliActorHandle,
    pub geminicli_cfg: Arc<GeminiCliResolvedConfig>,
    pub geminicli_thoughtsig: GeminiThoughtSigService,
    pub codex: CodexActorHandle,
    pub codex_cfg: Arc<CodexResolvedConfig>,
    pub antigravity: AntigravityActorHandle,
    pub antigravity_cfg: Arc<AntigravityResolvedConfig>,
    pub antigravity_thoughtsig: AntigravityThoughtSigService,

    /// Process-wide cooldown tracking shared by the [`Router`] and
    /// [`Executor`] (spec.md §4.3/§4.4/§4.5). Not itself provider-specific,
    /// but constructed here alongside the provider handles since it needs
    /// the same `DbActorHandle` for persistence.
    pub cooldowns: Arc<CooldownManager>,
    /// Drives the Claude Messages route (currently the only ingress wired
    /// through the router/executor rather than calling a provider client
    /// directly).
    pub claude_executor: Arc<Executor>,
    /// Claude `tool_use`-id-keyed thought-signature cache, distinct from
    /// `antigravity_thoughtsig`'s content-hash-keyed engine (see
    /// `pollux_thoughtsig_core::SignatureCache`'s module doc).
    pub claude_sig_cache: Arc<SignatureCache>,
}

impl Providers {
    pub async fn spawn(db: DbActorHandle, cfg: &Config) -> Self {
        let provider_defaults = &cfg.providers.defaults;
        let geminicli_cfg = Arc::new(cfg.geminicli());
        let codex_cfg = Arc::new(cfg.codex());
        let antigravity_cfg = Arc::new(cfg.antigravity());

        // Log resolved provider configs here so `main` stays wiring-only.
        info!(
            providers_defaults_proxy = %provider_defaults.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
            providers_defaults_enable_multiplexing = provider_defaults.enable_multiplexing,
            providers_defaults_retry_max_times = provider_defaults.retry_max_times,
            "Provider defaults loaded"
        );
        info!(
            geminicli_proxy = %geminicli_cfg.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
            geminicli_enable_multiplexing = geminicli_cfg.enable_multiplexing,
            geminicli_retry_max_times = geminicli_cfg.retry_max_times,
            geminicli_oauth_tps = geminicli_cfg.oauth_tps,
            geminicli_model_list = ?geminicli_cfg.model_list,
            "Gemini CLI config (effective)"
        );

        info!(
            codex_proxy = %codex_cfg.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
            codex_enable_multiplexing = codex_cfg.enable_multiplexing,
            codex_retry_max_times = codex_cfg.retry_max_times,
            codex_oauth_tps = codex_cfg.oauth_tps,
            codex_responses_url = %crate::providers::codex::CODEX_RESPONSES_URL.as_str(),
            codex_model_list = ?codex_cfg.model_list,
            "Codex config (effective)"
        );

        info!(
            antigravity_api_url = %antigravity_cfg.api_url.as_str(),
            antigravity_proxy = %antigravity_cfg.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
            antigravity_enable_multiplexing = antigravity_cfg.enable_multiplexing,
            antigravity_retry_max_times = antigravity_cfg.retry_max_times,
            antigravity_oauth_tps = antigravity_cfg.oauth_tps,
            antigravity_model_list = ?antigravity_cfg.model_list,
            "Antigravity config (effective)"
        );

        let geminicli = crate::providers::geminicli::spawn(db.clone(), geminicli_cfg.clone()).await;
        let geminicli_thoughtsig = GeminiThoughtSigService::new();
        let codex = crate::providers::codex::spawn(db.clone(), codex_cfg.clone()).await;

        let cooldowns = Arc::new(CooldownManager::new(db.clone()));
        cooldowns.seed_from_db().await;
        let route_table = RouteTable::from_providers_config(&cfg.providers);
        let router = Router::new(route_table, cooldowns.clone());
        let claude_executor = Arc::new(Executor::new(
            router,
            cooldowns.clone(),
            provider_defaults.retry_max_times,
        ));
        let claude_sig_cache = Arc::new(SignatureCache::default());

        let antigravity = crate::providers::antigravity::spawn(db, antigravity_cfg.clone()).await;
        let antigravity_thoughtsig = AntigravityThoughtSigService::new();

        Self {
            geminicli,
            geminicli_cfg,
            geminicli_thoughtsig,
            codex,
            codex_cfg,
            antigravity,
            antigravity_cfg,
            antigravity_thoughtsig,
            cooldowns,
            claude_executor,
            claude_sig_cache,
        }
    }
}
