//! Two-layer signature cache serving the Claude-facing Gemini SSE converter.
//!
//! Distinct from `ThoughtSignatureEngine` (content-hash keyed, serves the
//! Gemini-native fast path): here the natural key on the way back to a
//! client is a Claude `tool_use` id, and the compatibility check needs the
//! model family a signature was minted under, not just its cache hit/miss.

use moka::sync::Cache;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Minimum signature length accepted into the cache at all (spec threshold).
pub const MIN_SIGNATURE_LENGTH: usize = 50;

const DEFAULT_TTL_SECS: u64 = 2 * 60 * 60;
const DEFAULT_MAX_CAPACITY: u64 = 1000;

/// Model family prefixes used for cross-model signature compatibility checks.
/// A signature minted under one family is never valid against another.
pub const MODEL_FAMILIES: &[&str] = &[
    "gemini-1.5",
    "gemini-2.0",
    "gemini-2.5",
    "gemini-3",
    "claude-3-5",
    "claude-3-7",
    "claude-4",
];

/// Classifies a model name into one of the known families, or falls back to
/// the raw (lowercased) name when no prefix matches.
pub fn model_family(model: &str) -> String {
    let lower = model.to_ascii_lowercase();
    for family in MODEL_FAMILIES {
        if lower.contains(family) {
            return (*family).to_string();
        }
    }
    lower
}

/// True iff a signature minted for `cached` model is acceptable to send to `target`.
pub fn is_model_compatible(cached: &str, target: &str) -> bool {
    if cached.eq_ignore_ascii_case(target) {
        return true;
    }
    let cached_family = model_family(cached);
    let target_family = model_family(target);
    cached_family == target_family
}

struct LastSeen {
    signature: Arc<str>,
    length: usize,
}

pub struct SignatureCache {
    by_tool_use_id: Cache<Arc<str>, Arc<str>>,
    model_family_by_signature: Cache<Arc<str>, Arc<str>>,
    last_seen: Mutex<Option<LastSeen>>,
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS, DEFAULT_MAX_CAPACITY)
    }
}

impl SignatureCache {
    pub fn new(ttl_secs: u64, max_capacity: u64) -> Self {
        let build = || {
            Cache::builder()
                .time_to_live(Duration::from_secs(ttl_secs.max(1)))
                .max_capacity(max_capacity.max(1))
                .build()
        };

        Self {
            by_tool_use_id: build(),
            model_family_by_signature: build(),
            last_seen: Mutex::new(None),
        }
    }

    /// Admits a `(toolUseId, signature, modelFamily)` observation. No-op if
    /// `signature` is shorter than `MIN_SIGNATURE_LENGTH`.
    pub fn observe(&self, tool_use_id: &str, signature: &str, model: &str) {
        if signature.len() < MIN_SIGNATURE_LENGTH {
            return;
        }

        let signature: Arc<str> = Arc::from(signature);
        self.by_tool_use_id
            .insert(Arc::from(tool_use_id), signature.clone());
        self.model_family_by_signature
            .insert(signature.clone(), Arc::from(model_family(model).as_str()));

        let mut last_seen = self.last_seen.lock().expect("signature cache mutex poisoned");
        let is_longer = last_seen
            .as_ref()
            .map(|entry| signature.len() > entry.length)
            .unwrap_or(true);
        if is_longer {
            *last_seen = Some(LastSeen {
                length: signature.len(),
                signature,
            });
        }
    }

    /// Admits a thinking-block signature observation that has no associated
    /// `toolUseId` (a reasoning block, not a tool call): updates the
    /// model-family layer and the longest-seen fallback, but not the
    /// `toolUseId` layer. No-op if `signature` is shorter than
    /// `MIN_SIGNATURE_LENGTH`.
    pub fn observe_thinking(&self, signature: &str, model: &str) {
        if signature.len() < MIN_SIGNATURE_LENGTH {
            return;
        }

        let signature: Arc<str> = Arc::from(signature);
        self.model_family_by_signature
            .insert(signature.clone(), Arc::from(model_family(model).as_str()));

        let mut last_seen = self.last_seen.lock().expect("signature cache mutex poisoned");
        let is_longer = last_seen
            .as_ref()
            .map(|entry| signature.len() > entry.length)
            .unwrap_or(true);
        if is_longer {
            *last_seen = Some(LastSeen {
                length: signature.len(),
                signature,
            });
        }
    }

    pub fn signature_for_tool_use(&self, tool_use_id: &str) -> Option<Arc<str>> {
        self.by_tool_use_id.get(tool_use_id)
    }

    pub fn model_family_for_signature(&self, signature: &str) -> Option<Arc<str>> {
        self.model_family_by_signature.get(signature)
    }

    /// Last-resort fallback signature for broken tool-loop recovery: the
    /// longest signature ever observed across the whole cache.
    pub fn fallback_signature(&self) -> Option<Arc<str>> {
        self.last_seen
            .lock()
            .expect("signature cache mutex poisoned")
            .as_ref()
            .map(|entry| entry.signature.clone())
    }

    /// True iff a signature cached under `tool_use_id` is compatible with `target_model`.
    pub fn is_compatible_for_target(&self, tool_use_id: &str, target_model: &str) -> bool {
        let Some(signature) = self.signature_for_tool_use(tool_use_id) else {
            return false;
        };
        let Some(family) = self.model_family_for_signature(&signature) else {
            return false;
        };
        is_model_compatible(&family, target_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_sig(tag: &str) -> String {
        format!("{tag}-{}", "x".repeat(60))
    }

    #[test]
    fn short_signatures_are_not_admitted() {
        let cache = SignatureCache::new(3600, 1000);
        cache.observe("tool_1", "short", "gemini-2.5-pro");
        assert!(cache.signature_for_tool_use("tool_1").is_none());
    }

    #[test]
    fn admitted_signature_round_trips_by_tool_use_id() {
        let cache = SignatureCache::new(3600, 1000);
        let sig = long_sig("a");
        cache.observe("tool_1", &sig, "gemini-2.5-pro");
        assert_eq!(cache.signature_for_tool_use("tool_1").as_deref(), Some(sig.as_str()));
    }

    #[test]
    fn model_family_classification() {
        assert_eq!(model_family("gemini-2.5-pro"), "gemini-2.5");
        assert_eq!(model_family("gemini-2.5-flash-lite"), "gemini-2.5");
        assert_eq!(model_family("claude-sonnet-4-5"), "claude-4");
        assert_eq!(model_family("claude-3-7-sonnet"), "claude-3-7");
        assert_eq!(model_family("some-future-model"), "some-future-model");
    }

    #[test]
    fn compatibility_matches_equal_or_same_family() {
        assert!(is_model_compatible("gemini-2.5-pro", "gemini-2.5-pro"));
        assert!(is_model_compatible("gemini-2.5-pro", "gemini-2.5-flash"));
        assert!(!is_model_compatible("gemini-2.5-pro", "gemini-3-pro"));
        assert!(!is_model_compatible("gemini-2.0-flash", "claude-sonnet-4-5"));
    }

    #[test]
    fn is_compatible_for_target_checks_cached_family() {
        let cache = SignatureCache::new(3600, 1000);
        let sig = long_sig("b");
        cache.observe("tool_1", &sig, "gemini-2.5-pro");
        assert!(cache.is_compatible_for_target("tool_1", "gemini-2.5-flash"));
        assert!(!cache.is_compatible_for_target("tool_1", "gemini-3-pro"));
        assert!(!cache.is_compatible_for_target("missing", "gemini-2.5-pro"));
    }

    #[test]
    fn fallback_signature_tracks_longest_observed() {
        let cache = SignatureCache::new(3600, 1000);
        let short = long_sig("short"); // still >=50 bytes, just shorter than `long`
        let long = format!("{short}-{}", "y".repeat(40));
        cache.observe("t1", &short, "gemini-2.5-pro");
        cache.observe("t2", &long, "gemini-2.5-pro");
        assert_eq!(cache.fallback_signature().as_deref(), Some(long.as_str()));
    }
}
