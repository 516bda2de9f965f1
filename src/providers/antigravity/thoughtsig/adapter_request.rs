use pollux_schema::gemini::{GeminiGenerateContentRequest, Part};
use pollux_thoughtsig_core::{CacheKey, CacheKeyGenerator, ThoughtSignatureEngine};
use tracing::debug;

enum PatchDecision {
    Skipped,
    Patched { cache_key: Option<CacheKey> },
    Dropped { cache_key: Option<CacheKey> },
}

fn patch_part(part: &mut Part, engine: &ThoughtSignatureEngine) -> PatchDecision {
    // Keep the same priority as GeminiCLI: functionCall first, then thought text.
    if let Some(function_call) = part.function_call.as_ref() {
        let cache_key = CacheKeyGenerator::generate_json(function_call);
        if let Some(signature) = cache_key.and_then(|key| engine.get_signature(&key)) {
            *part.thought_signature_mut() = Some(signature.to_string());
            return PatchDecision::Patched { cache_key };
        }

        *part.thought_signature_mut() = Some(engine.fallback_signature().to_string());
        return PatchDecision::Patched { cache_key };
    }

    if part.thought == Some(true) {
        let cache_key = part
            .text
            .as_deref()
            .and_then(CacheKeyGenerator::generate_text);
        let Some(cache_key) = cache_key else {
            return PatchDecision::Dropped { cache_key: None };
        };

        if let Some(signature) = engine.get_signature(&cache_key) {
            *part.thought_signature_mut() = Some(signature.to_string());
            return PatchDecision::Patched {
                cache_key: Some(cache_key),
            };
        }

        return PatchDecision::Dropped {
            cache_key: Some(cache_key),
        };
    }

    PatchDecision::Skipped
}

pub(super) fn patch_request(
    request: &mut GeminiGenerateContentRequest,
    engine: &ThoughtSignatureEngine,
) {
    // Single-pass patch flow:
    // request.contents(model only) -> content.parts -> patch each part.
    // No pre-scan stage is needed.
    for (content_idx, content) in request.contents.iter_mut().enumerate() {
        if content.role.as_deref() != Some("model") {
            continue;
        }

        let mut part_idx = 0usize;
        content.parts.retain_mut(|part| {
            let current_part_idx = part_idx;
            part_idx += 1;

            match patch_part(part, engine) {
                PatchDecision::Skipped => true,
                PatchDecision::Patched { cache_key } => {
                    debug!(
                        channel = "antigravity",
                        thoughtsig.phase = "fill",
                        content_idx = content_idx,
                        part_idx = current_part_idx,
                        key = ?cache_key,
                        signature = %part
                            .thought_signature
                            .as_deref()
                            .map(preview_signature)
                            .unwrap_or_default(),
                        "Thought signature decision"
                    );
                    true
                }
                PatchDecision::Dropped { cache_key } => {
                    debug!(
                        channel = "antigravity",
                        thoughtsig.phase = "drop",
                        content_idx = content_idx,
                        part_idx = current_part_idx,
                        key = ?cache_key,
                        "Drop uncached thought part"
                    );
                    false
                }
            }
        });
    }
}

fn preview_signature(signature: &str) -> String {
    const MAX: usize = 48;
    if signature.len() <= MAX {
        return signature.to_string();
    }
    format!("{}...", &signature[..MAX])
}
