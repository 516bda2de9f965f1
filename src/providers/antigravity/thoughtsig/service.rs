use super::adapter_request::patch_request;
use super::adapter_response::GeminiResponseAdapter;
use pollux_schema::gemini::{GeminiGenerateContentRequest, GeminiResponseBody};
use pollux_thoughtsig_core::{SignatureSniffer, ThoughtSignatureEngine};
use std::sync::Arc;

const DEFAULT_TTL_SECS: u64 = 60 * 60;
const DEFAULT_MAX_CAPACITY: u64 = 200_000;

#[derive(Clone)]
pub struct AntigravityThoughtSigService {
    engine: Arc<ThoughtSignatureEngine>,
}

impl Default for AntigravityThoughtSigService {
    fn default() -> Self {
        Self::new()
    }
}

impl AntigravityThoughtSigService {
    pub fn new() -> Self {
        let engine = ThoughtSignatureEngine::new(DEFAULT_TTL_SECS, DEFAULT_MAX_CAPACITY);

        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn patch_request(&self, request: &mut GeminiGenerateContentRequest) {
        patch_request(request, self.engine.as_ref())
    }

    pub fn build_sniffer(&self) -> SignatureSniffer {
        SignatureSniffer::new(self.engine.clone())
    }

    pub fn sniff_response(&self, response: &GeminiResponseBody, sniffer: &mut SignatureSniffer) {
        let adapter = GeminiResponseAdapter(response);
        sniffer.inspect(&adapter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_request_drops_thought_when_cache_miss() {
        let service = AntigravityThoughtSigService::new();
        let mut req: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [
                {
                    "role": "model",
                    "parts": [
                        {
                            "thought": true,
                            "text": "internal reasoning"
                        }
                    ]
                }
            ]
        }))
        .expect("request json must parse");

        service.patch_request(&mut req);
        assert!(req.contents[0].parts.is_empty());
    }

    #[test]
    fn record_then_patch_hits_cache_for_thought() {
        let service = AntigravityThoughtSigService::new();

        let response: GeminiResponseBody = serde_json::from_value(json!({
            "candidates": [
                {
                    "content": {
                        "role": "model",
                        "parts": [
                            {
                                "thought": true,
                                "text": "internal reasoning",
                                "thoughtSignature": "real_signature_123"
                            }
                        ]
                    },
                    "finishReason": "STOP"
                }
            ]
        }))
        .expect("response json must parse");

        let mut sniffer = service.build_sniffer();
        service.sniff_response(&response, &mut sniffer);

        let mut req: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [
                {
                    "role": "model",
                    "parts": [
                        {
                            "thought": true,
                            "text": "internal reasoning"
                        }
                    ]
                }
            ]
        }))
        .expect("request json must parse");

        service.patch_request(&mut req);
        assert_eq!(
            req.contents[0].parts[0].thought_signature.as_deref(),
            Some("real_signature_123")
        );
    }

    #[test]
    fn function_call_cache_miss_gets_dummy_signature() {
        let service = AntigravityThoughtSigService::new();
        let mut req: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [
                {
                    "role": "model",
                    "parts": [
                        {
                            "functionCall": {
                                "name": "get_weather",
                                "args": { "city": "Berlin" }
                            }
                        }
                    ]
                }
            ]
        }))
        .expect("request json must parse");

        service.patch_request(&mut req);
        assert_eq!(
            req.contents[0].parts[0].thought_signature.as_deref(),
            Some("skip_thought_signature_validator")
        );
    }
}
