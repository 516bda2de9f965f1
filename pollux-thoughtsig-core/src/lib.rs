pub mod engine;
pub mod fingerprint;
pub mod patch;
mod signature_cache;
mod sniffer;

pub use engine::ThoughtSignatureEngine;
pub use engine::{CacheKey, SignatureCacheStore, ThoughtSignature};
pub use fingerprint::CacheKeyGenerator;
pub use patch::{PatchEvent, PatchOutcome, ThoughtSigPatchable};
pub use signature_cache::{
    MIN_SIGNATURE_LENGTH, MODEL_FAMILIES, SignatureCache, is_model_compatible, model_family,
};
pub use sniffer::{SignatureSniffer, SniffEvent, Sniffable};
