//! Request-type resolution: `agent` / `web_search` / `image_gen`, per
//! spec.md §4.1.2. Operates on already-model-mapped names and a flat list
//! of client-declared tool names (extracted per-protocol by the caller).

use serde_json::{Map, Value, json};

const IMAGE_MODEL_PREFIX: &str = "gemini-3-pro-image";
const IMAGE_GEN_CANONICAL_MODEL: &str = "gemini-3-pro-image";
const WEB_SEARCH_MODEL: &str = "gemini-2.5-flash";

const WEB_SEARCH_TOOL_NAMES: &[&str] = &[
    "web_search",
    "google_search",
    "google_search_retrieval",
    "web_search_20250305",
    "googleSearch",
    "googleSearchRetrieval",
];

const ASPECT_RATIO_SUFFIXES: &[(&str, &str)] = &[
    ("-21x9", "21:9"),
    ("-16x9", "16:9"),
    ("-9x16", "9:16"),
    ("-4x3", "4:3"),
    ("-3x4", "3:4"),
    ("-1x1", "1:1"),
];

const HD_SUFFIXES: &[(&str, &str)] = &[("-4k", "4K"), ("-2k", "2K"), ("-hd", "2K")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Agent,
    WebSearch,
    ImageGen,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Agent => "agent",
            RequestType::WebSearch => "web_search",
            RequestType::ImageGen => "image_gen",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestTypeResolution {
    pub request_type: RequestType,
    /// The model to actually send upstream (may differ from the mapped model
    /// the caller passed in: forced to the image model, or to
    /// `gemini-2.5-flash` for web search, or `-online`-stripped).
    pub final_model: String,
    /// Present only for `RequestType::ImageGen`; merge into `generationConfig.imageConfig`.
    pub image_config: Option<Value>,
}

/// True if `name` (case-sensitive for camelCase Gemini names, else
/// case-insensitive) names a web-search tool.
fn is_web_search_tool_name(name: &str) -> bool {
    WEB_SEARCH_TOOL_NAMES
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(name))
}

fn parse_image_config(original_model: &str) -> Value {
    let lower = original_model.to_ascii_lowercase();
    let mut config = Map::new();

    for (suffix, ratio) in ASPECT_RATIO_SUFFIXES {
        if lower.contains(suffix) {
            config.insert("aspectRatio".to_string(), json!(ratio));
            break;
        }
    }

    for (suffix, size) in HD_SUFFIXES {
        if lower.contains(suffix) {
            config.insert("imageSize".to_string(), json!(size));
            break;
        }
    }

    Value::Object(config)
}

/// Resolves the request type for a request whose model has already been run
/// through `model_mapping::map_model` (the `mapped_model` argument here),
/// alongside the raw client-facing model name (`original_model`, pre-mapping,
/// used only for image-suffix parsing and the `-online` check) and the flat
/// list of tool names the client declared.
pub fn resolve(original_model: &str, mapped_model: &str, tool_names: &[String]) -> RequestTypeResolution {
    if mapped_model.starts_with(IMAGE_MODEL_PREFIX) {
        return RequestTypeResolution {
            request_type: RequestType::ImageGen,
            final_model: IMAGE_GEN_CANONICAL_MODEL.to_string(),
            image_config: Some(parse_image_config(original_model)),
        };
    }

    let ends_with_online = original_model.ends_with("-online");
    let has_web_search_tool = tool_names.iter().any(|name| is_web_search_tool_name(name));
    let enable_networking = ends_with_online || has_web_search_tool;

    let (stripped_model, _) = super::model_mapping::strip_online_suffix(mapped_model);
    let mut final_model = stripped_model.to_string();

    if enable_networking && final_model != WEB_SEARCH_MODEL {
        final_model = WEB_SEARCH_MODEL.to_string();
    }

    RequestTypeResolution {
        request_type: if enable_networking {
            RequestType::WebSearch
        } else {
            RequestType::Agent
        },
        final_model,
        image_config: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_gen_model_detected_and_forced() {
        let res = resolve(
            "gemini-3-pro-image-16x9-4k",
            "gemini-3-pro-image-16x9-4k",
            &[],
        );
        assert_eq!(res.request_type, RequestType::ImageGen);
        assert_eq!(res.final_model, "gemini-3-pro-image");
        assert_eq!(
            res.image_config,
            Some(json!({"aspectRatio": "16:9", "imageSize": "4K"}))
        );
    }

    #[test]
    fn online_suffix_forces_web_search_and_flash_model() {
        let res = resolve(
            "claude-3-5-sonnet-20241022-online",
            "claude-sonnet-4-5",
            &[],
        );
        assert_eq!(res.request_type, RequestType::WebSearch);
        assert_eq!(res.final_model, "gemini-2.5-flash");
    }

    #[test]
    fn web_search_tool_name_forces_web_search() {
        let res = resolve(
            "claude-3-5-sonnet-20241022",
            "claude-sonnet-4-5",
            &["google_search".to_string()],
        );
        assert_eq!(res.request_type, RequestType::WebSearch);
        assert_eq!(res.final_model, "gemini-2.5-flash");
    }

    #[test]
    fn no_networking_keeps_agent_type_and_mapped_model() {
        let res = resolve("claude-3-5-sonnet-20241022", "claude-sonnet-4-5", &[]);
        assert_eq!(res.request_type, RequestType::Agent);
        assert_eq!(res.final_model, "claude-sonnet-4-5");
    }

    #[test]
    fn web_search_already_on_flash_keeps_model() {
        let res = resolve("gemini-2.5-flash-online", "gemini-2.5-flash", &[]);
        assert_eq!(res.request_type, RequestType::WebSearch);
        assert_eq!(res.final_model, "gemini-2.5-flash");
    }
}
