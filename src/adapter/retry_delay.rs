//! Upstream retry-delay parsing: `Retry-After` header, `google.rpc.RetryInfo`
//! details, `quotaResetDelay` metadata, Go-style duration strings, and the
//! floor/cap/jitter pipeline applied before an executor sleeps between
//! attempts.

use rand::Rng as _;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::time::Duration;

/// Minimum delay ever returned, regardless of source.
const FLOOR: Duration = Duration::from_secs(2);
/// Upper bound applied specifically to 429 responses, plus a small pad so
/// the client's own retry never races the cooldown's expiry.
const RATE_LIMIT_CAP: Duration = Duration::from_millis(10_200);
/// Uniform jitter applied after floor/cap: the final delay is drawn from
/// `delay * [0.8, 1.2]`.
const JITTER_FRACTION: f64 = 0.2;

/// Why a 429 was raised, used to pick the cooldown manager's policy bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    QuotaExhausted,
    RateLimitExceeded,
}

/// Parses a Go-style duration string: `"1.2s"`, `"500ms"`, `"2m30s"`, plain
/// seconds (`"5"`), or a composite of `<number><unit>` runs concatenated
/// without separators (`"1h2m3s"`). Returns `None` on anything that doesn't
/// parse cleanly.
pub fn parse_duration_string(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    // Plain number (seconds), e.g. Retry-After headers.
    if let Ok(secs) = input.parse::<f64>() {
        return duration_from_secs_f64(secs);
    }

    let bytes = input.as_bytes();
    let mut idx = 0;
    let mut total = 0.0f64;
    let mut matched_any = false;

    while idx < bytes.len() {
        let start = idx;
        while idx < bytes.len() && matches!(bytes[idx], b'0'..=b'9' | b'.') {
            idx += 1;
        }
        if idx == start {
            return None;
        }
        let number: f64 = input[start..idx].parse().ok()?;

        let unit_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        let unit = &input[unit_start..idx];
        let secs = match unit {
            "ms" => number / 1000.0,
            "s" => number,
            "m" => number * 60.0,
            "h" => number * 3600.0,
            _ => return None,
        };
        total += secs;
        matched_any = true;
    }

    matched_any.then_some(total).and_then(duration_from_secs_f64)
}

fn duration_from_secs_f64(secs: f64) -> Option<Duration> {
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Parses a `Retry-After` header (seconds form only — upstreams here never
/// send the HTTP-date form).
pub fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_duration_string)
}

/// Scans an `error.details[]` array for a `google.rpc.RetryInfo` entry and
/// parses its `retryDelay` duration string.
pub fn retry_info_delay(details: &[Value]) -> Option<Duration> {
    details.iter().find_map(|detail| {
        let is_retry_info = detail
            .get("@type")
            .and_then(Value::as_str)
            .is_some_and(|t| t.contains("RetryInfo"));
        if !is_retry_info {
            return None;
        }
        detail
            .get("retryDelay")
            .and_then(Value::as_str)
            .and_then(parse_duration_string)
    })
}

/// Scans an `error.details[]` array for `metadata.quotaResetDelay`, a
/// duration string distinct from the RFC3339 `quotaResetTimeStamp` already
/// handled by [`crate::error::GeminiCliErrorBody::quota_reset_delay`].
pub fn quota_reset_delay_string(details: &[Value]) -> Option<Duration> {
    details.iter().find_map(|detail| {
        detail
            .get("metadata")
            .and_then(|m| m.get("quotaResetDelay"))
            .and_then(Value::as_str)
            .and_then(parse_duration_string)
    })
}

/// Classifies the reason behind a 429 from `error.details[].reason`, with a
/// text-fallback substring match over `error.message` when no structured
/// reason is present.
pub fn classify_rate_limit_reason(details: &[Value], message: Option<&str>) -> RateLimitReason {
    let structured = details.iter().find_map(|detail| {
        let reason = detail.get("reason").and_then(Value::as_str)?;
        match reason {
            "QUOTA_EXHAUSTED" => Some(RateLimitReason::QuotaExhausted),
            "RATE_LIMIT_EXCEEDED" => Some(RateLimitReason::RateLimitExceeded),
            _ => None,
        }
    });
    if let Some(reason) = structured {
        return reason;
    }

    let lower = message.unwrap_or_default().to_ascii_lowercase();
    if lower.contains("quota") {
        RateLimitReason::QuotaExhausted
    } else {
        RateLimitReason::RateLimitExceeded
    }
}

/// Applies the floor/cap/jitter pipeline (spec-equivalent of §4.1.11) to a
/// raw delay. `is_rate_limit` gates the 429-specific cap.
pub fn apply_floor_cap_jitter(raw: Duration, is_rate_limit: bool) -> Duration {
    let mut delay = raw.max(FLOOR);
    if is_rate_limit {
        delay = delay.min(RATE_LIMIT_CAP);
    }

    let jitter = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let factor = (1.0 + jitter).max(0.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Resolves the raw (pre-floor/cap/jitter) retry delay from the ordered
/// source list: `Retry-After` header, then `RetryInfo.retryDelay`, then
/// `metadata.quotaResetDelay`.
pub fn resolve_raw_delay(headers: Option<&HeaderMap>, details: Option<&[Value]>) -> Option<Duration> {
    headers
        .and_then(retry_after_header)
        .or_else(|| details.and_then(retry_info_delay))
        .or_else(|| details.and_then(quota_reset_delay_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_duration_string("5"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn parses_go_style_fractional_seconds() {
        assert_eq!(
            parse_duration_string("1.2s"),
            Some(Duration::from_secs_f64(1.2))
        );
    }

    #[test]
    fn parses_milliseconds() {
        assert_eq!(
            parse_duration_string("500ms"),
            Some(Duration::from_secs_f64(0.5))
        );
    }

    #[test]
    fn parses_composite_minutes_seconds() {
        assert_eq!(
            parse_duration_string("2m30s"),
            Some(Duration::from_secs_f64(150.0))
        );
    }

    #[test]
    fn parses_composite_hours_minutes_seconds() {
        assert_eq!(
            parse_duration_string("1h2m3s"),
            Some(Duration::from_secs_f64(3723.0))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration_string("not-a-duration"), None);
        assert_eq!(parse_duration_string(""), None);
    }

    #[test]
    fn retry_info_delay_finds_matching_type() {
        let details = vec![
            json!({"@type": "type.googleapis.com/google.rpc.ErrorInfo", "reason": "RATE_LIMIT_EXCEEDED"}),
            json!({"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "3.5s"}),
        ];
        assert_eq!(
            retry_info_delay(&details),
            Some(Duration::from_secs_f64(3.5))
        );
    }

    #[test]
    fn quota_reset_delay_string_reads_metadata() {
        let details = vec![json!({"metadata": {"quotaResetDelay": "90s"}})];
        assert_eq!(
            quota_reset_delay_string(&details),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn classify_prefers_structured_reason() {
        let details = vec![json!({"reason": "QUOTA_EXHAUSTED"})];
        assert_eq!(
            classify_rate_limit_reason(&details, Some("rate limited")),
            RateLimitReason::QuotaExhausted
        );
    }

    #[test]
    fn classify_falls_back_to_message_text() {
        assert_eq!(
            classify_rate_limit_reason(&[], Some("You have exhausted your quota")),
            RateLimitReason::QuotaExhausted
        );
        assert_eq!(
            classify_rate_limit_reason(&[], Some("too many requests")),
            RateLimitReason::RateLimitExceeded
        );
    }

    #[test]
    fn floor_applies_to_tiny_delays() {
        let delay = apply_floor_cap_jitter(Duration::from_millis(10), false);
        assert!(delay >= FLOOR.mul_f64(0.8));
    }

    #[test]
    fn rate_limit_cap_applies_only_when_flagged() {
        let uncapped = apply_floor_cap_jitter(Duration::from_secs(60), false);
        assert!(uncapped >= Duration::from_secs(48));

        let capped = apply_floor_cap_jitter(Duration::from_secs(60), true);
        assert!(capped <= RATE_LIMIT_CAP.mul_f64(1.21));
    }

    #[test]
    fn resolve_raw_delay_prefers_header_over_details() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        let details = vec![json!({"metadata": {"quotaResetDelay": "90s"}})];
        assert_eq!(
            resolve_raw_delay(Some(&headers), Some(&details)),
            Some(Duration::from_secs(7))
        );
    }
}
