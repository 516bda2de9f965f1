use std::time::Duration;

/// Why a cooldown was recorded, used to pick the per-reason escalation
/// policy (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownReason {
    /// Quota exhaustion; 1h fixed unless an explicit reset timestamp is
    /// supplied by the caller.
    QuotaExhausted,
    /// Rate limiting; 30s base, exponential per failure count, capped.
    RateLimit,
    /// Upstream 5xx; 20s fixed.
    ServerError,
    /// Anything else classified as retryable but otherwise unidentified;
    /// 60s fixed.
    Unknown,
    /// Admin-initiated blackout; always set with an explicit `until`.
    Manual,
}

const QUOTA_EXHAUSTED_DELAY: Duration = Duration::from_secs(3600);
const RATE_LIMIT_BASE: Duration = Duration::from_secs(30);
const RATE_LIMIT_CAP: Duration = Duration::from_secs(600);
const SERVER_ERROR_DELAY: Duration = Duration::from_secs(20);
const UNKNOWN_DELAY: Duration = Duration::from_secs(60);
const MANUAL_DEFAULT_DELAY: Duration = Duration::from_secs(86_400);

impl CooldownReason {
    /// Computes the blackout duration for the `count`-th consecutive
    /// failure of this reason (1-indexed). Used only when the caller has no
    /// explicit `until` to apply directly.
    pub fn delay_for(self, count: u32) -> Duration {
        match self {
            CooldownReason::QuotaExhausted => QUOTA_EXHAUSTED_DELAY,
            CooldownReason::RateLimit => {
                let exponent = count.saturating_sub(1).min(16);
                let factor = 2u64.saturating_pow(exponent);
                RATE_LIMIT_BASE
                    .saturating_mul(factor as u32)
                    .min(RATE_LIMIT_CAP)
            }
            CooldownReason::ServerError => SERVER_ERROR_DELAY,
            CooldownReason::Unknown => UNKNOWN_DELAY,
            CooldownReason::Manual => MANUAL_DEFAULT_DELAY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CooldownReason::QuotaExhausted => "quota_exhausted",
            CooldownReason::RateLimit => "rate_limit",
            CooldownReason::ServerError => "server_error",
            CooldownReason::Unknown => "unknown",
            CooldownReason::Manual => "manual",
        }
    }

    /// Parses a persisted reason string, defaulting to `Unknown` for rows
    /// written by a future/unknown variant.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "quota_exhausted" => CooldownReason::QuotaExhausted,
            "rate_limit" => CooldownReason::RateLimit,
            "server_error" => CooldownReason::ServerError,
            "manual" => CooldownReason::Manual,
            _ => CooldownReason::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_reasons_ignore_count() {
        assert_eq!(
            CooldownReason::ServerError.delay_for(1),
            CooldownReason::ServerError.delay_for(10)
        );
        assert_eq!(CooldownReason::ServerError.delay_for(1), SERVER_ERROR_DELAY);
    }

    #[test]
    fn rate_limit_escalates_and_caps() {
        assert_eq!(CooldownReason::RateLimit.delay_for(1), Duration::from_secs(30));
        assert_eq!(CooldownReason::RateLimit.delay_for(2), Duration::from_secs(60));
        assert_eq!(CooldownReason::RateLimit.delay_for(3), Duration::from_secs(120));
        assert_eq!(CooldownReason::RateLimit.delay_for(20), RATE_LIMIT_CAP);
    }

    #[test]
    fn as_str_and_parse_roundtrip() {
        for reason in [
            CooldownReason::QuotaExhausted,
            CooldownReason::RateLimit,
            CooldownReason::ServerError,
            CooldownReason::Unknown,
            CooldownReason::Manual,
        ] {
            assert_eq!(CooldownReason::parse(reason.as_str()), reason);
        }
    }

    #[test]
    fn parse_defaults_unknown_reason_strings_to_unknown() {
        assert_eq!(CooldownReason::parse("something-new"), CooldownReason::Unknown);
    }
}
