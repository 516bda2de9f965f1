//! Process-wide cooldown manager (spec.md §4.3): tracks which
//! `(providerId, clientType)` pairs are currently blacked out after a
//! classified upstream failure, with escalating per-reason policies and
//! fire-and-forget persistence so restarts restore in-flight penalties.
//!
//! `client_type = ""` denotes "applies to every client type" and is checked
//! alongside the specific entry by every read operation.

mod reason;

pub use reason::CooldownReason;

use crate::db::{DbActorHandle, DbCooldownRow, DbFailureCountRow};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// `client_type = ""` — applies to every client type.
pub const ALL_CLIENT_TYPES: &str = "";

type Key = (String, String);
type FailureKey = (String, String, CooldownReason);

#[derive(Debug, Clone)]
struct CooldownEntry {
    until: DateTime<Utc>,
    reason: CooldownReason,
}

#[derive(Default)]
struct State {
    entries: HashMap<Key, CooldownEntry>,
    failure_counts: HashMap<FailureKey, u32>,
}

pub struct CooldownManager {
    db: DbActorHandle,
    state: Mutex<State>,
}

impl CooldownManager {
    /// Builds an empty manager; call [`CooldownManager::seed_from_db`]
    /// immediately after to restore persisted entries.
    pub fn new(db: DbActorHandle) -> Self {
        Self {
            db,
            state: Mutex::new(State::default()),
        }
    }

    /// Loads every persisted cooldown and failure-count row, dropping
    /// already-expired cooldowns rather than reinstating them.
    pub async fn seed_from_db(&self) {
        let now = Utc::now();

        match self.db.list_cooldowns().await {
            Ok(rows) => {
                let mut state = self.state.lock().await;
                for row in rows {
                    let Some(until) = DateTime::from_timestamp_millis(row.until_unix_ms) else {
                        continue;
                    };
                    if until <= now {
                        continue;
                    }
                    let reason = CooldownReason::parse(&row.reason);
                    state
                        .entries
                        .insert((row.provider_id, row.client_type), CooldownEntry { until, reason });
                }
            }
            Err(err) => warn!("failed to seed cooldowns from db: {err}"),
        }

        match self.db.list_failure_counts().await {
            Ok(rows) => {
                let mut state = self.state.lock().await;
                for row in rows {
                    let reason = CooldownReason::parse(&row.reason);
                    state.failure_counts.insert(
                        (row.provider_id, row.client_type, reason),
                        row.count.max(0) as u32,
                    );
                }
            }
            Err(err) => warn!("failed to seed failure counts from db: {err}"),
        }
    }

    /// Records a classified failure. If `explicit_until` is given (parsed
    /// from a `Retry-After` header or `quotaResetTimeStamp`), it is used
    /// directly; otherwise the failure count for `(provider_id, client_type,
    /// reason)` is incremented and the reason's escalation policy computes
    /// the blackout duration.
    pub async fn record_failure(
        &self,
        provider_id: &str,
        client_type: &str,
        reason: CooldownReason,
        explicit_until: Option<DateTime<Utc>>,
    ) {
        let now = Utc::now();
        let until = match explicit_until {
            Some(until) => until,
            None => {
                let mut state = self.state.lock().await;
                let key = (
                    provider_id.to_string(),
                    client_type.to_string(),
                    reason,
                );
                let count = state.failure_counts.entry(key.clone()).or_insert(0);
                *count += 1;
                let count = *count;
                drop(state);

                self.persist_failure_count(provider_id, client_type, reason, count)
                    .await;
                now + chrono::Duration::from_std(reason.delay_for(count))
                    .unwrap_or_else(|_| chrono::Duration::seconds(60))
            }
        };

        {
            let mut state = self.state.lock().await;
            state.entries.insert(
                (provider_id.to_string(), client_type.to_string()),
                CooldownEntry { until, reason },
            );
        }

        self.persist_cooldown(provider_id, client_type, until, reason)
            .await;
    }

    /// Clears the specific `(provider_id, client_type)` cooldown entry and
    /// resets all failure counts for that pair.
    pub async fn record_success(&self, provider_id: &str, client_type: &str) {
        {
            let mut state = self.state.lock().await;
            state
                .entries
                .remove(&(provider_id.to_string(), client_type.to_string()));
            state
                .failure_counts
                .retain(|(p, c, _), _| !(p == provider_id && c == client_type));
        }

        let db = self.db.clone();
        let provider_id = provider_id.to_string();
        let client_type = client_type.to_string();
        tokio::spawn(async move {
            if let Err(err) = db.delete_cooldown(provider_id.clone(), client_type.clone()).await {
                warn!("failed to delete cooldown for {provider_id}/{client_type}: {err}");
            }
            if let Err(err) = db.reset_failure_counts(provider_id.clone(), client_type.clone()).await {
                warn!("failed to reset failure counts for {provider_id}/{client_type}: {err}");
            }
        });
    }

    /// True iff the global (`client_type=""`) entry OR the specific entry
    /// has `until > now`.
    pub async fn is_in_cooldown(&self, provider_id: &str, client_type: &str) -> bool {
        self.cooldown_until(provider_id, client_type).await.is_some()
    }

    /// Returns `max(global.until, specific.until)`, restricted to future
    /// values, or `None` if neither entry is active.
    pub async fn cooldown_until(
        &self,
        provider_id: &str,
        client_type: &str,
    ) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let state = self.state.lock().await;

        let global = state
            .entries
            .get(&(provider_id.to_string(), ALL_CLIENT_TYPES.to_string()))
            .map(|e| e.until);
        let specific = if client_type == ALL_CLIENT_TYPES {
            None
        } else {
            state
                .entries
                .get(&(provider_id.to_string(), client_type.to_string()))
                .map(|e| e.until)
        };

        [global, specific]
            .into_iter()
            .flatten()
            .filter(|until| *until > now)
            .max()
    }

    /// Periodic sweep: drops expired cooldown entries and resets the
    /// failure counts for the pairs whose cooldown just expired.
    pub async fn cleanup_expired(&self) {
        let now = Utc::now();
        let expired: Vec<Key> = {
            let mut state = self.state.lock().await;
            let expired: Vec<Key> = state
                .entries
                .iter()
                .filter(|(_, e)| e.until <= now)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                state.entries.remove(key);
                state
                    .failure_counts
                    .retain(|(p, c, _), _| !(p == &key.0 && c == &key.1));
            }
            expired
        };

        for (provider_id, client_type) in expired {
            let db = self.db.clone();
            tokio::spawn(async move {
                if let Err(err) = db
                    .delete_cooldown(provider_id.clone(), client_type.clone())
                    .await
                {
                    warn!("failed to delete expired cooldown for {provider_id}/{client_type}: {err}");
                }
                if let Err(err) = db
                    .reset_failure_counts(provider_id.clone(), client_type.clone())
                    .await
                {
                    warn!("failed to reset failure counts for {provider_id}/{client_type}: {err}");
                }
            });
        }
    }

    async fn persist_cooldown(
        &self,
        provider_id: &str,
        client_type: &str,
        until: DateTime<Utc>,
        reason: CooldownReason,
    ) {
        let db = self.db.clone();
        let row = DbCooldownRow {
            provider_id: provider_id.to_string(),
            client_type: client_type.to_string(),
            until_unix_ms: until.timestamp_millis(),
            reason: reason.as_str().to_string(),
        };
        tokio::spawn(async move {
            if let Err(err) = db.upsert_cooldown(row).await {
                warn!("failed to persist cooldown: {err}");
            }
        });
    }

    async fn persist_failure_count(
        &self,
        provider_id: &str,
        client_type: &str,
        reason: CooldownReason,
        count: u32,
    ) {
        let db = self.db.clone();
        let row = DbFailureCountRow {
            provider_id: provider_id.to_string(),
            client_type: client_type.to_string(),
            reason: reason.as_str().to_string(),
            count: count as i64,
        };
        tokio::spawn(async move {
            if let Err(err) = db.upsert_failure_count(row).await {
                warn!("failed to persist failure count: {err}");
            }
        });
    }
}

/// Seconds-granularity helper used by callers building an `explicit_until`
/// from a parsed retry delay.
pub fn until_from_delay(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> DbActorHandle {
        crate::db::spawn("sqlite::memory:").await
    }

    #[tokio::test]
    async fn record_failure_without_explicit_until_uses_policy_delay() {
        let manager = CooldownManager::new(test_db().await);
        manager
            .record_failure("antigravity", "", CooldownReason::ServerError, None)
            .await;

        assert!(manager.is_in_cooldown("antigravity", "").await);
        let until = manager.cooldown_until("antigravity", "").await.unwrap();
        let remaining = (until - Utc::now()).num_seconds();
        assert!((15..=25).contains(&remaining), "remaining={remaining}");
    }

    #[tokio::test]
    async fn explicit_until_is_used_directly() {
        let manager = CooldownManager::new(test_db().await);
        let until = Utc::now() + chrono::Duration::seconds(3600);
        manager
            .record_failure(
                "antigravity",
                "claude",
                CooldownReason::QuotaExhausted,
                Some(until),
            )
            .await;

        let got = manager.cooldown_until("antigravity", "claude").await.unwrap();
        assert_eq!(got, until);
    }

    #[tokio::test]
    async fn global_entry_applies_to_every_client_type() {
        let manager = CooldownManager::new(test_db().await);
        manager
            .record_failure("antigravity", "", CooldownReason::Manual, None)
            .await;

        assert!(manager.is_in_cooldown("antigravity", "claude").await);
        assert!(manager.is_in_cooldown("antigravity", "openai").await);
    }

    #[tokio::test]
    async fn record_success_clears_entry_and_counts() {
        let manager = CooldownManager::new(test_db().await);
        manager
            .record_failure("antigravity", "claude", CooldownReason::RateLimit, None)
            .await;
        assert!(manager.is_in_cooldown("antigravity", "claude").await);

        manager.record_success("antigravity", "claude").await;
        assert!(!manager.is_in_cooldown("antigravity", "claude").await);
    }

    #[tokio::test]
    async fn rate_limit_delay_escalates_with_failure_count() {
        let manager = CooldownManager::new(test_db().await);
        manager
            .record_failure("antigravity", "claude", CooldownReason::RateLimit, None)
            .await;
        let first = manager.cooldown_until("antigravity", "claude").await.unwrap();

        manager
            .record_failure("antigravity", "claude", CooldownReason::RateLimit, None)
            .await;
        let second = manager.cooldown_until("antigravity", "claude").await.unwrap();

        assert!(second > first);
    }

    #[tokio::test]
    async fn cleanup_expired_drops_past_entries() {
        let manager = CooldownManager::new(test_db().await);
        let past = Utc::now() - chrono::Duration::seconds(5);
        manager
            .record_failure("antigravity", "", CooldownReason::Unknown, Some(past))
            .await;

        manager.cleanup_expired().await;
        assert!(!manager.is_in_cooldown("antigravity", "").await);
    }
}
