//! Runtime configuration for the synchronization service.
//!
//! Every knob has a default; `SyncConfig::from_env` overlays `ENTITY_SYNC_*`
//! environment variables on top of those defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for retry behavior on transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff after `attempt` (1-based) failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms.max(1);
        let max = self.max_backoff_ms.max(base);
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(base.saturating_mul(factor).min(max))
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Bulk field purge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgePolicy {
    /// Documents visited per `unset` batch.
    pub batch_size: usize,
    /// Purge jobs allowed to run at the same time.
    pub max_concurrent: usize,
}

impl Default for PurgePolicy {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_concurrent: 2,
        }
    }
}

/// What the registry does when an entity's storage target changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenamePolicy {
    /// Keep serving the creation-time target and remember the new one as
    /// pending until a migration event moves the data and swaps the pointer.
    Defer,
    /// Swap immediately while the old collection is empty, refuse otherwise.
    RejectAfterFirstWrite,
}

impl Default for RenamePolicy {
    fn default() -> Self {
        Self::Defer
    }
}

impl FromStr for RenamePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "defer" => Ok(Self::Defer),
            "reject_after_first_write" | "reject" => Ok(Self::RejectAfterFirstWrite),
            other => Err(format!("unknown rename policy '{}'", other)),
        }
    }
}

/// Top-level configuration for registry, consumer and view coordination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Consumer group used when subscribing to metadata topics.
    pub consumer_group: String,
    /// Partition count of the in-memory bus.
    pub partitions: usize,
    /// Topic receiving poison and exhausted messages.
    pub dead_letter_topic: String,
    /// How long a deleted entity's tombstone rejects stale create/update events.
    pub tombstone_ttl_ms: u64,
    #[serde(default)]
    pub rename_policy: RenamePolicy,
    /// Retries for registry mutations driven by events.
    pub retry: RetryPolicy,
    /// Retries for optimistic default-view transactions.
    pub view_retry: RetryPolicy,
    pub purge: PurgePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            consumer_group: "dynamic-data-service-group".to_string(),
            partitions: 4,
            dead_letter_topic: "metadata-dead-letter".to_string(),
            tombstone_ttl_ms: 5 * 60_000,
            rename_policy: RenamePolicy::Defer,
            retry: RetryPolicy::default(),
            view_retry: RetryPolicy {
                max_attempts: 8,
                initial_backoff_ms: 1,
                max_backoff_ms: 20,
            },
            purge: PurgePolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            consumer_group: env_string("ENTITY_SYNC_GROUP", &defaults.consumer_group),
            partitions: env_parse("ENTITY_SYNC_PARTITIONS", defaults.partitions)?,
            dead_letter_topic: env_string("ENTITY_SYNC_DEAD_LETTER_TOPIC", &defaults.dead_letter_topic),
            tombstone_ttl_ms: env_parse("ENTITY_SYNC_TOMBSTONE_TTL_MS", defaults.tombstone_ttl_ms)?,
            rename_policy: match std::env::var("ENTITY_SYNC_RENAME_POLICY") {
                Ok(raw) => raw
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("ENTITY_SYNC_RENAME_POLICY must be 'defer' or 'reject_after_first_write'")?,
                Err(_) => defaults.rename_policy,
            },
            retry: RetryPolicy {
                max_attempts: env_parse("ENTITY_SYNC_RETRY_ATTEMPTS", defaults.retry.max_attempts)?,
                initial_backoff_ms: env_parse(
                    "ENTITY_SYNC_RETRY_INITIAL_BACKOFF_MS",
                    defaults.retry.initial_backoff_ms,
                )?,
                max_backoff_ms: env_parse(
                    "ENTITY_SYNC_RETRY_MAX_BACKOFF_MS",
                    defaults.retry.max_backoff_ms,
                )?,
            },
            view_retry: defaults.view_retry,
            purge: PurgePolicy {
                batch_size: env_parse("ENTITY_SYNC_PURGE_BATCH_SIZE", defaults.purge.batch_size)?,
                max_concurrent: env_parse(
                    "ENTITY_SYNC_PURGE_CONCURRENCY",
                    defaults.purge.max_concurrent,
                )?,
            },
        })
    }

    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_millis(self.tombstone_ttl_ms)
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(4), Duration::from_millis(50));
        assert_eq!(policy.backoff(30), Duration::from_millis(50));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn test_rename_policy_parse() {
        assert_eq!("defer".parse::<RenamePolicy>().unwrap(), RenamePolicy::Defer);
        assert_eq!(
            "reject_after_first_write".parse::<RenamePolicy>().unwrap(),
            RenamePolicy::RejectAfterFirstWrite
        );
        assert!("move".parse::<RenamePolicy>().is_err());
    }

    #[test]
    fn test_config_serde_round_trip_keeps_defaults() {
        let config = SyncConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SyncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
