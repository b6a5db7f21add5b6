//! Correlator configuration types.

use std::time::Duration;

use serde::Deserialize;

use crate::model::CORRELATION_KEY_PROPERTY;

/// How concurrent find-or-create calls on the same new key are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Rely on the store's unique constraint; rerun the unit of work
    /// after a conflicting insert so it finds the winner's entity.
    #[default]
    Retry,
    /// Hold a per-key lock for the whole unit of work.
    Lock,
}

/// Override for the derived find-by-key query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryOverride {
    /// Entity (table) to search.
    pub entity: String,
    /// Column compared against the key.
    pub key_column: String,
}

/// Backoff settings for conflict retries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_times: usize,
}

impl RetryConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 10,
            max_delay_ms: 2000,
            max_times: 10,
        }
    }
}

/// Correlator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Entity property that receives the correlation key.
    pub key_property: String,
    /// Replaces the query derived from the entity and key property.
    pub find_by_key_query: Option<QueryOverride>,
    /// Race policy for find-or-create.
    pub conflict_policy: ConflictPolicy,
    /// Fail when a key matches more than one entity instead of using the first.
    pub strict_uniqueness: bool,
    /// Backoff for the retry policy.
    pub retry: RetryConfig,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            key_property: CORRELATION_KEY_PROPERTY.to_string(),
            find_by_key_query: None,
            conflict_policy: ConflictPolicy::default(),
            strict_uniqueness: true,
            retry: RetryConfig::default(),
        }
    }
}
