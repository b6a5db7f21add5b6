//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter.

use backon::ExponentialBuilder;

use crate::config::RetryConfig;
use crate::correlation::CorrelationError;

/// Backoff for rerunning a unit of work after a storage conflict.
pub fn conflict_backoff(config: &RetryConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(config.min_delay())
        .with_max_delay(config.max_delay())
        .with_max_times(config.max_times)
        .with_jitter()
}

/// Determines if a correlation error is worth rerunning.
///
/// Retryable:
/// - duplicate key on insert (another writer created the entity first)
/// - store busy (lock contention between writers)
///
/// Everything else is deterministic and is returned to the caller.
pub fn is_retryable(error: &CorrelationError) -> bool {
    matches!(error, CorrelationError::Storage(e) if e.is_conflict())
}
