//! Retry backoff for records whose push failed.
//!
//! The wait before the next attempt is `base_delay * 2^retry_count`, capped
//! at `max_delay`. Reaching `max_retries` does not stop retrying: it is the
//! point at which the failure is escalated to the user, after which the
//! record keeps retrying every `max_delay`.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::tracker::SyncMetadata;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }

    /// Backoff after `retry_count` failures.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// [`delay_for`](Self::delay_for) in whole milliseconds, saturating.
    pub fn delay_millis(&self, retry_count: u32) -> u64 {
        u64::try_from(self.delay_for(retry_count).as_millis()).unwrap_or(u64::MAX)
    }

    /// Whether a record may be pushed at `now`.
    ///
    /// Records flagged for review wait for a manual retry.
    pub fn is_eligible(&self, metadata: &SyncMetadata, now: DateTime<Utc>) -> bool {
        if metadata.needs_review {
            return false;
        }
        if metadata.retry_count == 0 {
            return true;
        }
        let Some(attempt) = metadata.last_sync_attempt else {
            return true;
        };

        let delay = chrono::Duration::from_std(self.delay_for(metadata.retry_count))
            .unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(attempt) >= delay
    }

    /// The retry count at which the failure is escalated.
    pub fn is_escalation(&self, retry_count: u32) -> bool {
        retry_count == self.max_retries
    }
}
