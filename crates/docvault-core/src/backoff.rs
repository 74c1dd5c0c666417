//! Retry backoff for queue-mediated processing.

use std::time::Duration;

/// Delay before redelivering a job on its `attempt`-th retry:
/// `min(cap, 2^attempt)` seconds.
pub fn retry_delay(attempt: u32, cap_secs: u64) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    Duration::from_secs(exp.min(cap_secs))
}
