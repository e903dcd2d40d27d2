//! ============================================================================
//! Bounded Polling - Exponential Backoff for Asynchronous Provider Work
//! ============================================================================
//! Media processing on the provider finishes some time after FINALIZE. Rather
//! than sleeping a fixed amount, callers poll with:
//! - A hard cap on the number of status checks
//! - Exponential backoff with optional jitter
//! - Provider `check_after_secs` hints honoured up to the delay cap
//! ============================================================================

use rand::Rng;
use std::time::Duration;

/// Configuration for a bounded poll loop
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Maximum number of status checks before giving up
    pub max_attempts: u32,
    /// Base delay between checks (multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Maximum delay between checks
    pub max_delay_ms: u64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 16_000,
            jitter: true,
        }
    }
}

/// Calculate delay with exponential backoff and optional jitter
pub fn backoff_delay(attempt: u32, config: &PollConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = config.base_delay_ms.saturating_mul(multiplier);
    let capped_delay = base_delay.min(config.max_delay_ms);

    let final_delay = if config.jitter {
        // 0-50% on top, still bounded by the cap
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..0.5);
        ((capped_delay as f64 * jitter_factor) as u64).min(config.max_delay_ms)
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Delay before the next check, raised to the provider's hint when it asks
/// for more patience, but never past `max_delay_ms`
pub fn next_delay(attempt: u32, hint_secs: Option<u64>, config: &PollConfig) -> Duration {
    let backoff = backoff_delay(attempt, config);
    match hint_secs {
        Some(secs) => {
            let hinted = Duration::from_secs(secs).min(Duration::from_millis(config.max_delay_ms));
            backoff.max(hinted)
        }
        None => backoff,
    }
}
