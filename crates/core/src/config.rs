//! Engine configuration.
//!
//! Every numeric parameter the operator can tune lives here, with the
//! documented defaults. The CLI merges `config/Config.toml` and
//! `CROSSVAULT_`-prefixed environment variables over these values.

use crate::fixed::Money;
use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Haircut applied to positive cross-venue PnL, basis points.
    pub haircut_bps: u64,
    /// Overspend tolerance α in basis points: proportional equity reduction
    /// kicks in above `(1 + α) · collateral` of margin in use.
    pub overspend_alpha_bps: u64,
    /// Seconds a user must wait after a deposit before withdrawing. 0 = off.
    pub withdrawal_cooldown_secs: u64,
    /// Per-user daily withdrawal cap in 10^6 units. 0 = off.
    pub user_daily_cap: Money,
    /// Global daily withdrawal cap in 10^6 units. 0 = off.
    pub global_daily_cap: Money,
    /// Settlement-volume circuit breaker threshold in 10^6 units. 0 = off.
    pub circuit_breaker_threshold: Money,
    /// Rolling window for the circuit breaker, seconds.
    pub circuit_breaker_window_secs: u64,
    /// Per-user heartbeat recompute interval, seconds.
    pub heartbeat_secs: u64,
    /// Oracle polling interval feeding mark-price triggers, seconds.
    pub price_poll_secs: u64,
    /// Interval between netting windows, seconds.
    pub netting_window_secs: u64,
    /// Equity recompute debounce window, milliseconds.
    pub debounce_ms: u64,
    /// Fee on net credit leaves during batch application, basis points;
    /// credited to the insurance fund. 0 = off.
    pub netting_fee_bps: u64,
    /// Default per-instrument mark-move trigger threshold, basis points.
    pub default_trigger_bps: u64,
    /// Ledger inbox backpressure watermarks (outstanding requests).
    pub inbox_high_watermark: usize,
    pub inbox_low_watermark: usize,
    /// Capacity of bounded event channels.
    pub bus_capacity: usize,
    pub retry: RetryConfig,
    pub oracle: OracleDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            haircut_bps: 5_000,
            overspend_alpha_bps: 2_000,
            withdrawal_cooldown_secs: 0,
            user_daily_cap: Money::ZERO,
            global_daily_cap: Money::ZERO,
            circuit_breaker_threshold: Money::ZERO,
            circuit_breaker_window_secs: 3_600,
            heartbeat_secs: 300,
            price_poll_secs: 10,
            netting_window_secs: 60,
            debounce_ms: 200,
            netting_fee_bps: 0,
            default_trigger_bps: 100,
            inbox_high_watermark: 256,
            inbox_low_watermark: 64,
            bus_capacity: 1_024,
            retry: RetryConfig::default(),
            oracle: OracleDefaults::default(),
        }
    }
}

/// Exponential backoff policy for transient settlement and venue failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First retry delay, milliseconds.
    pub base_ms: u64,
    /// Delay ceiling, milliseconds.
    pub cap_ms: u64,
    /// Attempts before the job is parked on the operator queue.
    pub max_retries: u32,
}

impl RetryConfig {
    /// Delay before retry attempt `attempt` (0-based): `min(base · 2^k, cap)`.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64 << attempt.min(32);
        self.base_ms.saturating_mul(factor).min(self.cap_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_ms: 250,
            cap_ms: 30_000,
            max_retries: 10,
        }
    }
}

/// Default oracle validation parameters applied to newly configured symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleDefaults {
    /// Reject fresh prices older than this, seconds.
    pub max_staleness_secs: u64,
    /// Reject fresh prices deviating from the reference by more, basis points.
    pub price_band_bps: u64,
    /// Accept the last valid price for at most this long, seconds.
    pub max_fallback_age_secs: u64,
}

impl Default for OracleDefaults {
    fn default() -> Self {
        Self {
            max_staleness_secs: 300,
            price_band_bps: 500,
            max_fallback_age_secs: 300,
        }
    }
}
