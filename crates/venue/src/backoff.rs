//! Exponential backoff for venue sessions.

use crate::adapter::{VenueAdapter, VenueError};
use std::time::Duration;
use tracing::{info, warn};

/// Doubling delay with a ceiling and an attempt budget.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
        }
    }

    /// The venue reconnect policy: 1 s doubling to a 30 s cap, 10 attempts.
    #[must_use]
    pub fn for_reconnect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 10)
    }

    /// The delay before the next attempt, or `None` once the budget is
    /// spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32 << self.attempt.min(16);
        self.attempt += 1;
        Some(self.base.saturating_mul(factor).min(self.cap))
    }

    /// Resets the budget after a successful attempt.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    #[must_use]
    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }
}

/// Connects a venue, retrying transient failures under `backoff`. Fatal
/// failures and an exhausted budget surface immediately.
///
/// # Errors
/// Returns the last failure once the budget is spent or a fatal error is
/// seen.
pub async fn connect_with_backoff(
    adapter: &dyn VenueAdapter,
    symbols: &[String],
    mut backoff: Backoff,
) -> Result<(), VenueError> {
    loop {
        match adapter.connect(symbols).await {
            Ok(()) => {
                info!(venue = %adapter.venue_id(), "venue connected");
                return Ok(());
            }
            Err(e) if e.is_transient() => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        venue = %adapter.venue_id(),
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "venue connect failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(venue = %adapter.venue_id(), error = %e, "venue connect budget spent");
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}
