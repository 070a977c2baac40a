//! Backpressure watermarks over the settlement pipeline.
//!
//! Venue event consumers stop pulling when the inflight gauge crosses the
//! high watermark and resume once it has drained below the low watermark,
//! so a slow ledger backs pressure up to the venues instead of growing
//! queues.

use std::time::Duration;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause/resume thresholds over an inflight-work gauge.
#[derive(Debug, Clone, Copy)]
pub struct Watermarks {
    pub high: usize,
    pub low: usize,
}

impl Watermarks {
    #[must_use]
    pub fn from_config(config: &crossvault_core::config::EngineConfig) -> Self {
        Self {
            high: config.inbox_high_watermark,
            low: config.inbox_low_watermark,
        }
    }

    /// Returns once the gauge admits more work: immediately while below the
    /// high watermark, otherwise after it drains to the low watermark.
    pub async fn wait_for_capacity(&self, gauge: impl Fn() -> usize) {
        if gauge() < self.high {
            return;
        }
        debug!(high = self.high, "backpressure engaged; pausing venue consumption");
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            if gauge() <= self.low {
                debug!(low = self.low, "backpressure released");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_below_high_watermark_passes_immediately() {
        let marks = Watermarks { high: 10, low: 2 };
        marks.wait_for_capacity(|| 9).await;
    }

    #[tokio::test]
    async fn test_waits_until_low_watermark() {
        let marks = Watermarks { high: 4, low: 1 };
        let gauge = Arc::new(AtomicUsize::new(8));

        let drainer = gauge.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if drainer.load(Ordering::SeqCst) > 0 {
                    drainer.fetch_sub(1, Ordering::SeqCst);
                }
            }
        });

        let reader = gauge.clone();
        marks.wait_for_capacity(move || reader.load(Ordering::SeqCst)).await;
        assert!(gauge.load(Ordering::SeqCst) <= 1);
    }
}
