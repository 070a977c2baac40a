//! Feed abstraction: raw samples in feed-native scales.

use async_trait::async_trait;
use crossvault_core::fixed::{self, FixedPointError, Price};
use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;

/// How a feed expresses its price scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScale {
    /// Aggregator-style: a signed answer quoted at a fixed decimal count.
    Decimals(u32),
    /// Expo-style: a signed answer with a signed power-of-ten exponent.
    Expo(i32),
}

/// One raw observation from a feed, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub value: i128,
    pub scale: FeedScale,
    /// Feed publish time, unix seconds.
    pub publish_time: u64,
}

impl RawSample {
    /// Normalizes into a 10^8 price.
    ///
    /// # Errors
    /// Returns `NonPositive` for answers ≤ 0 and `Overflow` when the scaled
    /// price does not fit.
    pub fn normalize(&self) -> Result<Price, FixedPointError> {
        match self.scale {
            FeedScale::Decimals(d) => fixed::normalize_decimals(self.value, d),
            FeedScale::Expo(e) => fixed::normalize_expo(self.value, e),
        }
    }
}

/// Failures fetching from a feed. These never reach callers of the oracle;
/// the validation pipeline absorbs them into "no fresh price".
#[derive(Error, Debug, Clone)]
pub enum FeedError {
    #[error("feed transport error: {0}")]
    Transport(String),

    #[error("malformed feed payload: {0}")]
    Malformed(String),

    #[error("feed returned no data")]
    NoData,
}

/// A price source for one or more symbols.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    async fn fetch(&self, symbol: &str) -> Result<RawSample, FeedError>;
}

/// Scripted in-memory feed for tests and the demo runner: pops queued
/// samples, then keeps returning the last one; an empty queue errors.
#[derive(Default)]
pub struct MockFeed {
    queue: Mutex<VecDeque<Result<RawSample, FeedError>>>,
    last: Mutex<Option<RawSample>>,
}

impl MockFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a sample to return on a future fetch.
    pub fn push(&self, sample: RawSample) {
        self.queue.lock().push_back(Ok(sample));
    }

    /// Queues a fetch failure.
    pub fn push_error(&self, error: FeedError) {
        self.queue.lock().push_back(Err(error));
    }

    /// Convenience: queues an 8-decimal sample.
    pub fn push_price(&self, price: Price, publish_time: u64) {
        self.push(RawSample {
            value: i128::from(price.units()),
            scale: FeedScale::Decimals(8),
            publish_time,
        });
    }
}

#[async_trait]
impl PriceFetcher for MockFeed {
    async fn fetch(&self, _symbol: &str) -> Result<RawSample, FeedError> {
        if let Some(next) = self.queue.lock().pop_front() {
            if let Ok(sample) = next {
                *self.last.lock() = Some(sample);
                return Ok(sample);
            }
            return next;
        }
        self.last.lock().ok_or(FeedError::NoData)
    }
}
