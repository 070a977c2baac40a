//! Validation pipeline: staleness, deviation band, last-good-price fallback.

use crate::feed::{PriceFetcher, RawSample};
use crossvault_core::clock::SharedClock;
use crossvault_core::fixed::{deviation_bps, Price};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Validation parameters for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolConfig {
    /// Reject fresh prices older than this, seconds.
    pub max_staleness_secs: u64,
    /// Reject fresh prices deviating from the reference by more, basis points.
    pub price_band_bps: u64,
    /// Accept the last valid price for at most this long, seconds.
    pub max_fallback_age_secs: u64,
}

impl From<&crossvault_core::config::OracleDefaults> for SymbolConfig {
    fn from(defaults: &crossvault_core::config::OracleDefaults) -> Self {
        Self {
            max_staleness_secs: defaults.max_staleness_secs,
            price_band_bps: defaults.price_band_bps,
            max_fallback_age_secs: defaults.max_fallback_age_secs,
        }
    }
}

/// A price that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedPrice {
    pub price: Price,
    /// Publish time of the returned price, seconds.
    pub timestamp: u64,
    pub used_fallback: bool,
}

/// Oracle failures surfaced to guarded primitives and the equity engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("no oracle configured for {symbol}")]
    NotConfigured { symbol: String },

    #[error("price for {symbol} is stale")]
    PriceStale { symbol: String },

    #[error("price for {symbol} deviates {deviation_bps} bps from reference")]
    PriceOutsideBand { symbol: String, deviation_bps: u64 },

    #[error("invalid price for {symbol}")]
    InvalidPrice { symbol: String },

    #[error("no price source available for {symbol}")]
    Unavailable { symbol: String },
}

/// Why the fresh path produced nothing usable; decides the terminal error
/// when the fallback is also exhausted.
enum FreshRejection {
    Absent,
    Stale,
    OutsideBand { deviation_bps: u64 },
    Invalid,
}

#[derive(Debug, Default, Clone, Copy)]
struct SymbolState {
    /// Operator-set band anchor; zero means unset.
    reference_price: Price,
    reference_time: u64,
    /// Last price that passed a full operator refresh; zero means unset.
    last_valid_price: Price,
    last_valid_time: u64,
}

struct SymbolEntry {
    config: RwLock<SymbolConfig>,
    state: RwLock<SymbolState>,
    fetcher: Arc<dyn PriceFetcher>,
}

/// Validates prices for all configured symbols. Per-symbol state sits behind
/// its own guard; fetches never hold a lock.
pub struct PriceOracle {
    clock: SharedClock,
    symbols: RwLock<HashMap<String, Arc<SymbolEntry>>>,
}

impl PriceOracle {
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            symbols: RwLock::new(HashMap::new()),
        }
    }

    /// Registers or replaces the feed and parameters for a symbol.
    pub fn configure_symbol(
        &self,
        symbol: impl Into<String>,
        config: SymbolConfig,
        fetcher: Arc<dyn PriceFetcher>,
    ) {
        let symbol = symbol.into();
        info!(symbol = %symbol, "oracle symbol configured");
        self.symbols.write().insert(
            symbol,
            Arc::new(SymbolEntry {
                config: RwLock::new(config),
                state: RwLock::new(SymbolState::default()),
                fetcher,
            }),
        );
    }

    /// Updates validation parameters without touching feed or state.
    ///
    /// # Errors
    /// Returns `NotConfigured` for an unknown symbol.
    pub fn set_params(&self, symbol: &str, config: SymbolConfig) -> Result<(), OracleError> {
        let entry = self.entry(symbol)?;
        *entry.config.write() = config;
        Ok(())
    }

    /// Symbols currently configured.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().keys().cloned().collect()
    }

    /// Fetches and validates a price for `symbol`.
    ///
    /// A fresh fetch is attempted first; fetch failures are treated as "no
    /// fresh price", never propagated. A fresh price must pass staleness and,
    /// when a reference exists, the deviation band. On rejection or absence
    /// the last good price is returned while younger than the fallback age.
    ///
    /// # Errors
    /// Returns the fresh-path rejection (`PriceStale`, `PriceOutsideBand`,
    /// `InvalidPrice`) or `Unavailable` once the fallback is exhausted.
    pub async fn get_validated_price(&self, symbol: &str) -> Result<ValidatedPrice, OracleError> {
        let entry = self.entry(symbol)?;
        let config = *entry.config.read();
        let now = self.clock.now();

        let rejection = match entry.fetcher.fetch(symbol).await {
            Ok(sample) => match self.validate_fresh(symbol, &entry, &config, now, sample) {
                Ok(validated) => return Ok(validated),
                Err(rejection) => rejection,
            },
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "feed fetch failed");
                FreshRejection::Absent
            }
        };

        let state = *entry.state.read();
        if !state.last_valid_price.is_zero()
            && now.saturating_sub(state.last_valid_time) <= config.max_fallback_age_secs
        {
            let age = now.saturating_sub(state.last_valid_time);
            if age * 2 > config.max_fallback_age_secs {
                warn!(symbol = %symbol, age_secs = age, "serving aging fallback price");
            }
            return Ok(ValidatedPrice {
                price: state.last_valid_price,
                timestamp: state.last_valid_time,
                used_fallback: true,
            });
        }

        Err(match rejection {
            FreshRejection::Stale => OracleError::PriceStale {
                symbol: symbol.to_string(),
            },
            FreshRejection::OutsideBand { deviation_bps } => OracleError::PriceOutsideBand {
                symbol: symbol.to_string(),
                deviation_bps,
            },
            FreshRejection::Invalid => OracleError::InvalidPrice {
                symbol: symbol.to_string(),
            },
            FreshRejection::Absent => OracleError::Unavailable {
                symbol: symbol.to_string(),
            },
        })
    }

    /// Operator refresh: fetch fresh, and on success store both the band
    /// reference and the fallback price. This is the only writer of either;
    /// the regular validation path never updates them.
    ///
    /// # Errors
    /// Returns `Unavailable` when the fetch fails, `InvalidPrice` for an
    /// unusable answer, and `PriceStale` when the fresh sample is too old to
    /// anchor a reference.
    pub async fn refresh_reference(&self, symbol: &str) -> Result<ValidatedPrice, OracleError> {
        let entry = self.entry(symbol)?;
        let config = *entry.config.read();
        let now = self.clock.now();

        let sample = entry
            .fetcher
            .fetch(symbol)
            .await
            .map_err(|e| {
                warn!(symbol = %symbol, error = %e, "reference refresh fetch failed");
                OracleError::Unavailable {
                    symbol: symbol.to_string(),
                }
            })?;

        let price = sample.normalize().map_err(|_| OracleError::InvalidPrice {
            symbol: symbol.to_string(),
        })?;

        if now.saturating_sub(sample.publish_time) > config.max_staleness_secs {
            return Err(OracleError::PriceStale {
                symbol: symbol.to_string(),
            });
        }

        let mut state = entry.state.write();
        state.reference_price = price;
        state.reference_time = sample.publish_time;
        state.last_valid_price = price;
        state.last_valid_time = sample.publish_time;
        info!(symbol = %symbol, price = %price, "reference price refreshed");

        Ok(ValidatedPrice {
            price,
            timestamp: sample.publish_time,
            used_fallback: false,
        })
    }

    fn validate_fresh(
        &self,
        symbol: &str,
        entry: &SymbolEntry,
        config: &SymbolConfig,
        now: u64,
        sample: RawSample,
    ) -> Result<ValidatedPrice, FreshRejection> {
        let price = match sample.normalize() {
            Ok(p) => p,
            Err(_) => {
                warn!(symbol = %symbol, value = sample.value, "feed produced invalid price");
                return Err(FreshRejection::Invalid);
            }
        };

        if now.saturating_sub(sample.publish_time) > config.max_staleness_secs {
            return Err(FreshRejection::Stale);
        }

        let reference = entry.state.read().reference_price;
        if !reference.is_zero() {
            // Reference is nonzero, so deviation_bps cannot fail.
            let deviation = deviation_bps(price, reference).unwrap_or(u64::MAX);
            if deviation > config.price_band_bps {
                warn!(
                    symbol = %symbol,
                    deviation_bps = deviation,
                    band_bps = config.price_band_bps,
                    "fresh price outside band"
                );
                return Err(FreshRejection::OutsideBand {
                    deviation_bps: deviation,
                });
            }
        }

        Ok(ValidatedPrice {
            price,
            timestamp: sample.publish_time,
            used_fallback: false,
        })
    }

    fn entry(&self, symbol: &str) -> Result<Arc<SymbolEntry>, OracleError> {
        self.symbols
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| OracleError::NotConfigured {
                symbol: symbol.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedError, MockFeed};
    use crossvault_core::clock::SimClock;

    const NOW: u64 = 1_700_000_000;

    fn setup() -> (Arc<SimClock>, PriceOracle, Arc<MockFeed>) {
        let clock = Arc::new(SimClock::new(NOW));
        let oracle = PriceOracle::new(clock.clone());
        let feed = Arc::new(MockFeed::new());
        oracle.configure_symbol(
            "BTC",
            SymbolConfig {
                max_staleness_secs: 300,
                price_band_bps: 500,
                max_fallback_age_secs: 300,
            },
            feed.clone(),
        );
        (clock, oracle, feed)
    }

    fn price(whole: u64) -> Price {
        Price::from_whole(whole).unwrap()
    }

    // ==================== Fresh Path Tests ====================

    #[tokio::test]
    async fn test_fresh_price_accepted() {
        let (_, oracle, feed) = setup();
        feed.push_price(price(65_000), NOW - 10);

        let validated = oracle.get_validated_price("BTC").await.unwrap();
        assert_eq!(validated.price, price(65_000));
        assert_eq!(validated.timestamp, NOW - 10);
        assert!(!validated.used_fallback);
    }

    #[tokio::test]
    async fn test_stale_fresh_price_rejected() {
        let (_, oracle, feed) = setup();
        feed.push_price(price(65_000), NOW - 301);

        let err = oracle.get_validated_price("BTC").await.unwrap_err();
        assert_eq!(
            err,
            OracleError::PriceStale {
                symbol: "BTC".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_band_rejection_requires_reference() {
        let (_, oracle, feed) = setup();
        // No reference set: any finite deviation passes.
        feed.push_price(price(65_000), NOW);
        oracle.get_validated_price("BTC").await.unwrap();

        // Anchor the reference at 65_000.
        feed.push_price(price(65_000), NOW);
        oracle.refresh_reference("BTC").await.unwrap();

        // 6% move violates the 5% band.
        feed.push_price(price(68_900), NOW);
        let err = oracle.get_validated_price("BTC").await.unwrap_err();
        match err {
            OracleError::PriceOutsideBand { deviation_bps, .. } => {
                assert_eq!(deviation_bps, 600);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_band_boundary_is_inclusive() {
        let (_, oracle, feed) = setup();
        feed.push_price(price(10_000), NOW);
        oracle.refresh_reference("BTC").await.unwrap();

        // Exactly 5% deviation: allowed (rejection is strict).
        feed.push_price(price(10_500), NOW);
        let validated = oracle.get_validated_price("BTC").await.unwrap();
        assert_eq!(validated.price, price(10_500));
    }

    // ==================== Fallback Tests ====================

    #[tokio::test]
    async fn test_fallback_on_fetch_failure() {
        let (clock, oracle, feed) = setup();
        feed.push_price(price(65_000), NOW);
        oracle.refresh_reference("BTC").await.unwrap();

        clock.advance(100);
        feed.push_error(FeedError::Transport("reset".to_string()));
        let validated = oracle.get_validated_price("BTC").await.unwrap();
        assert!(validated.used_fallback);
        assert_eq!(validated.price, price(65_000));
        assert_eq!(validated.timestamp, NOW);
    }

    #[tokio::test]
    async fn test_fallback_at_exact_max_age_succeeds() {
        let (clock, oracle, feed) = setup();
        feed.push_price(price(65_000), NOW);
        oracle.refresh_reference("BTC").await.unwrap();

        clock.set(NOW + 300);
        feed.push_error(FeedError::NoData);
        let validated = oracle.get_validated_price("BTC").await.unwrap();
        assert!(validated.used_fallback);
    }

    #[tokio::test]
    async fn test_fallback_beyond_max_age_fails() {
        let (clock, oracle, feed) = setup();
        feed.push_price(price(65_000), NOW);
        oracle.refresh_reference("BTC").await.unwrap();

        clock.set(NOW + 301);
        feed.push_error(FeedError::NoData);
        let err = oracle.get_validated_price("BTC").await.unwrap_err();
        assert_eq!(
            err,
            OracleError::Unavailable {
                symbol: "BTC".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_validated_price_does_not_refresh_fallback() {
        let (clock, oracle, feed) = setup();
        feed.push_price(price(65_000), NOW);
        oracle.refresh_reference("BTC").await.unwrap();

        // A later fresh read succeeds but must not move last_valid.
        clock.set(NOW + 200);
        feed.push_price(price(65_100), NOW + 200);
        oracle.get_validated_price("BTC").await.unwrap();

        // At NOW + 301 the original anchor is beyond fallback age even though
        // a fresh price validated at NOW + 200.
        clock.set(NOW + 301);
        feed.push_error(FeedError::NoData);
        assert!(oracle.get_validated_price("BTC").await.is_err());
    }

    // ==================== Error Surface Tests ====================

    #[tokio::test]
    async fn test_not_configured() {
        let clock = Arc::new(SimClock::new(NOW));
        let oracle = PriceOracle::new(clock);
        let err = oracle.get_validated_price("ETH").await.unwrap_err();
        assert_eq!(
            err,
            OracleError::NotConfigured {
                symbol: "ETH".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_price_surfaces_without_fallback() {
        let (_, oracle, feed) = setup();
        feed.push(crate::feed::RawSample {
            value: -1,
            scale: crate::feed::FeedScale::Decimals(8),
            publish_time: NOW,
        });
        let err = oracle.get_validated_price("BTC").await.unwrap_err();
        assert_eq!(
            err,
            OracleError::InvalidPrice {
                symbol: "BTC".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_refresh_rejects_stale_sample() {
        let (_, oracle, feed) = setup();
        feed.push_price(price(65_000), NOW - 400);
        let err = oracle.refresh_reference("BTC").await.unwrap_err();
        assert_eq!(
            err,
            OracleError::PriceStale {
                symbol: "BTC".to_string()
            }
        );
    }
}
