//! Live feed clients.
//!
//! `AggregatorRpcFeed` reads a Chainlink-compatible aggregator contract via
//! JSON-RPC `eth_call`; `ExpoRestFeed` reads a Pyth-Hermes-style REST
//! endpoint. Both return raw samples; normalization and validation happen in
//! the oracle.

use crate::feed::{FeedError, FeedScale, PriceFetcher, RawSample};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

/// Function selector for `latestRoundData()`.
/// Returns `(uint80 roundId, int256 answer, uint256 startedAt,
/// uint256 updatedAt, uint80 answeredInRound)`.
const LATEST_ROUND_DATA_SELECTOR: &str = "0xfeaf968c";

/// Chainlink-style aggregator feed over JSON-RPC.
#[derive(Debug, Clone)]
pub struct AggregatorRpcFeed {
    client: reqwest::Client,
    rpc_url: String,
    /// Symbol -> aggregator contract address.
    contracts: HashMap<String, String>,
    /// Answer decimals (8 for the USD aggregators).
    decimals: u32,
}

impl AggregatorRpcFeed {
    #[must_use]
    pub fn new(rpc_url: impl Into<String>, decimals: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
            contracts: HashMap::new(),
            decimals,
        }
    }

    /// Registers the aggregator contract serving a symbol.
    #[must_use]
    pub fn with_contract(mut self, symbol: impl Into<String>, address: impl Into<String>) -> Self {
        self.contracts.insert(symbol.into(), address.into());
        self
    }

    /// Parses the hex-encoded `latestRoundData()` return value. Layout is
    /// five 32-byte words; the answer is word 1 and `updatedAt` word 3.
    fn parse_round_data(&self, hex_data: &str) -> Result<RawSample, FeedError> {
        let data = hex_data.strip_prefix("0x").unwrap_or(hex_data);
        if data.len() < 320 {
            return Err(FeedError::Malformed(format!(
                "round data length {} < 320",
                data.len()
            )));
        }
        let answer = i128::from_str_radix(&data[64..128], 16)
            .map_err(|e| FeedError::Malformed(format!("answer: {e}")))?;
        let updated_at = u64::from_str_radix(data[192..256].trim_start_matches('0'), 16)
            .unwrap_or(0);
        Ok(RawSample {
            value: answer,
            scale: FeedScale::Decimals(self.decimals),
            publish_time: updated_at,
        })
    }
}

#[async_trait]
impl PriceFetcher for AggregatorRpcFeed {
    async fn fetch(&self, symbol: &str) -> Result<RawSample, FeedError> {
        let contract = self
            .contracts
            .get(symbol)
            .ok_or_else(|| FeedError::NoData)?;
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_call",
            "params": [{
                "to": contract,
                "data": LATEST_ROUND_DATA_SELECTOR
            }, "latest"],
            "id": 1
        });

        let response: RpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(FeedError::Transport(format!(
                "rpc error {}: {}",
                error.code, error.message
            )));
        }
        let result = response.result.ok_or(FeedError::NoData)?;
        self.parse_round_data(&result)
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Pyth-Hermes-style REST feed: signed price with signed exponent.
#[derive(Debug, Clone)]
pub struct ExpoRestFeed {
    client: reqwest::Client,
    base_url: String,
    /// Symbol -> hex feed id.
    feed_ids: HashMap<String, String>,
}

impl ExpoRestFeed {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            feed_ids: HashMap::new(),
        }
    }

    /// Registers the feed id serving a symbol.
    #[must_use]
    pub fn with_feed_id(mut self, symbol: impl Into<String>, feed_id: impl Into<String>) -> Self {
        self.feed_ids.insert(symbol.into(), feed_id.into());
        self
    }
}

#[async_trait]
impl PriceFetcher for ExpoRestFeed {
    async fn fetch(&self, symbol: &str) -> Result<RawSample, FeedError> {
        let feed_id = self.feed_ids.get(symbol).ok_or(FeedError::NoData)?;
        let url = format!("{}/v2/updates/price/latest", self.base_url);

        let response: HermesResponse = self
            .client
            .get(&url)
            .query(&[("ids[]", feed_id.as_str()), ("parsed", "true")])
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let parsed = response.parsed.first().ok_or(FeedError::NoData)?;
        let value: i128 = parsed
            .price
            .price
            .parse()
            .map_err(|e| FeedError::Malformed(format!("price: {e}")))?;
        Ok(RawSample {
            value,
            scale: FeedScale::Expo(parsed.price.expo),
            publish_time: parsed.price.publish_time,
        })
    }
}

#[derive(Debug, Deserialize)]
struct HermesResponse {
    parsed: Vec<HermesParsed>,
}

#[derive(Debug, Deserialize)]
struct HermesParsed {
    price: HermesPrice,
}

#[derive(Debug, Deserialize)]
struct HermesPrice {
    /// Integer price as a decimal string.
    price: String,
    expo: i32,
    publish_time: u64,
}
