//! Read-only market-data clients for Binance and Coinbase Exchange.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::models::Bar;

use super::types::{bar_from_candle, bar_from_kline, CandleRow, KlineRow};
use super::MarketData;

const BINANCE_API_BASE: &str = "https://api.binance.com";
const BINANCE_TESTNET_BASE: &str = "https://testnet.binance.vision";
const COINBASE_API_BASE: &str = "https://api.exchange.coinbase.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(20);
/// Coinbase returns at most this many candles per request.
const COINBASE_MAX_CANDLES: u32 = 300;

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .user_agent(concat!("tradebot/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}

/// GET a JSON document, retrying transient failures with exponential backoff.
/// Client errors other than 429 are not retried.
async fn get_json_with_retry<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_elapsed_time(Some(MAX_RETRY_ELAPSED))
        .build();

    backoff::future::retry(policy, || async {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(anyhow!(e).context("Request failed")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = anyhow!("Request failed: {} - {}", status, body);
            if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                return Err(backoff::Error::permanent(err));
            }
            warn!(status = %status, url = %url, "Transient market-data error, retrying");
            return Err(backoff::Error::transient(err));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| backoff::Error::permanent(anyhow!(e).context("Failed to parse response")))
    })
    .await
}

/// Binance spot klines.
pub struct BinanceData {
    client: Client,
    base_url: String,
}

impl BinanceData {
    pub fn new(testnet: bool) -> Result<Self> {
        let base = if testnet { BINANCE_TESTNET_BASE } else { BINANCE_API_BASE };
        Self::with_base_url(base.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url,
        })
    }
}

/// `BTC/USDT` -> `BTCUSDT`
pub(crate) fn binance_symbol(symbol: &str) -> String {
    symbol.replace(['/', '-'], "").to_uppercase()
}

#[async_trait]
impl MarketData for BinanceData {
    async fn get_bars(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            binance_symbol(symbol),
            timeframe,
            limit.min(1000)
        );
        debug!(url = %url, "Fetching klines");

        let rows: Vec<KlineRow> = get_json_with_retry(&self.client, &url)
            .await
            .with_context(|| format!("Failed to fetch klines for {}", symbol))?;

        let bars: Vec<Bar> = rows.iter().filter_map(|r| bar_from_kline(r)).collect();
        if bars.is_empty() {
            anyhow::bail!("No bars returned for {} {}", symbol, timeframe);
        }
        Ok(bars)
    }
}

/// Coinbase Exchange public candles.
pub struct CoinbaseData {
    client: Client,
    base_url: String,
}

impl CoinbaseData {
    pub fn new() -> Result<Self> {
        Self::with_base_url(COINBASE_API_BASE.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url,
        })
    }
}

/// `BTC/USDT` -> `BTC-USDT`
pub(crate) fn coinbase_product(symbol: &str) -> String {
    symbol.replace('/', "-").to_uppercase()
}

/// Candle granularity in seconds for the timeframes Coinbase supports.
pub(crate) fn coinbase_granularity(timeframe: &str) -> Option<u32> {
    match timeframe {
        "1m" => Some(60),
        "5m" => Some(300),
        "15m" => Some(900),
        "1h" => Some(3600),
        "6h" => Some(21600),
        "1d" => Some(86400),
        _ => None,
    }
}

#[async_trait]
impl MarketData for CoinbaseData {
    async fn get_bars(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Bar>> {
        let granularity = coinbase_granularity(timeframe)
            .ok_or_else(|| anyhow!("Unsupported Coinbase timeframe: {}", timeframe))?;
        let url = format!(
            "{}/products/{}/candles?granularity={}",
            self.base_url,
            coinbase_product(symbol),
            granularity
        );
        debug!(url = %url, "Fetching candles");

        let rows: Vec<CandleRow> = get_json_with_retry(&self.client, &url)
            .await
            .with_context(|| format!("Failed to fetch candles for {}", symbol))?;

        // Newest first on the wire
        let mut bars: Vec<Bar> = rows.iter().filter_map(|r| bar_from_candle(r)).collect();
        bars.sort_by_key(|b| b.timestamp);

        let keep = limit.min(COINBASE_MAX_CANDLES) as usize;
        if bars.len() > keep {
            bars.drain(..bars.len() - keep);
        }
        if bars.is_empty() {
            anyhow::bail!("No bars returned for {} {}", symbol, timeframe);
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_mapping() {
        assert_eq!(binance_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(binance_symbol("eth-usdt"), "ETHUSDT");
        assert_eq!(coinbase_product("BTC/USD"), "BTC-USD");
    }

    #[test]
    fn test_granularity() {
        assert_eq!(coinbase_granularity("5m"), Some(300));
        assert_eq!(coinbase_granularity("1h"), Some(3600));
        assert_eq!(coinbase_granularity("4h"), None);
    }

    #[test]
    fn test_clients_build() {
        assert!(BinanceData::new(true).is_ok());
        assert!(CoinbaseData::new().is_ok());
    }
}
