//! Order execution: paper fills for dry runs and signed Binance market orders.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::TradeSide;

use super::data_client::binance_symbol;
use super::types::{ExchangeError, OrderResponse};
use super::{Broker, Fill};

const BINANCE_API_BASE: &str = "https://api.binance.com";
const BINANCE_TESTNET_BASE: &str = "https://testnet.binance.vision";
const ORDER_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_WINDOW_MS: u64 = 5000;

type HmacSha256 = Hmac<Sha256>;

/// Simulated broker. Every order fills immediately at the caller's price.
#[derive(Debug, Clone, Default)]
pub struct PaperBroker;

impl PaperBroker {
    pub fn new() -> Self {
        Self
    }

    fn fill(symbol: &str, side: TradeSide, quantity: Decimal) -> Fill {
        info!(symbol = %symbol, side = side.as_str(), quantity = %quantity, "[PAPER] Market order");
        Fill {
            order_id: "paper".to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price: None,
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn buy(&self, symbol: &str, quantity: Decimal) -> Result<Fill> {
        Ok(Self::fill(symbol, TradeSide::Buy, quantity))
    }

    async fn sell(&self, symbol: &str, quantity: Decimal) -> Result<Fill> {
        Ok(Self::fill(symbol, TradeSide::Sell, quantity))
    }
}

/// Binance spot broker placing signed MARKET orders.
pub struct BinanceBroker {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceBroker {
    pub fn new(api_key: String, api_secret: String, testnet: bool) -> Result<Self> {
        let base = if testnet { BINANCE_TESTNET_BASE } else { BINANCE_API_BASE };
        Self::with_base_url(api_key, api_secret, base.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(api_key: String, api_secret: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(ORDER_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
            api_secret,
        })
    }

    /// Hex HMAC-SHA256 of the query string.
    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .context("Invalid API secret")?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn order_query(symbol: &str, side: TradeSide, quantity: Decimal, client_id: &str, timestamp_ms: i64) -> String {
        format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newClientOrderId={}&newOrderRespType=FULL&recvWindow={}&timestamp={}",
            binance_symbol(symbol),
            side.as_str(),
            quantity.round_dp(8).normalize(),
            client_id,
            RECV_WINDOW_MS,
            timestamp_ms
        )
    }

    async fn market_order(&self, symbol: &str, side: TradeSide, quantity: Decimal) -> Result<Fill> {
        if quantity <= Decimal::ZERO {
            anyhow::bail!("Order quantity must be positive, got {}", quantity);
        }

        let client_id = format!("tb-{}", Uuid::new_v4().simple());
        let query = Self::order_query(symbol, side, quantity, &client_id, Utc::now().timestamp_millis());
        let signature = self.sign(&query)?;
        let url = format!("{}/api/v3/order?{}&signature={}", self.base_url, query, signature);

        debug!(symbol = %symbol, side = side.as_str(), quantity = %quantity, "Submitting market order");

        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to submit order")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<ExchangeError>(&body) {
                anyhow::bail!("Order rejected: {} (code {})", err.msg, err.code);
            }
            anyhow::bail!("Order request failed: {} - {}", status, body);
        }

        let order: OrderResponse = response
            .json()
            .await
            .context("Failed to parse order response")?;

        info!(
            symbol = %order.symbol,
            order_id = order.order_id,
            status = %order.status,
            executed = %order.executed_qty,
            "Order filled"
        );

        Ok(Fill {
            order_id: order.order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity: if order.executed_qty > Decimal::ZERO { order.executed_qty } else { quantity },
            price: order.average_price(),
        })
    }
}

#[async_trait]
impl Broker for BinanceBroker {
    async fn buy(&self, symbol: &str, quantity: Decimal) -> Result<Fill> {
        self.market_order(symbol, TradeSide::Buy, quantity).await
    }

    async fn sell(&self, symbol: &str, quantity: Decimal) -> Result<Fill> {
        self.market_order(symbol, TradeSide::Sell, quantity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_fill_echoes_request() {
        let fill = PaperBroker::new().buy("BTC/USDT", dec!(0.25)).await.unwrap();
        assert_eq!(fill.order_id, "paper");
        assert_eq!(fill.side, TradeSide::Buy);
        assert_eq!(fill.quantity, dec!(0.25));
        assert_eq!(fill.price, None);
    }

    #[test]
    fn test_signature_known_vector() {
        // Example key pair and query from the Binance API documentation
        let broker = BinanceBroker::with_base_url(
            "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A".to_string(),
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j".to_string(),
            "http://localhost".to_string(),
        )
        .unwrap();

        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            broker.sign(query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_order_query() {
        let query = BinanceBroker::order_query("ETH/USDT", TradeSide::Sell, dec!(1.500), "tb-1", 42);
        assert!(query.starts_with("symbol=ETHUSDT&side=SELL&type=MARKET&quantity=1.5&"));
        assert!(query.ends_with("timestamp=42"));
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected_before_request() {
        let broker =
            BinanceBroker::with_base_url("k".to_string(), "s".to_string(), "http://localhost:1".to_string()).unwrap();
        let err = broker.sell("BTC/USDT", Decimal::ZERO).await.unwrap_err();
        assert!(err.to_string().contains("positive"));
    }
}
