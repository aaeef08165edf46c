//! External collaborators: market data, order execution, notifications and
//! the advisory grader. The engine only sees the traits defined here.

mod broker;
mod data_client;
mod llm_client;
mod notifier;
mod types;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{Bar, TradeSide};
use crate::signals::Features;

pub use broker::{BinanceBroker, PaperBroker};
pub use data_client::{BinanceData, CoinbaseData};
pub use llm_client::OpenAiGrader;
pub use notifier::{NullNotifier, TelegramNotifier};

/// Recent OHLCV bars for a symbol, oldest first.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_bars(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Bar>>;
}

/// Market-order execution.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn buy(&self, symbol: &str, quantity: Decimal) -> Result<Fill>;
    async fn sell(&self, symbol: &str, quantity: Decimal) -> Result<Fill>;
}

/// Best-effort human notifications. Failures never reach the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Second-opinion momentum grade.
#[async_trait]
pub trait AdvisoryGrader: Send + Sync {
    async fn grade(&self, features: &Features) -> Result<AdvisoryGrade>;
}

/// Broker acknowledgement of a market order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    /// Average fill price when the venue reports one
    pub price: Option<Decimal>,
}

/// Score (0..100) and free-text reasoning from the advisory grader.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryGrade {
    pub score: f64,
    pub rationale: String,
}
