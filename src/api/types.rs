//! Wire types for the exchange, notifier and advisory APIs.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Bar;

/// Raw kline row from Binance `/api/v3/klines`:
/// `[open_time_ms, open, high, low, close, volume, close_time_ms, ...]`
/// with prices and volume as strings.
pub type KlineRow = Vec<Value>;

/// Raw candle row from Coinbase Exchange `/products/{id}/candles`:
/// `[time_s, low, high, open, close, volume]`, newest first.
pub type CandleRow = Vec<Value>;

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Convert a Binance kline row into a bar.
pub fn bar_from_kline(row: &[Value]) -> Option<Bar> {
    let open_ms = row.first()?.as_i64()?;
    Some(Bar {
        timestamp: Utc.timestamp_millis_opt(open_ms).single()?,
        open: number(row.get(1)?)?,
        high: number(row.get(2)?)?,
        low: number(row.get(3)?)?,
        close: number(row.get(4)?)?,
        volume: number(row.get(5)?)?,
    })
}

/// Convert a Coinbase candle row into a bar.
pub fn bar_from_candle(row: &[Value]) -> Option<Bar> {
    let time_s = row.first()?.as_i64()?;
    Some(Bar {
        timestamp: Utc.timestamp_opt(time_s, 0).single()?,
        low: number(row.get(1)?)?,
        high: number(row.get(2)?)?,
        open: number(row.get(3)?)?,
        close: number(row.get(4)?)?,
        volume: number(row.get(5)?)?,
    })
}

/// Response from Binance `POST /api/v3/order` (FULL response type).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub executed_qty: Decimal,
    #[serde(default, rename = "cummulativeQuoteQty")]
    pub cumulative_quote_qty: Decimal,
}

impl OrderResponse {
    /// Volume-weighted fill price, if anything was executed.
    pub fn average_price(&self) -> Option<Decimal> {
        if self.executed_qty > Decimal::ZERO {
            Some(self.cumulative_quote_qty / self.executed_qty)
        } else {
            None
        }
    }
}

/// Binance error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeError {
    pub code: i64,
    pub msg: String,
}

/// Telegram `sendMessage` request body.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessage<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    pub disable_web_page_preview: bool,
}

/// Chat-completions request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Chat-completions response (only the fields we read).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

impl ChatResponse {
    /// Text of the first choice.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kline_row() {
        let row: KlineRow = serde_json::from_str(
            r#"[1704067200000, "42000.10", "42100.00", "41950.5", "42050.0", "12.5", 1704067499999, "0", 10, "0", "0", "0"]"#,
        )
        .unwrap();

        let bar = bar_from_kline(&row).unwrap();
        assert_eq!(bar.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(bar.open, 42000.10);
        assert_eq!(bar.low, 41950.5);
        assert_eq!(bar.volume, 12.5);
    }

    #[test]
    fn test_candle_row_order() {
        let row: CandleRow = serde_json::from_str("[1704067200, 99.0, 105.0, 100.0, 104.0, 7.0]").unwrap();

        let bar = bar_from_candle(&row).unwrap();
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.high, 105.0);
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.close, 104.0);
    }

    #[test]
    fn test_malformed_rows() {
        assert!(bar_from_kline(&[]).is_none());
        let row: KlineRow = serde_json::from_str(r#"[1704067200000, "abc", "1", "1", "1", "1"]"#).unwrap();
        assert!(bar_from_kline(&row).is_none());
    }

    #[test]
    fn test_order_average_price() {
        let resp: OrderResponse = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","orderId":28,"clientOrderId":"x","status":"FILLED",
                "executedQty":"0.5","cummulativeQuoteQty":"50.0"}"#,
        )
        .unwrap();
        assert_eq!(resp.average_price(), Some(dec!(100)));
    }

    #[test]
    fn test_chat_content() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"72 - clean trend"}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.content(), Some("72 - clean trend"));
    }
}
