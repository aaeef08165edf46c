//! Ledger store: the persisted account state plus append-only journals.
//!
//! Tables:
//! - `account_state`: singleton row holding the whole account state as JSON,
//!   read once and written once per run
//! - `trades`: one row per BUY or SELL
//! - `equity_curve`: one row per equity snapshot
//! - `ai_decisions`: one audit row per symbol per run
//!
//! The store performs no compare-and-swap. Concurrent runs against the same
//! database are excluded by [`RunLock`].

mod lock;

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{AccountState, EquitySnapshot, ExitReason, TradeRecord, TradeSide};

pub use lock::RunLock;

/// SQLite-backed ledger.
pub struct LedgerStore {
    pool: SqlitePool,
}

/// Stored trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: i64,
    pub timestamp: String,
    pub side: String,
    pub symbol: String,
    pub quantity: String,
    pub price: String,
    pub pnl_fractional: Option<String>,
    pub pnl_absolute: Option<String>,
    pub note: String,
    pub exit_reason: Option<String>,
}

/// Stored equity row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredEquity {
    pub id: i64,
    pub timestamp: String,
    pub equity_estimate: String,
    pub net_deposits: String,
    pub realized_pnl_fractional: String,
    pub note: String,
}

/// Audit row describing what the advisory collaborators said for a symbol.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AiDecisionRecord {
    pub timestamp: String,
    pub symbol: String,
    pub price: f64,
    pub score: f64,
    pub confidence: f64,
    pub passed: bool,
    pub source: String,
    pub pattern: String,
    pub ta_buy: bool,
    pub ta_sell: bool,
    pub note: String,
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Invalid decimal in {}: {}", field, raw))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}", raw))
}

impl TryFrom<StoredTrade> for TradeRecord {
    type Error = anyhow::Error;

    fn try_from(row: StoredTrade) -> Result<Self> {
        let side = match row.side.as_str() {
            "BUY" => TradeSide::Buy,
            "SELL" => TradeSide::Sell,
            other => anyhow::bail!("Unknown trade side in journal: {}", other),
        };
        let exit_reason = match row.exit_reason.as_deref() {
            Some("TP") => Some(ExitReason::TakeProfit),
            Some("SL") => Some(ExitReason::StopLoss),
            _ => None,
        };

        Ok(TradeRecord {
            timestamp: parse_timestamp(&row.timestamp)?,
            side,
            symbol: row.symbol,
            quantity: parse_decimal(&row.quantity, "quantity")?,
            price: parse_decimal(&row.price, "price")?,
            pnl_fractional: row
                .pnl_fractional
                .as_deref()
                .map(|v| parse_decimal(v, "pnl_fractional"))
                .transpose()?,
            pnl_absolute: row
                .pnl_absolute
                .as_deref()
                .map(|v| parse_decimal(v, "pnl_absolute"))
                .transpose()?,
            note: row.note,
            exit_reason,
        })
    }
}

impl TryFrom<StoredEquity> for EquitySnapshot {
    type Error = anyhow::Error;

    fn try_from(row: StoredEquity) -> Result<Self> {
        Ok(EquitySnapshot {
            timestamp: parse_timestamp(&row.timestamp)?,
            equity_estimate: parse_decimal(&row.equity_estimate, "equity_estimate")?,
            net_deposits: parse_decimal(&row.net_deposits, "net_deposits")?,
            realized_pnl_fractional: parse_decimal(&row.realized_pnl_fractional, "realized_pnl_fractional")?,
            note: row.note,
        })
    }
}

impl LedgerStore {
    /// Open (and migrate) the ledger database.
    ///
    /// A single connection is kept for the whole run; `sqlite::memory:` URLs
    /// therefore behave like a private database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open ledger database {}", database_url))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                side TEXT NOT NULL,
                symbol TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                pnl_fractional TEXT,
                pnl_absolute TEXT,
                note TEXT NOT NULL DEFAULT '',
                exit_reason TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_curve (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                equity_estimate TEXT NOT NULL,
                net_deposits TEXT NOT NULL,
                realized_pnl_fractional TEXT NOT NULL,
                note TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ai_decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                price REAL NOT NULL,
                score REAL NOT NULL,
                confidence REAL NOT NULL,
                passed INTEGER NOT NULL,
                source TEXT NOT NULL,
                pattern TEXT NOT NULL,
                ta_buy INTEGER NOT NULL,
                ta_sell INTEGER NOT NULL,
                note TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Account State ====================

    /// Load the account state. A missing row yields a fresh state; an
    /// unparsable document is an error, never a silent reset.
    pub async fn load_state(&self) -> Result<AccountState> {
        let row: Option<(String,)> = sqlx::query_as("SELECT document FROM account_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read account state")?;

        match row {
            None => Ok(AccountState::default()),
            Some((document,)) => serde_json::from_str(document.trim_start_matches('\u{feff}'))
                .context("Account state is corrupt; refusing to start from a fresh ledger"),
        }
    }

    /// Replace the account state document.
    pub async fn save_state(&self, state: &AccountState) -> Result<()> {
        let document = serde_json::to_string_pretty(state).context("Failed to serialize account state")?;

        sqlx::query(
            r#"
            INSERT INTO account_state (id, document, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(document)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to write account state")?;

        Ok(())
    }

    // ==================== Trade Journal ====================

    /// Append one trade row.
    pub async fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades
                (timestamp, side, symbol, quantity, price, pnl_fractional, pnl_absolute, note, exit_reason)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.timestamp.to_rfc3339())
        .bind(trade.side.as_str())
        .bind(&trade.symbol)
        .bind(trade.quantity.to_string())
        .bind(trade.price.to_string())
        .bind(trade.pnl_fractional.map(|v| v.to_string()))
        .bind(trade.pnl_absolute.map(|v| v.to_string()))
        .bind(&trade.note)
        .bind(trade.exit_reason.map(|r| r.as_str()))
        .execute(&self.pool)
        .await
        .context("Failed to append trade")?;

        Ok(())
    }

    /// Most recent trades, newest first.
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query_as::<_, StoredTrade>("SELECT * FROM trades ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch trades")?;

        rows.into_iter().map(TradeRecord::try_from).collect()
    }

    /// Sum of absolute P&L over every SELL row in the journal.
    pub async fn journal_realized_pnl(&self) -> Result<Decimal> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT pnl_absolute FROM trades WHERE side = 'SELL' AND pnl_absolute IS NOT NULL")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch realized P&L")?;

        let mut total = Decimal::ZERO;
        for (value,) in &rows {
            total += parse_decimal(value, "pnl_absolute")?;
        }
        Ok(total)
    }

    // ==================== Equity Journal ====================

    /// Append one equity snapshot.
    pub async fn append_equity(&self, snapshot: &EquitySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO equity_curve (timestamp, equity_estimate, net_deposits, realized_pnl_fractional, note)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.timestamp.to_rfc3339())
        .bind(snapshot.equity_estimate.to_string())
        .bind(snapshot.net_deposits.to_string())
        .bind(snapshot.realized_pnl_fractional.to_string())
        .bind(&snapshot.note)
        .execute(&self.pool)
        .await
        .context("Failed to append equity snapshot")?;

        Ok(())
    }

    /// Most recent equity snapshots, newest first.
    pub async fn equity_curve(&self, limit: i64) -> Result<Vec<EquitySnapshot>> {
        let rows = sqlx::query_as::<_, StoredEquity>("SELECT * FROM equity_curve ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch equity curve")?;

        rows.into_iter().map(EquitySnapshot::try_from).collect()
    }

    // ==================== AI Decisions ====================

    /// Append one AI decision audit row.
    pub async fn append_ai_decision(&self, decision: &AiDecisionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_decisions
                (timestamp, symbol, price, score, confidence, passed, source, pattern, ta_buy, ta_sell, note)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&decision.timestamp)
        .bind(&decision.symbol)
        .bind(decision.price)
        .bind(decision.score)
        .bind(decision.confidence)
        .bind(decision.passed)
        .bind(&decision.source)
        .bind(&decision.pattern)
        .bind(decision.ta_buy)
        .bind(decision.ta_sell)
        .bind(&decision.note)
        .execute(&self.pool)
        .await
        .context("Failed to append AI decision")?;

        Ok(())
    }

    /// Most recent AI decisions, newest first.
    pub async fn recent_ai_decisions(&self, limit: i64) -> Result<Vec<AiDecisionRecord>> {
        sqlx::query_as::<_, AiDecisionRecord>(
            r#"
            SELECT timestamp, symbol, price, score, confidence, passed, source, pattern, ta_buy, ta_sell, note
            FROM ai_decisions ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch AI decisions")
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;
    use rust_decimal_macros::dec;

    async fn memory_store() -> LedgerStore {
        LedgerStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_state_is_fresh() {
        let store = memory_store().await;
        let state = store.load_state().await.unwrap();
        assert_eq!(state, AccountState::default());
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let store = memory_store().await;
        let now = Utc::now();

        let mut state = AccountState::default();
        state.record_deposit(dec!(1000), "seed", now).unwrap();
        state.positions.insert(
            "BTC/USDT".to_string(),
            Position::open(dec!(2.5), dec!(100), dec!(98), dec!(106), dec!(0.01), now),
        );
        state.book_realized(now.date_naive(), dec!(-0.02), dec!(-5));
        state.loss_streak = 1;
        store.save_state(&state).await.unwrap();

        // Overwrite: still a single row
        state.loss_streak = 2;
        store.save_state(&state).await.unwrap();

        let loaded = store.load_state().await.unwrap();
        assert_eq!(loaded, state);

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM account_state")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_corrupt_state_is_an_error() {
        let store = memory_store().await;
        sqlx::query("INSERT INTO account_state (id, document, updated_at) VALUES (1, '{not json', '')")
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.load_state().await.unwrap_err();
        assert!(err.to_string().contains("corrupt"));
    }

    #[tokio::test]
    async fn test_trade_journal() {
        let store = memory_store().await;
        let now = Utc::now();

        store
            .append_trade(&TradeRecord::buy(now, "ETH/USDT", dec!(2.5), dec!(100), "AI 72.0/69%"))
            .await
            .unwrap();
        store
            .append_trade(&TradeRecord::sell(
                now,
                "ETH/USDT",
                dec!(2.5),
                dec!(107),
                dec!(0.07),
                dec!(17.5),
                ExitReason::TakeProfit,
            ))
            .await
            .unwrap();

        let trades = store.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, TradeSide::Sell);
        assert_eq!(trades[0].pnl_absolute, Some(dec!(17.5)));
        assert_eq!(trades[0].exit_reason, Some(ExitReason::TakeProfit));
        assert_eq!(trades[1].pnl_fractional, None);
        assert_eq!(trades[1].note, "AI 72.0/69%");

        assert_eq!(store.journal_realized_pnl().await.unwrap(), dec!(17.5));
    }

    #[tokio::test]
    async fn test_equity_journal() {
        let store = memory_store().await;
        let mut state = AccountState::default();
        let now = Utc::now();
        state.record_deposit(dec!(500), "seed", now).unwrap();

        store
            .append_equity(&EquitySnapshot::from_state(&state, "auto", now))
            .await
            .unwrap();
        store
            .append_equity(&EquitySnapshot::manual(&state, dec!(480), "manual snapshot", now))
            .await
            .unwrap();

        let curve = store.equity_curve(10).await.unwrap();
        assert_eq!(curve.len(), 2);
        assert_eq!(curve[0].equity_estimate, dec!(480));
        assert_eq!(curve[1].equity_estimate, dec!(500));
    }

    #[tokio::test]
    async fn test_ai_decision_journal() {
        let store = memory_store().await;
        let record = AiDecisionRecord {
            timestamp: Utc::now().to_rfc3339(),
            symbol: "BTC/USDT".to_string(),
            price: 42000.5,
            score: 71.2,
            confidence: 68.0,
            passed: true,
            source: "ML".to_string(),
            pattern: "hammer".to_string(),
            ta_buy: true,
            ta_sell: false,
            note: String::new(),
        };
        store.append_ai_decision(&record).await.unwrap();

        let rows = store.recent_ai_decisions(5).await.unwrap();
        assert_eq!(rows, vec![record]);
    }
}
