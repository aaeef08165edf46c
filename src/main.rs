//! Long-only momentum trading bot.
//!
//! Each `run` invocation processes every configured symbol once: trailing
//! stops, take-profit / stop-loss exits, then AI-gated entries behind a
//! daily risk gate. State lives in a SQLite ledger between runs.

mod api;
mod backtest;
mod bot;
mod config;
mod db;
mod models;
mod signals;
mod trading;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{
    AdvisoryGrader, BinanceBroker, BinanceData, Broker, CoinbaseData, MarketData, Notifier, NullNotifier,
    OpenAiGrader, PaperBroker, TelegramNotifier,
};
use crate::backtest::Backtester;
use crate::bot::{Bot, BotConfig, Collaborators};
use crate::config::{AppConfig, Credentials, Exchange, ResolvedRuntime, RuntimeOverrides};
use crate::db::{LedgerStore, RunLock};
use crate::models::EquitySnapshot;
use crate::signals::AiGate;

/// Momentum trading bot CLI.
#[derive(Parser)]
#[command(name = "tradebot")]
#[command(about = "Long-only momentum bot with AI-gated entries and a persistent ledger", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every configured symbol once
    Run {
        /// Comma-separated symbols (used when the config has none)
        #[arg(long, env = "SYMBOLS", value_delimiter = ',')]
        symbols: Option<Vec<String>>,

        /// Bar timeframe (used when the config has none)
        #[arg(long, env = "TIMEFRAME")]
        tf: Option<String>,

        /// Risk budget in quote currency (used when the config has none)
        #[arg(long, env = "BUDGET_USDT")]
        budget: Option<Decimal>,

        /// Trailing-stop fraction, e.g. 0.02 (used when the config has none)
        #[arg(long, env = "TRAIL_PCT")]
        trail: Option<Decimal>,
    },

    /// Record a deposit
    Deposit {
        #[arg(short, long)]
        amount: Decimal,

        #[arg(short, long, default_value = "seed")]
        note: String,
    },

    /// Record a withdrawal
    Withdraw {
        #[arg(short, long)]
        amount: Decimal,

        #[arg(short, long, default_value = "")]
        note: String,
    },

    /// Append an equity snapshot
    Snapshot {
        /// Observed equity (defaults to the realized estimate)
        #[arg(short, long)]
        equity: Option<Decimal>,

        #[arg(short, long, default_value = "manual snapshot")]
        note: String,
    },

    /// Show ledger status
    Status,

    /// Show effective configuration
    Config,

    /// Walk-forward backtest of the trend signal
    Backtest {
        #[arg(short, long, default_value = "BTC/USDT")]
        symbol: String,

        #[arg(long, default_value = "5m")]
        tf: String,

        #[arg(long, default_value = "2000")]
        limit: u32,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Err(e) = execute(&cli.config, cli.command).await {
        error!(error = format!("{:#}", e), "Command failed");
        return Err(e);
    }
    Ok(())
}

async fn execute(config_path: &Path, command: Commands) -> Result<()> {
    let app = AppConfig::load(config_path)?;
    let credentials = Credentials::from_env();

    match command {
        Commands::Run {
            symbols,
            tf,
            budget,
            trail,
        } => {
            let overrides = RuntimeOverrides {
                symbols,
                timeframe: tf,
                budget,
                trailing_pct: trail,
            };
            let runtime = app.resolve_runtime(&overrides)?;

            let lock = RunLock::acquire(&app.storage.lock_file)?;
            info!(lock = %lock.path().display(), "Run lock held");
            let store = LedgerStore::connect(&app.storage.database_url).await?;

            let collaborators = Collaborators {
                market_data: market_data(&runtime)?,
                broker: broker(&app, &runtime, &credentials)?,
                notifier: notifier(&credentials)?,
                ai_gate: AiGate::new(app.ai.clone(), advisory_grader(&app, &credentials)?),
            };

            let bot = Bot::new(BotConfig::from_app(&app, runtime), store, collaborators);
            let summary = bot.run_once(Utc::now()).await?;
            println!("\n{}", summary);
        }

        Commands::Deposit { amount, note } => {
            let _lock = RunLock::acquire(&app.storage.lock_file)?;
            let store = LedgerStore::connect(&app.storage.database_url).await?;

            let mut state = store.load_state().await?;
            state.record_deposit(amount, &note, Utc::now())?;
            store.save_state(&state).await?;

            info!(amount = %amount, "Deposit recorded");
            println!("Deposited {} {} (net deposits {})", amount, state.base_currency, state.net_deposits());
        }

        Commands::Withdraw { amount, note } => {
            let _lock = RunLock::acquire(&app.storage.lock_file)?;
            let store = LedgerStore::connect(&app.storage.database_url).await?;

            let mut state = store.load_state().await?;
            state.record_withdrawal(amount, &note, Utc::now())?;
            store.save_state(&state).await?;

            info!(amount = %amount, "Withdrawal recorded");
            println!("Withdrew {} {} (net deposits {})", amount, state.base_currency, state.net_deposits());
        }

        Commands::Snapshot { equity, note } => {
            let _lock = RunLock::acquire(&app.storage.lock_file)?;
            let store = LedgerStore::connect(&app.storage.database_url).await?;

            let state = store.load_state().await?;
            let now = Utc::now();
            let snapshot = match equity {
                Some(equity) => EquitySnapshot::manual(&state, equity, note, now),
                None => EquitySnapshot::from_state(&state, note, now),
            };
            store.append_equity(&snapshot).await?;

            println!("Snapshot: equity {} ({})", snapshot.equity_estimate, snapshot.note);
        }

        Commands::Status => {
            let store = LedgerStore::connect(&app.storage.database_url).await?;
            let state = store.load_state().await?;
            let today = Utc::now().date_naive();

            println!("\n=== Ledger ===");
            println!("Base Currency:    {}", state.base_currency);
            println!("Net Deposits:     {}", state.net_deposits());
            println!("Realized P&L:     {}", state.realized_pnl_absolute.round_dp(4));
            let journal_pnl = store.journal_realized_pnl().await?;
            if journal_pnl != state.realized_pnl_absolute {
                warn!(
                    ledger = %state.realized_pnl_absolute,
                    journal = %journal_pnl,
                    "Trade journal disagrees with ledger P&L"
                );
            }
            println!("Journal P&L:      {}", journal_pnl.round_dp(4));
            println!("Realized Return:  {}%", (state.realized_pnl_fractional * Decimal::ONE_HUNDRED).round_dp(2));
            println!("Today's P&L:      {}", state.day_pnl(today).round_dp(4));
            println!("Loss Streak:      {}", state.loss_streak);
            println!("Equity Estimate:  {}", state.equity_estimate().round_dp(4));
            println!(
                "Last Run Day:     {}",
                state
                    .last_processed_day
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "Never".to_string())
            );

            println!("\n=== Open Positions ({}) ===", state.open_positions());
            for (symbol, pos) in state.positions.iter().filter(|(_, p)| p.is_open()) {
                println!(
                    "  {:<12} qty {} @ {} | SL {} | TP {}",
                    truncate(symbol, 12),
                    pos.quantity,
                    pos.average_entry_price,
                    pos.stop_loss,
                    pos.take_profit
                );
            }

            let trades = store.recent_trades(5).await?;
            if !trades.is_empty() {
                println!("\n=== Recent Trades ===");
                for trade in &trades {
                    println!(
                        "  {} {:<4} {:<12} qty {} @ {} {}",
                        trade.timestamp.format("%Y-%m-%d %H:%M"),
                        trade.side.as_str(),
                        truncate(&trade.symbol, 12),
                        trade.quantity,
                        trade.price,
                        trade
                            .pnl_absolute
                            .map(|p| format!("P&L {}", p.round_dp(4)))
                            .unwrap_or_default()
                    );
                }
            }

            if let Some(last) = store.equity_curve(1).await?.first() {
                println!(
                    "\nLast Snapshot:    {} equity {} ({})",
                    last.timestamp.format("%Y-%m-%d %H:%M"),
                    last.equity_estimate.round_dp(4),
                    last.note
                );
            }

            let decisions = store.recent_ai_decisions(5).await?;
            if !decisions.is_empty() {
                println!("\n=== Recent AI Decisions ===");
                for d in &decisions {
                    println!(
                        "  {} {:<12} score {:.1} conf {:.0}% {} [{}]",
                        d.timestamp,
                        truncate(&d.symbol, 12),
                        d.score,
                        d.confidence,
                        if d.passed { "PASS" } else { "FAIL" },
                        d.source
                    );
                }
            }
        }

        Commands::Config => {
            let runtime = app.resolve_runtime(&RuntimeOverrides::default())?;

            println!("\n=== Runtime ===\n");
            println!("  Symbols:              {}", runtime.symbols.join(", "));
            println!("  Timeframe:            {}", runtime.timeframe);
            println!("  Exchange:             {}{}", runtime.exchange, if runtime.testnet { " (testnet)" } else { "" });
            println!("  Budget:               {}", runtime.budget);
            println!("  Bars per Fetch:       {}", runtime.bar_limit);
            println!("  Trailing Stop:        {}%", runtime.trailing_pct * Decimal::ONE_HUNDRED);

            println!("\n=== Risk ===\n");
            println!("  Risk per Trade:       {}%", app.risk.risk_pct * Decimal::ONE_HUNDRED);
            println!("  Max Daily Loss:       {}", app.risk.max_daily_loss);
            println!("  Daily Profit Target:  {}", app.risk.target_daily_profit);

            println!("\n=== Signals ===\n");
            println!("  SMA Short / Long:     {} / {}", app.signals.lookback_short, app.signals.lookback_long);
            println!("  ATR Length:           {}", app.signals.atr_len);
            println!("  Breakout Length:      {}", app.signals.breakout_len);
            println!("  Require Pattern:      {}", app.signals.require_bullish_pattern);
            println!("  Allowed Patterns:     {}", app.signals.allowed_patterns.join(", "));

            println!("\n=== AI Gate ===\n");
            println!("  Score / Conf Pass:    {} / {}", app.ai.score_pass, app.ai.conf_pass);
            println!("  Advisory LLM:         {}{}", app.ai.use_llm, if app.ai.force_llm { " (forced)" } else { "" });
            println!("  Model:                {}", app.ai.model);

            println!("\n=== Engine ===\n");
            println!("  Mode:                 {}", if app.engine.dry_run { "DRY RUN (paper orders)" } else { "LIVE TRADING" });
            println!("  AI-only Entries:      {}", app.engine.allow_ai_only);
            println!("  Heartbeat:            {}", app.engine.heartbeat);
            println!("  Database:             {}", app.storage.database_url);
            println!("  Lock File:            {}", app.storage.lock_file.display());
            println!("  Credentials:          {:?}", credentials);
        }

        Commands::Backtest { symbol, tf, limit } => {
            let runtime = app.resolve_runtime(&RuntimeOverrides::default())?;
            let data = market_data(&runtime)?;

            let results = Backtester::new(&app.signals)
                .run_symbol(data, &symbol, &tf, limit)
                .await?;
            println!("{}", results);
        }
    }

    Ok(())
}

fn market_data(runtime: &ResolvedRuntime) -> Result<Arc<dyn MarketData>> {
    let data: Arc<dyn MarketData> = match runtime.exchange {
        Exchange::Binance => Arc::new(BinanceData::new(runtime.testnet)?),
        Exchange::Coinbase => Arc::new(CoinbaseData::new()?),
    };
    Ok(data)
}

fn broker(app: &AppConfig, runtime: &ResolvedRuntime, credentials: &Credentials) -> Result<Arc<dyn Broker>> {
    if app.engine.dry_run {
        return Ok(Arc::new(PaperBroker::new()));
    }

    match (
        runtime.exchange,
        &credentials.exchange_api_key,
        &credentials.exchange_api_secret,
    ) {
        (Exchange::Binance, Some(key), Some(secret)) => {
            info!(testnet = runtime.testnet, "Live order execution enabled");
            let broker = BinanceBroker::new(key.clone(), secret.clone(), runtime.testnet)
                .context("Failed to create exchange broker")?;
            Ok(Arc::new(broker))
        }
        (Exchange::Binance, _, _) => {
            warn!("Live mode without exchange credentials, using paper orders");
            Ok(Arc::new(PaperBroker::new()))
        }
        (Exchange::Coinbase, _, _) => {
            warn!("No live broker for coinbase, using paper orders");
            Ok(Arc::new(PaperBroker::new()))
        }
    }
}

fn notifier(credentials: &Credentials) -> Result<Arc<dyn Notifier>> {
    match (&credentials.telegram_token, &credentials.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Ok(Arc::new(TelegramNotifier::new(token.clone(), chat_id.clone())?)),
        _ => Ok(Arc::new(NullNotifier)),
    }
}

fn advisory_grader(app: &AppConfig, credentials: &Credentials) -> Result<Option<Box<dyn AdvisoryGrader>>> {
    if !app.ai.use_llm {
        return Ok(None);
    }
    match &credentials.openai_api_key {
        Some(key) => Ok(Some(Box::new(OpenAiGrader::new(key.clone(), &app.ai)?))),
        None => {
            warn!("ai.use_llm is set but OPENAI_API_KEY is missing, using rule-based grades");
            Ok(None)
        }
    }
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
