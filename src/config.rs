//! Bot configuration loaded from a TOML file.
//!
//! Every behavior switch lives here and is passed to the components at
//! construction time. Credentials are the only thing read from the
//! environment (see [`Credentials`]).

use std::fmt;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signals::{Features, MomentumSignal, KNOWN_PATTERNS};

const DEFAULT_BAR_LIMIT: u32 = 300;

/// Fatal configuration problems. The bot never runs with undefined risk limits.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Supported market-data venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    #[serde(alias = "coinbaseadvanced")]
    Coinbase,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Binance => write!(f, "binance"),
            Exchange::Coinbase => write!(f, "coinbase"),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Required: the bot refuses to start without risk limits
    pub risk: RiskConfig,

    #[serde(default)]
    pub signals: SignalConfig,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub engine: EngineOptions,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where and what to trade. Values here win over command-line fallbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub timeframe: Option<String>,
    pub exchange: Option<Exchange>,
    pub testnet: Option<bool>,
    pub budget: Option<Decimal>,
    pub symbols: Option<Vec<String>>,
    pub bar_limit: Option<u32>,
}

/// Risk budget and daily limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of budget risked per trade (e.g. 0.005)
    pub risk_pct: Decimal,

    /// Block new entries once today's P&L <= -max_daily_loss (0 disables)
    #[serde(default)]
    pub max_daily_loss: Decimal,

    /// Block new entries once today's P&L >= target_daily_profit (0 disables)
    #[serde(default)]
    pub target_daily_profit: Decimal,

    /// Trailing-stop distance as a fraction of price
    pub trailing_pct: Option<Decimal>,
}

/// Trend-signal and pattern settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub lookback_short: usize,
    pub lookback_long: usize,
    pub atr_len: usize,
    pub breakout_len: usize,
    pub require_bullish_pattern: bool,
    pub allowed_patterns: Vec<String>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            lookback_short: 20,
            lookback_long: 50,
            atr_len: 14,
            breakout_len: 20,
            require_bullish_pattern: true,
            allowed_patterns: KNOWN_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// AI gate thresholds and advisory-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Consult the advisory LLM in the uncertain band
    pub use_llm: bool,
    /// Consult the LLM whatever the deterministic score
    pub force_llm: bool,
    /// Minimum score to pass (0-100)
    pub score_pass: f64,
    /// Minimum confidence to pass (0-100)
    pub conf_pass: f64,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            use_llm: false,
            force_llm: false,
            score_pass: 65.0,
            conf_pass: 60.0,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
            timeout_secs: 20,
        }
    }
}

/// Engine behavior switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Paper broker: orders are simulated, the ledger is still updated
    pub dry_run: bool,
    /// Testing only: treat the trend signal's buy flag as always true
    pub allow_ai_only: bool,
    /// Store a feature peek and the LLM rationale in the AI decision journal
    pub ai_debug: bool,
    /// Send the run summary to the notifier
    pub heartbeat: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            allow_ai_only: false,
            ai_debug: false,
            heartbeat: false,
        }
    }
}

/// Ledger storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    /// Lock file guarding against concurrent invocations
    pub lock_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./tradebot.db?mode=rwc".to_string(),
            lock_file: PathBuf::from("./tradebot.lock"),
        }
    }
}

/// Command-line fallbacks for runtime values.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub symbols: Option<Vec<String>>,
    pub timeframe: Option<String>,
    pub budget: Option<Decimal>,
    pub trailing_pct: Option<Decimal>,
}

/// Effective runtime values after precedence resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRuntime {
    pub symbols: Vec<String>,
    pub timeframe: String,
    pub exchange: Exchange,
    pub testnet: bool,
    pub budget: Decimal,
    pub bar_limit: u32,
    pub trailing_pct: Decimal,
}

/// Secrets taken from the environment once at startup.
#[derive(Clone, Default)]
pub struct Credentials {
    pub exchange_api_key: Option<String>,
    pub exchange_api_secret: Option<String>,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            exchange_api_key: var("BINANCE_API_KEY"),
            exchange_api_secret: var("BINANCE_API_SECRET"),
            telegram_token: var("TELEGRAM_TOKEN"),
            telegram_chat_id: var("TELEGRAM_CHAT_ID"),
            openai_api_key: var("OPENAI_API_KEY"),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "set" } else { "unset" };
        f.debug_struct("Credentials")
            .field("exchange_api_key", &set(&self.exchange_api_key))
            .field("exchange_api_secret", &set(&self.exchange_api_secret))
            .field("telegram_token", &set(&self.telegram_token))
            .field("telegram_chat_id", &set(&self.telegram_chat_id))
            .field("openai_api_key", &set(&self.openai_api_key))
            .finish()
    }
}

impl AppConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate config text. A leading UTF-8 BOM is tolerated.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        let config: AppConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let risk = &self.risk;
        if risk.risk_pct <= Decimal::ZERO || risk.risk_pct > Decimal::ONE {
            return invalid(format!("risk.risk_pct must be in (0, 1], got {}", risk.risk_pct));
        }
        if risk.max_daily_loss < Decimal::ZERO {
            return invalid(format!("risk.max_daily_loss must be >= 0, got {}", risk.max_daily_loss));
        }
        if risk.target_daily_profit < Decimal::ZERO {
            return invalid(format!(
                "risk.target_daily_profit must be >= 0, got {}",
                risk.target_daily_profit
            ));
        }
        if let Some(trail) = risk.trailing_pct {
            validate_trailing(trail)?;
        }

        if let Some(budget) = self.runtime.budget {
            if budget <= Decimal::ZERO {
                return invalid(format!("runtime.budget must be positive, got {}", budget));
            }
        }
        if let Some(symbols) = &self.runtime.symbols {
            if symbols.iter().all(|s| s.trim().is_empty()) {
                return invalid("runtime.symbols must not be empty".to_string());
            }
        }
        if matches!(&self.runtime.timeframe, Some(tf) if tf.trim().is_empty()) {
            return invalid("runtime.timeframe must not be empty".to_string());
        }
        let s = &self.signals;
        if s.lookback_short == 0 || s.lookback_long == 0 || s.atr_len == 0 || s.breakout_len == 0 {
            return invalid("signal lookbacks must be positive".to_string());
        }

        // Every fetch must cover the trend warm-up and the feature window
        let warmup = MomentumSignal::new(s).min_bars().max(Features::MIN_BARS);
        let bar_limit = self.runtime.bar_limit.unwrap_or(DEFAULT_BAR_LIMIT);
        if (bar_limit as usize) < warmup {
            return invalid(format!(
                "runtime.bar_limit must be at least {} to cover signal warm-up, got {}",
                warmup, bar_limit
            ));
        }
        if let Some(unknown) = s
            .allowed_patterns
            .iter()
            .find(|p| !KNOWN_PATTERNS.contains(&p.as_str()))
        {
            return invalid(format!(
                "unknown pattern '{}' (known: {})",
                unknown,
                KNOWN_PATTERNS.join(", ")
            ));
        }

        for (name, value) in [("ai.score_pass", self.ai.score_pass), ("ai.conf_pass", self.ai.conf_pass)] {
            if !(0.0..=100.0).contains(&value) {
                return invalid(format!("{} must be within 0..100, got {}", name, value));
            }
        }

        Ok(())
    }

    /// Resolve effective runtime values: config first, CLI second, defaults last.
    pub fn resolve_runtime(&self, cli: &RuntimeOverrides) -> Result<ResolvedRuntime, ConfigError> {
        let rt = &self.runtime;

        let symbols: Vec<String> = rt
            .symbols
            .clone()
            .or_else(|| cli.symbols.clone())
            .unwrap_or_else(|| vec!["BTC/USDT".to_string()])
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return Err(ConfigError::Invalid("no symbols to trade".to_string()));
        }

        let budget = rt.budget.or(cli.budget).unwrap_or(dec!(1000));
        if budget <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!("budget must be positive, got {}", budget)));
        }

        let trailing_pct = self
            .risk
            .trailing_pct
            .or(cli.trailing_pct)
            .unwrap_or(Decimal::ZERO);
        validate_trailing(trailing_pct)?;

        Ok(ResolvedRuntime {
            symbols,
            timeframe: rt
                .timeframe
                .clone()
                .or_else(|| cli.timeframe.clone())
                .unwrap_or_else(|| "5m".to_string()),
            exchange: rt.exchange.unwrap_or(Exchange::Binance),
            testnet: rt.testnet.unwrap_or(true),
            budget,
            bar_limit: rt.bar_limit.unwrap_or(DEFAULT_BAR_LIMIT),
            trailing_pct,
        })
    }
}

fn validate_trailing(trail: Decimal) -> Result<(), ConfigError> {
    if trail < Decimal::ZERO || trail >= Decimal::ONE {
        return Err(ConfigError::Invalid(format!(
            "trailing_pct must be in [0, 1), got {}",
            trail
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[runtime]
timeframe = "15m"
exchange = "binance"
budget = 2500

[risk]
risk_pct = 0.005
max_daily_loss = 50
target_daily_profit = 120

[signals]
require_bullish_pattern = false
allowed_patterns = ["hammer"]

[ai]
score_pass = 70

[engine]
dry_run = true
heartbeat = true
"#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.risk.risk_pct, dec!(0.005));
        assert_eq!(config.risk.max_daily_loss, dec!(50));
        assert_eq!(config.risk.target_daily_profit, dec!(120));
        assert!(!config.signals.require_bullish_pattern);
        assert_eq!(config.signals.allowed_patterns, vec!["hammer".to_string()]);
        assert_eq!(config.signals.lookback_long, 50);
        assert_eq!(config.ai.score_pass, 70.0);
        assert_eq!(config.ai.conf_pass, 60.0);
        assert!(config.engine.heartbeat);
        assert!(!config.engine.allow_ai_only);
        assert_eq!(config.storage.lock_file, PathBuf::from("./tradebot.lock"));
    }

    #[test]
    fn test_missing_risk_section_is_fatal() {
        let err = AppConfig::from_toml_str("[runtime]\ntimeframe = \"5m\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_risk_pct_is_fatal() {
        let err = AppConfig::from_toml_str("[risk]\nmax_daily_loss = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let err = AppConfig::from_toml_str("[risk]\nrisk_pct = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_toml_str("[risk]\nrisk_pct = 0.01\ntrailing_pct = 1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_toml_str(
            "[risk]\nrisk_pct = 0.01\n[signals]\nallowed_patterns = [\"doji\"]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("doji"));
    }

    #[test]
    fn test_bar_limit_must_cover_warmup() {
        // lookback_long = 50 needs 50 bars per fetch
        let err = AppConfig::from_toml_str("[runtime]\nbar_limit = 40\n[risk]\nrisk_pct = 0.01\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("bar_limit must be at least 50"));

        let err = AppConfig::from_toml_str("[runtime]\nbar_limit = 0\n[risk]\nrisk_pct = 0.01\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        // Default fetch size against a lookback longer than it
        let err = AppConfig::from_toml_str("[risk]\nrisk_pct = 0.01\n[signals]\nlookback_long = 400\n").unwrap_err();
        assert!(err.to_string().contains("got 300"));

        // Short windows still need the feature window
        let err = AppConfig::from_toml_str(
            "[runtime]\nbar_limit = 25\n[risk]\nrisk_pct = 0.01\n[signals]\nlookback_short = 5\nlookback_long = 10\natr_len = 5\nbreakout_len = 5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least 30"));

        let config = AppConfig::from_toml_str("[runtime]\nbar_limit = 50\n[risk]\nrisk_pct = 0.01\n").unwrap();
        assert_eq!(config.runtime.bar_limit, Some(50));
    }

    #[test]
    fn test_config_wins_over_cli() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let cli = RuntimeOverrides {
            symbols: Some(vec!["ETH/USDT".to_string(), " SOL/USDT ".to_string()]),
            timeframe: Some("1h".to_string()),
            budget: Some(dec!(10)),
            trailing_pct: Some(dec!(0.01)),
        };

        let rt = config.resolve_runtime(&cli).unwrap();
        assert_eq!(rt.timeframe, "15m");
        assert_eq!(rt.budget, dec!(2500));
        assert_eq!(rt.exchange, Exchange::Binance);
        // Not set in the file, so the CLI fallbacks apply
        assert_eq!(rt.symbols, vec!["ETH/USDT".to_string(), "SOL/USDT".to_string()]);
        assert_eq!(rt.trailing_pct, dec!(0.01));
        assert_eq!(rt.bar_limit, 300);
    }

    #[test]
    fn test_defaults_without_cli() {
        let config = AppConfig::from_toml_str("[risk]\nrisk_pct = 0.01\n").unwrap();
        let rt = config.resolve_runtime(&RuntimeOverrides::default()).unwrap();

        assert_eq!(rt.symbols, vec!["BTC/USDT".to_string()]);
        assert_eq!(rt.timeframe, "5m");
        assert_eq!(rt.budget, dec!(1000));
        assert_eq!(rt.trailing_pct, Decimal::ZERO);
        assert!(rt.testnet);
    }

    #[test]
    fn test_load_from_file_with_bom() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "\u{feff}[risk]\nrisk_pct = 0.02\n").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.risk.risk_pct, dec!(0.02));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
