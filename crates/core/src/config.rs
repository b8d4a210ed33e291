use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub kraken: KrakenConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Trading pair in any accepted form (`DOGE/USD`, `DOGEUSD`, `doge-usd`).
    pub pair: String,
    /// Primary OHLC subscription interval in minutes.
    pub primary_interval_min: u32,
    /// L2 book subscription depth.
    pub book_depth: u32,
    /// Periodic evaluation timer, seconds.
    pub eval_interval_secs: u64,
    /// Heartbeat log cadence, seconds.
    pub heartbeat_secs: u64,
    /// When set, orders are constructed and logged but never submitted.
    pub dry_run: bool,
    /// Decision log path (CSV, append-only).
    pub decision_log_path: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            pair: "DOGE/USD".to_string(),
            primary_interval_min: 1,
            book_depth: 5,
            eval_interval_secs: 300,
            heartbeat_secs: 30,
            dry_run: true,
            decision_log_path: "decisions.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KrakenConfig {
    pub rest_url: String,
    pub ws_public_url: String,
    pub ws_private_url: String,
    pub timeout_secs: u64,
    /// Sustained REST request rate (requests per second).
    pub requests_per_second: u32,
}

impl Default for KrakenConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.kraken.com".to_string(),
            ws_public_url: "wss://ws.kraken.com/v2".to_string(),
            ws_private_url: "wss://ws-auth.kraken.com/v2".to_string(),
            timeout_secs: 30,
            requests_per_second: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Target notional (quote units) for the book slippage estimate.
    pub slippage_notional: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            slippage_notional: 500.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum spacing between trigger emissions, seconds.
    pub debounce_secs: u64,
    /// Minimum absolute confluence change that produces a reason.
    pub confluence_delta_min: i32,
    /// Daily drawdown guardrail, percent (breach at `-drawdown_guard_pct`).
    pub drawdown_guard_pct: f64,
    /// Bars (5m) after which a going-nowhere position triggers a time stop.
    pub time_stop_bars: u32,
    /// |unrealized R| below which the time stop applies.
    pub time_stop_max_r: f64,
    /// Rolling price-move threshold, percent.
    pub price_move_pct: f64,
    /// Rolling price-move window, seconds.
    pub price_move_window_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 60,
            confluence_delta_min: 2,
            drawdown_guard_pct: 2.0,
            time_stop_bars: 36,
            time_stop_max_r: 0.5,
            price_move_pct: 0.5,
            price_move_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Hard cap on per-trade risk as a percentage of quote balance.
    pub max_trade_risk_pct: f64,
    /// Hard cap on aggregate open risk as a percentage of quote balance.
    pub max_total_risk_pct: f64,
    /// Position size used when a decision omits `size_pct`.
    pub default_size_pct: f64,
    /// Minimum order notional in quote units.
    pub min_notional: Decimal,
    /// Losses inside the outcome window that trigger a cooldown.
    pub pause_after_losses: usize,
    /// Cooldown length, minutes.
    pub pause_minutes: i64,
    /// Balance cache TTL, seconds.
    pub balance_cache_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_trade_risk_pct: 0.75,
            max_total_risk_pct: 1.5,
            default_size_pct: 25.0,
            min_notional: Decimal::from(20),
            pause_after_losses: 2,
            pause_minutes: 30,
            balance_cache_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    /// One of `minimal`, `low`, `medium`, `high`.
    pub reasoning_effort: String,
    pub verbosity: String,
    pub max_output_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/responses".to_string(),
            model: "gpt-4.1-mini".to_string(),
            reasoning_effort: "low".to_string(),
            verbosity: "low".to_string(),
            max_output_tokens: Some(600),
            timeout_secs: 30,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging an optional TOML file with
    /// `SPOT_BOT_`-prefixed environment variables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be parsed.
    pub fn load(path: Option<&str>) -> Result<AppConfig> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: AppConfig = figment
            .merge(Env::prefixed("SPOT_BOT_").split("__"))
            .extract()?;
        Ok(config)
    }
}
