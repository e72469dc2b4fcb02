use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::api::market_data::DEFAULT_MARKET_BASE_URL;
use crate::api::trading::DEFAULT_TRADING_BASE_URL;
use crate::api::{ApiError, MarketDataClient};
use crate::execution::CycleConfig;
use crate::models::{Coin, Credentials, Interval};

pub const DEFAULT_CONFIG_PATH: &str = "config/streakbot.toml";
const ENV_PREFIX: &str = "STREAKBOT";

/// Public candle source
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub base_url: String,
    pub symbol: String,
    pub interval: Interval,
    pub page_limit: usize,
    /// Minimum spacing between candle page requests
    pub page_pause_ms: u64,
    /// History fetched when the series is empty
    pub seed_days: i64,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_MARKET_BASE_URL.to_string(),
            symbol: "DOGEUSDT".to_string(),
            interval: Interval::Hour1,
            page_limit: 100,
            page_pause_ms: 200,
            seed_days: 30,
        }
    }
}

/// Futures account the bot trades on
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub base_url: String,
    pub coin: Coin,
    pub order_notional_usdt: Decimal,
    pub size_precision: u32,
    pub call_pause_ms: u64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TRADING_BASE_URL.to_string(),
            coin: Coin::DogeFutures,
            order_notional_usdt: Decimal::new(50, 0),
            size_precision: 2,
            call_pause_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub poll_interval_secs: u64,
    /// Age after which a cycle claim counts as abandoned
    pub claim_ttl_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            claim_ttl_secs: 600,
        }
    }
}

/// Application settings
///
/// Sources, later ones winning: built-in defaults, `DATABASE_URL`, the optional
/// TOML file, then `STREAKBOT_*` variables with `__` between nested keys
/// (e.g. `STREAKBOT_MARKET__SYMBOL=BTCUSDT`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub market: MarketSettings,
    pub trading: TradingSettings,
    pub scheduler: SchedulerSettings,
    /// Only read by `init-position`; the running bot uses the stored row
    pub credentials: Option<Credentials>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/streakbot".to_string(),
            market: MarketSettings::default(),
            trading: TradingSettings::default(),
            scheduler: SchedulerSettings::default(),
            credentials: None,
        }
    }
}

impl Settings {
    /// Load with `path` as the (optional) settings file
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            builder = builder.set_default("database_url", database_url)?;
        }

        builder
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.poll_interval_secs)
    }

    pub fn market_client(&self) -> Result<MarketDataClient, ApiError> {
        MarketDataClient::new(
            self.market.base_url.clone(),
            self.market.symbol.clone(),
            self.market.interval,
            Duration::from_millis(self.market.page_pause_ms),
        )
    }

    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            trading_base_url: self.trading.base_url.clone(),
            coin: self.trading.coin,
            order_notional: self.trading.order_notional_usdt,
            size_precision: self.trading.size_precision,
            call_pause: Duration::from_millis(self.trading.call_pause_ms),
            page_limit: self.market.page_limit,
            claim_ttl: Duration::from_secs(self.scheduler.claim_ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_config(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("streakbot-{}-{}.toml", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.market.symbol, "DOGEUSDT");
        assert_eq!(settings.market.interval, Interval::Hour1);
        assert_eq!(settings.market.page_limit, 100);
        assert_eq!(settings.trading.coin, Coin::DogeFutures);
        assert_eq!(settings.trading.order_notional_usdt, Decimal::new(50, 0));
        assert_eq!(settings.poll_interval(), Duration::from_secs(300));
        assert!(settings.credentials.is_none());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("/nonexistent/streakbot-settings").unwrap();
        assert_eq!(settings.market.seed_days, 30);
        assert_eq!(settings.scheduler.claim_ttl_secs, 600);
    }

    #[test]
    fn test_file_overrides_and_keeps_other_defaults() {
        let path = write_temp_config(
            "overrides",
            r#"
            [market]
            symbol = "BTCUSDT"
            interval = "15min"

            [trading]
            coin = "BTCUSDT_UMCBL"
            order_notional_usdt = "25.5"

            [credentials]
            api_key = "key"
            secret_key = "secret"
            api_passphrase = "phrase"
            "#,
        );

        let settings = Settings::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.market.symbol, "BTCUSDT");
        assert_eq!(settings.market.interval, Interval::Min15);
        assert_eq!(settings.market.page_limit, 100);
        assert_eq!(settings.trading.coin, Coin::BtcFutures);
        assert_eq!(settings.trading.order_notional_usdt, Decimal::new(255, 1));
        assert_eq!(settings.credentials.unwrap().api_key, "key");

        let cycle = Settings::default().cycle_config();
        assert_eq!(cycle.call_pause, Duration::from_millis(200));
        assert_eq!(cycle.claim_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_unknown_interval_is_rejected() {
        let path = write_temp_config("bad-interval", "[market]\ninterval = \"2h\"\n");

        let result = Settings::load_from(&path);
        std::fs::remove_file(&path).ok();

        assert!(result.is_err());
    }
}
