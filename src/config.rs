// src/config.rs

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// One leg of the scheduled buy: which asset, which market pair prices it, and its share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub asset: String,
    pub pair: String,
    pub weight: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Notional spent per scheduled buy, in the funding asset.
    pub dca_amount: Decimal,
    pub dca_interval_secs: u64,
    pub allocations: Vec<Allocation>,
    // Fractions, 0.05 == 5%
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    /// Smallest tradable quantity increment; bought quantities are floored to it.
    pub quantity_step: Decimal,
}

impl StrategyConfig {
    pub fn dca_interval(&self) -> Duration {
        Duration::from_secs(self.dca_interval_secs)
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            dca_amount: Decimal::new(100, 0),
            dca_interval_secs: 24 * 60 * 60,
            allocations: vec![
                Allocation {
                    asset: "BTC".to_string(),
                    pair: "XBTUSD".to_string(),
                    weight: Decimal::new(7, 1),
                },
                Allocation {
                    asset: "ETH".to_string(),
                    pair: "ETHUSD".to_string(),
                    weight: Decimal::new(3, 1),
                },
            ],
            take_profit_pct: Decimal::new(5, 2),
            stop_loss_pct: Decimal::new(2, 2),
            max_daily_loss_pct: Decimal::new(5, 2),
            quantity_step: Decimal::new(1, 8),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub directory: PathBuf,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: PathBuf::from("logs"),
            file_prefix: "paper-trader.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api_url: String,
    pub credentials_file: PathBuf,
    pub funding_asset: String,
    pub starting_cash: Decimal,
    pub state_file: PathBuf,
    pub poll_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub request_timeout_secs: u64,
    /// Hit the private endpoints once at startup to confirm the keys work.
    pub verify_account: bool,
    pub strategy: StrategyConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.kraken.com".to_string(),
            credentials_file: PathBuf::from("credentials/kraken-api.env"),
            funding_asset: "USD".to_string(),
            starting_cash: Decimal::new(1000, 0),
            state_file: PathBuf::from("logs/paper-state.json"),
            poll_interval_secs: 60,
            error_backoff_secs: 5,
            request_timeout_secs: 10,
            verify_account: true,
            strategy: StrategyConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then an optional `Settings.{toml,json,yaml}`, then `APP_*` env vars
    /// (nested keys separated by `__`, e.g. `APP_STRATEGY__DCA_AMOUNT`).
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("Settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.api_url)
            .map_err(|e| invalid(format!("api_url `{}`: {}", self.api_url, e)))?;

        if self.starting_cash.is_sign_negative() {
            return Err(invalid("starting_cash must not be negative"));
        }
        if self.poll_interval_secs == 0 || self.request_timeout_secs == 0 {
            return Err(invalid("poll and request timeout intervals must be non-zero"));
        }

        let strategy = &self.strategy;
        if strategy.dca_amount <= Decimal::ZERO {
            return Err(invalid("strategy.dca_amount must be positive"));
        }
        if strategy.dca_interval_secs == 0 {
            return Err(invalid("strategy.dca_interval_secs must be non-zero"));
        }
        for (name, value) in [
            ("take_profit_pct", strategy.take_profit_pct),
            ("stop_loss_pct", strategy.stop_loss_pct),
            ("max_daily_loss_pct", strategy.max_daily_loss_pct),
        ] {
            if value <= Decimal::ZERO {
                return Err(invalid(format!("strategy.{} must be positive", name)));
            }
        }

        if strategy.quantity_step.is_sign_negative() {
            return Err(invalid("strategy.quantity_step must not be negative"));
        }

        if strategy.allocations.is_empty() {
            return Err(invalid("strategy.allocations must not be empty"));
        }
        let mut seen = HashSet::new();
        for allocation in &strategy.allocations {
            if allocation.weight <= Decimal::ZERO {
                return Err(invalid(format!(
                    "allocation weight for {} must be positive",
                    allocation.asset
                )));
            }
            if allocation.asset == self.funding_asset {
                return Err(invalid(format!(
                    "cannot allocate into the funding asset {}",
                    self.funding_asset
                )));
            }
            if !seen.insert(allocation.asset.as_str()) {
                return Err(invalid(format!("duplicate allocation for {}", allocation.asset)));
            }
        }
        let total: Decimal = strategy.allocations.iter().map(|a| a.weight).sum();
        if total != Decimal::ONE {
            return Err(invalid(format!("allocation weights sum to {}, expected 1", total)));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Message(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy.dca_interval(), Duration::from_secs(86_400));
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut config = AppConfig::default();
        config.strategy.allocations[1].weight = Decimal::new(2, 1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 0.9"));
    }

    #[test]
    fn rejects_duplicate_and_funding_allocations() {
        let mut config = AppConfig::default();
        config.strategy.allocations[1].asset = "BTC".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.strategy.allocations[0].asset = "USD".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_url_and_amounts() {
        let mut config = AppConfig::default();
        config.api_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.strategy.dca_amount = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_survive_config_roundtrip() {
        let built: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(built.strategy.allocations, AppConfig::default().strategy.allocations);
        assert_eq!(built.starting_cash, Decimal::new(1000, 0));
    }
}
