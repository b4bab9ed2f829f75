// src/storage/state.rs
use crate::types::{Side, Trade};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error, PartialEq)]
pub enum PortfolioError {
    #[error("insufficient {asset}: required {required}, available {available}")]
    InsufficientBalance {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("trade quantity and notional must be positive, got {quantity} / {notional}")]
    InvalidTrade { quantity: Decimal, notional: Decimal },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot is not valid JSON: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("snapshot holds a negative {0} balance")]
    NegativeBalance(String),
}

/// Portfolio value at the first valuation of a UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayMark {
    pub date: NaiveDate,
    pub value: Decimal,
}

/// Balances, the append-only trade log and the timing bookmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioState {
    pub balances: BTreeMap<String, Decimal>,
    pub trades: Vec<Trade>,
    pub start_time: DateTime<Utc>,
    /// `None` until the first scheduled buy goes through.
    pub last_scheduled_action_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "dailyPnL")]
    pub daily_pnl: Decimal,
    #[serde(default, rename = "totalPnL")]
    pub total_pnl: Decimal,
    #[serde(default)]
    pub day_start: Option<DayMark>,
}

impl PortfolioState {
    pub fn fresh<'a>(
        funding_asset: &str,
        starting_cash: Decimal,
        assets: impl IntoIterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut balances: BTreeMap<String, Decimal> = assets
            .into_iter()
            .map(|asset| (asset.to_string(), Decimal::ZERO))
            .collect();
        balances.insert(funding_asset.to_string(), starting_cash);

        Self {
            balances,
            trades: Vec::new(),
            start_time: now,
            last_scheduled_action_time: None,
            daily_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            day_start: None,
        }
    }

    pub fn balance(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Moves value between the funding asset and the trade's asset, then logs the trade.
    /// Nothing changes if either leg would go negative.
    pub fn apply_trade(&mut self, trade: Trade, funding_asset: &str) -> Result<(), PortfolioError> {
        if trade.quantity <= Decimal::ZERO || trade.notional_value <= Decimal::ZERO {
            return Err(PortfolioError::InvalidTrade {
                quantity: trade.quantity,
                notional: trade.notional_value,
            });
        }

        let (debit_asset, debit, credit_asset, credit) = match trade.side {
            Side::Buy => (
                funding_asset,
                trade.notional_value,
                trade.asset.as_str(),
                trade.quantity,
            ),
            Side::Sell => (
                trade.asset.as_str(),
                trade.quantity,
                funding_asset,
                trade.notional_value,
            ),
        };

        let available = self.balance(debit_asset);
        if available < debit {
            return Err(PortfolioError::InsufficientBalance {
                asset: debit_asset.to_string(),
                required: debit,
                available,
            });
        }

        self.balances
            .insert(debit_asset.to_string(), available - debit);
        *self
            .balances
            .entry(credit_asset.to_string())
            .or_insert(Decimal::ZERO) += credit;
        self.trades.push(trade);
        Ok(())
    }

    /// Refreshes the cached PnL figures. The day bookmark rolls over on the first
    /// valuation of each UTC date.
    pub fn record_valuation(
        &mut self,
        total_value: Decimal,
        starting_value: Decimal,
        now: DateTime<Utc>,
    ) {
        let today = now.date_naive();
        let rolled = self.day_start.as_ref().map_or(true, |mark| mark.date != today);
        if rolled {
            self.day_start = Some(DayMark {
                date: today,
                value: total_value,
            });
        }

        let day_open = self
            .day_start
            .as_ref()
            .map_or(total_value, |mark| mark.value);
        self.daily_pnl = total_value - day_open;
        self.total_pnl = total_value - starting_value;
    }

    fn check_balances(&self) -> Result<(), PersistenceError> {
        match self.balances.iter().find(|(_, v)| **v < Decimal::ZERO) {
            Some((asset, _)) => Err(PersistenceError::NegativeBalance(asset.clone())),
            None => Ok(()),
        }
    }
}

/// Flat JSON snapshot of the portfolio, rewritten every cycle.
pub struct StateStore {
    path: PathBuf,
    funding_asset: String,
    starting_cash: Decimal,
    assets: Vec<String>,
}

impl StateStore {
    pub fn new(
        path: impl Into<PathBuf>,
        funding_asset: impl Into<String>,
        starting_cash: Decimal,
        assets: Vec<String>,
    ) -> Self {
        Self {
            path: path.into(),
            funding_asset: funding_asset.into(),
            starting_cash,
            assets,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fresh_state(&self, now: DateTime<Utc>) -> PortfolioState {
        PortfolioState::fresh(
            &self.funding_asset,
            self.starting_cash,
            self.assets.iter().map(String::as_str),
            now,
        )
    }

    /// Restores the snapshot, or starts over from the configured cash if there is
    /// none or it cannot be used. Never fails.
    pub async fn load(&self, now: DateTime<Utc>) -> PortfolioState {
        match self.read().await {
            Ok(Some(state)) => {
                info!(
                    "Restored portfolio from {} ({} trades)",
                    self.path.display(),
                    state.trades.len()
                );
                state
            }
            Ok(None) => {
                info!(
                    "No snapshot at {}, starting with {} {}",
                    self.path.display(),
                    self.starting_cash,
                    self.funding_asset
                );
                self.fresh_state(now)
            }
            Err(e) => {
                error!(
                    "Unusable snapshot at {}: {}. Starting from a fresh portfolio",
                    self.path.display(),
                    e
                );
                self.fresh_state(now)
            }
        }
    }

    async fn read(&self) -> Result<Option<PortfolioState>, PersistenceError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let state: PortfolioState = serde_json::from_str(&data)?;
        state.check_balances()?;
        Ok(Some(state))
    }

    /// Writes to a sibling temp file and renames it over the snapshot, so a reader
    /// only ever sees the old or the new document.
    pub async fn save(&self, state: &PortfolioState) -> Result<(), PersistenceError> {
        let data = serde_json::to_string_pretty(state)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(parent, source))?;
        }

        let tmp_path = self.tmp_path();
        tokio::fs::write(&tmp_path, data)
            .await
            .map_err(|source| self.io_error(&tmp_path, source))?;

        if let Err(source) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            warn!("Failed to move {} into place", tmp_path.display());
            return Err(self.io_error(&self.path, source));
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
