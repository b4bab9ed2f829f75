// src/strategies/dca.rs
use crate::config::StrategyConfig;
use crate::storage::state::PortfolioState;
use crate::strategies::traits::{Accumulation, RiskAssessment, Strategy};
use crate::types::{Holding, PriceSnapshot, RiskSignal, Side, Trade};
use crate::utils::precision::normalize_quantity;
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

pub const DCA_REASON: &str = "DCA";

/// Fixed-notional buys on a fixed interval, split by allocation weight,
/// plus advisory take-profit / stop-loss / daily-loss checks on the whole book.
pub struct DcaStrategy {
    config: StrategyConfig,
    funding_asset: String,
    starting_value: Decimal,
}

impl DcaStrategy {
    pub fn new(config: StrategyConfig, funding_asset: impl Into<String>, starting_value: Decimal) -> Self {
        Self {
            config,
            funding_asset: funding_asset.into(),
            starting_value,
        }
    }

    /// When the next scheduled buy becomes due. `None` means it is due now.
    pub fn next_due(&self, state: &PortfolioState) -> Result<Option<DateTime<Utc>>> {
        let interval = Duration::from_std(self.config.dca_interval())
            .map_err(|e| anyhow!("dca interval out of range: {}", e))?;
        Ok(state.last_scheduled_action_time.map(|last| last + interval))
    }

    fn price_of(prices: &PriceSnapshot, asset: &str) -> Result<Decimal> {
        let price = prices
            .get(asset)
            .copied()
            .ok_or_else(|| anyhow!("no price for {} in this cycle's snapshot", asset))?;
        if price <= Decimal::ZERO {
            bail!("non-positive price {} for {}", price, asset);
        }
        Ok(price)
    }

    fn percent_of(amount: Decimal, base: Decimal) -> Decimal {
        if base.is_zero() {
            Decimal::ZERO
        } else {
            amount / base * Decimal::ONE_HUNDRED
        }
    }
}

impl Strategy for DcaStrategy {
    fn name(&self) -> String {
        "DCA".to_string()
    }

    fn plan_accumulation(
        &self,
        state: &PortfolioState,
        prices: &PriceSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Accumulation> {
        if let Some(next_due) = self.next_due(state)? {
            if now < next_due {
                return Ok(Accumulation::NotDue { next_due });
            }
        }

        let required = self.config.dca_amount;
        let available = state.balance(&self.funding_asset);
        if available < required {
            return Ok(Accumulation::Deferred {
                required,
                available,
            });
        }

        let mut trades = Vec::with_capacity(self.config.allocations.len());
        for allocation in &self.config.allocations {
            let price = Self::price_of(prices, &allocation.asset)?;
            let notional = required * allocation.weight;
            let quantity = normalize_quantity(notional / price, self.config.quantity_step);
            if quantity.is_zero() {
                return Ok(Accumulation::BelowMinimum {
                    asset: allocation.asset.clone(),
                    notional,
                    price,
                });
            }

            trades.push(Trade {
                timestamp: now,
                side: Side::Buy,
                asset: allocation.asset.clone(),
                quantity,
                unit_price: price,
                notional_value: notional,
                reason: DCA_REASON.to_string(),
            });
        }

        Ok(Accumulation::Execute(trades))
    }

    fn assess_risk(
        &self,
        state: &PortfolioState,
        prices: &PriceSnapshot,
        now: DateTime<Utc>,
    ) -> Result<RiskAssessment> {
        let cash = state.balance(&self.funding_asset);

        let mut holdings = Vec::new();
        for (asset, quantity) in &state.balances {
            if *asset == self.funding_asset {
                continue;
            }
            let price = match prices.get(asset) {
                Some(price) => *price,
                None if quantity.is_zero() => continue,
                None => bail!("holding {} {} but no price was fetched for it", quantity, asset),
            };
            holdings.push(Holding {
                asset: asset.clone(),
                quantity: *quantity,
                price,
                value: *quantity * price,
            });
        }

        let total_value = cash + holdings.iter().map(|h| h.value).sum::<Decimal>();
        let pnl = total_value - self.starting_value;
        let pnl_pct = Self::percent_of(pnl, self.starting_value);

        let day_open = state
            .day_start
            .as_ref()
            .filter(|mark| mark.date == now.date_naive())
            .map_or(total_value, |mark| mark.value);
        let daily_pnl_pct = Self::percent_of(total_value - day_open, day_open);

        let mut signals = Vec::new();
        // Pure cash can't be exited, so there is nothing to advise on.
        if holdings.iter().any(|h| !h.quantity.is_zero()) {
            if pnl_pct >= self.config.take_profit_pct * Decimal::ONE_HUNDRED {
                signals.push(RiskSignal::TakeProfit { pnl_pct });
            }
            if pnl_pct <= -self.config.stop_loss_pct * Decimal::ONE_HUNDRED {
                signals.push(RiskSignal::StopLoss { pnl_pct });
            }
            if daily_pnl_pct <= -self.config.max_daily_loss_pct * Decimal::ONE_HUNDRED {
                signals.push(RiskSignal::DailyLossLimit { daily_pnl_pct });
            }
        }

        Ok(RiskAssessment {
            cash,
            holdings,
            total_value,
            pnl,
            pnl_pct,
            daily_pnl_pct,
            signals,
        })
    }
}
