// src/strategies/traits.rs
use crate::storage::state::PortfolioState;
use crate::types::{Holding, PriceSnapshot, RiskSignal, Trade};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// What the scheduled-buy rule wants this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulation {
    NotDue { next_due: DateTime<Utc> },
    /// Funding balance too low. Not an error: the bookmark stays put and the buy retries next cycle.
    Deferred { required: Decimal, available: Decimal },
    /// A leg's share of the buy floors to zero quantity at the current price.
    /// Skipped like a deferral so the loop keeps reporting; the bookmark stays put.
    BelowMinimum {
        asset: String,
        notional: Decimal,
        price: Decimal,
    },
    Execute(Vec<Trade>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub cash: Decimal,
    pub holdings: Vec<Holding>,
    pub total_value: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub daily_pnl_pct: Decimal,
    pub signals: Vec<RiskSignal>,
}

/// Decision logic only. Implementations never touch the portfolio themselves
/// and must give identical answers for identical inputs.
pub trait Strategy: Send + Sync {
    fn name(&self) -> String;

    fn plan_accumulation(
        &self,
        state: &PortfolioState,
        prices: &PriceSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Accumulation>;

    fn assess_risk(
        &self,
        state: &PortfolioState,
        prices: &PriceSnapshot,
        now: DateTime<Utc>,
    ) -> Result<RiskAssessment>;
}
