// src/types.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// Latest traded price per asset symbol (e.g. "BTC" -> 50000).
/// Fetched fresh every cycle, never cached.
pub type PriceSnapshot = BTreeMap<String, Decimal>;

/// One simulated fill. Written once into the trade log and never touched again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub asset: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub notional_value: Decimal,
    pub reason: String,
}

/// Advisory output of the risk check. Nothing is sold in response.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskSignal {
    TakeProfit { pnl_pct: Decimal },
    StopLoss { pnl_pct: Decimal },
    DailyLossLimit { daily_pnl_pct: Decimal },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub asset: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub value: Decimal,
}

/// Summary logged at the end of every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub funding_asset: String,
    pub cash: Decimal,
    pub holdings: Vec<Holding>,
    pub total_value: Decimal,
    pub total_pnl: Decimal,
    pub total_pnl_pct: Decimal,
    pub daily_pnl: Decimal,
    pub trade_count: usize,
    pub runtime_hours: i64,
    pub next_accumulation: Option<DateTime<Utc>>,
}
