// src/connectors/messages.rs
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

/// Shape shared by every public and private response.
/// A non-empty `error` means failure regardless of what `result` holds.
#[derive(Debug, Deserialize)]
pub struct KrakenResponse {
    #[serde(default)]
    pub error: Vec<String>,
    pub result: Option<serde_json::Value>,
}

/// One entry of `/0/public/Ticker`. Only the fields we read are mapped.
#[derive(Debug, Deserialize)]
pub struct TickerInfo {
    /// Last trade closed: `[price, lot volume]`
    #[serde(rename = "c")]
    pub last_trade: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerTime {
    pub unixtime: i64,
    pub rfc1123: String,
}

/// `/0/private/TradeBalance`, amounts in the quote currency.
#[derive(Debug, Deserialize)]
pub struct TradeBalance {
    #[serde(rename = "eb")]
    pub equivalent_balance: Decimal,
    #[serde(rename = "tb")]
    pub trade_balance: Decimal,
    #[serde(rename = "m", default)]
    pub margin: Decimal,
    #[serde(rename = "n", default)]
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct OpenOrders {
    #[serde(default)]
    pub open: HashMap<String, serde_json::Value>,
}

pub type AccountBalance = HashMap<String, Decimal>;
