// src/connectors/traits.rs
use crate::config::Allocation;
use crate::connectors::messages::{AccountBalance, OpenOrders, ServerTime, TradeBalance};
use crate::types::PriceSnapshot;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Latest price for every allocation, keyed by asset. Either all resolve or the call fails.
    async fn fetch_prices(&self, allocations: &[Allocation]) -> Result<PriceSnapshot>;
}

#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn server_time(&self) -> Result<ServerTime>;

    async fn balance(&self) -> Result<AccountBalance>;

    async fn trade_balance(&self) -> Result<TradeBalance>;

    async fn open_orders(&self) -> Result<OpenOrders>;
}
