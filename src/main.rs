// src/main.rs
use crate::config::AppConfig;
use crate::connectors::kraken::KrakenClient;
use crate::connectors::traits::AccountApi;
use crate::core::engine::TradingEngine;
use crate::core::scheduler::TokioScheduler;
use crate::credentials::{CredentialProvider, EnvFileCredentialProvider};
use crate::storage::state::StateStore;
use crate::strategies::dca::DcaStrategy;
use anyhow::Context;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

mod config;
mod connectors;
mod core;
mod credentials;
mod logging;
mod storage;
mod strategies;
mod types;
mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // 1. Load Configuration
    let config = AppConfig::new().context("loading configuration")?;
    let _log_guard = logging::init(&config.log)?;

    let allocation = config
        .strategy
        .allocations
        .iter()
        .map(|a| format!("{}% {}", a.weight * Decimal::ONE_HUNDRED, a.asset))
        .collect::<Vec<_>>()
        .join(", ");

    println!("========================================");
    println!("     KRAKEN PAPER TRADER - v0.1.0");
    println!("========================================");
    println!("Start:  {} {}", config.starting_cash, config.funding_asset);
    println!(
        "DCA:    {} {} every {}h",
        config.strategy.dca_amount,
        config.funding_asset,
        config.strategy.dca_interval_secs / 3600
    );
    println!("Split:  {}", allocation);
    println!("Mode:   📝 PAPER TRADING");
    println!("========================================");

    // 2. Credentials are the only hard requirement
    let credentials = match EnvFileCredentialProvider::new(&config.credentials_file).load() {
        Ok(credentials) => credentials,
        Err(e) => {
            error!("Cannot start without Kraken credentials: {}", e);
            return Err(e).context("loading Kraken credentials");
        }
    };

    // 3. Initialize Components
    let client = KrakenClient::new(credentials, &config.api_url, config.request_timeout())
        .context("building Kraken client")?;

    if config.verify_account {
        verify_account(&client).await;
    }

    let store = StateStore::new(
        config.state_file.clone(),
        config.funding_asset.clone(),
        config.starting_cash,
        config
            .strategy
            .allocations
            .iter()
            .map(|a| a.asset.clone())
            .collect(),
    );
    let strategy = DcaStrategy::new(
        config.strategy.clone(),
        config.funding_asset.clone(),
        config.starting_cash,
    );

    // 4. Run Engine until Ctrl+C
    let mut engine = TradingEngine::new(
        config,
        Box::new(client),
        strategy,
        store,
        Box::new(TokioScheduler),
    );

    tokio::select! {
        res = engine.run() => res?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested, exiting"),
    }

    Ok(())
}

/// Startup smoke test of the account endpoints. Failures are reported, never fatal.
async fn verify_account(api: &dyn AccountApi) {
    match api.server_time().await {
        Ok(time) => info!(
            "📡 Kraken reachable, server time {} ({})",
            time.rfc1123, time.unixtime
        ),
        Err(e) => warn!("Public API check failed: {:#}", e),
    }

    match api.balance().await {
        Ok(balance) => {
            info!("✅ Authentication successful");
            for (asset, amount) in &balance {
                info!("   {}: {}", asset, amount);
            }
        }
        Err(e) => {
            warn!("Authenticated balance check failed: {:#}", e);
            return;
        }
    }

    match api.trade_balance().await {
        Ok(tb) => info!(
            "📊 Equivalent balance {} | trade balance {} | margin {} | unrealized P&L {}",
            tb.equivalent_balance, tb.trade_balance, tb.margin, tb.unrealized_pnl
        ),
        Err(e) => warn!("Trade balance check failed: {:#}", e),
    }

    match api.open_orders().await {
        Ok(orders) => info!("📋 Open orders: {}", orders.open.len()),
        Err(e) => warn!("Open orders check failed: {:#}", e),
    }
}
