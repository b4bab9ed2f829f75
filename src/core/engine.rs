// src/core/engine.rs
use crate::config::AppConfig;
use crate::connectors::traits::MarketData;
use crate::core::scheduler::Scheduler;
use crate::storage::state::{PortfolioState, StateStore};
use crate::strategies::traits::{Accumulation, RiskAssessment, Strategy};
use crate::types::{RiskSignal, StatusReport, Trade};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// What one pass of the loop did.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub trades: Vec<Trade>,
    pub deferred: bool,
    pub signals: Vec<RiskSignal>,
    pub report: StatusReport,
    pub persisted: bool,
}

pub struct TradingEngine<S> {
    config: AppConfig,
    market_data: Box<dyn MarketData>,
    strategy: S,
    store: StateStore,
    scheduler: Box<dyn Scheduler>,
    state: PortfolioState,
}

impl<S> TradingEngine<S>
where
    S: Strategy,
{
    pub fn new(
        config: AppConfig,
        market_data: Box<dyn MarketData>,
        strategy: S,
        store: StateStore,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        let state = store.fresh_state(scheduler.now());
        Self {
            config,
            market_data,
            strategy,
            store,
            scheduler,
            state,
        }
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub async fn load_state(&mut self) {
        self.state = self.store.load(self.scheduler.now()).await;
    }

    /// Loads the snapshot and loops forever. Iteration failures are logged and retried after a back-off.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Engine starting with strategy {}, snapshot at {}",
            self.strategy.name(),
            self.store.path().display()
        );
        self.load_state().await;

        loop {
            self.cycle().await;
        }
    }

    /// Same as `run`, bounded to `iterations` passes.
    pub async fn run_for(&mut self, iterations: usize) {
        self.load_state().await;
        for _ in 0..iterations {
            self.cycle().await;
        }
    }

    async fn cycle(&mut self) {
        let pause = match self.run_iteration().await {
            Ok(outcome) => {
                debug!(
                    "Cycle done: {} trades, {} signals, deferred={}, persisted={}. 💤 Sleeping {}s",
                    outcome.trades.len(),
                    outcome.signals.len(),
                    outcome.deferred,
                    outcome.persisted,
                    self.config.poll_interval_secs
                );
                self.config.poll_interval()
            }
            Err(e) => {
                error!("❌ Iteration failed: {:#}", e);
                self.config.error_backoff()
            }
        };
        self.scheduler.sleep(pause).await;
    }

    /// fetch prices -> scheduled buy -> risk check -> commit -> persist -> report.
    ///
    /// All decisions run against a copy of the portfolio; in-memory state only moves
    /// once every step up to persistence has succeeded, so a failed pass leaves
    /// both memory and the snapshot untouched.
    pub async fn run_iteration(&mut self) -> Result<IterationOutcome> {
        let now = self.scheduler.now();
        let funding = self.config.funding_asset.as_str();

        let prices = self
            .market_data
            .fetch_prices(&self.config.strategy.allocations)
            .await
            .context("fetching prices")?;
        debug!("Price snapshot: {:?}", prices);

        let mut working = self.state.clone();
        let mut executed = Vec::new();
        let mut deferred = false;

        match self.strategy.plan_accumulation(&working, &prices, now)? {
            Accumulation::Execute(trades) => {
                info!("💰 Executing scheduled buy of {} {}", self.config.strategy.dca_amount, funding);
                for trade in trades {
                    working
                        .apply_trade(trade.clone(), funding)
                        .with_context(|| format!("applying {} buy", trade.asset))?;
                    info!(
                        "✅ Bought {} {} at {} ({} {})",
                        trade.quantity.round_dp(8),
                        trade.asset,
                        trade.unit_price.round_dp(2),
                        trade.notional_value.round_dp(2),
                        funding
                    );
                    executed.push(trade);
                }
                working.last_scheduled_action_time = Some(now);
            }
            Accumulation::Deferred {
                required,
                available,
            } => {
                deferred = true;
                warn!(
                    "⚠️ Insufficient {} for scheduled buy: need {}, have {}. Retrying next cycle",
                    funding, required, available
                );
            }
            Accumulation::BelowMinimum {
                asset,
                notional,
                price,
            } => {
                deferred = true;
                warn!(
                    "⚠️ Scheduled buy skipped: {} {} of {} at {} is below the minimum quantity step",
                    notional, funding, asset, price
                );
            }
            Accumulation::NotDue { next_due } => {
                debug!("Next scheduled buy due at {}", next_due);
            }
        }

        let risk = self.strategy.assess_risk(&working, &prices, now)?;
        for signal in &risk.signals {
            log_signal(signal);
        }
        working.record_valuation(risk.total_value, self.config.starting_cash, now);

        self.state = working;

        let persisted = match self.store.save(&self.state).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save portfolio snapshot: {}", e);
                false
            }
        };

        let report = self.build_report(&risk, now);
        log_report(&report);

        Ok(IterationOutcome {
            trades: executed,
            deferred,
            signals: risk.signals,
            report,
            persisted,
        })
    }

    fn build_report(&self, risk: &RiskAssessment, now: DateTime<Utc>) -> StatusReport {
        let next_accumulation = self.state.last_scheduled_action_time.and_then(|last| {
            chrono::Duration::from_std(self.config.strategy.dca_interval())
                .ok()
                .map(|interval| last + interval)
        });

        StatusReport {
            funding_asset: self.config.funding_asset.clone(),
            cash: risk.cash,
            holdings: risk.holdings.clone(),
            total_value: risk.total_value,
            total_pnl: self.state.total_pnl,
            total_pnl_pct: risk.pnl_pct,
            daily_pnl: self.state.daily_pnl,
            trade_count: self.state.trades.len(),
            runtime_hours: (now - self.state.start_time).num_hours(),
            next_accumulation,
        }
    }
}

fn log_signal(signal: &RiskSignal) {
    match signal {
        RiskSignal::TakeProfit { pnl_pct } => warn!(
            "🎯 TAKE PROFIT triggered at +{}% (advisory only, no position is closed)",
            pnl_pct.round_dp(2)
        ),
        RiskSignal::StopLoss { pnl_pct } => warn!(
            "🛑 STOP LOSS triggered at {}% (advisory only, no position is closed)",
            pnl_pct.round_dp(2)
        ),
        RiskSignal::DailyLossLimit { daily_pnl_pct } => warn!(
            "📉 Daily loss limit reached at {}% today (advisory only)",
            daily_pnl_pct.round_dp(2)
        ),
    }
}

fn log_report(report: &StatusReport) {
    info!(
        total_value = %report.total_value.round_dp(2),
        total_pnl = %report.total_pnl.round_dp(2),
        total_pnl_pct = %report.total_pnl_pct.round_dp(2),
        daily_pnl = %report.daily_pnl.round_dp(2),
        trades = report.trade_count,
        runtime_hours = report.runtime_hours,
        "📊 Paper trading status"
    );
    info!("   {}: {}", report.funding_asset, report.cash.round_dp(2));
    for holding in &report.holdings {
        info!(
            "   {}: {} @ {} = {} {}",
            holding.asset,
            holding.quantity.round_dp(8),
            holding.price.round_dp(2),
            holding.value.round_dp(2),
            report.funding_asset
        );
    }
    match report.next_accumulation {
        Some(at) => info!("⏰ Next scheduled buy at {}", at),
        None => info!("⏰ Next scheduled buy is due now"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::dca::DcaStrategy;
    use crate::types::PriceSnapshot;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap()
    }

    #[derive(Clone)]
    struct ManualClock {
        now: Arc<Mutex<DateTime<Utc>>>,
        sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    impl ManualClock {
        fn at(now: DateTime<Utc>) -> Self {
            Self {
                now: Arc::new(Mutex::new(now)),
                sleeps: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Scheduler for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            let mut now = self.now.lock().unwrap();
            *now = *now + chrono::Duration::from_std(duration).unwrap();
        }
    }

    /// Replays queued answers, then keeps returning the last good snapshot.
    #[derive(Clone)]
    struct ScriptedMarket {
        script: Arc<Mutex<VecDeque<std::result::Result<PriceSnapshot, String>>>>,
        last: Arc<Mutex<PriceSnapshot>>,
    }

    impl ScriptedMarket {
        fn new(answers: Vec<std::result::Result<PriceSnapshot, String>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(answers.into())),
                last: Arc::new(Mutex::new(PriceSnapshot::new())),
            }
        }
    }

    #[async_trait]
    impl MarketData for ScriptedMarket {
        async fn fetch_prices(&self, _allocations: &[crate::config::Allocation]) -> Result<PriceSnapshot> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(prices)) => {
                    *self.last.lock().unwrap() = prices.clone();
                    Ok(prices)
                }
                Some(Err(msg)) => Err(anyhow!(msg)),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    fn prices(btc: &str, eth: &str) -> PriceSnapshot {
        [("BTC".to_string(), dec(btc)), ("ETH".to_string(), dec(eth))]
            .into_iter()
            .collect()
    }

    fn store_at(path: &Path) -> StateStore {
        let config = AppConfig::default();
        StateStore::new(
            path,
            config.funding_asset.clone(),
            config.starting_cash,
            config
                .strategy
                .allocations
                .iter()
                .map(|a| a.asset.clone())
                .collect(),
        )
    }

    fn engine(
        path: &Path,
        market: ScriptedMarket,
        clock: ManualClock,
    ) -> TradingEngine<DcaStrategy> {
        engine_with(AppConfig::default(), path, market, clock)
    }

    fn engine_with(
        config: AppConfig,
        path: &Path,
        market: ScriptedMarket,
        clock: ManualClock,
    ) -> TradingEngine<DcaStrategy> {
        let strategy = DcaStrategy::new(
            config.strategy.clone(),
            config.funding_asset.clone(),
            config.starting_cash,
        );
        TradingEngine::new(
            config,
            Box::new(market),
            strategy,
            store_at(path),
            Box::new(clock),
        )
    }

    #[tokio::test]
    async fn first_iteration_buys_on_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let clock = ManualClock::at(t0());
        let mut engine = engine(
            &path,
            ScriptedMarket::new(vec![Ok(prices("50000", "3000"))]),
            clock,
        );
        engine.load_state().await;

        let outcome = engine.run_iteration().await.unwrap();

        assert_eq!(outcome.trades.len(), 2);
        assert!(outcome.persisted);
        assert!(outcome.signals.is_empty());
        let state = engine.state();
        assert_eq!(state.balance("USD"), dec("900"));
        assert_eq!(state.balance("BTC"), dec("0.0014"));
        assert_eq!(state.balance("ETH"), dec("0.01"));
        assert_eq!(state.last_scheduled_action_time, Some(t0()));
        assert_eq!(outcome.report.total_value, dec("1000"));
        assert_eq!(outcome.report.trade_count, 2);
        assert_eq!(
            outcome.report.next_accumulation,
            Some(t0() + chrono::Duration::hours(24))
        );

        let on_disk = store_at(&path).load(t0()).await;
        assert_eq!(&on_disk, engine.state());
    }

    #[tokio::test]
    async fn overdue_schedule_emits_one_trade_per_asset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = store_at(&path);
        let mut seeded = store.fresh_state(t0() - chrono::Duration::days(5));
        seeded.last_scheduled_action_time =
            Some(t0() - chrono::Duration::hours(24) - chrono::Duration::seconds(1));
        store.save(&seeded).await.unwrap();

        let mut engine = engine(
            &path,
            ScriptedMarket::new(vec![Ok(prices("50000", "3000"))]),
            ManualClock::at(t0()),
        );
        engine.load_state().await;
        let outcome = engine.run_iteration().await.unwrap();

        let assets: Vec<&str> = outcome.trades.iter().map(|t| t.asset.as_str()).collect();
        assert_eq!(assets, vec!["BTC", "ETH"]);
        assert!(outcome.trades.iter().all(|t| t.reason == "DCA"));
        assert_eq!(engine.state().last_scheduled_action_time, Some(t0()));
        assert_eq!(outcome.report.runtime_hours, 120);
    }

    #[tokio::test]
    async fn low_funding_defers_without_touching_bookmark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = store_at(&path);
        let last = t0() - chrono::Duration::days(2);
        let mut seeded = store.fresh_state(t0() - chrono::Duration::days(10));
        seeded.balances.insert("USD".to_string(), dec("40"));
        seeded.last_scheduled_action_time = Some(last);
        store.save(&seeded).await.unwrap();

        let mut engine = engine(
            &path,
            ScriptedMarket::new(vec![Ok(prices("50000", "3000"))]),
            ManualClock::at(t0()),
        );
        engine.load_state().await;
        let outcome = engine.run_iteration().await.unwrap();

        assert!(outcome.trades.is_empty());
        assert!(outcome.deferred);
        assert_eq!(engine.state().last_scheduled_action_time, Some(last));
        assert_eq!(engine.state().balance("USD"), dec("40"));
        assert!(engine.state().trades.is_empty());
    }

    #[tokio::test]
    async fn dust_sized_buy_keeps_loop_reporting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut config = AppConfig::default();
        config.strategy.dca_amount = dec("0.000001");
        let clock = ManualClock::at(t0());
        let mut engine = engine_with(
            config,
            &path,
            ScriptedMarket::new(vec![Ok(prices("50000", "3000"))]),
            clock.clone(),
        );
        engine.load_state().await;

        let outcome = engine.run_iteration().await.unwrap();
        assert!(outcome.deferred);
        assert!(outcome.trades.is_empty());
        assert!(outcome.persisted);
        assert_eq!(outcome.report.total_value, dec("1000"));
        assert_eq!(engine.state().last_scheduled_action_time, None);
        assert_eq!(engine.state().balance("USD"), dec("1000"));

        engine.run_for(2).await;
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60); 2]);
        assert!(engine.state().trades.is_empty());
    }

    #[tokio::test]
    async fn second_pass_within_interval_does_not_buy() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::at(t0());
        let mut engine = engine(
            &dir.path().join("state.json"),
            ScriptedMarket::new(vec![Ok(prices("50000", "3000"))]),
            clock.clone(),
        );
        engine.run_for(2).await;

        assert_eq!(engine.state().trades.len(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60); 2]);
    }

    #[tokio::test]
    async fn failed_fetch_commits_nothing_and_backs_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let clock = ManualClock::at(t0());
        let mut engine = engine(
            &path,
            ScriptedMarket::new(vec![
                Err("connection reset".to_string()),
                Ok(prices("50000", "3000")),
            ]),
            clock.clone(),
        );
        engine.load_state().await;
        let before = engine.state().clone();

        let err = engine.run_iteration().await.unwrap_err();
        assert!(format!("{:#}", err).contains("connection reset"));
        assert_eq!(engine.state(), &before);
        assert!(!path.exists());

        engine.scheduler.sleep(Duration::from_secs(5)).await;
        let outcome = engine.run_iteration().await.unwrap();
        assert_eq!(outcome.trades.len(), 2);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn loop_survives_errors_with_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::at(t0());
        let mut engine = engine(
            &dir.path().join("state.json"),
            ScriptedMarket::new(vec![
                Err("timeout".to_string()),
                Err("EAPI:Rate limit exceeded".to_string()),
                Ok(prices("50000", "3000")),
            ]),
            clock.clone(),
        );
        engine.run_for(3).await;

        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(5),
                Duration::from_secs(60)
            ]
        );
        assert_eq!(engine.state().trades.len(), 2);
    }

    #[tokio::test]
    async fn save_failure_keeps_in_memory_progress() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let mut engine = engine(
            &blocker.join("state.json"),
            ScriptedMarket::new(vec![Ok(prices("50000", "3000"))]),
            ManualClock::at(t0()),
        );
        engine.load_state().await;

        let outcome = engine.run_iteration().await.unwrap();
        assert!(!outcome.persisted);
        assert_eq!(engine.state().trades.len(), 2);
        assert_eq!(engine.state().balance("USD"), dec("900"));
    }

    #[tokio::test]
    async fn funding_decrement_matches_trade_notionals() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::at(t0());
        let mut engine = engine(
            &dir.path().join("state.json"),
            ScriptedMarket::new(vec![
                Ok(prices("43210.98", "2345.67")),
                Ok(prices("41000.5", "2200.25")),
            ]),
            clock.clone(),
        );
        engine.load_state().await;
        engine.run_iteration().await.unwrap();
        engine.scheduler.sleep(Duration::from_secs(86_400)).await;
        engine.run_iteration().await.unwrap();

        let state = engine.state();
        assert_eq!(state.trades.len(), 4);
        let spent: Decimal = state.trades.iter().map(|t| t.notional_value).sum();
        assert_eq!(dec("1000") - state.balance("USD"), spent);
        for asset in ["BTC", "ETH"] {
            let bought: Decimal = state
                .trades
                .iter()
                .filter(|t| t.asset == asset)
                .map(|t| t.quantity)
                .sum();
            assert_eq!(state.balance(asset), bought);
        }
        for trade in &state.trades {
            let diff = trade.notional_value - trade.quantity * trade.unit_price;
            assert!(diff >= Decimal::ZERO && diff < dec("0.001"));
        }
        assert!(state.balances.values().all(|v| *v >= Decimal::ZERO));
    }

    #[tokio::test]
    async fn risk_signal_is_advisory_only() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::at(t0());
        let mut engine = engine(
            &dir.path().join("state.json"),
            ScriptedMarket::new(vec![
                Ok(prices("50000", "3000")),
                Ok(prices("50000", "1000")),
            ]),
            clock.clone(),
        );
        engine.load_state().await;
        engine.run_iteration().await.unwrap();
        let holdings_before = engine.state().balances.clone();

        clock.sleep(Duration::from_secs(60)).await;
        let outcome = engine.run_iteration().await.unwrap();

        assert!(matches!(outcome.signals.as_slice(), [RiskSignal::StopLoss { .. }]));
        assert!(outcome.trades.is_empty());
        assert_eq!(engine.state().balances, holdings_before);
        assert_eq!(engine.state().total_pnl, dec("-20"));
    }
}
