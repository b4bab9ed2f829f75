// src/core/scheduler.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Clock and timer for the trading loop. Swapped for a manual clock in tests.
#[async_trait]
pub trait Scheduler: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
