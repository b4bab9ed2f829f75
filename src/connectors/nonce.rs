// src/connectors/nonce.rs
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly increasing nonce, microseconds since epoch when the clock allows.
/// Two calls in the same microsecond (or a clock step backwards) still advance by one.
#[derive(Debug, Default)]
pub struct NonceSource {
    last: AtomicU64,
}

impl NonceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        self.next_after(now)
    }

    fn next_after(&self, candidate: u64) -> u64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}
