//! Per-target circuit breaker
//!
//! A lock-free state machine: Closed → Open when the failure ratio over a
//! rolling window crosses the threshold (with a minimum sample count),
//! Open → HalfOpen after the cool-down, HalfOpen → Closed on probe success
//! or back to Open on probe failure. State transitions use compare-exchange
//! so there is a single logical writer per target.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::BreakerConfig;

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker for one upstream target
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: AtomicU8,
    window_start_ms: AtomicI64,
    successes: AtomicU64,
    failures: AtomicU64,
    opened_at_ms: AtomicI64,
    probes_issued: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CLOSED),
            window_start_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            opened_at_ms: AtomicI64::new(0),
            probes_issued: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Whether a request may proceed to the upstream right now
    ///
    /// An open circuit flips to half-open once the cool-down elapses; while
    /// half-open only the probe budget passes.
    pub fn allow(&self) -> bool {
        let now = Utc::now().timestamp_millis();

        match self.state.load(Ordering::Acquire) {
            CLOSED => {
                self.roll_window(now);
                true
            }
            OPEN => {
                let opened_at = self.opened_at_ms.load(Ordering::Acquire);
                if now - opened_at >= (self.config.cooldown_secs as i64) * 1000 {
                    // Cool-down elapsed: one winner moves the circuit to half-open
                    if self
                        .state
                        .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.probes_issued.store(0, Ordering::Release);
                        tracing::info!("Circuit half-open; allowing probes");
                    }
                    self.try_take_probe()
                } else {
                    false
                }
            }
            _ => self.try_take_probe(),
        }
    }

    fn try_take_probe(&self) -> bool {
        let issued = self.probes_issued.fetch_add(1, Ordering::AcqRel);
        if issued < self.config.half_open_probes {
            true
        } else {
            self.probes_issued.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    /// Record a successful upstream exchange
    pub fn record_success(&self) {
        match self.state.load(Ordering::Acquire) {
            HALF_OPEN => {
                if self
                    .state
                    .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.reset_window(Utc::now().timestamp_millis());
                    tracing::info!("Circuit closed after successful probe");
                }
            }
            _ => {
                self.successes.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Record a failed upstream exchange (connect error, 5xx, timeout)
    pub fn record_failure(&self) {
        match self.state.load(Ordering::Acquire) {
            HALF_OPEN => {
                if self
                    .state
                    .compare_exchange(HALF_OPEN, OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.opened_at_ms
                        .store(Utc::now().timestamp_millis(), Ordering::Release);
                    tracing::warn!("Probe failed; circuit re-opened");
                }
            }
            CLOSED => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                let successes = self.successes.load(Ordering::Acquire);
                let total = failures + successes;

                if total >= self.config.min_requests {
                    let ratio = failures as f64 / total as f64;
                    if ratio >= self.config.failure_ratio
                        && self
                            .state
                            .compare_exchange(CLOSED, OPEN, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                    {
                        self.opened_at_ms
                            .store(Utc::now().timestamp_millis(), Ordering::Release);
                        tracing::warn!(
                            failures,
                            total,
                            ratio = format!("{:.2}", ratio),
                            "Failure ratio crossed threshold; circuit opened"
                        );
                    }
                }
            }
            _ => {}
        }
    }

    /// Expire the rolling window so stale samples stop influencing the ratio
    fn roll_window(&self, now: i64) {
        let start = self.window_start_ms.load(Ordering::Acquire);
        if now - start >= (self.config.window_secs as i64) * 1000
            && self
                .window_start_ms
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.successes.store(0, Ordering::Release);
            self.failures.store(0, Ordering::Release);
        }
    }

    fn reset_window(&self, now: i64) {
        self.window_start_ms.store(now, Ordering::Release);
        self.successes.store(0, Ordering::Release);
        self.failures.store(0, Ordering::Release);
    }
}

/// Process-wide registry of breakers keyed by target
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, target: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }
}
