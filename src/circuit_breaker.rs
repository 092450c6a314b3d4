//! Circuit breaker (C1): protects every external-service call behind a
//! CLOSED/OPEN/HALF_OPEN gate, parameterized to a single fixed policy
//! (5 failures in a 60s window trips it, 30s cooldown, one HALF_OPEN probe).
//!
//! Adapted from `error_recovery_manager.rs`'s per-service `CircuitBreakerState`
//! map, collapsed to one shared policy per external dependency instead of the
//! bespoke presets that module kept per error type. Keeps that module's switch
//! to `tokio::sync::Mutex` over `std::sync::Mutex` so a held lock never blocks
//! the async runtime.
use crate::constants::{
    CIRCUIT_BREAKER_FAILURE_THRESHOLD, CIRCUIT_BREAKER_FAILURE_WINDOW,
    CIRCUIT_BREAKER_OPEN_COOLDOWN,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    /// Timestamps of failures within the trailing window.
    recent_failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// True once a HALF_OPEN probe has been let through and is in flight.
    probe_in_flight: bool,
}

/// One breaker per external dependency (RPC, bundle endpoint, quote API, …).
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                recent_failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            })),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Whether a call should be allowed through right now. OPEN rejects
    /// everything until the cooldown elapses, at which point exactly one
    /// caller is let through as a HALF_OPEN probe.
    pub async fn allow(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= CIRCUIT_BREAKER_OPEN_COOLDOWN && !inner.probe_in_flight {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(breaker = %self.name, "🟡 circuit breaker entering half-open probe");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "🟢 circuit breaker closed after recovery");
        }
        inner.state = CircuitState::Closed;
        inner.recent_failures.clear();
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if inner.state == CircuitState::HalfOpen {
            warn!(breaker = %self.name, "🔴 half-open probe failed, reopening circuit breaker");
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.probe_in_flight = false;
            inner.recent_failures.clear();
            return;
        }

        inner.recent_failures.push_back(now);
        while let Some(front) = inner.recent_failures.front() {
            if now.duration_since(*front) > CIRCUIT_BREAKER_FAILURE_WINDOW {
                inner.recent_failures.pop_front();
            } else {
                break;
            }
        }

        if inner.recent_failures.len() as u32 >= CIRCUIT_BREAKER_FAILURE_THRESHOLD
            && inner.state == CircuitState::Closed
        {
            warn!(
                breaker = %self.name,
                failures = inner.recent_failures.len(),
                "🔴 circuit breaker tripped open"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[tokio::test]
    async fn trips_after_threshold_failures() {
        let cb = CircuitBreaker::new("test");
        for _ in 0..CIRCUIT_BREAKER_FAILURE_THRESHOLD - 1 {
            cb.record_failure().await;
            assert_eq!(cb.state().await, CircuitState::Closed);
        }
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow().await);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let cb = CircuitBreaker::new("test");
        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        for _ in 0..CIRCUIT_BREAKER_FAILURE_THRESHOLD - 1 {
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new("test");
        for _ in 0..CIRCUIT_BREAKER_FAILURE_THRESHOLD {
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        // Can't wait out the real 30s cooldown here; directly exercise the
        // half-open path the cooldown would otherwise unlock.
        {
            let mut inner = cb.inner.lock().await;
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = true;
        }
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        let _ = sleep(Duration::from_millis(1));
    }
}
