//! A small circuit breaker, the same three-state shape as the teacher's
//! `riptide-reliability::circuit_breaker::CircuitBreakerState`, but generic
//! enough to be reused for both per-database health tracking (Rotation
//! Manager) and per-origin fetch protection.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Threshold-based breaker: `failure_threshold` consecutive failures trips
/// it open; it reopens for probing (`HalfOpen`) after `open_cooldown`;
/// `success_threshold` consecutive successes while `HalfOpen` closes it
/// again. This directly implements §4.2's "three consecutive failures
/// mark down" / "two consecutive successes restore warning" rules when
/// `failure_threshold=3, success_threshold=2`.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    success_threshold: u32,
    open_cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, open_cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
            failure_threshold,
            success_threshold,
            open_cooldown,
        }
    }

    /// Current state, first allowing an `Open` breaker to transition to
    /// `HalfOpen` if its cooldown has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.open_cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                }
            }
        }
        inner.state
    }

    /// Whether a new probe/request may proceed right now.
    pub fn allow_request(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {
                // A success recorded against a still-open breaker (e.g. a
                // caller that ignored `allow_request`) does not itself
                // close it; only the HalfOpen probe path does.
            }
            CircuitState::Closed => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        } else if inner.state == CircuitState::HalfOpen {
            // A failure while probing reopens immediately.
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new(3, 2, Duration::from_secs(60));
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn half_open_requires_two_successes() {
        let cb = CircuitBreaker::new(1, 2, Duration::from_millis(0));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn failure_during_half_open_reopens() {
        let cb = CircuitBreaker::new(1, 2, Duration::from_millis(0));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
