//! C9 Circuit Breaker Registry.
//!
//! Grounded on `router/circuit_breaker.rs`: per-operation state machine
//! (Closed/Open/HalfOpen) keyed by operation name, plus a separate
//! rate-limit cooldown ledger that tracks 429-style backoff without
//! touching `consecutive_failures` (spec §4.6, seed scenario S3).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Entry {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    rate_limit_hits: u32,
    rate_limited_until: Option<Instant>,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            rate_limit_hits: 0,
            rate_limited_until: None,
        }
    }
}

/// Snapshot returned to callers/event bus for observability.
#[derive(Debug, Clone)]
pub struct CircuitBreakerEntry {
    pub operation: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

pub struct CircuitBreakerRegistry {
    failure_threshold: u32,
    open_timeout: Duration,
    rate_limit_cap: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, open_timeout_ms: u64, rate_limit_cap_ms: u64) -> Self {
        Self {
            failure_threshold,
            open_timeout: Duration::from_millis(open_timeout_ms),
            rate_limit_cap: Duration::from_millis(rate_limit_cap_ms),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `operation` may be attempted right now. Transitions
    /// Open -> HalfOpen once the cooldown elapses, matching the teacher's
    /// `CircuitBreaker::allow`.
    pub fn allow(&self, operation: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(operation.to_string()).or_insert_with(Entry::new);

        if let Some(until) = entry.rate_limited_until {
            if Instant::now() < until {
                return false;
            }
            entry.rate_limited_until = None;
        }

        match entry.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = entry.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_timeout {
                    entry.state = BreakerState::HalfOpen;
                    tracing::warn!(operation, "circuit half-open, probing");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, operation: &str) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(operation.to_string()).or_insert_with(Entry::new);
        entry.consecutive_failures = 0;
        entry.rate_limit_hits = 0;
        if entry.state != BreakerState::Closed {
            tracing::info!(operation, "circuit closed after recovery");
        }
        entry.state = BreakerState::Closed;
        entry.opened_at = None;
    }

    pub fn record_failure(&self, operation: &str) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(operation.to_string()).or_insert_with(Entry::new);
        entry.consecutive_failures += 1;
        if entry.state == BreakerState::HalfOpen || entry.consecutive_failures >= self.failure_threshold {
            entry.state = BreakerState::Open;
            entry.opened_at = Some(Instant::now());
            tracing::warn!(
                operation,
                consecutive_failures = entry.consecutive_failures,
                "circuit opened"
            );
        }
    }

    /// Rate-limit signal: applies exponential backoff (2s,4s,8s...capped)
    /// without incrementing `consecutive_failures` or opening the breaker.
    pub fn record_rate_limit(&self, operation: &str) -> Duration {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(operation.to_string()).or_insert_with(Entry::new);
        entry.rate_limit_hits += 1;
        let backoff_ms = (2_u64.saturating_pow(entry.rate_limit_hits)).saturating_mul(1000);
        let backoff = Duration::from_millis(backoff_ms).min(self.rate_limit_cap);
        entry.rate_limited_until = Some(Instant::now() + backoff);
        tracing::warn!(operation, backoff_ms = backoff.as_millis() as u64, "rate limited");
        backoff
    }

    pub fn snapshot(&self, operation: &str) -> CircuitBreakerEntry {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(operation.to_string()).or_insert_with(Entry::new);
        CircuitBreakerEntry {
            operation: operation.to_string(),
            state: entry.state,
            consecutive_failures: entry.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let reg = CircuitBreakerRegistry::new(3, 50, 120_000);
        assert!(reg.allow("llm.call"));
        reg.record_failure("llm.call");
        reg.record_failure("llm.call");
        assert!(reg.allow("llm.call"));
        reg.record_failure("llm.call");
        assert!(!reg.allow("llm.call"));
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let reg = CircuitBreakerRegistry::new(1, 10, 120_000);
        reg.record_failure("build.compile");
        assert!(!reg.allow("build.compile"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(reg.allow("build.compile"));
        let snap = reg.snapshot("build.compile");
        assert_eq!(snap.state, BreakerState::HalfOpen);
    }

    #[test]
    fn test_rate_limit_does_not_count_as_failure() {
        let reg = CircuitBreakerRegistry::new(3, 50, 120_000);
        reg.record_rate_limit("llm.call");
        reg.record_rate_limit("llm.call");
        let snap = reg.snapshot("llm.call");
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.state, BreakerState::Closed);
    }

    #[test]
    fn test_rate_limit_backoff_capped() {
        let reg = CircuitBreakerRegistry::new(3, 50, 5_000);
        for _ in 0..10 {
            reg.record_rate_limit("llm.call");
        }
        let backoff = reg.record_rate_limit("llm.call");
        assert!(backoff <= Duration::from_millis(5_000));
    }

    #[test]
    fn test_success_resets_failures() {
        let reg = CircuitBreakerRegistry::new(3, 50, 120_000);
        reg.record_failure("x");
        reg.record_failure("x");
        reg.record_success("x");
        let snap = reg.snapshot("x");
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.state, BreakerState::Closed);
    }
}
