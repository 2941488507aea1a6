//! Circuit breaker (§4.7 upstream resilience): tracks per-upstream failures
//! and trips to `Open` so the Client Manager stops hammering a server that
//! is already down, then probes back in through `HalfOpen` once
//! `reset_timeout` has elapsed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through normally.
    Closed,
    /// Failure threshold reached; requests are rejected outright.
    Open,
    /// `reset_timeout` elapsed; the next request is let through as a probe.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// One breaker per upstream server.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    last_failure_time: Arc<RwLock<Option<Instant>>>,
    name: String,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            last_failure_time: Arc::new(RwLock::new(None)),
            name: name.into(),
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a call to this upstream should be attempted right now. An
    /// `Open` breaker whose `reset_timeout` has elapsed transitions itself
    /// to `HalfOpen` and lets this one probe request through.
    pub async fn allow_request(&self) -> bool {
        let state = *self.state.read().await;

        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let last_failure = *self.last_failure_time.read().await;
                let Some(time) = last_failure else { return false };
                if time.elapsed() < self.config.reset_timeout {
                    return false;
                }
                let mut state_write = self.state.write().await;
                if *state_write == CircuitState::Open {
                    *state_write = CircuitState::HalfOpen;
                    self.success_count.store(0, Ordering::SeqCst);
                    info!("circuit breaker '{}' transitioned to half-open", self.name);
                }
                true
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub async fn record_success(&self) {
        let state = *self.state.read().await;

        match state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold as u64 {
                    let mut state_write = self.state.write().await;
                    *state_write = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::SeqCst);
                    self.success_count.store(0, Ordering::SeqCst);
                    info!("circuit breaker '{}' closed after recovery", self.name);
                }
            }
            CircuitState::Open => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
        }
    }

    pub async fn record_failure(&self) {
        let state = *self.state.read().await;

        match state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                *self.last_failure_time.write().await = Some(Instant::now());

                if failures >= self.config.failure_threshold as u64 {
                    let mut state_write = self.state.write().await;
                    *state_write = CircuitState::Open;
                    warn!("circuit breaker '{}' opened after {} failures", self.name, failures);
                }
            }
            CircuitState::HalfOpen => {
                let mut state_write = self.state.write().await;
                *state_write = CircuitState::Open;
                *self.last_failure_time.write().await = Some(Instant::now());
                warn!("circuit breaker '{}' re-opened after failure in half-open state", self.name);
            }
            CircuitState::Open => {
                *self.last_failure_time.write().await = Some(Instant::now());
            }
        }
    }
}

/// Lazily creates and holds one [`CircuitBreaker`] per upstream server id.
pub struct CircuitBreakerManager {
    breakers: Arc<RwLock<std::collections::HashMap<String, Arc<CircuitBreaker>>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { breakers: Arc::new(RwLock::new(std::collections::HashMap::new())), config }
    }

    pub async fn get_breaker(&self, server_name: &str) -> Arc<CircuitBreaker> {
        let read = self.breakers.read().await;
        if let Some(breaker) = read.get(server_name) {
            return breaker.clone();
        }
        drop(read);

        let mut write = self.breakers.write().await;
        write
            .entry(server_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(server_name, self.config.clone())))
            .clone()
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn circuit_breaker_starts_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.allow_request().await);
    }

    #[tokio::test]
    async fn circuit_opens_after_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        for _ in 0..3 {
            cb.record_failure().await;
        }

        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow_request().await);
    }

    #[tokio::test]
    async fn circuit_half_open_after_timeout() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        sleep(Duration::from_millis(20)).await;

        assert!(cb.allow_request().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn circuit_closes_after_successes() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(10),
            success_threshold: 2,
        };
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        sleep(Duration::from_millis(20)).await;
        assert!(cb.allow_request().await);

        cb.record_success().await;
        cb.record_success().await;

        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn manager_reuses_breaker_per_server() {
        let manager = CircuitBreakerManager::default();
        let a = manager.get_breaker("upstream-a").await;
        let b = manager.get_breaker("upstream-a").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn circuit_state_display() {
        assert_eq!(format!("{}", CircuitState::Closed), "closed");
        assert_eq!(format!("{}", CircuitState::Open), "open");
        assert_eq!(format!("{}", CircuitState::HalfOpen), "half-open");
    }
}
