use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::core::types::EngineType;

/// Engine circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls go through
    Closed,
    /// Engine is failing, calls are refused without reaching the provider
    Open,
    /// Cooldown elapsed, trial calls decide whether to close again
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,
    /// Cooldown before a trial call is let through
    pub cooldown: Duration,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

/// Per-engine failure gate.
///
/// One breaker guards one registered provider. Once an engine fails
/// `failure_threshold` times in a row the selector stops calling it and
/// records `ProviderError::CircuitOpen` instead, which lets fallback
/// happen immediately rather than after another timeout.
#[derive(Clone)]
pub struct CircuitBreaker {
    engine: EngineType,
    inner: Arc<RwLock<BreakerInner>>,
    config: CircuitBreakerConfig,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
    opened_at: Option<Instant>,
    trips: usize,
}

impl CircuitBreaker {
    pub fn new(engine: EngineType) -> Self {
        Self::with_config(engine, CircuitBreakerConfig::default())
    }

    pub fn with_config(engine: EngineType, config: CircuitBreakerConfig) -> Self {
        Self {
            engine,
            inner: Arc::new(RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                trips: 0,
            })),
            config,
        }
    }

    pub fn engine(&self) -> EngineType {
        self.engine
    }

    /// Whether a call to the engine may proceed now
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    info!("{} circuit half-open, probing", self.engine);
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                }
                cooled
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                info!("{} circuit closed", self.engine);
                inner.state = CircuitState::Closed;
                inner.consecutive_successes = 0;
                inner.opened_at = None;
            }
        }
    }

    /// Record a failed call. Returns true when this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.write();
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;

        let trip = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trip {
            warn!(
                "{} circuit opened after {} consecutive failures",
                self.engine, inner.consecutive_failures
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trips += 1;
        }
        trip
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    /// Number of times the circuit has opened
    pub fn trips(&self) -> usize {
        self.inner.read().trips
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
    }
}
