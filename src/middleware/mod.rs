// Middleware for resilient provider calls
//
// Provides per-engine circuit breaking

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
