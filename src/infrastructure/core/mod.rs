pub mod circuit_breaker;
pub mod connection_pool;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitOpen, CircuitState};
pub use connection_pool::{ConnectionPool, PoolExhausted, PoolSlot};
pub use rate_limiter::{RateLimited, RateLimiter};
