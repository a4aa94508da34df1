//! Process-wide resource registry.
//!
//! Every code path that touches an external service obtains its circuit
//! breaker, rate limiter, and (optionally) connection pool here, keyed by
//! `(service, credential_id)`. The registry is the only constructor of
//! these primitives: the oracle fan-out and the risk gatekeeper consult the
//! same breaker for the same key, so a data-provider outage opens one
//! breaker for both.

use crate::infrastructure::core::{CircuitBreaker, ConnectionPool, RateLimiter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub service: String,
    pub credential_id: String,
}

impl ServiceKey {
    pub fn new(service: impl Into<String>, credential_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            credential_id: credential_id.into(),
        }
    }

    fn label(&self) -> String {
        format!("{}:{}", self.service, self.credential_id)
    }
}

/// Rate tier for a service class. Paid credentials get the higher bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateTier {
    pub rate_per_sec: f64,
    pub capacity: f64,
}

#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub free_tier: RateTier,
    pub paid_tier: RateTier,
    /// Credential ids considered paid tier.
    pub paid_credentials: Vec<String>,
    pub pool_size: usize,
    pub pool_acquire_timeout: Duration,
    /// Services that get a connection pool in their triple.
    pub pooled_services: Vec<String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            free_tier: RateTier {
                rate_per_sec: 1.0,
                capacity: 5.0,
            },
            paid_tier: RateTier {
                rate_per_sec: 10.0,
                capacity: 50.0,
            },
            paid_credentials: Vec::new(),
            pool_size: 5,
            pool_acquire_timeout: Duration::from_secs(10),
            pooled_services: Vec::new(),
        }
    }
}

/// The triple handed to callers. Cloning shares the underlying primitives.
#[derive(Clone)]
pub struct ServiceResources {
    pub breaker: Arc<CircuitBreaker>,
    pub limiter: Arc<RateLimiter>,
    pub pool: Option<Arc<ConnectionPool>>,
}

pub struct ResourceRegistry {
    config: ResourceConfig,
    entries: Mutex<HashMap<ServiceKey, ServiceResources>>,
}

impl ResourceRegistry {
    pub fn new(config: ResourceConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get or lazily create the triple for `(service, credential_id)`.
    pub async fn resources_for(&self, key: &ServiceKey) -> ServiceResources {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key) {
            return existing.clone();
        }

        let tier = if self
            .config
            .paid_credentials
            .iter()
            .any(|c| c == &key.credential_id)
        {
            self.config.paid_tier
        } else {
            self.config.free_tier
        };

        let pool = if self
            .config
            .pooled_services
            .iter()
            .any(|s| s == &key.service)
        {
            Some(Arc::new(ConnectionPool::new(
                self.config.pool_size,
                self.config.pool_acquire_timeout,
            )))
        } else {
            None
        };

        info!(
            "ResourceRegistry: provisioning [{}] (rate {}/s, capacity {}, pool {})",
            key.label(),
            tier.rate_per_sec,
            tier.capacity,
            pool.is_some()
        );

        let resources = ServiceResources {
            breaker: Arc::new(CircuitBreaker::new(
                key.label(),
                self.config.failure_threshold,
                self.config.recovery_timeout,
            )),
            limiter: Arc::new(RateLimiter::new(tier.rate_per_sec, tier.capacity)),
            pool,
        };
        entries.insert(key.clone(), resources.clone());
        resources
    }

    /// Breaker states for the status surface.
    pub async fn breaker_states(
        &self,
    ) -> Vec<(String, crate::infrastructure::core::CircuitState)> {
        let entries = self.entries.lock().await;
        let mut out = Vec::with_capacity(entries.len());
        for (key, res) in entries.iter() {
            out.push((key.label(), res.breaker.state().await));
        }
        out
    }
}
