//! Oracle fan-out pool.
//!
//! Queries the configured oracle set in parallel with bounded concurrency.
//! Every call goes through its registry triple (rate limit, then circuit
//! breaker), carries a per-call timeout, and the whole fan-out is bounded
//! by a global deadline. Stragglers past the deadline are cancelled by
//! dropping their futures and reported as deadline failures; an oracle
//! whose output fails validation is demoted to `failed` with
//! `InvalidOutput`.

use crate::domain::errors::ProviderError;
use crate::domain::ports::DecisionProviderPort;
use crate::domain::types::Recommendation;
use crate::infrastructure::core::CircuitBreakerError;
use crate::infrastructure::resources::{ResourceRegistry, ServiceKey};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ProviderPoolConfig {
    pub per_call_timeout: Duration,
    pub global_deadline: Duration,
    pub max_concurrency: usize,
}

impl Default for ProviderPoolConfig {
    fn default() -> Self {
        Self {
            per_call_timeout: Duration::from_secs(30),
            global_deadline: Duration::from_secs(60),
            max_concurrency: 4,
        }
    }
}

/// Result of one fan-out cycle.
#[derive(Debug, Default)]
pub struct FanOut {
    pub ok: HashMap<String, Recommendation>,
    pub failed: HashMap<String, ProviderError>,
}

impl FanOut {
    pub fn responding(&self) -> usize {
        self.ok.len()
    }
}

/// Underlying call fault as seen by the breaker.
#[derive(Debug)]
enum CallFault {
    Timeout(Duration),
    Transport(String),
}

impl fmt::Display for CallFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFault::Timeout(t) => write!(f, "timeout after {:?}", t),
            CallFault::Transport(reason) => write!(f, "transport: {}", reason),
        }
    }
}

pub struct DecisionProviderPool {
    providers: Vec<Arc<dyn DecisionProviderPort>>,
    registry: Arc<ResourceRegistry>,
    credential_id: String,
    config: ProviderPoolConfig,
}

impl DecisionProviderPool {
    pub fn new(
        providers: Vec<Arc<dyn DecisionProviderPort>>,
        registry: Arc<ResourceRegistry>,
        credential_id: impl Into<String>,
        config: ProviderPoolConfig,
    ) -> Self {
        Self {
            providers,
            registry,
            credential_id: credential_id.into(),
            config,
        }
    }

    pub fn oracle_ids(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.oracle_id().to_string())
            .collect()
    }

    /// Registry key for one oracle. The gatekeeper consults the same key
    /// when it wants to know whether an oracle's breaker is open.
    pub fn service_key(&self, oracle_id: &str) -> ServiceKey {
        ServiceKey::new(format!("oracle:{}", oracle_id), self.credential_id.clone())
    }

    async fn query_one(
        &self,
        provider: &Arc<dyn DecisionProviderPort>,
        prompt: &str,
        gate: &Semaphore,
    ) -> Result<Recommendation, ProviderError> {
        // Semaphore is never closed while the pool lives
        let _permit = gate
            .acquire()
            .await
            .map_err(|_| ProviderError::Transport {
                reason: "concurrency gate closed".to_string(),
            })?;

        let resources = self
            .registry
            .resources_for(&self.service_key(provider.oracle_id()))
            .await;

        resources.limiter.acquire().await;

        let timeout = self.config.per_call_timeout;
        let outcome = resources
            .breaker
            .call(async {
                match tokio::time::timeout(timeout, provider.query(prompt)).await {
                    Ok(Ok(rec)) => Ok(rec),
                    Ok(Err(e)) => Err(CallFault::Transport(e.to_string())),
                    Err(_) => Err(CallFault::Timeout(timeout)),
                }
            })
            .await;

        let rec = match outcome {
            Ok(rec) => rec,
            Err(CircuitBreakerError::Open(info)) => {
                return Err(ProviderError::CircuitOpen {
                    service: info.service,
                    last_error: info.last_error,
                });
            }
            Err(CircuitBreakerError::Inner(CallFault::Timeout(t))) => {
                return Err(ProviderError::Timeout {
                    timeout_ms: t.as_millis() as u64,
                });
            }
            Err(CircuitBreakerError::Inner(CallFault::Transport(reason))) => {
                return Err(ProviderError::Transport { reason });
            }
        };

        // Validation happens outside the breaker: garbage output is an
        // oracle-quality problem, not a service outage.
        rec.validate()
            .map_err(|reason| ProviderError::InvalidOutput { reason })?;
        Ok(rec)
    }

    /// Fan out `prompt` to every configured oracle.
    pub async fn fan_out(&self, prompt: &str) -> FanOut {
        let gate = Semaphore::new(self.config.max_concurrency.max(1));
        let mut result = FanOut::default();

        let mut in_flight: FuturesUnordered<_> = self
            .providers
            .iter()
            .map(|provider| {
                let id = provider.oracle_id().to_string();
                let fut = self.query_one(provider, prompt, &gate);
                async move { (id, fut.await) }
            })
            .collect();

        let deadline = tokio::time::sleep(self.config.global_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        "DecisionProviderPool: global deadline {:?} elapsed with {} oracles outstanding",
                        self.config.global_deadline,
                        in_flight.len()
                    );
                    break;
                }
                next = in_flight.next() => {
                    match next {
                        Some((id, Ok(rec))) => {
                            debug!("DecisionProviderPool [{}]: ok ({} conf {})", id, rec.action, rec.confidence);
                            result.ok.insert(id, rec);
                        }
                        Some((id, Err(e))) => {
                            warn!("DecisionProviderPool [{}]: failed: {}", id, e);
                            result.failed.insert(id, e);
                        }
                        None => break,
                    }
                }
            }
        }

        // Dropping `in_flight` cancels the stragglers and unwinds their
        // network calls; report them so the aggregator sees every oracle.
        drop(in_flight);
        let deadline_ms = self.config.global_deadline.as_millis() as u64;
        for provider in &self.providers {
            let id = provider.oracle_id();
            if !result.ok.contains_key(id) && !result.failed.contains_key(id) {
                result.failed.insert(
                    id.to_string(),
                    ProviderError::DeadlineElapsed {
                        deadline_ms,
                    },
                );
            }
        }

        result
    }
}
