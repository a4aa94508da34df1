//! Ensemble and oracle-pool configuration parsing.
//!
//! Provider set, base weights (validated to sum to 1.0), quorum, voting
//! strategy, and fan-out timing.

use crate::application::ensemble::VotingStrategy;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use super::risk_env_config::{parse_bool, parse_u32, parse_usize};

const WEIGHT_SUM_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct EnsembleEnvConfig {
    pub providers: Vec<String>,
    /// Base weights keyed by oracle id; sums to 1.0 within 1e-6.
    pub provider_weights: HashMap<String, f64>,
    pub quorum_min: usize,
    pub strict_quorum: bool,
    pub voting_strategy: VotingStrategy,
    pub per_call_timeout: Duration,
    pub global_deadline: Duration,
    pub max_concurrency: usize,
}

impl EnsembleEnvConfig {
    pub fn from_env() -> Result<Self> {
        let providers: Vec<String> = env::var("PROVIDERS")
            .unwrap_or_else(|_| "claude,gpt,rules".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        anyhow::ensure!(!providers.is_empty(), "PROVIDERS must name at least one oracle");

        let provider_weights = match env::var("PROVIDER_WEIGHTS") {
            Ok(raw) => parse_weights(&raw, &providers)?,
            // Equal weights when unspecified
            Err(_) => {
                let w = 1.0 / providers.len() as f64;
                providers.iter().map(|p| (p.clone(), w)).collect()
            }
        };

        let sum: f64 = provider_weights.values().sum();
        anyhow::ensure!(
            (sum - 1.0).abs() < WEIGHT_SUM_EPSILON,
            "PROVIDER_WEIGHTS must sum to 1.0, got {}",
            sum
        );

        let voting_strategy = env::var("VOTING_STRATEGY")
            .unwrap_or_else(|_| "weighted".to_string())
            .parse::<VotingStrategy>()?;

        Ok(Self {
            providers,
            provider_weights,
            quorum_min: parse_usize("QUORUM_MIN", 3)?,
            strict_quorum: parse_bool("STRICT_QUORUM", true),
            voting_strategy,
            per_call_timeout: Duration::from_secs(u64::from(parse_u32(
                "ORACLE_TIMEOUT_SECS",
                30,
            )?)),
            global_deadline: Duration::from_secs(u64::from(parse_u32(
                "ORACLE_DEADLINE_SECS",
                60,
            )?)),
            max_concurrency: parse_usize("ORACLE_CONCURRENCY", 4)?,
        })
    }
}

/// `"claude:0.4,gpt:0.4,rules:0.2"` over exactly the configured providers.
fn parse_weights(raw: &str, providers: &[String]) -> Result<HashMap<String, f64>> {
    let mut weights = HashMap::new();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (name, weight) = pair
            .split_once(':')
            .with_context(|| format!("Invalid PROVIDER_WEIGHTS entry '{}'", pair))?;
        let weight: f64 = weight
            .trim()
            .parse()
            .with_context(|| format!("Invalid weight in '{}'", pair))?;
        anyhow::ensure!(weight >= 0.0, "weight for {} must be non-negative", name);
        weights.insert(name.trim().to_string(), weight);
    }

    for provider in providers {
        anyhow::ensure!(
            weights.contains_key(provider),
            "PROVIDER_WEIGHTS missing configured provider '{}'",
            provider
        );
    }
    anyhow::ensure!(
        weights.len() == providers.len(),
        "PROVIDER_WEIGHTS names {} oracles, PROVIDERS names {}",
        weights.len(),
        providers.len()
    );

    Ok(weights)
}
