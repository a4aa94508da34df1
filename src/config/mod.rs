//! Configuration module for Quorumtrade.
//!
//! Structured configuration loading from environment variables, organized
//! by domain: agent timing, ensemble, risk, monitor, resources, memory,
//! execution. Everything is parsed and validated exactly once here; a bad
//! or missing required option is a startup failure (exit code 2).

mod agent_env_config;
mod ensemble_env_config;
mod risk_env_config;

pub use agent_env_config::{
    AgentEnvConfig, ExecutionEnvConfig, FreshnessEnvConfig, MemoryEnvConfig, MonitorEnvConfig,
    ResourceEnvConfig,
};
pub use ensemble_env_config::EnsembleEnvConfig;
pub use risk_env_config::RiskEnvConfig;

use crate::domain::types::{AssetClass, Granularity, Instrument};
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Application execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Deterministic in-memory adapters; no credentials needed.
    Mock,
    /// Real adapters, supplied by the embedding deployment.
    Live,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "live" => Ok(Mode::Live),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'mock' or 'live'", s),
        }
    }
}

/// Main application configuration, aggregated from the sub-modules.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub credential_id: String,
    pub instruments: Vec<Instrument>,
    pub granularity: Granularity,

    pub agent: AgentEnvConfig,
    pub ensemble: EnsembleEnvConfig,
    pub risk: RiskEnvConfig,
    pub monitor: MonitorEnvConfig,
    pub resources: ResourceEnvConfig,
    pub memory: MemoryEnvConfig,
    pub execution: ExecutionEnvConfig,
    pub freshness: FreshnessEnvConfig,
}

/// `"BTC/USD:crypto:binance,EUR/USD:forex:oanda"`
fn parse_instruments(raw: &str) -> Result<Vec<Instrument>> {
    let mut instruments = Vec::new();
    for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
        let parts: Vec<&str> = entry.trim().split(':').collect();
        anyhow::ensure!(
            parts.len() == 3,
            "Invalid INSTRUMENTS entry '{}': expected symbol:asset_class:venue",
            entry
        );
        instruments.push(Instrument::new(
            parts[0],
            parts[1].parse::<AssetClass>()?,
            parts[2],
        ));
    }
    anyhow::ensure!(
        !instruments.is_empty(),
        "INSTRUMENTS must name at least one instrument"
    );
    Ok(instruments)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mode = env::var("MODE")
            .unwrap_or_else(|_| "mock".to_string())
            .parse::<Mode>()?;

        let instruments = parse_instruments(
            &env::var("INSTRUMENTS").unwrap_or_else(|_| "BTC/USD:crypto:mock".to_string()),
        )
        .context("Failed to parse INSTRUMENTS")?;

        let granularity = match env::var("GRANULARITY")
            .unwrap_or_else(|_| "intraday".to_string())
            .to_lowercase()
            .as_str()
        {
            "intraday" => Granularity::Intraday,
            "daily" => Granularity::Daily,
            other => anyhow::bail!(
                "Invalid GRANULARITY: {}. Must be 'intraday' or 'daily'",
                other
            ),
        };

        Ok(Self {
            mode,
            credential_id: env::var("CREDENTIAL_ID").unwrap_or_else(|_| "default".to_string()),
            instruments,
            granularity,
            agent: AgentEnvConfig::from_env()?,
            ensemble: EnsembleEnvConfig::from_env()?,
            risk: RiskEnvConfig::from_env()?,
            monitor: MonitorEnvConfig::from_env()?,
            resources: ResourceEnvConfig::from_env()?,
            memory: MemoryEnvConfig::from_env()?,
            execution: ExecutionEnvConfig::from_env()?,
            freshness: FreshnessEnvConfig::from_env()?,
        })
    }

    /// Stable fingerprint of the behavior-affecting options, used to
    /// namespace isolated memory roots so simulation runs never share
    /// records with live runs.
    pub fn fingerprint(&self) -> String {
        let serialized = format!(
            "{:?}|{:?}|{:?}|{:?}|{:?}",
            self.instruments, self.ensemble, self.risk, self.agent, self.granularity
        );
        crate::domain::types::config_fingerprint(&serialized)
    }
}
