//! Agent, monitor, resource, memory, and execution timing configuration.

use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use super::risk_env_config::{parse_bool, parse_f64, parse_u32, parse_usize};

fn parse_secs(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(u64::from(parse_u32(
        key,
        default as u32,
    )?)))
}

#[derive(Debug, Clone)]
pub struct AgentEnvConfig {
    pub analysis_frequency: Duration,
    pub learning_batch: usize,
    pub reasoning_concurrency: usize,
    pub candle_history: usize,
    pub fault_decay_secs: i64,
    pub fault_backoff_base_secs: i64,
    pub recovery_max_attempts: u32,
    pub recovery_backoff_base: Duration,
    pub keepalive: Duration,
    pub shutdown_drain: Duration,
}

impl AgentEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            analysis_frequency: parse_secs("ANALYSIS_FREQUENCY_SECS", 300)?,
            learning_batch: parse_usize("LEARNING_BATCH", 32)?,
            reasoning_concurrency: parse_usize("REASONING_CONCURRENCY", 3)?,
            candle_history: parse_usize("CANDLE_HISTORY", 64)?,
            fault_decay_secs: i64::from(parse_u32("FAULT_DECAY_SECS", 900)?),
            fault_backoff_base_secs: i64::from(parse_u32("FAULT_BACKOFF_BASE_SECS", 60)?),
            recovery_max_attempts: parse_u32("RECOVERY_MAX_ATTEMPTS", 5)?,
            recovery_backoff_base: parse_secs("RECOVERY_BACKOFF_BASE_SECS", 2)?,
            keepalive: parse_secs("KEEPALIVE_SECS", 25)?,
            shutdown_drain: parse_secs("SHUTDOWN_DRAIN_SECS", 5)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MonitorEnvConfig {
    pub poll_interval: Duration,
    pub max_concurrent_trackers: usize,
    pub tracker_poll_interval: Duration,
    pub cross_confirmations: u32,
    pub startup_max_retries: u32,
    pub startup_backoff_base: Duration,
    pub max_hold: Option<Duration>,
}

impl MonitorEnvConfig {
    pub fn from_env() -> Result<Self> {
        let max_hold_secs = parse_u32("MAX_HOLD_SECS", 0)?;
        Ok(Self {
            poll_interval: parse_secs("MONITOR_POLL_INTERVAL_SECS", 30)?,
            max_concurrent_trackers: parse_usize("MAX_CONCURRENT_TRACKERS", 2)?,
            tracker_poll_interval: parse_secs("TRACKER_POLL_INTERVAL_SECS", 5)?,
            cross_confirmations: parse_u32("CROSS_CONFIRMATIONS", 2)?,
            startup_max_retries: parse_u32("STARTUP_MAX_RETRIES", 5)?,
            startup_backoff_base: parse_secs("STARTUP_BACKOFF_BASE_SECS", 1)?,
            max_hold: (max_hold_secs > 0)
                .then(|| Duration::from_secs(u64::from(max_hold_secs))),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResourceEnvConfig {
    pub cb_failure_threshold: u32,
    pub cb_recovery_timeout: Duration,
    pub pool_size: usize,
    pub pool_acquire_timeout: Duration,
    pub rate_free_per_sec: f64,
    pub rate_free_capacity: f64,
    pub rate_paid_per_sec: f64,
    pub rate_paid_capacity: f64,
    pub paid_credentials: Vec<String>,
    pub retry_max: u32,
    pub retry_backoff: Duration,
}

impl ResourceEnvConfig {
    pub fn from_env() -> Result<Self> {
        let paid_credentials = env::var("PAID_CREDENTIALS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            cb_failure_threshold: parse_u32("CB_FAILURE_THRESHOLD", 3)?,
            cb_recovery_timeout: parse_secs("CB_RECOVERY_TIMEOUT_SECS", 60)?,
            pool_size: parse_usize("POOL_SIZE", 5)?,
            pool_acquire_timeout: parse_secs("POOL_ACQUIRE_TIMEOUT_SECS", 10)?,
            rate_free_per_sec: parse_f64("RATE_FREE_PER_SEC", 1.0)?,
            rate_free_capacity: parse_f64("RATE_FREE_CAPACITY", 5.0)?,
            rate_paid_per_sec: parse_f64("RATE_PAID_PER_SEC", 10.0)?,
            rate_paid_capacity: parse_f64("RATE_PAID_CAPACITY", 50.0)?,
            paid_credentials,
            retry_max: parse_u32("RETRY_MAX", 3)?,
            retry_backoff: Duration::from_millis(u64::from(parse_u32(
                "RETRY_BACKOFF_MS",
                500,
            )?)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemoryEnvConfig {
    pub root: PathBuf,
    pub isolation_mode: bool,
    pub ema_alpha: f64,
    pub weight_floor: f64,
    pub similar_k: usize,
    pub regime_window: usize,
}

impl MemoryEnvConfig {
    pub fn from_env() -> Result<Self> {
        let weight_floor = parse_f64("MEMORY_WEIGHT_FLOOR", 0.05)?;
        anyhow::ensure!(
            weight_floor > 0.0,
            "MEMORY_WEIGHT_FLOOR must be positive (an oracle must never fully deprecate)"
        );
        Ok(Self {
            root: PathBuf::from(
                env::var("MEMORY_ROOT").unwrap_or_else(|_| "data/memory".to_string()),
            ),
            isolation_mode: parse_bool("ISOLATION_MODE", false),
            ema_alpha: parse_f64("MEMORY_EMA_ALPHA", 0.1)?,
            weight_floor,
            similar_k: parse_usize("MEMORY_SIMILAR_K", 5)?,
            regime_window: parse_usize("MEMORY_REGIME_WINDOW", 10)?,
        })
    }
}

/// Freshness thresholds per (asset class, session), seconds. Defaults are
/// the gate's built-in table.
#[derive(Debug, Clone)]
pub struct FreshnessEnvConfig {
    pub config: crate::application::freshness::FreshnessConfig,
}

impl FreshnessEnvConfig {
    pub fn from_env() -> Result<Self> {
        use chrono::Duration as ChronoDuration;

        let secs = |key: &str, default: i64| -> Result<ChronoDuration> {
            Ok(ChronoDuration::seconds(i64::from(parse_u32(
                key,
                default as u32,
            )?)))
        };

        Ok(Self {
            config: crate::application::freshness::FreshnessConfig {
                soft_limit: secs("FRESHNESS_SOFT_SECS", 300)?,
                crypto: secs("FRESHNESS_CRYPTO_SECS", 300)?,
                forex_open_intraday: secs("FRESHNESS_FOREX_OPEN_SECS", 300)?,
                forex_open_daily: secs("FRESHNESS_FOREX_DAILY_SECS", 900)?,
                forex_closed: secs("FRESHNESS_FOREX_CLOSED_SECS", 86_400)?,
                forex_weekend: secs("FRESHNESS_FOREX_WEEKEND_SECS", 259_200)?,
                equity_intraday_open: secs("FRESHNESS_EQUITY_OPEN_SECS", 300)?,
                equity_intraday_closed: secs("FRESHNESS_EQUITY_CLOSED_SECS", 900)?,
                equity_daily: secs("FRESHNESS_EQUITY_DAILY_SECS", 86_400)?,
                equity_weekend: secs("FRESHNESS_EQUITY_WEEKEND_SECS", 259_200)?,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionEnvConfig {
    pub venue_timeout: Duration,
    pub approval_timeout: Duration,
    pub cooldown: Duration,
}

impl ExecutionEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            venue_timeout: parse_secs("VENUE_TIMEOUT_SECS", 10)?,
            approval_timeout: parse_secs("APPROVAL_TIMEOUT_SECS", 5)?,
            cooldown: parse_secs("EXECUTION_COOLDOWN_SECS", 300)?,
        })
    }
}
