//! Risk configuration parsing from environment variables.
//!
//! Thresholds for the gatekeeper, the position sizer, and the kill switch.
//! Parsed and validated once at startup; downstream code never re-parses.

use crate::domain::types::RiskLimits;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub limits: RiskLimits,

    // Sizing
    pub risk_per_trade: f64,
    pub default_stop_loss_pct: f64,
    pub min_equity_floor: Decimal,
    pub venue_min_size: Decimal,
    pub signal_only_default: bool,

    pub allow_closed_sessions: bool,
}

pub(crate) fn parse_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("Failed to parse {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_u32(key: &str, default: u32) -> Result<u32> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<u32>()
            .with_context(|| format!("Failed to parse {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_usize(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("Failed to parse {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

pub(crate) fn parse_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match env::var(key) {
        Ok(raw) => Decimal::from_str(&raw)
            .with_context(|| format!("Failed to parse {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

fn validate_fraction(key: &str, value: f64) -> Result<f64> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&value),
        "{} must be within [0, 1], got {}",
        key,
        value
    );
    Ok(value)
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        let limits = RiskLimits {
            max_drawdown: validate_fraction("MAX_DRAWDOWN", parse_f64("MAX_DRAWDOWN", 0.15)?)?,
            max_var_pct: validate_fraction("MAX_VAR_PCT", parse_f64("MAX_VAR_PCT", 0.05)?)?,
            max_single_position: validate_fraction(
                "MAX_SINGLE_POSITION",
                parse_f64("MAX_SINGLE_POSITION", 0.20)?,
            )?,
            max_correlated: parse_usize("MAX_CORRELATED", 2)?,
            correlation_threshold: validate_fraction(
                "CORRELATION_THRESHOLD",
                parse_f64("CORRELATION_THRESHOLD", 0.8)?,
            )?,
            max_daily_trades: parse_u32("MAX_DAILY_TRADES", 10)?,
            kill_switch_pct: validate_fraction(
                "KILL_SWITCH_PCT",
                parse_f64("KILL_SWITCH_PCT", 0.05)?,
            )?,
        };

        Ok(Self {
            limits,
            risk_per_trade: validate_fraction(
                "RISK_PER_TRADE",
                parse_f64("RISK_PER_TRADE", 0.01)?,
            )?,
            default_stop_loss_pct: validate_fraction(
                "DEFAULT_STOP_LOSS_PCT",
                parse_f64("DEFAULT_STOP_LOSS_PCT", 0.02)?,
            )?,
            min_equity_floor: parse_decimal("MIN_EQUITY_FLOOR", Decimal::from(100))?,
            venue_min_size: parse_decimal("VENUE_MIN_SIZE", Decimal::new(1, 4))?,
            signal_only_default: parse_bool("SIGNAL_ONLY_DEFAULT", false),
            allow_closed_sessions: parse_bool("ALLOW_CLOSED_SESSIONS", false),
        })
    }
}
