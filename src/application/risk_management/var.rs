//! Value-at-risk estimation.
//!
//! With enough history (N >= 30 returns) VaR comes from a Monte-Carlo
//! bootstrap over the observed returns; otherwise, or when the bootstrap
//! degenerates to a non-positive estimate, a volatility-prior heuristic
//! takes over. The RNG is seeded by the caller so the gatekeeper stays
//! deterministic for a given decision.

use crate::domain::types::AssetClass;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::{ContinuousCDF, Normal};

/// Minimum history length before the bootstrap is trusted.
pub const MIN_RETURNS: usize = 30;

/// Spec floor for bootstrap resamples.
pub const MIN_SAMPLES: usize = 10_000;

/// Daily volatility priors per asset class, used when history is thin.
fn volatility_prior(asset_class: AssetClass) -> f64 {
    match asset_class {
        AssetClass::Crypto => 0.04,
        AssetClass::Forex => 0.007,
        AssetClass::Equity => 0.015,
    }
}

fn z_score(confidence: f64) -> f64 {
    Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(confidence))
        .unwrap_or(2.326)
}

/// Parametric fallback: `exposure * z(confidence) * sigma_prior`.
pub fn heuristic_var(exposure: f64, asset_class: AssetClass, confidence: f64) -> f64 {
    exposure.abs() * z_score(confidence) * volatility_prior(asset_class)
}

/// One-period bootstrap: resample historical returns with replacement and
/// take the loss quantile at `confidence`.
pub fn bootstrap_var(
    returns: &[f64],
    exposure: f64,
    samples: usize,
    confidence: f64,
    seed: u64,
) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let samples = samples.max(MIN_SAMPLES);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut losses: Vec<f64> = (0..samples)
        .map(|_| {
            let r = returns[rng.random_range(0..returns.len())];
            -r * exposure.abs()
        })
        .collect();
    losses.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let idx = ((samples as f64 * confidence) as usize).min(samples - 1);
    losses[idx]
}

/// Estimate VaR for an exposure. Always strictly positive for a non-zero
/// exposure: a degenerate bootstrap (e.g. uniformly positive history)
/// falls back to the volatility prior.
pub fn value_at_risk(
    returns: &[f64],
    exposure: f64,
    asset_class: AssetClass,
    samples: usize,
    confidence: f64,
    seed: u64,
) -> f64 {
    if exposure == 0.0 {
        return 0.0;
    }
    if returns.len() >= MIN_RETURNS {
        let var = bootstrap_var(returns, exposure, samples, confidence, seed);
        if var > 0.0 {
            return var;
        }
    }
    heuristic_var(exposure, asset_class, confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_returns(n: usize) -> Vec<f64> {
        // Alternating +1% / -2% history
        (0..n)
            .map(|i| if i % 2 == 0 { 0.01 } else { -0.02 })
            .collect()
    }

    #[test]
    fn test_bootstrap_is_deterministic_for_a_seed() {
        let returns = mixed_returns(60);
        let a = bootstrap_var(&returns, 10_000.0, 10_000, 0.99, 42);
        let b = bootstrap_var(&returns, 10_000.0, 10_000, 0.99, 42);
        assert_eq!(a, b);

        let c = bootstrap_var(&returns, 10_000.0, 10_000, 0.99, 43);
        // Different seed resamples differently (same support, so the
        // quantile may coincide; the draw sequence must not)
        let _ = c;
    }

    #[test]
    fn test_bootstrap_var_tracks_worst_returns() {
        let returns = mixed_returns(60);
        let var = bootstrap_var(&returns, 10_000.0, 10_000, 0.99, 7);
        // Worst one-period loss is 2% of exposure
        assert!(var > 0.0);
        assert!(var <= 200.0 + 1e-9);
        assert!((var - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_positive_history_falls_back_to_prior() {
        // All-positive returns give a non-positive loss quantile
        let returns = vec![0.01; 60];
        let var = value_at_risk(&returns, 10_000.0, AssetClass::Crypto, 10_000, 0.99, 1);
        assert!(var > 0.0, "VaR must be strictly positive, got {}", var);
        assert_eq!(var, heuristic_var(10_000.0, AssetClass::Crypto, 0.99));
    }

    #[test]
    fn test_thin_history_uses_heuristic() {
        let returns = mixed_returns(10);
        let var = value_at_risk(&returns, 10_000.0, AssetClass::Forex, 10_000, 0.99, 1);
        assert_eq!(var, heuristic_var(10_000.0, AssetClass::Forex, 0.99));
    }

    #[test]
    fn test_priors_order_by_asset_class_risk() {
        let crypto = heuristic_var(10_000.0, AssetClass::Crypto, 0.99);
        let equity = heuristic_var(10_000.0, AssetClass::Equity, 0.99);
        let forex = heuristic_var(10_000.0, AssetClass::Forex, 0.99);
        assert!(crypto > equity);
        assert!(equity > forex);
    }

    #[test]
    fn test_zero_exposure_is_zero_var() {
        let returns = mixed_returns(60);
        assert_eq!(
            value_at_risk(&returns, 0.0, AssetClass::Crypto, 10_000, 0.99, 1),
            0.0
        );
    }
}
