//! Ensemble aggregator.
//!
//! Folds the fan-out result into a single signal through a fallback
//! ladder: the configured voting strategy first, then majority voting,
//! then plain averaging, then the single most confident oracle. Weights
//! are renormalised over the responding set, the confidence is scaled by
//! an availability factor, and a quorum shortfall applies a further
//! 30% penalty and marks the signal accordingly.

use crate::domain::errors::ProviderError;
use crate::domain::types::{EnsembleMeta, FallbackTier, Recommendation, TradeAction};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingStrategy {
    Weighted,
    Majority,
    Stacking,
}

impl std::str::FromStr for VotingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weighted" => Ok(VotingStrategy::Weighted),
            "majority" => Ok(VotingStrategy::Majority),
            "stacking" => Ok(VotingStrategy::Stacking),
            _ => anyhow::bail!(
                "Invalid voting strategy: {}. Must be 'weighted', 'majority', or 'stacking'",
                s
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    /// Base weights over the configured oracle set; must sum to 1.0.
    pub base_weights: HashMap<String, f64>,
    pub quorum_min: usize,
    pub strategy: VotingStrategy,
    /// When true, a signal that only survived via the single-oracle tier
    /// without quorum is not actionable.
    pub strict_quorum: bool,
}

/// Aggregated signal before sizing and risk checks.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedSignal {
    pub action: TradeAction,
    pub confidence: u8,
    pub amount: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub meta: EnsembleMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    #[error("no oracle responded this cycle")]
    NoProviders,
}

/// Raw tier output before confidence adjustment.
struct TierSignal {
    action: TradeAction,
    confidence: f64,
    amount: Option<Decimal>,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
}

/// Tie-break preference: HOLD beats BUY beats SELL.
fn tie_rank(action: TradeAction) -> u8 {
    match action {
        TradeAction::Hold => 0,
        TradeAction::Buy => 1,
        TradeAction::Sell => 2,
        TradeAction::NoDecision => 3,
    }
}

fn mean_decimal(values: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    let values: Vec<Decimal> = values.collect();
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().copied().sum();
    Some(sum / Decimal::from(values.len()))
}

pub struct EnsembleAggregator {
    config: EnsembleConfig,
}

impl EnsembleAggregator {
    pub fn new(config: EnsembleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Renormalise weights over the responding set. A non-positive sum
    /// degenerates to equal weights.
    fn adjusted_weights(
        &self,
        active: &[&String],
        memory_weights: Option<&HashMap<String, f64>>,
    ) -> HashMap<String, f64> {
        let effective = |id: &str| -> f64 {
            let base = self.config.base_weights.get(id).copied().unwrap_or(0.0);
            match (self.config.strategy, memory_weights) {
                // Stacking blends the learned per-oracle weight in before
                // renormalisation; unknown oracles get a neutral 0.5.
                (VotingStrategy::Stacking, Some(mem)) => {
                    base * mem.get(id).copied().unwrap_or(0.5)
                }
                _ => base,
            }
        };

        let total: f64 = active.iter().map(|id| effective(id)).sum();
        if total <= 0.0 {
            let equal = 1.0 / active.len() as f64;
            return active.iter().map(|id| ((*id).clone(), equal)).collect();
        }
        active
            .iter()
            .map(|id| ((*id).clone(), effective(id) / total))
            .collect()
    }

    /// Configured-strategy tier. Weighted (and stacking, which differs only
    /// in the weights) picks the action with the highest adjusted-weight
    /// sum; confidence and amount are weighted sums over the active set.
    fn tier_primary(
        &self,
        active: &[(&String, &Recommendation)],
        weights: &HashMap<String, f64>,
    ) -> Option<TierSignal> {
        match self.config.strategy {
            VotingStrategy::Weighted | VotingStrategy::Stacking => {
                let mut scores: HashMap<TradeAction, f64> = HashMap::new();
                for (id, rec) in active {
                    let w = weights.get(*id).copied().unwrap_or(0.0);
                    *scores.entry(rec.action).or_insert(0.0) += w;
                }

                let action = scores
                    .iter()
                    .max_by(|a, b| {
                        a.1.partial_cmp(b.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            // Higher tie rank loses: prefer HOLD > BUY > SELL
                            .then_with(|| tie_rank(*b.0).cmp(&tie_rank(*a.0)))
                    })
                    .map(|(a, _)| *a)?;

                let confidence: f64 = active
                    .iter()
                    .map(|(id, rec)| {
                        weights.get(*id).copied().unwrap_or(0.0) * f64::from(rec.confidence)
                    })
                    .sum();

                let amount = {
                    let weighted: Vec<Decimal> = active
                        .iter()
                        .filter_map(|(id, rec)| {
                            let w = weights.get(*id).copied().unwrap_or(0.0);
                            rec.amount
                                .and_then(|a| Decimal::from_f64(w).map(|w| a * w))
                        })
                        .collect();
                    if weighted.is_empty() {
                        None
                    } else {
                        Some(weighted.into_iter().sum())
                    }
                };

                let supporters: Vec<&Recommendation> = active
                    .iter()
                    .filter(|(_, rec)| rec.action == action)
                    .map(|(_, rec)| *rec)
                    .collect();

                Some(TierSignal {
                    action,
                    confidence,
                    amount,
                    stop_loss: mean_decimal(supporters.iter().filter_map(|r| r.stop_loss)),
                    take_profit: mean_decimal(supporters.iter().filter_map(|r| r.take_profit)),
                })
            }
            VotingStrategy::Majority => self.tier_majority(active),
        }
    }

    /// One oracle, one vote. Majority action wins; confidence and amount
    /// are means over the supporting oracles; ties go to HOLD.
    fn tier_majority(&self, active: &[(&String, &Recommendation)]) -> Option<TierSignal> {
        if active.len() < 2 {
            return None;
        }

        let mut votes: HashMap<TradeAction, usize> = HashMap::new();
        for (_, rec) in active {
            *votes.entry(rec.action).or_insert(0) += 1;
        }

        let top = votes.values().copied().max()?;
        let leaders: Vec<TradeAction> = votes
            .iter()
            .filter(|(_, count)| **count == top)
            .map(|(a, _)| *a)
            .collect();
        let action = if leaders.len() == 1 {
            leaders[0]
        } else {
            TradeAction::Hold
        };

        let supporters: Vec<&Recommendation> = active
            .iter()
            .filter(|(_, rec)| rec.action == action)
            .map(|(_, rec)| *rec)
            .collect();
        if supporters.is_empty() {
            // Tie resolved to HOLD with no explicit HOLD votes
            return Some(TierSignal {
                action: TradeAction::Hold,
                confidence: 0.0,
                amount: None,
                stop_loss: None,
                take_profit: None,
            });
        }

        let confidence = supporters
            .iter()
            .map(|r| f64::from(r.confidence))
            .sum::<f64>()
            / supporters.len() as f64;

        Some(TierSignal {
            action,
            confidence,
            amount: mean_decimal(supporters.iter().filter_map(|r| r.amount)),
            stop_loss: mean_decimal(supporters.iter().filter_map(|r| r.stop_loss)),
            take_profit: mean_decimal(supporters.iter().filter_map(|r| r.take_profit)),
        })
    }

    /// Mode of actions (ties to HOLD), confidence averaged over everyone.
    fn tier_average(&self, active: &[(&String, &Recommendation)]) -> Option<TierSignal> {
        if active.len() < 2 {
            return None;
        }

        let mut votes: HashMap<TradeAction, usize> = HashMap::new();
        for (_, rec) in active {
            *votes.entry(rec.action).or_insert(0) += 1;
        }
        let top = votes.values().copied().max()?;
        let leaders: Vec<TradeAction> = votes
            .iter()
            .filter(|(_, count)| **count == top)
            .map(|(a, _)| *a)
            .collect();
        let action = if leaders.len() == 1 {
            leaders[0]
        } else {
            TradeAction::Hold
        };

        let confidence = active
            .iter()
            .map(|(_, r)| f64::from(r.confidence))
            .sum::<f64>()
            / active.len() as f64;

        let supporters: Vec<&Recommendation> = active
            .iter()
            .filter(|(_, rec)| rec.action == action)
            .map(|(_, rec)| *rec)
            .collect();

        Some(TierSignal {
            action,
            confidence,
            amount: mean_decimal(supporters.iter().filter_map(|r| r.amount)),
            stop_loss: mean_decimal(supporters.iter().filter_map(|r| r.stop_loss)),
            take_profit: mean_decimal(supporters.iter().filter_map(|r| r.take_profit)),
        })
    }

    /// Last rung: take the most confident oracle verbatim.
    fn tier_single(&self, active: &[(&String, &Recommendation)]) -> Option<TierSignal> {
        let (_, rec) = active.iter().max_by(|(ia, a), (ib, b)| {
            a.confidence
                .cmp(&b.confidence)
                // Deterministic winner when confidences tie
                .then_with(|| ib.cmp(ia))
        })?;

        Some(TierSignal {
            action: rec.action,
            confidence: f64::from(rec.confidence),
            amount: rec.amount,
            stop_loss: rec.stop_loss,
            take_profit: rec.take_profit,
        })
    }

    /// Aggregate one fan-out into a signal.
    pub fn aggregate(
        &self,
        ok: &HashMap<String, Recommendation>,
        failed: &HashMap<String, ProviderError>,
        memory_weights: Option<&HashMap<String, f64>>,
    ) -> Result<AggregatedSignal, AggregationError> {
        if ok.is_empty() {
            return Err(AggregationError::NoProviders);
        }

        let mut active: Vec<(&String, &Recommendation)> = ok.iter().collect();
        active.sort_by(|(a, _), (b, _)| a.cmp(b));
        let active_ids: Vec<&String> = active.iter().map(|(id, _)| *id).collect();
        let weights = self.adjusted_weights(&active_ids, memory_weights);

        let ladder: [(FallbackTier, Option<TierSignal>); 4] = [
            (FallbackTier::Primary, self.tier_primary(&active, &weights)),
            (FallbackTier::Majority, self.tier_majority(&active)),
            (FallbackTier::Average, self.tier_average(&active)),
            (FallbackTier::Single, self.tier_single(&active)),
        ];

        let (tier, signal) = ladder
            .into_iter()
            .find_map(|(tier, signal)| signal.map(|s| (tier, s)))
            .ok_or(AggregationError::NoProviders)?;

        if tier != FallbackTier::Primary {
            warn!(
                "EnsembleAggregator: fell back to {} tier ({} of {} oracles)",
                tier,
                active.len(),
                self.config.base_weights.len()
            );
        }

        // Availability factor scales with how much of the ensemble answered
        let configured = self.config.base_weights.len().max(1);
        let factor = 0.7 + 0.3 * (active.len() as f64 / configured as f64);

        let quorum_met = active.len() >= self.config.quorum_min;
        let mut confidence = signal.confidence * factor;
        if !quorum_met {
            confidence *= 0.7;
        }
        let confidence = confidence.round().clamp(0.0, 100.0) as u8;

        debug!(
            "EnsembleAggregator: {} conf {} via {} (factor {:.3}, quorum_met {})",
            signal.action, confidence, tier, factor, quorum_met
        );

        let mut providers_failed: Vec<String> = failed.keys().cloned().collect();
        providers_failed.sort();

        Ok(AggregatedSignal {
            action: signal.action,
            confidence,
            amount: signal.amount,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            meta: EnsembleMeta {
                providers_used: active_ids.iter().map(|s| (*s).clone()).collect(),
                providers_failed,
                original_weights: self.config.base_weights.clone(),
                adjusted_weights: weights,
                fallback_tier: tier,
                confidence_adjustment_factor: factor,
                quorum_met,
            },
        })
    }
}
