//! Risk gatekeeper.
//!
//! A fail-fast pipeline of ordered checks over `(Decision, RiskContext)`.
//! The gatekeeper holds no state of its own: everything it judges arrives
//! in the context, so the same inputs always produce the same verdict.

use tracing::{debug, warn};

use super::filters::{
    ConcentrationCheck, CorrelationCheck, DailyCapCheck, DrawdownCheck, FreshnessCheck,
    KillSwitchCheck, RiskCheck, RiskContext, RiskVerdict, SessionCheck, SizingSanityCheck,
    VarCheck,
};

pub struct RiskGatekeeper {
    checks: Vec<Box<dyn RiskCheck>>,
}

impl RiskGatekeeper {
    /// Pipeline with the standard check set, sorted by priority.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(FreshnessCheck),
            Box::new(SessionCheck),
            Box::new(KillSwitchCheck),
            Box::new(DailyCapCheck),
            Box::new(DrawdownCheck),
            Box::new(VarCheck::default()),
            Box::new(ConcentrationCheck),
            Box::new(CorrelationCheck),
            Box::new(SizingSanityCheck),
        ])
    }

    pub fn new(checks: Vec<Box<dyn RiskCheck>>) -> Self {
        let mut checks = checks;
        checks.sort_by_key(|c| c.priority());
        Self { checks }
    }

    /// Run enabled checks in priority order, stopping at the first
    /// rejection. Rejections are structured and logged, never silent.
    pub async fn assess(&self, ctx: &RiskContext<'_>) -> RiskVerdict {
        debug!(
            "RiskGatekeeper [{}]: assessing {} decision {}",
            ctx.decision.instrument.symbol, ctx.decision.action, ctx.decision.id
        );

        for check in &self.checks {
            if !check.is_enabled() {
                debug!("RiskGatekeeper: skipping disabled check {}", check.name());
                continue;
            }
            match check.check(ctx).await {
                RiskVerdict::Rejected { reason, detail } => {
                    warn!(
                        "RiskGatekeeper [{}]: rejected at {} ({}): {}",
                        ctx.decision.instrument.symbol,
                        check.name(),
                        reason,
                        detail
                    );
                    return RiskVerdict::Rejected { reason, detail };
                }
                RiskVerdict::Approved => continue,
            }
        }

        debug!(
            "RiskGatekeeper [{}]: approved decision {}",
            ctx.decision.instrument.symbol, ctx.decision.id
        );
        RiskVerdict::Approved
    }

    pub fn active_check_names(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.is_enabled())
            .map(|c| c.name())
            .collect()
    }
}
