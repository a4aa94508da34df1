//! Prometheus metrics definitions for Quorumtrade
//!
//! All metrics use the `quorumtrade_` prefix and are read-only. Push-based:
//! the registry is encoded to text by the reporter, no HTTP server.

use prometheus::{
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
    CounterVec, Gauge, GaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics for the trading agent
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Completed OODA cycles
    pub cycles_total: CounterVec,
    /// Decisions produced, by action and fallback tier
    pub decisions_total: CounterVec,
    /// NO_DECISION outcomes by reason
    pub no_decisions_total: CounterVec,
    /// Gatekeeper rejections by reason
    pub risk_rejections_total: CounterVec,
    /// Oracle failures by oracle and kind
    pub provider_failures_total: CounterVec,
    /// Orders dispatched by status
    pub executions_total: CounterVec,
    /// Circuit breaker state per service (0=closed, 1=half-open, 2=open)
    pub circuit_state: GenericGaugeVec<AtomicF64>,
    /// Number of open positions
    pub open_positions: GenericGauge<AtomicF64>,
    /// Daily P&L in quote units
    pub daily_pnl: GenericGauge<AtomicF64>,
    /// Kill switch engaged (0/1)
    pub kill_switch: GenericGauge<AtomicF64>,
    /// Trade outcomes recorded by exit reason
    pub outcomes_total: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cycles_total = CounterVec::new(
            Opts::new("quorumtrade_cycles_total", "Completed OODA cycles"),
            &["terminal_state"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let decisions_total = CounterVec::new(
            Opts::new(
                "quorumtrade_decisions_total",
                "Decisions produced by action and fallback tier",
            ),
            &["action", "tier"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let no_decisions_total = CounterVec::new(
            Opts::new(
                "quorumtrade_no_decisions_total",
                "NO_DECISION outcomes by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(no_decisions_total.clone()))?;

        let risk_rejections_total = CounterVec::new(
            Opts::new(
                "quorumtrade_risk_rejections_total",
                "Gatekeeper rejections by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(risk_rejections_total.clone()))?;

        let provider_failures_total = CounterVec::new(
            Opts::new(
                "quorumtrade_provider_failures_total",
                "Oracle failures by oracle and kind",
            ),
            &["oracle", "kind"],
        )?;
        registry.register(Box::new(provider_failures_total.clone()))?;

        let executions_total = CounterVec::new(
            Opts::new(
                "quorumtrade_executions_total",
                "Order dispatches by result status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(executions_total.clone()))?;

        let circuit_state = GaugeVec::new(
            Opts::new(
                "quorumtrade_circuit_state",
                "Circuit breaker state per service (0=closed, 1=half-open, 2=open)",
            ),
            &["service"],
        )?;
        registry.register(Box::new(circuit_state.clone()))?;

        let open_positions = Gauge::with_opts(Opts::new(
            "quorumtrade_open_positions",
            "Number of open positions",
        ))?;
        registry.register(Box::new(open_positions.clone()))?;

        let daily_pnl = Gauge::with_opts(Opts::new(
            "quorumtrade_daily_pnl",
            "Daily P&L in quote units",
        ))?;
        registry.register(Box::new(daily_pnl.clone()))?;

        let kill_switch = Gauge::with_opts(Opts::new(
            "quorumtrade_kill_switch",
            "Kill switch engaged (0/1)",
        ))?;
        registry.register(Box::new(kill_switch.clone()))?;

        let outcomes_total = CounterVec::new(
            Opts::new(
                "quorumtrade_outcomes_total",
                "Trade outcomes recorded by exit reason",
            ),
            &["exit_reason"],
        )?;
        registry.register(Box::new(outcomes_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            cycles_total,
            decisions_total,
            no_decisions_total,
            risk_rejections_total,
            provider_failures_total,
            executions_total,
            circuit_state,
            open_positions,
            daily_pnl,
            kill_switch,
            outcomes_total,
        })
    }

    /// Render the registry in Prometheus text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}
