use thiserror::Error;

/// Per-oracle failure during a fan-out cycle. The failing oracle is excluded
/// from this cycle's aggregation; it is never an agent-level error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("oracle timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("oracle output invalid: {reason}")]
    InvalidOutput { reason: String },

    #[error("oracle rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("oracle transport error: {reason}")]
    Transport { reason: String },

    #[error("circuit open for {service}: {last_error}")]
    CircuitOpen { service: String, last_error: String },

    #[error("fan-out deadline of {deadline_ms}ms elapsed before the oracle answered")]
    DeadlineElapsed { deadline_ms: u64 },
}

/// Structured gatekeeper rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RejectReason {
    StaleData,
    SessionClosed,
    KillSwitch,
    DailyTradeCap,
    DrawdownLimit,
    VarLimit,
    Concentration,
    Correlation,
    UnsizedExecutableDecision,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::StaleData => "stale_data",
            RejectReason::SessionClosed => "session_closed",
            RejectReason::KillSwitch => "kill_switch",
            RejectReason::DailyTradeCap => "daily_trade_cap",
            RejectReason::DrawdownLimit => "drawdown_limit",
            RejectReason::VarLimit => "var_limit",
            RejectReason::Concentration => "concentration",
            RejectReason::Correlation => "correlation",
            RejectReason::UnsizedExecutableDecision => "unsized_executable_decision",
        };
        write!(f, "{}", s)
    }
}

/// Errors surfaced by the exchange adapter through `PlatformPort`.
///
/// The split drives retry policy: `Transient` dispatch failures are retried
/// with backoff, `Permanent` ones are rejected immediately.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlatformError {
    #[error("venue timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("venue rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("venue transport error: {reason}")]
    Transport { reason: String },

    #[error("order validation failed: {reason}")]
    Validation { reason: String },

    #[error("authentication failed: {reason}")]
    Auth { reason: String },

    #[error("insufficient funds: need {need}, available {available}")]
    InsufficientFunds { need: String, available: String },

    #[error("position not found: {position_id}")]
    PositionNotFound { position_id: String },
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Timeout { .. }
                | PlatformError::RateLimited { .. }
                | PlatformError::Transport { .. }
        )
    }
}

/// Signal-only publish reached no acknowledging transport. Loud by contract.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("no approval transport acknowledged decision {decision_id}: {attempted} attempted")]
pub struct DeliveryError {
    pub decision_id: uuid::Uuid,
    pub attempted: usize,
}

/// Unrecoverable faults that must HALT the agent.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("invariant violated: {detail}")]
    InvariantViolated { detail: String },

    #[error("recovery failed after {attempts} attempts: {source}")]
    RecoveryFailed {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_transience() {
        assert!(PlatformError::Timeout { timeout_ms: 5000 }.is_transient());
        assert!(PlatformError::RateLimited { retry_after_ms: 100 }.is_transient());
        assert!(PlatformError::Transport {
            reason: "503".to_string()
        }
        .is_transient());

        assert!(!PlatformError::Validation {
            reason: "bad size".to_string()
        }
        .is_transient());
        assert!(!PlatformError::Auth {
            reason: "expired key".to_string()
        }
        .is_transient());
        assert!(!PlatformError::InsufficientFunds {
            need: "100".to_string(),
            available: "50".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_provider_error_formatting() {
        let err = ProviderError::Timeout { timeout_ms: 2500 };
        assert!(err.to_string().contains("2500"));

        let err = ProviderError::CircuitOpen {
            service: "oracle:claude".to_string(),
            last_error: "transport: 502".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("oracle:claude"));
        assert!(msg.contains("502"));
    }
}
