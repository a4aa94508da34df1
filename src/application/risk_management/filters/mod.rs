pub mod concentration_check;
pub mod correlation_check;
pub mod daily_cap_check;
pub mod drawdown_check;
pub mod freshness_check;
pub mod kill_switch_check;
pub mod session_check;
pub mod sizing_check;
pub mod validator_trait;
pub mod var_check;

pub use concentration_check::ConcentrationCheck;
pub use correlation_check::CorrelationCheck;
pub use daily_cap_check::DailyCapCheck;
pub use drawdown_check::DrawdownCheck;
pub use freshness_check::FreshnessCheck;
pub use kill_switch_check::{kill_switch_engaged, KillSwitchCheck};
pub use session_check::SessionCheck;
pub use sizing_check::SizingSanityCheck;
pub use validator_trait::{RiskCheck, RiskContext, RiskVerdict};
pub use var_check::VarCheck;
