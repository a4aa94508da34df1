pub mod filters;
pub mod gatekeeper;
pub mod sizing_engine;
pub mod var;

pub use filters::{RiskCheck, RiskContext, RiskVerdict};
pub use gatekeeper::RiskGatekeeper;
pub use sizing_engine::{SizedOrder, SizingConfig, SizingEngine};
