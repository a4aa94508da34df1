pub mod coordinator;
pub mod ledger;

pub use coordinator::{
    DispatchContext, ExecutionConfig, ExecutionCoordinator, ExecutionResult, ExecutionStatus,
};
pub use ledger::TradeLedger;
