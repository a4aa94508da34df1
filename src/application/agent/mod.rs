pub mod control;
pub mod state;
pub mod trading_agent;

pub use control::{agent_channels, AgentCommand, AgentEvent, AgentHandle};
pub use state::{AgentExit, AgentState, AgentStatus};
pub use trading_agent::{AgentConfig, TradingAgent};
