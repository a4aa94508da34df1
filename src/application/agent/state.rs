use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The one agent state machine. External lifecycle framing (starting,
/// stopping) is just the edges of this enum, not a parallel machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Startup,
    PositionRecovery,
    Idle,
    Learning,
    Perception,
    Reasoning,
    RiskCheck,
    Execution,
    Recovering,
    Halt,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Startup => "STARTUP",
            AgentState::PositionRecovery => "POSITION_RECOVERY",
            AgentState::Idle => "IDLE",
            AgentState::Learning => "LEARNING",
            AgentState::Perception => "PERCEPTION",
            AgentState::Reasoning => "REASONING",
            AgentState::RiskCheck => "RISK_CHECK",
            AgentState::Execution => "EXECUTION",
            AgentState::Recovering => "RECOVERING",
            AgentState::Halt => "HALT",
        };
        write!(f, "{}", s)
    }
}

/// Coalesced view for observers (API, bot, websocket). Clients connecting
/// mid-cycle get this snapshot first, then deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub sub_state: Option<String>,
    pub cycle: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub open_positions_count: usize,
    pub kill_switch: bool,
    pub faulted_assets: Vec<String>,
    pub paused: bool,
}

impl AgentStatus {
    pub fn initial() -> Self {
        Self {
            state: AgentState::Startup,
            sub_state: None,
            cycle: 0,
            last_cycle_at: None,
            open_positions_count: 0,
            kill_switch: false,
            faulted_assets: Vec::new(),
            paused: false,
        }
    }
}

/// Terminal condition of an agent run, mapped to a process exit code by
/// the binary. A kill-switch halt is a normal outcome.
#[derive(Debug)]
pub enum AgentExit {
    /// Graceful stop (operator request). Exit code 0.
    Stopped,
    /// Kill switch tripped and the agent halted. Exit code 0.
    KillSwitch,
    /// Cancelled by signal. Exit code 130.
    Cancelled,
    /// Unrecoverable runtime failure. Exit code 3.
    Fatal(anyhow::Error),
}

impl AgentExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentExit::Stopped | AgentExit::KillSwitch => 0,
            AgentExit::Cancelled => 130,
            AgentExit::Fatal(_) => 3,
        }
    }
}
