//! Agent control surface.
//!
//! The handle is what adapters (CLI, bot, websocket) talk to: lifecycle
//! commands, a status watch stream, and a broadcast event stream. A new
//! subscriber always receives the current status snapshot first, then
//! deltas.

use crate::application::execution::coordinator::ExecutionResult;
use crate::domain::types::{DecisionOutcome, TradeOutcome};
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use super::state::{AgentState, AgentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    Pause,
    Resume,
    Stop,
    EmergencyStop,
}

/// Stream events. Keepalives are emitted at least every 30 seconds even
/// when the agent is idle.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    StateChanged {
        state: AgentState,
        cycle: u64,
        trace_id: Uuid,
    },
    DecisionProduced(DecisionOutcome),
    ExecutionCompleted(ExecutionResult),
    OutcomeRecorded(TradeOutcome),
    KillSwitchTripped {
        day_pnl: String,
    },
    Keepalive,
}

#[derive(Clone)]
pub struct AgentHandle {
    cmd_tx: mpsc::Sender<AgentCommand>,
    status_rx: watch::Receiver<AgentStatus>,
    events_tx: broadcast::Sender<AgentEvent>,
}

impl AgentHandle {
    pub(crate) fn new(
        cmd_tx: mpsc::Sender<AgentCommand>,
        status_rx: watch::Receiver<AgentStatus>,
        events_tx: broadcast::Sender<AgentEvent>,
    ) -> Self {
        Self {
            cmd_tx,
            status_rx,
            events_tx,
        }
    }

    pub async fn pause(&self) -> bool {
        self.cmd_tx.send(AgentCommand::Pause).await.is_ok()
    }

    pub async fn resume(&self) -> bool {
        self.cmd_tx.send(AgentCommand::Resume).await.is_ok()
    }

    pub async fn stop(&self) -> bool {
        self.cmd_tx.send(AgentCommand::Stop).await.is_ok()
    }

    pub async fn emergency_stop(&self) -> bool {
        self.cmd_tx.send(AgentCommand::EmergencyStop).await.is_ok()
    }

    /// Current coalesced status snapshot.
    pub fn status(&self) -> AgentStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch stream of status changes; the borrowed value is the snapshot.
    pub fn status_stream(&self) -> watch::Receiver<AgentStatus> {
        self.status_rx.clone()
    }

    /// Event stream: snapshot first, then deltas.
    pub fn subscribe(&self) -> (AgentStatus, broadcast::Receiver<AgentEvent>) {
        (self.status(), self.events_tx.subscribe())
    }
}

/// Channels the agent end keeps.
pub struct AgentWiring {
    pub cmd_rx: mpsc::Receiver<AgentCommand>,
    pub status_tx: watch::Sender<AgentStatus>,
    pub events_tx: broadcast::Sender<AgentEvent>,
}

pub fn agent_channels() -> (AgentHandle, AgentWiring) {
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (status_tx, status_rx) = watch::channel(AgentStatus::initial());
    let (events_tx, _) = broadcast::channel(256);

    (
        AgentHandle::new(cmd_tx, status_rx, events_tx.clone()),
        AgentWiring {
            cmd_rx,
            status_tx,
            events_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_returns_snapshot_then_deltas() {
        let (handle, wiring) = agent_channels();

        let mut status = AgentStatus::initial();
        status.cycle = 7;
        wiring.status_tx.send_replace(status);

        let (snapshot, mut events) = handle.subscribe();
        assert_eq!(snapshot.cycle, 7);

        wiring.events_tx.send(AgentEvent::Keepalive).ok();
        assert!(matches!(
            events.recv().await.unwrap(),
            AgentEvent::Keepalive
        ));
    }

    #[tokio::test]
    async fn test_commands_reach_the_agent_end() {
        let (handle, mut wiring) = agent_channels();
        assert!(handle.pause().await);
        assert_eq!(wiring.cmd_rx.recv().await, Some(AgentCommand::Pause));
    }
}
