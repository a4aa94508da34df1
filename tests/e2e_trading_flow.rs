//! Full-pipeline flows on the mock adapters: a unanimous BUY travels
//! through gate, fan-out, aggregation, risk, and execution; a stale quote
//! yields NO_DECISION before any oracle is consulted; the kill switch
//! halts the session as a normal (exit 0) outcome.

use chrono::Utc;
use quorumtrade::application::agent::{AgentEvent, AgentExit, AgentState};
use quorumtrade::application::ensemble::VotingStrategy;
use quorumtrade::application::system::{Adapters, Application};
use quorumtrade::config::{
    AgentEnvConfig, Config, EnsembleEnvConfig, ExecutionEnvConfig, FreshnessEnvConfig,
    MemoryEnvConfig, Mode, MonitorEnvConfig, ResourceEnvConfig, RiskEnvConfig,
};
use quorumtrade::domain::ports::{
    ApprovalTransportPort, DataProviderPort, DecisionProviderPort, PlatformPort,
};
use quorumtrade::domain::types::{
    AssetClass, DecisionOutcome, Granularity, Instrument, NoDecisionReason, Quote, RiskLimits,
    SessionState, TradeAction,
};
use quorumtrade::infrastructure::mock::{
    MockApprovalTransport, MockDataProvider, MockOracle, MockPlatform,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn temp_root(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("qt-e2e-{}-{}", tag, Uuid::new_v4()))
}

fn btc() -> Instrument {
    Instrument::new("BTC/USD", AssetClass::Crypto, "mock")
}

fn fast_config(memory_root: PathBuf) -> Config {
    let providers = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
    let weights: HashMap<String, f64> = providers
        .iter()
        .map(|p| (p.clone(), 1.0 / 3.0))
        .collect();

    Config {
        mode: Mode::Mock,
        credential_id: "e2e".to_string(),
        instruments: vec![btc()],
        granularity: Granularity::Intraday,
        agent: AgentEnvConfig {
            analysis_frequency: Duration::from_millis(30),
            learning_batch: 32,
            reasoning_concurrency: 2,
            candle_history: 48,
            fault_decay_secs: 300,
            fault_backoff_base_secs: 5,
            recovery_max_attempts: 3,
            recovery_backoff_base: Duration::from_millis(10),
            keepalive: Duration::from_secs(20),
            shutdown_drain: Duration::from_millis(300),
        },
        ensemble: EnsembleEnvConfig {
            providers,
            provider_weights: weights,
            quorum_min: 3,
            strict_quorum: true,
            voting_strategy: VotingStrategy::Weighted,
            per_call_timeout: Duration::from_secs(2),
            global_deadline: Duration::from_secs(4),
            max_concurrency: 3,
        },
        risk: RiskEnvConfig {
            limits: RiskLimits {
                max_drawdown: 0.25,
                max_var_pct: 0.10,
                max_single_position: 0.20,
                max_correlated: 2,
                correlation_threshold: 0.8,
                max_daily_trades: 10,
                kill_switch_pct: 0.05,
            },
            risk_per_trade: 0.01,
            default_stop_loss_pct: 0.02,
            min_equity_floor: dec!(100),
            venue_min_size: dec!(0.0001),
            signal_only_default: false,
            allow_closed_sessions: false,
        },
        monitor: MonitorEnvConfig {
            poll_interval: Duration::from_millis(20),
            max_concurrent_trackers: 2,
            tracker_poll_interval: Duration::from_millis(10),
            cross_confirmations: 2,
            startup_max_retries: 3,
            startup_backoff_base: Duration::from_millis(10),
            max_hold: None,
        },
        resources: ResourceEnvConfig {
            cb_failure_threshold: 3,
            cb_recovery_timeout: Duration::from_secs(60),
            pool_size: 5,
            pool_acquire_timeout: Duration::from_secs(2),
            rate_free_per_sec: 10_000.0,
            rate_free_capacity: 10_000.0,
            rate_paid_per_sec: 10_000.0,
            rate_paid_capacity: 10_000.0,
            paid_credentials: Vec::new(),
            retry_max: 2,
            retry_backoff: Duration::from_millis(5),
        },
        memory: MemoryEnvConfig {
            root: memory_root,
            isolation_mode: false,
            ema_alpha: 0.1,
            weight_floor: 0.05,
            similar_k: 3,
            regime_window: 10,
        },
        execution: ExecutionEnvConfig {
            venue_timeout: Duration::from_secs(2),
            approval_timeout: Duration::from_secs(1),
            cooldown: Duration::from_secs(600),
        },
        freshness: FreshnessEnvConfig::from_env().unwrap(),
    }
}

struct MockWorld {
    data: MockDataProvider,
    platform: MockPlatform,
    oracles: Vec<Arc<MockOracle>>,
    adapters: Adapters,
}

async fn mock_world(votes: &[(&str, TradeAction, u8)], equity: Decimal) -> MockWorld {
    let data = MockDataProvider::new();
    let platform = MockPlatform::new(equity);
    data.set_price(&btc(), dec!(100)).await;
    platform.set_fill_price("BTC/USD", dec!(100)).await;

    let oracles: Vec<Arc<MockOracle>> = votes
        .iter()
        .map(|(id, action, conf)| Arc::new(MockOracle::answering(id, *action, *conf)))
        .collect();

    let adapters = Adapters {
        data: Arc::new(data.clone()) as Arc<dyn DataProviderPort>,
        platform: Arc::new(platform.clone()) as Arc<dyn PlatformPort>,
        oracles: oracles
            .iter()
            .map(|o| Arc::clone(o) as Arc<dyn DecisionProviderPort>)
            .collect(),
        approvals: vec![
            Arc::new(MockApprovalTransport::new("chat", true)) as Arc<dyn ApprovalTransportPort>
        ],
    };

    MockWorld {
        data,
        platform,
        oracles,
        adapters,
    }
}

#[tokio::test]
async fn test_unanimous_buy_flows_to_execution() {
    let root = temp_root("buy");
    let world = mock_world(
        &[
            ("alpha", TradeAction::Buy, 80),
            ("beta", TradeAction::Buy, 75),
            ("gamma", TradeAction::Buy, 70),
        ],
        dec!(10000),
    )
    .await;

    let app = Application::build_with_adapters(fast_config(root.clone()), world.adapters)
        .await
        .unwrap();
    let running = app.start();
    let (_snapshot, mut events) = running.handle.subscribe();

    // Watch for the fill, collecting state transitions on the way
    let mut states = Vec::new();
    let filled = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(AgentEvent::StateChanged { state, .. }) => states.push(state),
                Ok(AgentEvent::ExecutionCompleted(result)) => break result,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event stream closed: {}", e),
            }
        }
    })
    .await
    .expect("no execution within deadline");

    assert!(matches!(
        filled.status,
        quorumtrade::application::execution::ExecutionStatus::Filled { .. }
    ));
    assert_eq!(world.platform.open_call_count(), 1);

    // The freshness gate ran before any oracle was consulted, and the
    // oracles were all queried exactly once for the executed cycle
    for oracle in &world.oracles {
        assert!(oracle.call_count() >= 1);
    }

    // EXECUTION never follows EXECUTION without LEARNING or PERCEPTION
    for window in states.windows(2) {
        if window[1] == AgentState::Execution {
            assert_ne!(window[0], AgentState::Execution);
        }
    }

    // The venue reports the new position
    assert_eq!(world.platform.positions().await.unwrap().len(), 1);

    assert!(running.handle.stop().await);
    let exit = tokio::time::timeout(Duration::from_secs(10), running.agent_task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(exit, AgentExit::Stopped));
    assert_eq!(exit.exit_code(), 0);

    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn test_stale_quote_yields_no_decision_before_oracles() {
    let root = temp_root("stale");
    let world = mock_world(
        &[
            ("alpha", TradeAction::Buy, 90),
            ("beta", TradeAction::Buy, 90),
            ("gamma", TradeAction::Buy, 90),
        ],
        dec!(10000),
    )
    .await;

    // 20-minute-old quote against the 5-minute crypto limit
    world
        .data
        .set_quote(Quote {
            symbol: "BTC/USD".to_string(),
            bid: dec!(100),
            ask: dec!(100),
            timestamp: Utc::now() - chrono::Duration::minutes(20),
            session: SessionState::Open,
        })
        .await;

    let app = Application::build_with_adapters(fast_config(root.clone()), world.adapters)
        .await
        .unwrap();
    let running = app.start();
    let (_snapshot, mut events) = running.handle.subscribe();

    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(AgentEvent::DecisionProduced(outcome)) => break outcome,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event stream closed: {}", e),
            }
        }
    })
    .await
    .expect("no decision outcome within deadline");

    match outcome {
        DecisionOutcome::NoDecision { symbol, reason } => {
            assert_eq!(symbol, "BTC/USD");
            assert!(matches!(reason, NoDecisionReason::StaleData { .. }));
        }
        DecisionOutcome::Actionable(d) => panic!("expected NO_DECISION, got {:?}", d.action),
    }

    // The gate short-circuited: no oracle was ever queried
    for oracle in &world.oracles {
        assert_eq!(oracle.call_count(), 0);
    }
    assert_eq!(world.platform.open_call_count(), 0);

    running.cancel();
    let exit = tokio::time::timeout(Duration::from_secs(10), running.agent_task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(exit, AgentExit::Cancelled));
    assert_eq!(exit.exit_code(), 130);

    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn test_kill_switch_halts_session_with_exit_zero() {
    let root = temp_root("kill");
    let world = mock_world(
        &[
            ("alpha", TradeAction::Hold, 50),
            ("beta", TradeAction::Hold, 50),
            ("gamma", TradeAction::Hold, 50),
        ],
        dec!(10000),
    )
    .await;

    let app = Application::build_with_adapters(fast_config(root.clone()), world.adapters)
        .await
        .unwrap();

    // Recovery baselines equity at 10_000; wait for it to finish before
    // the day turns -7% against the 5% kill-switch floor
    let running = app.start();
    let mut status_stream = running.handle.status_stream();
    tokio::time::timeout(Duration::from_secs(5), async {
        while status_stream.borrow_and_update().state != AgentState::Idle {
            status_stream.changed().await.unwrap();
        }
    })
    .await
    .expect("agent never reached IDLE");
    world.platform.set_equity(dec!(9300)).await;

    let exit = tokio::time::timeout(Duration::from_secs(10), running.agent_task)
        .await
        .expect("agent did not halt")
        .unwrap();

    assert!(matches!(exit, AgentExit::KillSwitch));
    assert_eq!(exit.exit_code(), 0, "a kill-switch halt is a normal outcome");

    // No order was dispatched after the halt
    assert_eq!(world.platform.open_call_count(), 0);
    assert_eq!(running.handle.status().state, AgentState::Halt);
    assert!(running.handle.status().kill_switch);

    std::fs::remove_dir_all(&root).ok();
}
