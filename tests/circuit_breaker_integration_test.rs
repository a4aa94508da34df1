//! Circuit breaker behavior under the resource registry: recovery-window
//! probe admission and cross-subsystem state sharing.

use quorumtrade::infrastructure::core::{CircuitBreakerError, CircuitState};
use quorumtrade::infrastructure::resources::{ResourceConfig, ResourceRegistry, ServiceKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn registry(failure_threshold: u32, recovery: Duration) -> ResourceRegistry {
    ResourceRegistry::new(ResourceConfig {
        failure_threshold,
        recovery_timeout: recovery,
        ..ResourceConfig::default()
    })
}

#[tokio::test]
async fn test_at_most_one_probe_per_recovery_window() {
    let registry = registry(1, Duration::from_millis(50));
    let key = ServiceKey::new("data", "acct");
    let resources = registry.resources_for(&key).await;

    let _ = resources
        .breaker
        .call(async { Err::<(), &str>("down") })
        .await;
    assert_eq!(resources.breaker.state().await, CircuitState::Open);

    // Inside the window every call fails fast without touching the service
    let touched = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let touched = Arc::clone(&touched);
        let result = resources
            .breaker
            .call(async move {
                touched.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &str>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
    }
    assert_eq!(touched.load(Ordering::SeqCst), 0);

    // After the window exactly one probe goes through; its failure reopens
    // the circuit with a fresh window
    tokio::time::sleep(Duration::from_millis(80)).await;
    let result = resources
        .breaker
        .call(async { Err::<(), &str>("still down") })
        .await;
    assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
    assert_eq!(resources.breaker.state().await, CircuitState::Open);

    // New window: fail fast again, preserving the latest cause
    let result = resources.breaker.call(async { Ok::<(), &str>(()) }).await;
    match result {
        Err(CircuitBreakerError::Open(info)) => {
            assert_eq!(info.last_error, "still down");
            assert!(info.failure_count >= 2);
        }
        _ => panic!("expected fail-fast rejection"),
    }

    // Probe success closes it
    tokio::time::sleep(Duration::from_millis(80)).await;
    let result = resources.breaker.call(async { Ok::<i32, &str>(1) }).await;
    assert!(result.is_ok());
    assert_eq!(resources.breaker.state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_data_outage_is_visible_to_every_consumer_of_the_key() {
    // The oracle fan-out and the risk gatekeeper must consult the same
    // breaker for the same (service, credential) pair.
    let registry = registry(2, Duration::from_secs(60));
    let key = ServiceKey::new("data", "shared-cred");

    let fan_out_view = registry.resources_for(&key).await;
    for _ in 0..2 {
        let _ = fan_out_view
            .breaker
            .call(async { Err::<(), &str>("provider 502") })
            .await;
    }

    let gatekeeper_view = registry.resources_for(&key).await;
    assert_eq!(gatekeeper_view.breaker.state().await, CircuitState::Open);

    // A different credential is unaffected
    let other = registry
        .resources_for(&ServiceKey::new("data", "other-cred"))
        .await;
    assert_eq!(other.breaker.state().await, CircuitState::Closed);
}
