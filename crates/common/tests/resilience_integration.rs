//! Integration tests for the circuit breaker registry
//!
//! Drives the breaker state machine through the public registry API with a
//! mock clock, covering tripping, recovery, probe capacity, manual reset,
//! cancellation and the background sweeper.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use projecthub_common::resilience::{
    CircuitBreakerRegistry, CircuitConfig, CircuitConfigOverrides, CircuitState, MockClock,
    ResilienceError,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Error returned by the simulated dependency
#[derive(Debug, Clone)]
struct UpstreamError {
    message: String,
}

impl UpstreamError {
    fn new(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UpstreamError {}

fn registry_with(config: CircuitConfig) -> (Arc<CircuitBreakerRegistry<MockClock>>, MockClock) {
    let clock = MockClock::new();
    let registry = CircuitBreakerRegistry::with_clock(config, clock.clone())
        .expect("valid registry config");
    (Arc::new(registry), clock)
}

fn config(threshold: u32, recovery: Duration) -> CircuitConfig {
    CircuitConfig::builder()
        .failure_threshold(threshold)
        .recovery_timeout(recovery)
        .build()
        .expect("valid circuit config")
}

async fn fail(registry: &CircuitBreakerRegistry<MockClock>, name: &str) {
    let result = registry
        .execute(name, || async { Err::<(), _>(UpstreamError::new("upstream unavailable")) })
        .await;
    assert!(matches!(result, Err(ResilienceError::Operation(_))), "operation should have run");
}

async fn succeed(registry: &CircuitBreakerRegistry<MockClock>, name: &str) {
    registry
        .execute(name, || async { Ok::<_, UpstreamError>(()) })
        .await
        .expect("operation should have run and succeeded");
}

/// Validates that consecutive failures trip the circuit and the next call
/// fails fast.
///
/// # Test Steps
/// 1. Fail three calls against a threshold-3 circuit
/// 2. Verify the circuit is OPEN
/// 3. Make a fourth call and verify it is rejected without running
#[tokio::test(flavor = "multi_thread")]
async fn test_trips_on_threshold_without_invoking_operation() {
    let (registry, _clock) = registry_with(config(3, Duration::from_secs(1)));

    for _ in 0..3 {
        fail(&registry, "inference.embed").await;
    }
    assert_eq!(registry.get_status("inference.embed").state, CircuitState::Open);

    let invoked = AtomicU32::new(0);
    let result = registry
        .execute("inference.embed", || async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, UpstreamError>(())
        })
        .await;

    match result {
        Err(ResilienceError::CircuitOpen(err)) => assert_eq!(err.name, "inference.embed"),
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

/// Validates the fail-fast window ends exactly at the recovery timeout.
///
/// # Test Steps
/// 1. Trip the circuit at t=0 with a 1000ms recovery timeout
/// 2. Verify calls at t=0 and t=999ms are rejected
/// 3. Verify a call at t=1000ms runs while the circuit is HALF_OPEN
#[tokio::test(flavor = "multi_thread")]
async fn test_fail_fast_window_then_half_open() {
    let (registry, clock) = registry_with(config(1, Duration::from_millis(1000)));
    fail(&registry, "inference.answer").await;

    for elapsed in [0, 999] {
        clock.set_elapsed(Duration::from_millis(elapsed));
        let result =
            registry.execute("inference.answer", || async { Ok::<_, UpstreamError>(()) }).await;
        assert!(
            result.as_ref().is_err_and(ResilienceError::is_circuit_open),
            "call at t={elapsed}ms should fail fast"
        );
    }

    clock.set_elapsed(Duration::from_millis(1000));
    let state_during_probe = registry
        .execute("inference.answer", || async {
            Ok::<_, UpstreamError>(registry.get_status("inference.answer").state)
        })
        .await
        .expect("probe admitted");

    assert_eq!(state_during_probe, CircuitState::HalfOpen);
    assert_eq!(registry.get_status("inference.answer").state, CircuitState::Closed);
}

/// Validates that a healed circuit counts failures from zero again.
///
/// # Test Steps
/// 1. Trip, wait out recovery, succeed once
/// 2. Verify CLOSED with a zero failure count
/// 3. Fail once and verify the circuit stays CLOSED
#[tokio::test(flavor = "multi_thread")]
async fn test_self_heal_restarts_threshold() {
    let (registry, clock) = registry_with(config(2, Duration::from_millis(500)));
    fail(&registry, "inference.embed").await;
    fail(&registry, "inference.embed").await;

    clock.advance_millis(500);
    succeed(&registry, "inference.embed").await;

    let status = registry.get_status("inference.embed");
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);

    fail(&registry, "inference.embed").await;
    assert_eq!(registry.get_status("inference.embed").state, CircuitState::Closed);
}

/// Validates that a failed probe re-opens the circuit with a fresh deadline.
///
/// # Test Steps
/// 1. Trip at t=0 and fail the probe at t=2000ms
/// 2. Verify OPEN with next attempt at t=2000ms + recovery
#[tokio::test(flavor = "multi_thread")]
async fn test_failed_probe_reopens() {
    let (registry, clock) = registry_with(config(1, Duration::from_millis(1000)));
    fail(&registry, "inference.embed").await;

    clock.set_elapsed(Duration::from_millis(2000));
    fail(&registry, "inference.embed").await;

    let status = registry.get_status("inference.embed");
    assert_eq!(status.state, CircuitState::Open);
    let next = status.next_attempt_time.expect("open circuit has a next attempt time");
    assert_eq!(next.timestamp_millis(), 3000);
}

/// Validates that HALF_OPEN admits exactly `half_open_max_calls` concurrent
/// probes.
///
/// # Test Steps
/// 1. Trip a circuit configured for two probes and wait out recovery
/// 2. Start two probes that block on a channel
/// 3. Verify a third concurrent call is rejected
/// 4. Release the probes and verify the circuit closes
#[tokio::test(flavor = "multi_thread")]
async fn test_half_open_capacity() {
    let defaults = CircuitConfig::builder()
        .failure_threshold(1)
        .recovery_timeout(Duration::from_secs(1))
        .half_open_max_calls(2)
        .build()
        .expect("valid config");
    let (registry, clock) = registry_with(defaults);
    fail(&registry, "inference.embed").await;
    clock.advance(Duration::from_secs(1));

    let mut releases = Vec::new();
    let mut probes = Vec::new();
    for _ in 0..2 {
        let (tx, rx) = oneshot::channel::<()>();
        releases.push(tx);
        let registry = Arc::clone(&registry);
        probes.push(tokio::spawn(async move {
            registry
                .execute("inference.embed", || async move {
                    rx.await.map_err(|_| UpstreamError::new("release dropped"))
                })
                .await
        }));
    }

    while registry.get_status("inference.embed").half_open_calls < 2 {
        tokio::task::yield_now().await;
    }

    let third = registry.execute("inference.embed", || async { Ok::<_, UpstreamError>(()) }).await;
    assert!(third.is_err_and(|err| err.is_circuit_open()));

    for release in releases {
        release.send(()).expect("probe still waiting");
    }
    for probe in probes {
        probe.await.expect("probe task").expect("probe succeeds");
    }

    let status = registry.get_status("inference.embed");
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.rejected_calls, 1);
}

/// Validates that a success between failures forgives the earlier ones.
#[tokio::test(flavor = "multi_thread")]
async fn test_consecutive_failure_forgiveness() {
    let (registry, _clock) = registry_with(config(3, Duration::from_secs(1)));

    fail(&registry, "inference.answer").await;
    fail(&registry, "inference.answer").await;
    succeed(&registry, "inference.answer").await;
    fail(&registry, "inference.answer").await;
    fail(&registry, "inference.answer").await;

    let status = registry.get_status("inference.answer");
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 2);
}

/// Validates that a manual reset admits the next call immediately.
#[tokio::test(flavor = "multi_thread")]
async fn test_manual_reset_admits_next_call() {
    let (registry, _clock) = registry_with(config(1, Duration::from_secs(3600)));
    fail(&registry, "inference.health").await;
    assert_eq!(registry.get_status("inference.health").state, CircuitState::Open);

    assert!(registry.reset("inference.health"));

    let invoked = AtomicU32::new(0);
    registry
        .execute("inference.health", || async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, UpstreamError>(())
        })
        .await
        .expect("reset circuit admits");
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

/// Validates that querying an unknown circuit does not create it.
#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_circuit_reports_closed() {
    let (registry, _clock) = registry_with(CircuitConfig::default());

    let status = registry.get_status("never-used");
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
    assert!(!registry.contains("never-used"));
    assert!(registry.get_all_statuses().is_empty());
    assert!(registry.config_in_effect("never-used").is_none());
}

/// Validates that concurrent first use of a name yields one shared circuit
/// and that the first config wins.
///
/// # Test Steps
/// 1. Race 16 tasks creating the same circuit with different thresholds
/// 2. Verify one registry entry exists
/// 3. Verify every task received the same breaker
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creation_is_idempotent() {
    let (registry, _clock) = registry_with(CircuitConfig::default());

    let handles: Vec<_> = (1..=16)
        .map(|threshold| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let overrides = CircuitConfigOverrides::new()
                    .failure_threshold(threshold)
                    .build()
                    .expect("valid overrides");
                registry.circuit("inference.embed", Some(&overrides))
            })
        })
        .collect();

    let mut breakers = Vec::new();
    for handle in handles {
        breakers.push(handle.await.expect("task completes"));
    }

    assert_eq!(registry.len(), 1);
    assert!(breakers.iter().all(|b| Arc::ptr_eq(b, &breakers[0])));
    let in_effect = registry.config_in_effect("inference.embed").expect("circuit exists");
    assert_eq!(&in_effect, breakers[0].config());
}

/// Validates that a caller abandoning a probe counts against the circuit.
#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_probe_counts_as_failure() {
    let (registry, clock) = registry_with(config(1, Duration::from_secs(1)));
    fail(&registry, "inference.embed").await;
    clock.advance(Duration::from_secs(1));

    let probe = registry.execute("inference.embed", || {
        std::future::pending::<Result<(), UpstreamError>>()
    });
    let abandoned = tokio::time::timeout(Duration::from_millis(20), probe).await;
    assert!(abandoned.is_err());

    let status = registry.get_status("inference.embed");
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.half_open_calls, 0);
}

/// Validates the background sweeper clears stale failures and stops on
/// cancellation.
///
/// # Test Steps
/// 1. Record one failure, then move the mock clock past the monitoring period
/// 2. Let the sweeper tick on paused tokio time
/// 3. Verify the failure count was cleared and the task exits when cancelled
#[tokio::test(start_paused = true)]
async fn test_sweeper_clears_stale_failures() {
    let defaults = CircuitConfig::builder()
        .failure_threshold(5)
        .monitoring_period(Duration::from_secs(60))
        .build()
        .expect("valid config");
    let (registry, clock) = registry_with(defaults);
    fail(&registry, "inference.answer").await;
    clock.advance(Duration::from_secs(61));

    let cancel = CancellationToken::new();
    let sweeper = registry.spawn_sweeper(Duration::from_millis(10), cancel.clone());
    tokio::time::sleep(Duration::from_millis(25)).await;

    assert_eq!(registry.get_status("inference.answer").failure_count, 0);

    cancel.cancel();
    sweeper.await.expect("sweeper exits cleanly");
}
