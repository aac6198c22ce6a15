//! Failure injection tests: fault scenarios driven through the full guard stack.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ingest_guard::error::{ErrorKind, ServiceError};
use ingest_guard::faults::scenario::{broker_outage, network_partition};
use ingest_guard::faults::{FaultScenario, ANY_DEPENDENCY};
use ingest_guard::health::checks::probe_tcp;
use ingest_guard::health::{CheckFilter, HealthStatus};
use ingest_guard::lifecycle::{ControlSource, HandlerError, LifecycleState};
use ingest_guard::resilience::CircuitState;

mod common;

#[tokio::test]
async fn test_broker_outage_opens_circuit_after_exhausted_retries() {
    let broker = common::start_mock_dependency().await;
    let h = common::harness(common::test_config(vec![common::dependency("broker", broker.addr, true)]));
    let guard = &h.service.guard;
    let _scope = h.service.faults.activate(vec![broker_outage()]);

    let address = broker.addr.to_string();
    let first = guard
        .call("broker", || probe_tcp(&address, Duration::from_millis(200)))
        .await
        .unwrap_err();
    match first {
        ServiceError::RetryExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(last.kind(), ErrorKind::Unavailable);
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    let breaker = h.service.breakers.get("broker").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    let second = guard
        .call("broker", || probe_tcp(&address, Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(second, ServiceError::CircuitOpen { .. }));
    assert_eq!(broker.connections(), 0);

    assert_eq!(h.audit.with_action("retry.exhausted").len(), 1);
    assert_eq!(h.audit.with_action("circuit.transition").len(), 1);
    assert_eq!(h.audit.with_action("fault.activated").len(), 1);
}

#[tokio::test]
async fn test_open_circuit_never_invokes_operation() {
    let h = common::harness(common::test_config(Vec::new()));
    let invocations = AtomicU32::new(0);
    let op = || {
        invocations.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(ServiceError::connection("connection reset")) }
    };

    let first = h.service.guard.call("search", op).await.unwrap_err();
    assert_eq!(first.kind(), ErrorKind::RetryExhausted);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    let second = h.service.guard.call("search", op).await.unwrap_err();
    assert_eq!(second.kind(), ErrorKind::CircuitOpen);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_permanent_errors_neither_retry_nor_trip() {
    let h = common::harness(common::test_config(Vec::new()));
    let invocations = AtomicU32::new(0);

    for _ in 0..5 {
        let err = h
            .service
            .guard
            .call("validator", || {
                invocations.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ServiceError::invalid_input("malformed payload")) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 5);
    let breaker = h.service.breakers.get("validator").unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_scope_is_removed_after_failure_inside_it() {
    let h = common::harness(common::test_config(Vec::new()));
    let faults = h.service.faults.clone();

    {
        let _scope = faults.activate(vec![FaultScenario::error("datastore", ErrorKind::Timeout)]);
        let err = h
            .service
            .guard
            .call("datastore", || async { Ok::<_, ServiceError>(()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
    }
    assert!(faults.is_empty());

    let registry = faults.clone();
    let task = tokio::spawn(async move {
        let _scope = registry.activate(vec![broker_outage()]);
        assert!(registry.inject("broker").await.is_ok(), "fault should fire");
    });
    assert!(task.await.is_err());
    assert!(faults.is_empty());
    assert_eq!(h.audit.with_action("fault.deactivated").len(), 2);
}

#[tokio::test]
async fn test_wildcard_partition_hits_every_dependency() {
    let h = common::harness(common::test_config(Vec::new()));
    let _scope = h.service.faults.activate(vec![network_partition(1.0)]);
    assert_eq!(network_partition(1.0).target, ANY_DEPENDENCY);

    for dep in ["datastore", "broker", "cache"] {
        let err = h.service.faults.inject(dep).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}

#[tokio::test]
async fn test_required_failure_makes_service_unhealthy() {
    let datastore = common::start_mock_dependency().await;
    let down = common::refused_address().await;
    let h = common::harness(common::test_config(vec![
        common::dependency("datastore", datastore.addr, true),
        common::dependency("broker", down, true),
    ]));

    let report = h.service.health.check_all(&CheckFilter::All).await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert_eq!(report.components["datastore"].status, HealthStatus::Healthy);
    assert_eq!(report.components["broker"].status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_optional_failure_degrades_service() {
    let datastore = common::start_mock_dependency().await;
    let down = common::refused_address().await;
    let h = common::harness(common::test_config(vec![
        common::dependency("datastore", datastore.addr, true),
        common::dependency("cache", down, false),
    ]));

    let report = h.service.health.check_all(&CheckFilter::All).await;
    assert_eq!(report.status, HealthStatus::Degraded);

    let required = h.service.health.check_all(&CheckFilter::RequiredOnly).await;
    assert_eq!(required.status, HealthStatus::Healthy);
    assert!(!required.components.contains_key("cache"));
}

#[tokio::test]
async fn test_forced_open_circuit_degrades_health() {
    let datastore = common::start_mock_dependency().await;
    let h = common::harness(common::test_config(vec![common::dependency("datastore", datastore.addr, true)]));

    h.service.breakers.get("datastore").unwrap().force_open();
    let report = h.service.health.check_all(&CheckFilter::All).await;
    assert_eq!(report.components["datastore_circuit"].status, HealthStatus::Unhealthy);
    assert_eq!(report.status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_shutdown_runs_handlers_in_reverse_and_survives_failures() {
    let h = common::harness(common::test_config(Vec::new()));
    let shutdown = h.service.shutdown.clone();
    let order = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let order = order.clone();
        shutdown.register_handler(name, move || async move {
            order.lock().unwrap().push(name);
            if name == "second" {
                return Err(HandlerError::from("flush failed"));
            }
            Ok::<(), HandlerError>(())
        });
    }

    let report = shutdown.shutdown(ControlSource::Sigterm).await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    assert!(report.drained);

    let failed: Vec<_> = report.handlers.iter().filter(|o| !o.ok).map(|o| o.name.as_str()).collect();
    assert_eq!(failed, vec!["second"]);
    assert_eq!(report.handlers.len(), 6);

    assert_eq!(shutdown.state(), LifecycleState::Stopped);
    assert!(shutdown.shutdown(ControlSource::Sigint).await.is_none());
    assert!(!h.service.health.readiness().is_ready());
}

#[tokio::test]
async fn test_shutdown_waits_for_inflight_work() {
    let h = common::harness(common::test_config(Vec::new()));
    let shutdown = h.service.shutdown.clone();

    let op = shutdown.begin_operation().unwrap();
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.shutdown(ControlSource::Api).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(shutdown.state(), LifecycleState::Draining);
    assert!(matches!(shutdown.begin_operation(), Err(ServiceError::ShutdownInProgress)));

    drop(op);
    let report = task.await.unwrap().unwrap();
    assert!(report.drained);
    assert_eq!(report.abandoned_operations, 0);
    assert_eq!(h.audit.with_action("system.shutdown.completed")[0]["outcome"], "success");
}
