//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use ingest_guard::audit::MemorySink;
use ingest_guard::config::{DependencyConfig, ServiceConfig, CRITICAL_CLASS, DEFAULT_POLICY};
use ingest_guard::lifecycle::{bootstrap, ControlEvent, Service};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

pub const ADMIN_KEY: &str = "test-admin-key";

/// A TCP dependency that accepts and immediately drops connections.
pub struct MockDependency {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
}

impl MockDependency {
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

pub async fn start_mock_dependency() -> MockDependency {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });

    MockDependency { addr, accepted }
}

/// An address nothing listens on; connects are refused.
pub async fn refused_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn dependency(name: &str, addr: SocketAddr, required: bool) -> DependencyConfig {
    DependencyConfig {
        name: name.to_string(),
        address: addr.to_string(),
        class: CRITICAL_CLASS.to_string(),
        required,
        check_timeout_ms: 500,
        retry_policy: DEFAULT_POLICY.to_string(),
    }
}

/// Defaults tuned for fast tests: short retry delays, one admin key.
pub fn test_config(dependencies: Vec<DependencyConfig>) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.dependencies = dependencies;
    config.admin.api_keys = vec![ADMIN_KEY.to_string()];
    config.shutdown.grace_period_secs = 2;
    if let Some(policy) = config.retry_policies.get_mut(DEFAULT_POLICY) {
        policy.initial_delay_ms = 5;
        policy.max_delay_ms = 20;
    }
    config
}

pub struct Harness {
    pub service: Service,
    pub audit: Arc<MemorySink>,
    pub control_rx: UnboundedReceiver<ControlEvent>,
}

pub fn harness(config: ServiceConfig) -> Harness {
    let audit = Arc::new(MemorySink::new());
    let (service, control_rx) = bootstrap(config, None, audit.clone());
    service.mark_ready();
    Harness {
        service,
        audit,
        control_rx,
    }
}

pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

pub fn admin_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", ADMIN_KEY)
        .body(Body::empty())
        .unwrap()
}

pub fn admin_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", ADMIN_KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
