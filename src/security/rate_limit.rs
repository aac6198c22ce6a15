//! Token-bucket rate limiting middleware.
//!
//! # Responsibilities
//! - One lazily refilled bucket per client key (address, credential or route)
//! - `X-RateLimit-*` headers on every limited response, 429 on denial
//! - Background sweep evicting idle buckets
//!
//! # Design Decisions
//! - Per-bucket mutex; the map lock is never held while a bucket is locked
//!   on the request path
//! - `limit` reports bucket capacity; `reset` is the epoch second at which
//!   the bucket would be full again at the current refill rate
//! - State is in-memory only

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::audit::{AuditAction, AuditEvent, AuditLogger, AuditOutcome};
use crate::config::{KeyStrategy, RateLimitConfig, Reconfigurable, ServiceConfig};
use crate::error::ServiceError;
use crate::http::request::REQUEST_ID_HEADER;
use crate::observability::metrics;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Quota metadata attached to every limiter decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
}

impl RateLimitInfo {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(REMAINING_HEADER, HeaderValue::from(self.remaining));
        headers.insert(RESET_HEADER, HeaderValue::from(self.reset));
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        self.refill(capacity, refill_rate, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// In-memory token-bucket limiter keyed by client identity.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    settings: ArcSwap<RateLimitConfig>,
    audit: AuditLogger,
}

impl RateLimiter {
    pub fn new(settings: RateLimitConfig, audit: AuditLogger) -> Self {
        tracing::info!(
            requests_per_window = settings.requests_per_window,
            window_secs = settings.window_secs,
            capacity = settings.capacity(),
            strategy = ?settings.key_strategy,
            enabled = settings.enabled,
            "Rate limiting initialized"
        );
        Self {
            buckets: DashMap::new(),
            settings: ArcSwap::from_pointee(settings),
            audit,
        }
    }

    pub fn settings(&self) -> Arc<RateLimitConfig> {
        self.settings.load_full()
    }

    /// Take one token for `key` if available.
    pub fn is_allowed(&self, key: &str) -> (bool, RateLimitInfo) {
        self.check_at(key, Instant::now())
    }

    /// Same as [`is_allowed`](Self::is_allowed) at an explicit instant.
    pub fn check_at(&self, key: &str, now: Instant) -> (bool, RateLimitInfo) {
        let settings = self.settings.load();
        let capacity = settings.capacity();
        let refill_rate = settings.refill_rate();

        let bucket = match self.buckets.get(key) {
            Some(bucket) => bucket.clone(),
            None => self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(capacity, now))))
                .clone(),
        };

        let mut bucket = bucket.lock().expect("token bucket mutex poisoned");
        let allowed = bucket.try_acquire(capacity, refill_rate, now);
        let tokens = bucket.tokens;
        drop(bucket);

        let seconds_to_full = if refill_rate > 0.0 {
            ((capacity - tokens) / refill_rate).ceil() as u64
        } else {
            0
        };
        let info = RateLimitInfo {
            limit: capacity as u64,
            remaining: tokens.floor() as u64,
            reset: Utc::now().timestamp().max(0) as u64 + seconds_to_full,
        };
        metrics::record_rate_limit_decision(allowed);
        (allowed, info)
    }

    /// Drop buckets untouched for longer than the idle window.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let idle = Duration::from_secs(self.settings.load().idle_eviction_secs);
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            let bucket = bucket.lock().expect("token bucket mutex poisoned");
            now.saturating_duration_since(bucket.last_refill) <= idle
        });
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.buckets.len(), "Evicted idle rate limit buckets");
        }
        evicted
    }

    pub fn clear(&self) {
        self.buckets.clear();
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Periodically evict idle buckets until shutdown is broadcast.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.settings.load().sweep_interval_secs.max(1));
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.evict_idle(Instant::now());
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Rate limit sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.settings
            .load()
            .exempt_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn audit_denial(&self, key: &str, client_ip: Option<String>, path: &str, request_id: Option<String>, info: &RateLimitInfo) {
        self.audit.record(
            AuditEvent::system(AuditAction::RateLimitDenied, AuditOutcome::Denied)
                .actor(key, "client")
                .resource(path, "route")
                .client_ip(client_ip)
                .correlation_id(request_id)
                .detail("limit", info.limit)
                .detail("reset", info.reset),
        );
    }
}

impl Reconfigurable for RateLimiter {
    fn component(&self) -> &'static str {
        "rate_limiter"
    }

    fn reconfigure(&self, config: &ServiceConfig) {
        self.settings.store(Arc::new(config.rate_limit.clone()));
    }
}

/// Client address: first `X-Forwarded-For` hop, else the peer address.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Bucket key for a request under `strategy`.
pub fn bucket_key(strategy: KeyStrategy, headers: &HeaderMap, peer: Option<SocketAddr>, path: &str) -> String {
    let ip_key = || format!("ip:{}", client_address(headers, peer).unwrap_or_else(|| "unknown".to_string()));
    match strategy {
        KeyStrategy::ClientAddress => ip_key(),
        KeyStrategy::Credential => match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
            Some(key) if !key.is_empty() => format!("{CREDENTIAL_PREFIX}{key}"),
            _ => ip_key(),
        },
        KeyStrategy::Route => format!("endpoint:{path}"),
    }
}

const CREDENTIAL_PREFIX: &str = "api_key:";

/// Bucket key safe to log: credential keys keep only their first four characters.
pub fn masked_key(key: &str) -> String {
    match key.strip_prefix(CREDENTIAL_PREFIX) {
        Some(credential) => {
            let head: String = credential.chars().take(4).collect();
            format!("{CREDENTIAL_PREFIX}{head}***")
        }
        None => key.to_string(),
    }
}

/// Axum middleware applying the limiter.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let settings = limiter.settings();
    let path = request.uri().path().to_string();
    if !settings.enabled || limiter.is_exempt(&path) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let headers = request.headers();
    let key = bucket_key(settings.key_strategy, headers, peer, &path);
    let (allowed, info) = limiter.is_allowed(&key);

    if !allowed {
        let client_ip = client_address(headers, peer);
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let key = masked_key(&key);
        tracing::warn!(
            key = %key,
            path = %path,
            method = %request.method(),
            "Rate limit exceeded"
        );
        limiter.audit_denial(&key, client_ip, &path, request_id, &info);
        return ServiceError::RateLimitExceeded { key, info }.into_response();
    }

    let mut response = next.run(request).await;
    info.apply_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests: u32, window_secs: u64, burst: Option<u32>) -> RateLimiter {
        let settings = RateLimitConfig {
            requests_per_window: requests,
            window_secs,
            burst_size: burst,
            ..RateLimitConfig::default()
        };
        RateLimiter::new(settings, AuditLogger::disabled())
    }

    #[test]
    fn test_exhaustion_reports_zero_remaining() {
        let limiter = limiter(3, 60, None);
        let now = Instant::now();
        for expected in [2, 1, 0] {
            let (allowed, info) = limiter.check_at("ip:1.2.3.4", now);
            assert!(allowed);
            assert_eq!(info.remaining, expected);
            assert_eq!(info.limit, 3);
        }
        for _ in 0..5 {
            let (allowed, info) = limiter.check_at("ip:1.2.3.4", now);
            assert!(!allowed);
            assert_eq!(info.remaining, 0);
        }
        // other keys are independent
        assert!(limiter.check_at("ip:5.6.7.8", now).0);
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let limiter = limiter(10, 10, Some(2));
        let start = Instant::now();
        assert!(limiter.check_at("k", start).0);
        assert!(limiter.check_at("k", start).0);
        assert!(!limiter.check_at("k", start).0);

        // one token per second
        let (allowed, info) = limiter.check_at("k", start + Duration::from_millis(1500));
        assert!(allowed);
        assert_eq!(info.remaining, 0);

        let (_, info) = limiter.check_at("k", start + Duration::from_secs(3600));
        assert_eq!(info.remaining, 1);
        assert_eq!(info.limit, 2);
    }

    #[test]
    fn test_reset_points_at_full_bucket() {
        let limiter = limiter(1, 10, None);
        let before = Utc::now().timestamp() as u64;
        let (_, info) = limiter.check_at("k", Instant::now());
        assert!(info.reset >= before + 10 && info.reset <= before + 11);
    }

    #[test]
    fn test_evict_idle_buckets() {
        let limiter = limiter(10, 60, None);
        let start = Instant::now();
        limiter.check_at("old", start);
        limiter.check_at("fresh", start + Duration::from_secs(3000));
        assert_eq!(limiter.evict_idle(start + Duration::from_secs(3700)), 1);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_bucket_key_strategies() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        assert_eq!(bucket_key(KeyStrategy::ClientAddress, &headers, Some(peer), "/x"), "ip:10.0.0.9");
        assert_eq!(bucket_key(KeyStrategy::Credential, &headers, Some(peer), "/x"), "ip:10.0.0.9");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-api-key", HeaderValue::from_static("k-123"));
        assert_eq!(bucket_key(KeyStrategy::ClientAddress, &headers, Some(peer), "/x"), "ip:203.0.113.7");
        assert_eq!(bucket_key(KeyStrategy::Credential, &headers, Some(peer), "/x"), "api_key:k-123");
        assert_eq!(bucket_key(KeyStrategy::Route, &headers, None, "/api/v1/ingest"), "endpoint:/api/v1/ingest");
    }

    #[test]
    fn test_masked_key_hides_credentials() {
        assert_eq!(masked_key("api_key:s3cret-client-key"), "api_key:s3cr***");
        assert_eq!(masked_key("api_key:ab"), "api_key:ab***");
        assert_eq!(masked_key("ip:10.0.0.9"), "ip:10.0.0.9");
        assert_eq!(masked_key("endpoint:/api/v1/ingest"), "endpoint:/api/v1/ingest");
    }

    #[test]
    fn test_reconfigure_swaps_settings() {
        let limiter = limiter(100, 60, None);
        let mut config = ServiceConfig::default();
        config.rate_limit.requests_per_window = 1;
        limiter.reconfigure(&config);

        let now = Instant::now();
        assert!(limiter.check_at("k", now).0);
        assert!(!limiter.check_at("k", now).0);
    }
}
