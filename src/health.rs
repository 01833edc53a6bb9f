use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Snapshot served from the health segment inside the secret prefix.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub requests_total: u64,
    pub html_rewrites: u64,
    pub tunnels_opened: u64,
    pub recoveries_attempted: u64,
}

/// Process-wide counters. Shared read-only via `web::Data`; the counters
/// are the only mutation and are atomic.
pub struct GatewayMetrics {
    start_time: Instant,
    requests_total: AtomicU64,
    html_rewrites: AtomicU64,
    tunnels_opened: AtomicU64,
    recoveries_attempted: AtomicU64,
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            requests_total: AtomicU64::new(0),
            html_rewrites: AtomicU64::new(0),
            tunnels_opened: AtomicU64::new(0),
            recoveries_attempted: AtomicU64::new(0),
        }
    }
}

impl GatewayMetrics {
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rewrite(&self) {
        self.html_rewrites.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tunnel(&self) {
        self.tunnels_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery(&self) {
        self.recoveries_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            html_rewrites: self.html_rewrites.load(Ordering::Relaxed),
            tunnels_opened: self.tunnels_opened.load(Ordering::Relaxed),
            recoveries_attempted: self.recoveries_attempted.load(Ordering::Relaxed),
        }
    }
}

pub fn health_report(metrics: &GatewayMetrics) -> HttpResponse {
    HttpResponse::Ok().json(metrics.snapshot())
}
