//! Service metrics.
//!
//! Every event is emitted through the `metrics` facade for whatever recorder
//! the deployment installs, and also folded into in-process counters so the
//! health report can carry a snapshot with latency percentiles.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use vecguard_types::IsolationError;

/// Number of recent search latencies kept for percentiles.
pub const LATENCY_WINDOW: usize = 2048;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyPercentiles {
    pub samples: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpsertCounters {
    pub inserted: u64,
    pub updated: u64,
    pub rejected: u64,
    pub failed: u64,
    pub batches: u64,
    /// Points stored per second of batch time.
    pub points_per_sec: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub search_requests: u64,
    pub search_results: u64,
    pub search_latency: LatencyPercentiles,
    pub upsert: UpsertCounters,
    pub isolation_violations: u64,
    pub errors_by_category: BTreeMap<String, u64>,
    pub uptime_secs: u64,
}

pub struct ServiceMetrics {
    search_requests: AtomicU64,
    search_results: AtomicU64,
    upsert_inserted: AtomicU64,
    upsert_updated: AtomicU64,
    upsert_rejected: AtomicU64,
    upsert_failed: AtomicU64,
    upsert_batches: AtomicU64,
    upsert_batch_micros: AtomicU64,
    isolation_violations: AtomicU64,
    errors: DashMap<&'static str, u64>,
    latencies_ms: Mutex<VecDeque<f64>>,
    started: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            search_requests: AtomicU64::new(0),
            search_results: AtomicU64::new(0),
            upsert_inserted: AtomicU64::new(0),
            upsert_updated: AtomicU64::new(0),
            upsert_rejected: AtomicU64::new(0),
            upsert_failed: AtomicU64::new(0),
            upsert_batches: AtomicU64::new(0),
            upsert_batch_micros: AtomicU64::new(0),
            isolation_violations: AtomicU64::new(0),
            errors: DashMap::new(),
            latencies_ms: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            started: Instant::now(),
        }
    }

    /// Counted on arrival, whatever the outcome.
    pub fn record_search_request(&self) {
        counter!("vecguard_search_requests_total").increment(1);
        self.search_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search_completed(&self, latency: Duration, results: usize) {
        counter!("vecguard_search_results_total").increment(results as u64);
        histogram!("vecguard_search_latency_seconds").record(latency.as_secs_f64());

        self.search_results
            .fetch_add(results as u64, Ordering::Relaxed);

        let mut window = self.latencies_ms.lock().unwrap();
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency.as_secs_f64() * 1000.0);
    }

    pub fn record_error(&self, operation: &'static str, err: &IsolationError) {
        let category = err.category();
        counter!("vecguard_errors_total", "category" => category, "operation" => operation)
            .increment(1);
        *self.errors.entry(category).or_insert(0) += 1;
    }

    pub fn record_isolation_violation(&self) {
        counter!("vecguard_isolation_violations_total").increment(1);
        self.isolation_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upsert_batch(&self, latency: Duration, inserted: usize, updated: usize) {
        counter!("vecguard_upsert_points_total", "outcome" => "inserted")
            .increment(inserted as u64);
        counter!("vecguard_upsert_points_total", "outcome" => "updated").increment(updated as u64);
        histogram!("vecguard_upsert_batch_latency_seconds").record(latency.as_secs_f64());

        self.upsert_inserted
            .fetch_add(inserted as u64, Ordering::Relaxed);
        self.upsert_updated
            .fetch_add(updated as u64, Ordering::Relaxed);
        self.upsert_batches.fetch_add(1, Ordering::Relaxed);
        self.upsert_batch_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_upsert_rejected(&self, count: usize) {
        if count == 0 {
            return;
        }
        counter!("vecguard_upsert_points_total", "outcome" => "rejected").increment(count as u64);
        self.upsert_rejected
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_upsert_failed(&self, count: usize) {
        if count == 0 {
            return;
        }
        counter!("vecguard_upsert_points_total", "outcome" => "failed").increment(count as u64);
        self.upsert_failed.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// 0 healthy, 1 degraded, 2 unhealthy.
    pub fn record_health(&self, level: u8) {
        gauge!("vecguard_health_status").set(f64::from(level));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latencies: Vec<f64> = self.latencies_ms.lock().unwrap().iter().copied().collect();

        let inserted = self.upsert_inserted.load(Ordering::Relaxed);
        let updated = self.upsert_updated.load(Ordering::Relaxed);
        let batch_secs = self.upsert_batch_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let points_per_sec = if batch_secs > 0.0 {
            (inserted + updated) as f64 / batch_secs
        } else {
            0.0
        };

        MetricsSnapshot {
            search_requests: self.search_requests.load(Ordering::Relaxed),
            search_results: self.search_results.load(Ordering::Relaxed),
            search_latency: percentiles(latencies),
            upsert: UpsertCounters {
                inserted,
                updated,
                rejected: self.upsert_rejected.load(Ordering::Relaxed),
                failed: self.upsert_failed.load(Ordering::Relaxed),
                batches: self.upsert_batches.load(Ordering::Relaxed),
                points_per_sec,
            },
            isolation_violations: self.isolation_violations.load(Ordering::Relaxed),
            errors_by_category: self
                .errors
                .iter()
                .map(|e| (e.key().to_string(), *e.value()))
                .collect(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentiles.
fn percentiles(mut samples: Vec<f64>) -> LatencyPercentiles {
    if samples.is_empty() {
        return LatencyPercentiles::default();
    }
    samples.sort_by(f64::total_cmp);
    let rank = |p: f64| {
        let idx = ((p / 100.0) * samples.len() as f64).ceil() as usize;
        samples[idx.clamp(1, samples.len()) - 1]
    };
    LatencyPercentiles {
        samples: samples.len(),
        p50_ms: rank(50.0),
        p95_ms: rank(95.0),
        p99_ms: rank(99.0),
    }
}
