//! Health monitoring.
//!
//! Probes go straight to the engine under a short timeout. They do not pass
//! through the retry policy or the circuit breaker, so a check still reports
//! the real engine state while the breaker is open.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use vecguard_engine::{CircuitState, CollectionHealth, IndexEngine, ResiliencePolicy};

use crate::collection::CollectionManager;
use crate::metrics::{MetricsSnapshot, ServiceMetrics};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reasons", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(Vec<String>),
    Unhealthy(Vec<String>),
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded(_) => "degraded",
            Self::Unhealthy(_) => "unhealthy",
        }
    }

    /// Gauge value: 0 healthy, 1 degraded, 2 unhealthy.
    pub fn level(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded(_) => 1,
            Self::Unhealthy(_) => 2,
        }
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            Self::Healthy => &[],
            Self::Degraded(r) | Self::Unhealthy(r) => r,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub engine_reachable: bool,
    pub collection_exists: bool,
    pub missing_indexes: Vec<String>,
    pub circuit_state: &'static str,
    pub points_count: Option<u64>,
    pub pool_in_use: usize,
    pub pool_size: usize,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    fn pending() -> Self {
        Self {
            status: HealthStatus::Unhealthy(vec!["not yet checked".to_string()]),
            checked_at: Utc::now(),
            engine_reachable: false,
            collection_exists: false,
            missing_indexes: Vec::new(),
            circuit_state: CircuitState::Closed.as_str(),
            points_count: None,
            pool_in_use: 0,
            pool_size: 0,
            metrics: MetricsSnapshot::default(),
        }
    }
}

/// Runs health checks and publishes the latest report.
pub struct HealthMonitor {
    engine: Arc<dyn IndexEngine>,
    policy: ResiliencePolicy,
    collections: Arc<CollectionManager>,
    metrics: Arc<ServiceMetrics>,
    check_timeout: Duration,
    tx: watch::Sender<Arc<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(
        engine: Arc<dyn IndexEngine>,
        policy: ResiliencePolicy,
        collections: Arc<CollectionManager>,
        metrics: Arc<ServiceMetrics>,
        check_timeout: Duration,
    ) -> Self {
        let (tx, _) = watch::channel(Arc::new(HealthReport::pending()));
        Self {
            engine,
            policy,
            collections,
            metrics,
            check_timeout,
            tx,
        }
    }

    /// Latest published report.
    pub fn current(&self) -> Arc<HealthReport> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<HealthReport>> {
        self.tx.subscribe()
    }

    pub async fn check_health(&self) -> Arc<HealthReport> {
        let mut unhealthy = Vec::new();
        let mut degraded = Vec::new();

        let ping = tokio::time::timeout(self.check_timeout, self.engine.health()).await;
        let engine_reachable = match ping {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                unhealthy.push(format!("index engine unreachable: {e}"));
                false
            }
            Err(_) => {
                unhealthy.push(format!(
                    "index engine did not answer within {}ms",
                    self.check_timeout.as_millis()
                ));
                false
            }
        };

        let mut collection_exists = false;
        let mut missing_indexes = Vec::new();
        let mut points_count = None;

        if engine_reachable {
            let name = self.collections.name();
            let inspected =
                tokio::time::timeout(self.check_timeout, self.engine.collection_info(name)).await;
            match inspected {
                Ok(Ok(Some(info))) => {
                    collection_exists = true;
                    points_count = Some(info.points_count);
                    if let Err(e) = self.collections.check_compatibility(&info) {
                        unhealthy.push(e.to_string());
                    }
                    missing_indexes = self
                        .collections
                        .missing_indexes(&info)
                        .into_iter()
                        .map(|i| i.field)
                        .collect();
                    if !missing_indexes.is_empty() {
                        degraded.push(format!(
                            "missing payload indexes: {}",
                            missing_indexes.join(", ")
                        ));
                    }
                    match info.status {
                        CollectionHealth::Red => {
                            unhealthy.push(format!("collection {name} status is red"))
                        }
                        CollectionHealth::Yellow => {
                            degraded.push(format!("collection {name} is optimizing"))
                        }
                        CollectionHealth::Green | CollectionHealth::Unknown => {}
                    }
                }
                Ok(Ok(None)) => unhealthy.push(format!("collection {name} does not exist")),
                Ok(Err(e)) => {
                    unhealthy.push(format!("collection {name} could not be inspected: {e}"))
                }
                Err(_) => unhealthy.push(format!(
                    "collection {name} inspection did not answer within {}ms",
                    self.check_timeout.as_millis()
                )),
            }
        }

        let circuit = self.policy.breaker().state();
        match circuit {
            CircuitState::Open => degraded.push("circuit breaker open".to_string()),
            CircuitState::HalfOpen => degraded.push("circuit breaker half-open".to_string()),
            CircuitState::Closed => {}
        }

        let status = if !unhealthy.is_empty() {
            HealthStatus::Unhealthy(unhealthy)
        } else if !degraded.is_empty() {
            HealthStatus::Degraded(degraded)
        } else {
            HealthStatus::Healthy
        };

        let pool = self.policy.pool();
        let report = Arc::new(HealthReport {
            status,
            checked_at: Utc::now(),
            engine_reachable,
            collection_exists,
            missing_indexes,
            circuit_state: circuit.as_str(),
            points_count,
            pool_in_use: pool.in_use(),
            pool_size: pool.size(),
            metrics: self.metrics.snapshot(),
        });

        self.publish(report.clone());
        report
    }

    fn publish(&self, report: Arc<HealthReport>) {
        let previous = self.tx.borrow().status.clone();
        self.metrics.record_health(report.status.level());

        if previous.as_str() != report.status.as_str() {
            if report.status.is_healthy() {
                info!(previous = previous.as_str(), "Service healthy");
            } else {
                warn!(
                    previous = previous.as_str(),
                    status = report.status.as_str(),
                    reasons = ?report.status.reasons(),
                    "Service health changed"
                );
            }
        }
        self.tx.send_replace(report);
    }
}
