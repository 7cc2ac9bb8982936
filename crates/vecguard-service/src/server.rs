//! gRPC health endpoint.
//!
//! Exposes `grpc.health.v1.Health` for load balancers and orchestrators. The
//! serving status follows the health monitor: Healthy and Degraded report
//! SERVING, Unhealthy reports NOT_SERVING.

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tonic_health::ServingStatus;
use tracing::{debug, info};

use crate::health::{HealthMonitor, HealthStatus};

/// Service name registered with the health service.
pub const SERVICE_NAME: &str = "vecguard.IsolationService";

pub fn serving_status(status: &HealthStatus) -> ServingStatus {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded(_) => ServingStatus::Serving,
        HealthStatus::Unhealthy(_) => ServingStatus::NotServing,
    }
}

/// Serve the health endpoint until `shutdown_signal` resolves.
pub async fn run_health_server<F>(
    addr: SocketAddr,
    monitor: Arc<HealthMonitor>,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    info!("Starting gRPC health server on {}", addr);

    let (reporter, health_service) = health_reporter();

    // Mirror every published report into the health service.
    let mut rx = monitor.subscribe();
    let mut status_reporter = reporter.clone();
    let status_task = tokio::spawn(async move {
        loop {
            let status = serving_status(&rx.borrow_and_update().status);
            debug!(?status, "Updating gRPC serving status");
            status_reporter
                .set_service_status(SERVICE_NAME, status)
                .await;
            status_reporter.set_service_status("", status).await;
            if rx.changed().await.is_err() {
                break;
            }
        }
    });

    let result = Server::builder()
        .add_service(health_service)
        .serve_with_shutdown(addr, shutdown_signal)
        .await;

    status_task.abort();
    drop(reporter);
    result?;

    info!("gRPC health server shutdown complete");
    Ok(())
}
