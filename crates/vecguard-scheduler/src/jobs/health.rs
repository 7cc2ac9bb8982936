//! Periodic health checks and metrics reports.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use vecguard_service::{HealthStatus, IsolationService};
use vecguard_types::HealthSettings;

use crate::{OverlapPolicy, SchedulerError, SchedulerService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckJobConfig {
    /// Cron expression (default: "*/30 * * * * *" = every 30 seconds)
    pub cron: String,
    /// Falls back to the scheduler's timezone.
    pub timezone: Option<String>,
    pub timeout_secs: u64,
}

impl Default for HealthCheckJobConfig {
    fn default() -> Self {
        Self {
            cron: "*/30 * * * * *".to_string(),
            timezone: None,
            timeout_secs: 10,
        }
    }
}

impl HealthCheckJobConfig {
    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self {
            cron: settings.cron.clone(),
            ..Default::default()
        }
    }
}

/// Run `check_health` on schedule. The report is published to subscribers;
/// an unhealthy result is recorded as a failed run.
pub async fn create_health_check_job(
    scheduler: &SchedulerService,
    service: Arc<IsolationService>,
    config: HealthCheckJobConfig,
) -> Result<(), SchedulerError> {
    scheduler
        .register_job(
            "health_check",
            &config.cron,
            config.timezone.as_deref(),
            OverlapPolicy::Skip,
            Duration::from_secs(config.timeout_secs),
            move || {
                let service = service.clone();
                async move {
                    let report = service.check_health().await;
                    match &report.status {
                        HealthStatus::Unhealthy(reasons) => Err(reasons.join("; ")),
                        _ => Ok(()),
                    }
                }
            },
        )
        .await?;

    info!("Registered health check job");
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReportJobConfig {
    /// Cron expression (default: "0 * * * * *" = every minute)
    pub cron: String,
    pub timezone: Option<String>,
}

impl Default for MetricsReportJobConfig {
    fn default() -> Self {
        Self {
            cron: "0 * * * * *".to_string(),
            timezone: None,
        }
    }
}

impl MetricsReportJobConfig {
    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self {
            cron: settings.metrics_cron.clone(),
            ..Default::default()
        }
    }
}

/// Log a metrics summary, and the state of every scheduled job, on schedule.
///
/// The report only reads counters, so runs may overlap.
pub async fn create_metrics_report_job(
    scheduler: &SchedulerService,
    service: Arc<IsolationService>,
    config: MetricsReportJobConfig,
) -> Result<(), SchedulerError> {
    let registry = scheduler.registry();
    scheduler
        .register_job(
            "metrics_report",
            &config.cron,
            config.timezone.as_deref(),
            OverlapPolicy::Concurrent,
            Duration::from_secs(5),
            move || {
                let service = service.clone();
                let registry = registry.clone();
                async move {
                    let m = service.metrics();
                    info!(
                        searches = m.search_requests,
                        p50_ms = m.search_latency.p50_ms,
                        p95_ms = m.search_latency.p95_ms,
                        p99_ms = m.search_latency.p99_ms,
                        inserted = m.upsert.inserted,
                        updated = m.upsert.updated,
                        rejected = m.upsert.rejected,
                        failed = m.upsert.failed,
                        points_per_sec = m.upsert.points_per_sec,
                        violations = m.isolation_violations,
                        errors = ?m.errors_by_category,
                        circuit = service.circuit_state().as_str(),
                        "Service metrics"
                    );
                    for job in registry.get_all_status() {
                        info!(
                            job = %job.job_name,
                            runs = job.run_count,
                            errors = job.error_count,
                            skips = job.skip_count,
                            last_result = ?job.last_result,
                            last_duration_ms = ?job.last_duration_ms,
                            "Job status"
                        );
                    }
                    Ok(())
                }
            },
        )
        .await?;

    info!("Registered metrics report job");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchedulerConfig;
    use vecguard_engine::InMemoryEngine;
    use vecguard_service::StaticProjectDirectory;
    use vecguard_types::Settings;

    #[test]
    fn test_configs_follow_settings() {
        let settings = HealthSettings {
            cron: "*/5 * * * * *".to_string(),
            ..Default::default()
        };
        assert_eq!(HealthCheckJobConfig::from_settings(&settings).cron, "*/5 * * * * *");
        assert_eq!(
            MetricsReportJobConfig::from_settings(&settings).cron,
            "0 * * * * *"
        );
        assert_eq!(HealthCheckJobConfig::default().timeout_secs, 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_health_job_refreshes_report() {
        let mut settings = Settings::default();
        settings.collection.dimension = 4;
        let service = Arc::new(
            IsolationService::start(
                &settings,
                Arc::new(InMemoryEngine::new()),
                Arc::new(StaticProjectDirectory::new()),
            )
            .await
            .unwrap(),
        );
        let first = service.health().checked_at;

        let config = SchedulerConfig::default().with_shutdown_grace(Duration::from_secs(1));
        let mut scheduler = SchedulerService::new(config).await.unwrap();
        create_health_check_job(
            &scheduler,
            service.clone(),
            HealthCheckJobConfig {
                cron: "* * * * * *".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        create_metrics_report_job(
            &scheduler,
            service.clone(),
            MetricsReportJobConfig {
                cron: "* * * * * *".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(scheduler.registry().job_count(), 2);

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await.unwrap();

        let status = scheduler.registry().get_status("health_check").unwrap();
        assert!(status.run_count >= 1);
        assert_eq!(status.error_count, 0);
        assert!(service.health().checked_at > first);

        let report = scheduler.registry().get_status("metrics_report").unwrap();
        assert!(report.run_count >= 1);
        assert_eq!(report.skip_count, 0);
    }
}
