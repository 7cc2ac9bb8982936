//! Scheduler service wrapper around tokio-cron-scheduler.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::parse_timezone;
use crate::overlap::{OverlapGuard, OverlapPolicy};
use crate::registry::{JobRegistry, JobResult};
use crate::{SchedulerConfig, SchedulerError};

/// Validate a 6-field cron expression (second minute hour day month weekday).
///
/// ```
/// use vecguard_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("*/30 * * * * *").is_ok());
/// assert!(validate_cron_expression("invalid").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    Job::new_async(expr, |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| invalid_cron(expr, e))
}

fn invalid_cron(expr: &str, reason: impl ToString) -> SchedulerError {
    SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason: reason.to_string(),
    }
}

/// Owns the cron scheduler, the job registry and the shutdown token.
pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
}

impl SchedulerService {
    /// Created stopped; call `start()` to begin firing jobs.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            registry: Arc::new(JobRegistry::new()),
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.scheduler.start().await?;
        info!(jobs = self.registry.job_count(), "Scheduler started");

        Ok(())
    }

    /// Cancel jobs, wait up to the shutdown grace for running ones, then
    /// stop the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating scheduler shutdown");
        self.shutdown_token.cancel();

        let deadline = Instant::now() + self.config.shutdown_grace;
        while self.registry.any_running() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        for status in self.registry.get_all_status() {
            if status.is_running {
                warn!(job = %status.job_name, "Job still running at shutdown deadline");
            }
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Error during scheduler shutdown: {}", e);
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");

        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register a cron job.
    ///
    /// Each firing is subject to `overlap`, runs under `timeout`, and is
    /// recorded in the registry. A job that returns `Err` is logged and
    /// counted; it keeps its schedule.
    pub async fn register_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        timezone: Option<&str>,
        overlap: OverlapPolicy,
        timeout: Duration,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        if self.registry.is_registered(name) {
            return Err(SchedulerError::DuplicateJob(name.to_string()));
        }

        let tz: Tz = match timezone {
            Some(name) => parse_timezone(name)?,
            None => self.config.timezone,
        };
        validate_cron_expression(cron_expr)?;

        let job_name = name.to_string();
        let registry = self.registry.clone();
        let guard = Arc::new(OverlapGuard::new(overlap));
        let shutdown_token = self.shutdown_token.clone();

        let job = Job::new_async_tz(cron_expr, tz, move |_uuid, _lock| {
            let name = job_name.clone();
            let registry = registry.clone();
            let guard = guard.clone();
            let token = shutdown_token.clone();
            let job_fn = job_fn.clone();

            Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                let Some(_run) = guard.try_acquire() else {
                    debug!(job = %name, "Previous run still active, skipping");
                    registry.record_complete(
                        &name,
                        JobResult::Skipped("previous run still active".into()),
                        0,
                    );
                    return;
                };

                registry.record_start(&name);
                let start = Instant::now();

                let result = tokio::select! {
                    _ = token.cancelled() => JobResult::Failed("cancelled by shutdown".into()),
                    outcome = tokio::time::timeout(timeout, job_fn()) => match outcome {
                        Ok(Ok(())) => JobResult::Success,
                        Ok(Err(e)) => JobResult::Failed(e),
                        Err(_) => JobResult::Failed(format!(
                            "timed out after {}ms",
                            timeout.as_millis()
                        )),
                    },
                };

                let duration_ms = start.elapsed().as_millis() as u64;
                match &result {
                    JobResult::Failed(e) => {
                        warn!(job = %name, duration_ms, error = %e, "Job failed")
                    }
                    _ => debug!(job = %name, duration_ms, "Job completed"),
                }
                registry.record_complete(&name, result, duration_ms);
            })
        })
        .map_err(|e| invalid_cron(cron_expr, e))?;

        let uuid = self.scheduler.add(job).await?;
        self.registry.register(name, cron_expr);
        info!(
            job = %name,
            uuid = %uuid,
            cron = %cron_expr,
            timezone = %tz.name(),
            "Job registered"
        );

        Ok(uuid)
    }
}
