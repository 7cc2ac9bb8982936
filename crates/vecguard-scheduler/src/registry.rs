//! Per-job execution status.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failed(String),
    /// Not run, e.g. because the previous run was still active
    Skipped(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub cron_expr: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    pub run_count: u64,
    pub error_count: u64,
    pub skip_count: u64,
    pub is_running: bool,
}

impl JobStatus {
    pub fn new(job_name: String, cron_expr: String) -> Self {
        Self {
            job_name,
            cron_expr,
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            skip_count: 0,
            is_running: false,
        }
    }
}

/// Thread-safe registry of job status, shared with running jobs.
///
/// ```
/// use vecguard_scheduler::{JobRegistry, JobResult};
///
/// let registry = JobRegistry::new();
/// registry.register("health_check", "*/30 * * * * *");
/// registry.record_start("health_check");
/// assert!(registry.any_running());
/// registry.record_complete("health_check", JobResult::Success, 12);
/// assert_eq!(registry.get_status("health_check").unwrap().run_count, 1);
/// ```
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces any existing entry with the same name.
    pub fn register(&self, job_name: &str, cron_expr: &str) {
        let mut jobs = self.jobs.write().unwrap();
        jobs.insert(
            job_name.to_string(),
            JobStatus::new(job_name.to_string(), cron_expr.to_string()),
        );
    }

    pub fn record_start(&self, job_name: &str) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(status) = jobs.get_mut(job_name) {
            status.is_running = true;
        }
    }

    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(status) = jobs.get_mut(job_name) {
            match &result {
                JobResult::Skipped(_) => status.skip_count += 1,
                JobResult::Failed(_) => {
                    status.is_running = false;
                    status.run_count += 1;
                    status.error_count += 1;
                }
                JobResult::Success => {
                    status.is_running = false;
                    status.run_count += 1;
                }
            }
            status.last_run = Some(Utc::now());
            status.last_duration_ms = Some(duration_ms);
            status.last_result = Some(result);
        }
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.jobs.read().unwrap().get(job_name).cloned()
    }

    /// All jobs, sorted by name.
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.jobs.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        all
    }

    pub fn any_running(&self) -> bool {
        self.jobs.read().unwrap().values().any(|s| s.is_running)
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.jobs.read().unwrap().contains_key(job_name)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = JobRegistry::new();
        registry.register("health_check", "*/30 * * * * *");

        let status = registry.get_status("health_check").unwrap();
        assert_eq!(status.cron_expr, "*/30 * * * * *");
        assert_eq!(status.run_count, 0);
        assert!(!status.is_running);
        assert!(registry.is_registered("health_check"));
    }

    #[test]
    fn test_success_and_failure_counts() {
        let registry = JobRegistry::new();
        registry.register("job", "0 * * * * *");

        registry.record_start("job");
        assert!(registry.any_running());
        registry.record_complete("job", JobResult::Success, 15);
        registry.record_start("job");
        registry.record_complete("job", JobResult::Failed("engine down".into()), 2000);

        let status = registry.get_status("job").unwrap();
        assert!(!status.is_running);
        assert_eq!(status.run_count, 2);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_duration_ms, Some(2000));
        assert_eq!(status.last_result, Some(JobResult::Failed("engine down".into())));
    }

    #[test]
    fn test_skip_leaves_running_flag() {
        let registry = JobRegistry::new();
        registry.register("job", "0 * * * * *");
        registry.record_start("job");

        registry.record_complete("job", JobResult::Skipped("overlap".into()), 0);

        let status = registry.get_status("job").unwrap();
        assert!(status.is_running, "the earlier run is still active");
        assert_eq!(status.skip_count, 1);
        assert_eq!(status.run_count, 0);
        assert_eq!(status.error_count, 0);
    }

    #[test]
    fn test_unknown_job_is_ignored() {
        let registry = JobRegistry::new();
        registry.record_start("unknown");
        registry.record_complete("unknown", JobResult::Success, 100);
        assert!(registry.get_status("unknown").is_none());
        assert!(!registry.any_running());
        assert_eq!(registry.job_count(), 0);
    }

    #[test]
    fn test_all_status_sorted() {
        let registry = JobRegistry::new();
        registry.register("metrics_report", "0 * * * * *");
        registry.register("health_check", "*/30 * * * * *");
        let names: Vec<_> = registry
            .get_all_status()
            .into_iter()
            .map(|s| s.job_name)
            .collect();
        assert_eq!(names, vec!["health_check", "metrics_report"]);
    }
}
