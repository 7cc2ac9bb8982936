use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Failures registering jobs or driving the scheduler lifecycle.
///
/// A job's own failure is not an error here; it is recorded in the
/// `JobRegistry` as `JobResult::Failed`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cron backend failed: {0}")]
    Backend(String),

    #[error("cron expression '{expr}' rejected: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("scheduler already started")]
    AlreadyRunning,

    #[error("scheduler not started")]
    NotRunning,
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = SchedulerError::InvalidCron {
            expr: "* * *".into(),
            reason: "too few fields".into(),
        };
        assert_eq!(err.to_string(), "cron expression '* * *' rejected: too few fields");
        assert_eq!(
            SchedulerError::DuplicateJob("health_check".into()).to_string(),
            "job 'health_check' is already registered"
        );
        assert_eq!(
            SchedulerError::UnknownTimezone("Mars/Olympus".into()).to_string(),
            "unknown timezone 'Mars/Olympus'"
        );
    }
}
