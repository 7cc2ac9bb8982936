//! Scheduler-wide settings.

use std::time::Duration;

use chrono_tz::Tz;

use crate::SchedulerError;

/// Timezone for jobs registered without one, and how long `shutdown`
/// lets in-flight runs finish.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub timezone: Tz,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// `name` is an IANA zone such as "Europe/Moscow".
    pub fn with_timezone(mut self, name: &str) -> Result<Self, SchedulerError> {
        self.timezone = parse_timezone(name)?;
        Ok(self)
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

pub(crate) fn parse_timezone(name: &str) -> Result<Tz, SchedulerError> {
    name.parse()
        .map_err(|_| SchedulerError::UnknownTimezone(name.to_string()))
}
