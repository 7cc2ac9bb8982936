//! Background job scheduler for the vecguard daemon.
//!
//! Async cron scheduling on `tokio-cron-scheduler` with timezone support,
//! overlap control, per-run timeouts and graceful shutdown.
//!
//! # Example
//!
//! ```ignore
//! use vecguard_scheduler::{OverlapPolicy, SchedulerConfig, SchedulerService};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! scheduler.register_job(
//!     "health_check",
//!     "*/30 * * * * *",
//!     None,
//!     OverlapPolicy::Skip,
//!     Duration::from_secs(10),
//!     move || async move { check().await },
//! ).await?;
//! scheduler.start().await?;
//! ```

mod config;
mod error;
mod overlap;
mod registry;
mod scheduler;

#[cfg(feature = "jobs")]
pub mod jobs;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use overlap::{OverlapGuard, OverlapPolicy, RunGuard};
pub use registry::{JobRegistry, JobResult, JobStatus};
pub use scheduler::{validate_cron_expression, SchedulerService};
