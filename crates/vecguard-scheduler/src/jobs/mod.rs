//! Predefined jobs for the daemon.
//!
//! - **health**: periodic health check and metrics summary

pub mod health;

pub use health::{
    create_health_check_job, create_metrics_report_job, HealthCheckJobConfig,
    MetricsReportJobConfig,
};
