//! Command implementations for the vecguard daemon.
//!
//! Handles:
//! - start: load config, connect to the engine, prepare the collection,
//!   run the scheduler and the gRPC health endpoint
//! - stop / status: PID file based process control
//! - health / collection: one-shot operations against the engine

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use vecguard_engine::{IndexEngine, QdrantEngine};
use vecguard_scheduler::jobs::{
    create_health_check_job, create_metrics_report_job, HealthCheckJobConfig,
    MetricsReportJobConfig,
};
use vecguard_scheduler::{SchedulerConfig, SchedulerService};
use vecguard_service::{
    run_health_server, CollectionStatus, HealthReport, IsolationService, StaticProjectDirectory,
};
use vecguard_types::Settings;

use crate::cli::CollectionCommands;

/// CLI values that take precedence over every config source.
#[derive(Debug, Default, Clone)]
pub struct SettingsOverrides {
    pub port: Option<u16>,
    pub engine_url: Option<String>,
    pub log_level: Option<String>,
}

impl SettingsOverrides {
    pub fn apply(self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.grpc_port = port;
        }
        if let Some(url) = self.engine_url {
            settings.engine.url = url;
        }
        if let Some(level) = self.log_level {
            settings.log_level = level;
        }
    }
}

pub fn load_settings(config_path: Option<&str>, overrides: SettingsOverrides) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    overrides.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Daemon logs go to stdout; one-shot commands log to stderr so their
/// output stays parseable.
fn init_logging(level: &str, to_stderr: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if to_stderr {
        tracing::subscriber::set_global_default(builder.with_writer(std::io::stderr).finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.context("Failed to set tracing subscriber")
}

fn connect_engine(settings: &Settings) -> Result<Arc<dyn IndexEngine>> {
    let engine =
        QdrantEngine::new(&settings.engine).context("Failed to create index engine client")?;
    Ok(Arc::new(engine))
}

fn project_directory(settings: &Settings) -> Result<Arc<StaticProjectDirectory>> {
    let directory = StaticProjectDirectory::from_settings(&settings.projects)
        .context("Invalid project directory in configuration")?;
    Ok(Arc::new(directory))
}

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| {
            #[cfg(unix)]
            {
                dirs.runtime_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.cache_dir().to_path_buf())
            }
            #[cfg(not(unix))]
            {
                dirs.cache_dir().to_path_buf()
            }
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vecguard")
        .join("daemon.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!("Wrote PID file: {:?}", pid_path);
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!("Failed to remove PID file: {}", e);
        } else {
            info!("Removed PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Start the daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Connect to the index engine and make the collection ready
/// 3. Schedule health checks and metrics reports
/// 4. Serve the gRPC health endpoint until SIGINT/SIGTERM
pub async fn start_daemon(
    config_path: Option<&str>,
    foreground: bool,
    overrides: SettingsOverrides,
) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    init_logging(&settings.log_level, false)?;

    info!("Vecguard daemon starting...");
    info!("Configuration:");
    info!("  Index engine: {}", settings.engine.url);
    info!(
        "  Collection: {} ({} dims, {})",
        settings.collection.name,
        settings.collection.dimension,
        settings.collection.distance.engine_name()
    );
    info!("  Known projects: {}", settings.projects.len());
    info!("  gRPC address: {}", settings.grpc_addr());
    info!("  Log level: {}", settings.log_level);

    if !foreground {
        warn!("Background mode is not supported, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    let addr: SocketAddr = settings
        .grpc_addr()
        .parse()
        .context("Invalid gRPC address")?;

    let engine = connect_engine(&settings)?;
    let service = IsolationService::start(&settings, engine, project_directory(&settings)?)
        .await
        .context("Failed to start isolation service")?;
    let service = Arc::new(service);

    let mut scheduler = SchedulerService::new(SchedulerConfig::default())
        .await
        .context("Failed to create scheduler")?;
    create_health_check_job(
        &scheduler,
        service.clone(),
        HealthCheckJobConfig::from_settings(&settings.health),
    )
    .await
    .context("Failed to register health check job")?;
    create_metrics_report_job(
        &scheduler,
        service.clone(),
        MetricsReportJobConfig::from_settings(&settings.health),
    )
    .await
    .context("Failed to register metrics report job")?;
    scheduler.start().await.context("Failed to start scheduler")?;

    write_pid_file()?;

    let result = run_health_server(addr, service.health_monitor(), shutdown_signal()).await;

    info!("Health server stopped, stopping scheduler...");
    if let Err(e) = scheduler.shutdown().await {
        warn!("Scheduler shutdown failed: {}", e);
    }
    remove_pid_file();

    result.map_err(|e| anyhow::anyhow!("Server error: {}", e))
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    info!("Stopping daemon (PID {})", pid);

    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                anyhow::bail!("Failed to send SIGTERM to daemon");
            }
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command is not supported on this platform");
    }

    Ok(())
}

pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();

    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("Vecguard daemon is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
        }
        Some(pid) => println!(
            "Vecguard daemon is NOT running (stale PID {} in {:?})",
            pid, pid_path
        ),
        None => println!("Vecguard daemon is NOT running (no PID file)"),
    }
    Ok(())
}

fn render_report(report: &HealthReport) -> String {
    let mut out = format!("Status: {}\n", report.status.as_str());
    for reason in report.status.reasons() {
        out.push_str(&format!("  - {reason}\n"));
    }
    out.push_str(&format!(
        "Engine reachable: {}\nCollection exists: {}\nCircuit: {}\nPool: {}/{} in use\n",
        report.engine_reachable,
        report.collection_exists,
        report.circuit_state,
        report.pool_in_use,
        report.pool_size
    ));
    if let Some(points) = report.points_count {
        out.push_str(&format!("Points: {points}\n"));
    }
    out
}

/// Run one health check. Fails when the service is unhealthy.
pub async fn check_health_once(
    config_path: Option<&str>,
    json: bool,
    overrides: SettingsOverrides,
) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    init_logging(&settings.log_level, true)?;

    let service = IsolationService::build(
        &settings,
        connect_engine(&settings)?,
        project_directory(&settings)?,
    );
    let report = service.check_health().await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report.as_ref()).context("Failed to encode report")?
        );
    } else {
        print!("{}", render_report(&report));
    }

    if report.status.level() >= 2 {
        anyhow::bail!("Service is unhealthy");
    }
    Ok(())
}

pub async fn handle_collection(
    config_path: Option<&str>,
    command: CollectionCommands,
    overrides: SettingsOverrides,
) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    init_logging(&settings.log_level, true)?;

    let service = IsolationService::build(
        &settings,
        connect_engine(&settings)?,
        project_directory(&settings)?,
    );

    match command {
        CollectionCommands::Ensure => {
            let status = service
                .ensure_collection_ready()
                .await
                .context("Collection is not usable")?;
            match status {
                CollectionStatus::Created => {
                    println!("Created collection {}", settings.collection.name)
                }
                CollectionStatus::Ready => {
                    println!("Collection {} is ready", settings.collection.name)
                }
                CollectionStatus::Repaired { created_indexes } => println!(
                    "Collection {}: created indexes {}",
                    settings.collection.name,
                    created_indexes.join(", ")
                ),
            }
        }
        CollectionCommands::Inspect => {
            let collections = service.collections();
            let Some(info) = collections
                .inspect()
                .await
                .context("Failed to inspect collection")?
            else {
                println!("Collection {} does not exist", settings.collection.name);
                return Ok(());
            };

            println!("Collection: {}", settings.collection.name);
            println!("  Status: {:?}", info.status);
            println!("  Dimension: {}", info.dimension);
            println!(
                "  Distance: {}",
                info.distance.map(|d| d.engine_name()).unwrap_or("unknown")
            );
            println!("  Points: {}", info.points_count);
            for (field, schema) in &info.indexed_fields {
                println!("  Index: {} ({})", field, schema.as_str());
            }
            match collections.check_compatibility(&info) {
                Ok(()) => println!("  Compatible: yes"),
                Err(e) => println!("  Compatible: no ({e})"),
            }
            let missing = collections.missing_indexes(&info);
            if !missing.is_empty() {
                let names: Vec<&str> = missing.iter().map(|i| i.field.as_str()).collect();
                println!("  Missing indexes: {}", names.join(", "));
            }
        }
    }
    Ok(())
}
