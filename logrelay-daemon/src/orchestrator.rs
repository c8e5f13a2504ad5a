//! Relay orchestration -- assembly, lifecycle and graceful shutdown.
//!
//! The [`Orchestrator`] loads configuration, prepares the storage
//! directories, builds the [`LogRelay`] over filesystem stores and runs it
//! until SIGTERM or SIGINT.
//!
//! # Startup
//!
//! 1. Validate configuration, install the metrics recorder if enabled
//! 2. Log the deployment topology and resource map
//! 3. Create sink and data directories
//! 4. Build the relay (restores the queue snapshot from `data_dir`)
//! 5. Write the PID file, start the relay
//!
//! # Shutdown
//!
//! 1. Stop background tasks
//! 2. Stop the relay: drain workers, flush open batches, persist the snapshot
//! 3. Remove the PID file

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logrelay_core::config::{RelayConfig, TopologyConfig};
use logrelay_core::metrics as m;
use logrelay_core::pipeline::{HealthStatus, Pipeline};
use logrelay_pipeline::{FsObjectStore, LogRelay, LogRelayBuilder, PipelineConfig};

use crate::health::{ComponentHealth, DaemonHealth, aggregate_status, directory_health};
use crate::metrics_server;

/// Interval between health reports logged from the main loop.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Interval between uptime gauge updates.
const UPTIME_INTERVAL: Duration = Duration::from_secs(10);

/// The daemon orchestrator.
pub struct Orchestrator {
    config: RelayConfig,
    relay: LogRelay<FsObjectStore>,
    pipeline_config: PipelineConfig,
    start_time: Instant,
    shutdown: CancellationToken,
    background: Vec<JoinHandle<()>>,
    pid_file: Option<PidFile>,
}

impl Orchestrator {
    /// Load `logrelay.toml` (with env overrides) and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = RelayConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    pub async fn build_from_config(config: RelayConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {e}"))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        log_topology(&config.topology);
        for entry in &config.resources {
            tracing::info!(resource = %entry.name, format = %entry.kind, "resource mapped");
        }
        if config.resources.is_empty() {
            tracing::warn!("resource map is empty; every object will be routed to errors/format-unknown");
        }

        let pipeline_config = PipelineConfig::from_core(&config);
        prepare_directories(&config, &pipeline_config)?;

        let relay = LogRelayBuilder::new()
            .config(pipeline_config.clone())
            .landing(FsObjectStore::new(&pipeline_config.landing_dir))
            .sink(FsObjectStore::new(&pipeline_config.sink_dir))
            .build()
            .await
            .map_err(|e| anyhow::anyhow!("failed to build log relay: {e}"))?;

        let restored = relay.queue_stats().await;
        if restored.depth() > 0 || restored.dead_letters > 0 {
            tracing::info!(
                pending = restored.depth(),
                dead_letters = restored.dead_letters,
                "queue restored from snapshot"
            );
        }

        Ok(Self {
            config,
            relay,
            pipeline_config,
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
            background: Vec::new(),
            pid_file: None,
        })
    }

    /// Write the PID file and start the relay.
    ///
    /// On failure the PID file is removed again.
    pub async fn start(&mut self) -> Result<()> {
        if !self.config.general.pid_file.is_empty() {
            self.pid_file = Some(PidFile::create(Path::new(&self.config.general.pid_file))?);
        }

        if let Err(e) = self.relay.start().await {
            tracing::error!(error = %e, "log relay failed to start");
            if let Some(pid_file) = self.pid_file.take() {
                pid_file.remove();
            }
            return Err(e.into());
        }

        if self.config.metrics.enabled {
            self.background
                .push(spawn_uptime_updater(self.start_time, self.shutdown.child_token()));
        }
        tracing::info!(
            landing = %self.pipeline_config.landing_dir.display(),
            sink = %self.pipeline_config.sink_dir.display(),
            workers = self.pipeline_config.workers,
            "log relay running"
        );
        Ok(())
    }

    /// Start, wait for SIGTERM/SIGINT while logging periodic health, then shut down.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut health_tick = tokio::time::interval(HEALTH_LOG_INTERVAL);
        health_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        health_tick.tick().await;

        let shutdown_signal = wait_for_shutdown_signal();
        tokio::pin!(shutdown_signal);
        let signal = loop {
            tokio::select! {
                signal = &mut shutdown_signal => break signal?,
                _ = health_tick.tick() => self.log_health().await,
            }
        };
        tracing::info!(signal, "shutdown signal received");

        self.shutdown().await
    }

    /// Stop background tasks and the relay, then remove the PID file.
    ///
    /// The relay flushes every open batch and persists the queue snapshot
    /// before this returns.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.shutdown.cancel();
        for task in self.background.drain(..) {
            let _ = task.await;
        }

        tracing::info!("stopping log relay");
        let result = self.relay.stop().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "log relay stopped with errors");
        }

        if let Some(pid_file) = self.pid_file.take() {
            pid_file.remove();
        }
        result.map_err(Into::into)
    }

    /// Current aggregated health.
    pub async fn health(&self) -> DaemonHealth {
        let components = vec![
            ComponentHealth::new("relay", self.relay.health_check().await),
            directory_health("landing", &self.pipeline_config.landing_dir),
            directory_health("sink", &self.pipeline_config.sink_dir),
        ];
        let stats = self.relay.dispatcher().stats();

        DaemonHealth {
            status: aggregate_status(&components),
            uptime_secs: self.start_time.elapsed().as_secs(),
            components,
            queue: self.relay.queue_stats().await,
            open_batches: self.relay.stream().open_batches().await,
            objects_acked: stats.objects_acked(),
            objects_failed: stats.objects_failed(),
        }
    }

    /// Loaded configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The running relay.
    pub fn relay(&self) -> &LogRelay<FsObjectStore> {
        &self.relay
    }

    async fn log_health(&self) {
        let health = self.health().await;
        match &health.status {
            HealthStatus::Healthy => tracing::debug!(
                depth = health.queue.depth(),
                open_batches = health.open_batches,
                "health check"
            ),
            status => tracing::warn!(
                status = %status,
                depth = health.queue.depth(),
                dead_letters = health.queue.dead_letters,
                "health check"
            ),
        }
    }
}

/// Topology is informational: log it once at startup.
fn log_topology(topology: &TopologyConfig) {
    if topology.environment.is_empty() && topology.endpoints.is_empty() {
        return;
    }
    tracing::info!(
        environment = %topology.environment,
        region = %topology.region,
        domain = %topology.domain,
        endpoints = topology.endpoints.len(),
        "deployment topology"
    );
    for endpoint in &topology.endpoints {
        tracing::debug!(endpoint = %endpoint, "topology endpoint");
    }
}

/// Create the sink and data directories. A missing landing directory is
/// only a warning: the watcher sees it as empty until it appears.
fn prepare_directories(config: &RelayConfig, pipeline: &PipelineConfig) -> Result<()> {
    for dir in [
        pipeline.sink_dir.as_path(),
        Path::new(&config.general.data_dir),
    ] {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", dir.display()))?;
    }
    if !pipeline.landing_dir.is_dir() {
        tracing::warn!(
            landing = %pipeline.landing_dir.display(),
            "landing directory does not exist yet"
        );
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT and return the signal name.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {e}"))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

fn spawn_uptime_updater(start_time: Instant, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}

/// An exclusively created PID file.
///
/// Guards against a second instance sharing the same data directory.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create the file with the current PID.
    ///
    /// - `create_new` makes creation atomic; an existing file is an error
    ///   that reports the PID it holds
    /// - the parent directory is created with mode 0o700, the file with 0o600
    /// - anything other than a regular file is removed and rejected
    pub fn create(path: &Path) -> Result<Self> {
        use std::fs::{self, OpenOptions};
        use std::io::{ErrorKind, Write};

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                fs::DirBuilder::new().mode(0o700).recursive(true).create(parent)?;
            }
            #[cfg(not(unix))]
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let existing = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
                return Err(anyhow::anyhow!(
                    "PID file {} already exists with PID: {}. Is another instance running?",
                    path.display(),
                    existing.trim()
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if !file.metadata()?.is_file() {
            let _ = fs::remove_file(path);
            return Err(anyhow::anyhow!("PID file {} is not a regular file", path.display()));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        let pid = std::process::id();
        writeln!(file, "{pid}")?;
        tracing::info!(pid, path = %path.display(), "PID file written");

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file. Failures are logged, never returned.
    pub fn remove(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "PID file removed"),
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to remove PID file"),
        }
    }
}
