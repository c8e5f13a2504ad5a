//! Aggregated health reporting.
//!
//! The overall daemon status is the worst status among its components:
//! the relay itself and the landing and sink directories.
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reasons)
//! - Any Unhealthy -> Unhealthy(reasons)

use std::path::Path;

use serde::Serialize;

use logrelay_core::pipeline::HealthStatus;
use logrelay_pipeline::QueueStats;

/// Aggregated health report for the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall status (worst of all components).
    pub status: HealthStatus,
    /// Seconds since the daemon was built.
    pub uptime_secs: u64,
    /// Per-component reports.
    pub components: Vec<ComponentHealth>,
    /// Queue counts at the time of the report.
    pub queue: QueueStats,
    /// Partitions with buffered records.
    pub open_batches: usize,
    /// Objects acked since start.
    pub objects_acked: u64,
    /// Objects whose processing failed since start.
    pub objects_failed: u64,
}

/// Health of a single component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Component name (e.g. "relay", "landing").
    pub name: String,
    /// Current status.
    pub status: HealthStatus,
}

impl ComponentHealth {
    /// Create a component report.
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// Aggregate component statuses. Returns the worst one, with every
/// non-healthy reason joined by `; `.
pub fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
    let mut unhealthy = false;
    let mut reasons = Vec::new();

    for component in components {
        match &component.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                reasons.push(format!("{}: {}", component.name, reason));
            }
            HealthStatus::Unhealthy(reason) => {
                unhealthy = true;
                reasons.push(format!("{}: {}", component.name, reason));
            }
        }
    }

    match (unhealthy, reasons.is_empty()) {
        (_, true) => HealthStatus::Healthy,
        (true, false) => HealthStatus::Unhealthy(reasons.join("; ")),
        (false, false) => HealthStatus::Degraded(reasons.join("; ")),
    }
}

/// Check that a storage root exists and is a directory.
pub fn directory_health(name: &str, path: &Path) -> ComponentHealth {
    let status = match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthStatus::Healthy,
        Ok(_) => HealthStatus::Unhealthy(format!("{} is not a directory", path.display())),
        Err(e) => HealthStatus::Unhealthy(format!("{}: {e}", path.display())),
    };
    ComponentHealth::new(name, status)
}
