//! CLI argument definitions for logrelay-daemon.
//!
//! Command-line flags are the last override layer: file, then
//! `LOGRELAY_*` environment variables, then these flags.

use std::path::PathBuf;

use clap::Parser;

use logrelay_core::config::RelayConfig;

/// Log relay daemon.
///
/// Watches the landing store for new log objects, classifies and parses
/// them, and writes partitioned gzip batches to the sink.
#[derive(Parser, Debug, Default)]
#[command(name = "logrelay-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logrelay.toml configuration file.
    #[arg(short, long, default_value = "/etc/logrelay/logrelay.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path. An empty value disables the PID file.
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Apply flag overrides on top of a loaded configuration.
    ///
    /// The caller must re-run `validate()` afterwards.
    pub fn apply_overrides(&self, config: &mut RelayConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file = pid_file.clone();
        }
    }
}
