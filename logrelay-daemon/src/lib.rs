//! logrelay daemon library.
//!
//! Exposes the daemon internals for integration tests. In production
//! `logrelay-daemon` runs as a binary (main.rs).

pub mod cli;
pub mod health;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
