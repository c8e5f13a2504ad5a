use anyhow::Result;
use clap::Parser;

use logrelay_core::config::RelayConfig;
use logrelay_daemon::cli::DaemonCli;
use logrelay_daemon::logging;
use logrelay_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // file -> env -> flags -> validate
    let mut config = RelayConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", cli.config.display()))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    if cli.validate {
        println!(
            "configuration OK: {} ({} resources mapped)",
            cli.config.display(),
            config.resources.len()
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "logrelay-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await?;

    tracing::info!("logrelay-daemon shut down");
    Ok(())
}
