use clap::Parser;
use journal_shipper::{shutdown_signal, Cli, Shipper};
use shipper_shared::ObservabilitySystem;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    ObservabilitySystem::init(&config.observability, config.debug)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting journal-shipper");

    let shipper = Shipper::new(config)?;
    if let Err(e) = shipper.run_until(shutdown_signal()).await {
        error!(error = %e, class = ?e.class(), "Exiting");
        return Err(e.into());
    }

    info!("journal-shipper stopped");
    Ok(())
}
