//! plate-verifier CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use plate_verifier::ServiceBuilder;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();
    let log_json = cli.log_json;
    let config = cli.into_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);
    if log_json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }

    info!("plate-verifier v{}", env!("CARGO_PKG_VERSION"));

    let mut service = ServiceBuilder::new(config).build().await?;

    // Run until shutdown
    service.run().await?;

    info!("Goodbye!");
    Ok(())
}
