use anyhow::Context;
use clap::Parser;
use scrawl_client_core::telemetry::logging;
use scrawl_client_core::terminal::{app, cli::Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("failed to initialise logging")?;
    app::run(cli).await?;
    Ok(())
}
