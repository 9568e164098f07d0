use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pgpolicy::Adapter;

use pgpolicy_cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.app_config()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.rust_log))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let store_config = config.store_config()?;
    info!(
        schema = %store_config.schema,
        table = %store_config.table_name,
        "configuration parsed, connecting to postgres..."
    );
    let mut adapter = Adapter::connect(&store_config)
        .await
        .context("could not initialize the policy adapter")?;

    let mut stdout = io::stdout().lock();
    let result = execute(&mut adapter, &cli.command, &mut stdout).await;
    adapter.close().await;
    result
}
