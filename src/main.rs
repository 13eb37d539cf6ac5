use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{cli::Cli, iroh_utils::init_secret_key, store::Store};

mod cli;
mod config;
mod diff;
mod dispatcher;
mod error;
mod iroh_utils;
mod protocol;
mod snapshot;
mod store;
mod sync_dir;
mod transport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()?;

    init_secret_key().await?;
    let store = Store::new()?;

    let cli = Cli::parse();
    cli.run(store).await
}
