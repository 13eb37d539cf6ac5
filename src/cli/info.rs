use anyhow::Result;

use crate::{config::config_dir, iroh_utils};

pub async fn run() -> Result<()> {
    let endpoint = iroh_utils::bind_endpoint().await?;

    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Endpoint ID: {}", endpoint.id());
    println!("Config: {}", config_dir()?.display());

    Ok(())
}
