use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iroh::PublicKey;
use std::path::PathBuf;

use crate::{config::SyncConfig, store::Store};

mod info;
mod join;
mod root;
mod serve;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get endpoint id and version info
    Info,
    /// Set the default synchronized directory. If omitted, shows it.
    Root { path: Option<PathBuf> },
    /// Coordinate synchronization for connecting clients
    Serve {
        #[command(flatten)]
        dir: DirArgs,
    },
    /// Reconcile with a server, then keep applying its broadcasts
    Join {
        /// The server to join. Defaults to the last server joined.
        peer: Option<PublicKey>,
        #[command(flatten)]
        dir: DirArgs,
    },
}

#[derive(clap::Args, Debug)]
struct DirArgs {
    /// Directory to synchronize instead of the configured root
    #[arg(short, long)]
    dir: Option<PathBuf>,
}

impl DirArgs {
    fn resolve(self, store: &Store) -> Result<SyncConfig> {
        SyncConfig::resolve(store, self.dir)
    }
}

impl Cli {
    pub async fn run(self, store: Store) -> Result<()> {
        match self.command {
            Commands::Info => info::run().await?,
            Commands::Root { path } => root::run(&store, path)?,
            Commands::Serve { dir } => serve::run(dir.resolve(&store)?).await?,
            Commands::Join { peer, dir } => {
                let peer = match peer {
                    Some(peer) => peer,
                    None => store
                        .server()?
                        .context("No server given and none joined before")?,
                };
                join::run(&store, peer, dir.resolve(&store)?).await?
            }
        }
        Ok(())
    }
}
