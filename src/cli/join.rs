use anyhow::{Context, Result};
use iroh::PublicKey;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    config::SyncConfig,
    dispatcher::{Dispatcher, Role},
    iroh_utils,
    protocol::{read_frame, write_frame, ALPN},
    store::Store,
    transport::{PeerId, ServerLink},
};

pub async fn run(store: &Store, peer: PublicKey, config: SyncConfig) -> Result<()> {
    let endpoint = iroh_utils::bind_endpoint().await?;

    info!("Connecting to {}...", peer);
    let connection = endpoint
        .connect(peer, ALPN)
        .await
        .context("Failed to connect to server")?;
    info!("Connected!");
    store.set_server(peer)?;

    let (mut send, mut recv) = connection
        .open_bi()
        .await
        .context("Failed to open stream")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut send, &frame).await {
                warn!("Failed to send to server: {}", e);
                break;
            }
        }
        send.finish().ok();
    });

    let server = PeerId::from(peer);
    let dispatcher = Dispatcher::new(Role::Client, &config, ServerLink::new(tx));
    dispatcher
        .start_session(&server)
        .await
        .context("Failed to announce local files")?;

    loop {
        tokio::select! {
            frame = read_frame(&mut recv) => match frame {
                Ok(frame) => {
                    if let Err(e) = dispatcher.on_data_received(&server, &frame).await {
                        error!("Failed to apply packet from server: {}", e);
                    }
                }
                Err(_) => {
                    info!("Server closed the connection");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, leaving");
                break;
            }
        }
    }

    // Dropping the dispatcher closes the link so the writer can finish.
    drop(dispatcher);
    writer.await.ok();

    Ok(())
}
