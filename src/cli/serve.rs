use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    config::SyncConfig,
    dispatcher::{Dispatcher, Role},
    iroh_utils,
    protocol::{read_frame, write_frame},
    transport::{ClientRegistry, PeerId},
};

/// Tells apart connections that come from the same endpoint.
static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

pub async fn run(config: SyncConfig) -> Result<()> {
    let endpoint = iroh_utils::bind_endpoint().await?;
    let dispatcher = Arc::new(Dispatcher::new(
        Role::Server,
        &config,
        ClientRegistry::default(),
    ));

    info!("Serving {:?}", config.root);
    println!("Server endpoint ID: {}", endpoint.id());

    // Loop to accept incoming connections
    while let Some(incoming) = endpoint.accept().await {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(incoming, dispatcher).await {
                error!("Connection error: {:?}", e);
            }
        });
    }

    Ok(())
}

async fn handle_connection(
    incoming: iroh::endpoint::Incoming,
    dispatcher: Arc<Dispatcher<ClientRegistry>>,
) -> Result<()> {
    let connection = incoming.accept()?;
    let connection = connection.await?;
    let serial = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
    let peer = PeerId::connection(connection.remote_id().to_string(), serial);
    info!("Accepted connection from {}", peer);

    // The client opens the stream and speaks first with its metadata
    let (mut send, mut recv) = connection.accept_bi().await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    dispatcher.transport().join(peer.clone(), tx);
    dispatcher.on_client_joined(&peer);
    info!(
        "{} clients connected",
        dispatcher.transport().connected().len()
    );

    let writer_peer = peer.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut send, &frame).await {
                warn!("Failed to send to {}: {}", writer_peer, e);
                break;
            }
        }
        send.finish().ok();
    });

    loop {
        // EOF or a reset both end the session
        let frame = match read_frame(&mut recv).await {
            Ok(frame) => frame,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Dropping {}: {}", peer, e);
                break;
            }
            Err(_) => break,
        };
        if let Err(e) = dispatcher.on_data_received(&peer, &frame).await {
            error!(
                "Reconciliation with {} stalled in {:?}: {}",
                peer,
                dispatcher.phase(&peer),
                e
            );
        }
    }

    dispatcher.transport().leave(&peer);
    dispatcher.on_client_left(&peer);
    writer.await.ok();

    Ok(())
}
