//! Role-aware packet dispatch driving the four-phase reconciliation.
//!
//! Server: `AwaitMetadata -> Diffing -> AwaitClientFiles -> Reconciled -> Idle`
//!
//! Client: `SentMetadata -> ApplyingServerFiles -> Idle`. Every Broadcast
//! re-enters `ApplyingServerFiles`.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::diff::diff;
use crate::error::Result;
use crate::protocol::{Packet, PacketKind};
use crate::sync_dir::SyncDir;
use crate::transport::{Destination, PeerId, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitMetadata,
    Diffing,
    AwaitClientFiles,
    Reconciled,
    SentMetadata,
    ApplyingServerFiles,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    ServeDifferences,
    ApplyDifferences,
    AcceptClientFiles,
    ApplyBroadcast,
    Ignore,
}

impl Route {
    fn lookup(role: Role, kind: PacketKind) -> Self {
        match (role, kind) {
            (Role::Server, PacketKind::Metadata) => Route::ServeDifferences,
            (Role::Server, PacketKind::ClientFiles) => Route::AcceptClientFiles,
            (Role::Server, PacketKind::Differences) => Route::Ignore,
            (Role::Server, PacketKind::Broadcast) => Route::Ignore,
            (Role::Client, PacketKind::Differences) => Route::ApplyDifferences,
            (Role::Client, PacketKind::Broadcast) => Route::ApplyBroadcast,
            (Role::Client, PacketKind::Metadata) => Route::Ignore,
            (Role::Client, PacketKind::ClientFiles) => Route::Ignore,
        }
    }
}

pub struct Dispatcher<T> {
    role: Role,
    dir: SyncDir,
    transport: T,
    sessions: Mutex<HashMap<PeerId, SessionPhase>>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(role: Role, config: &SyncConfig, transport: T) -> Self {
        Self {
            role,
            dir: SyncDir::new(&config.root),
            transport,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn phase(&self, peer: &PeerId) -> Option<SessionPhase> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .copied()
    }

    fn set_phase(&self, peer: &PeerId, phase: SessionPhase) -> Option<SessionPhase> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer.clone(), phase)
    }

    fn enter(&self, peer: &PeerId, phase: SessionPhase, expected: &[SessionPhase]) {
        let previous = self.set_phase(peer, phase);
        match previous {
            Some(p) if !expected.contains(&p) => {
                warn!("{}: entering {:?} from unexpected phase {:?}", peer, phase, p)
            }
            None if !expected.is_empty() => {
                warn!("{}: entering {:?} without a session", peer, phase)
            }
            _ => debug!("{}: {:?} -> {:?}", peer, previous, phase),
        }
    }

    pub fn on_client_joined(&self, peer: &PeerId) {
        if self.role == Role::Server {
            info!("Client {} joined", peer);
            self.set_phase(peer, SessionPhase::AwaitMetadata);
        }
    }

    pub fn on_client_left(&self, peer: &PeerId) {
        let last = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(peer);
        info!("{} left (last phase {:?})", peer, last);
    }

    /// Client entry point: announce our snapshot to the server.
    pub async fn start_session(&self, server: &PeerId) -> Result<()> {
        let snapshot = self.dir.snapshot().await?;
        if snapshot.is_empty() {
            info!("{:?} is empty, expecting a full copy", self.dir.root());
        }
        let packet = Packet::metadata(&snapshot)?;
        self.transport
            .send(packet.encode()?, Destination::Peer(server.clone()));
        info!("Sent metadata for {} files to {}", snapshot.len(), server);
        self.enter(server, SessionPhase::SentMetadata, &[]);
        Ok(())
    }

    pub async fn on_data_received(&self, from: &PeerId, frame: &[u8]) -> Result<()> {
        let packet = Packet::decode(frame)?;
        self.dispatch(from, packet).await
    }

    pub async fn dispatch(&self, from: &PeerId, packet: Packet) -> Result<()> {
        let route = Route::lookup(self.role, packet.kind());
        debug!(
            "{:?} ({} entries) from {} routed to {:?}",
            packet.kind(),
            packet.items().len(),
            from,
            route
        );
        match route {
            Route::ServeDifferences => self.serve_differences(from, packet).await,
            Route::ApplyDifferences => self.apply_differences(from, packet).await,
            Route::AcceptClientFiles => self.accept_client_files(from, packet).await,
            Route::ApplyBroadcast => self.apply_broadcast(from, packet).await,
            Route::Ignore => {
                debug!("{:?} {:?} packet ignored", self.role, packet.kind());
                Ok(())
            }
        }
    }

    async fn serve_differences(&self, from: &PeerId, packet: Packet) -> Result<()> {
        let client_snapshot = packet.snapshot()?;
        self.enter(
            from,
            SessionPhase::Diffing,
            &[SessionPhase::AwaitMetadata, SessionPhase::Idle],
        );

        // The listing and the bytes sent must come from the same state.
        let view = self.dir.read_view().await;
        let server_snapshot = view.snapshot().await?;
        let descriptor = diff(server_snapshot, client_snapshot);
        if descriptor.is_in_sync() {
            info!("{} is already in sync", from);
        }
        let outbound = descriptor.server_outbound();
        let files = view.read_files(&outbound).await?;
        drop(view);

        let reply = Packet::differences(&descriptor, files)?;
        self.transport
            .send(reply.encode()?, Destination::Peer(from.clone()));
        info!(
            "Sent differences to {}: {} files, expecting {} back",
            from,
            outbound.len(),
            descriptor.client_outbound().len()
        );
        self.enter(from, SessionPhase::AwaitClientFiles, &[SessionPhase::Diffing]);
        Ok(())
    }

    async fn apply_differences(&self, from: &PeerId, packet: Packet) -> Result<()> {
        let descriptor = packet.descriptor()?;
        let incoming = packet.files()?;
        self.enter(
            from,
            SessionPhase::ApplyingServerFiles,
            &[SessionPhase::SentMetadata],
        );

        let written = self.dir.write_files(&incoming).await?;
        info!("Applied {} files from {}", written, from);

        let outbound = descriptor.client_outbound();
        let files = self.dir.read_files(&outbound).await?;
        let reply = Packet::client_files(&descriptor, files)?;
        self.transport
            .send(reply.encode()?, Destination::Peer(from.clone()));
        info!("Sent {} client files to {}", outbound.len(), from);
        self.enter(
            from,
            SessionPhase::Idle,
            &[SessionPhase::ApplyingServerFiles],
        );
        Ok(())
    }

    async fn accept_client_files(&self, from: &PeerId, packet: Packet) -> Result<()> {
        // Only validated here; the classification was settled when it was sent.
        packet.descriptor()?;
        let incoming = packet.files()?;

        let written = self.dir.write_files(&incoming).await?;
        self.enter(
            from,
            SessionPhase::Reconciled,
            &[SessionPhase::AwaitClientFiles],
        );
        info!("Stored {} files from {}", written, from);

        let broadcast = packet.into_broadcast();
        self.transport
            .send(broadcast.encode()?, Destination::AllExcept(from.clone()));
        info!("Broadcast {} files from {} to other clients", written, from);
        self.enter(from, SessionPhase::Idle, &[SessionPhase::Reconciled]);
        Ok(())
    }

    async fn apply_broadcast(&self, from: &PeerId, packet: Packet) -> Result<()> {
        let incoming = packet.files()?;
        self.enter(
            from,
            SessionPhase::ApplyingServerFiles,
            &[SessionPhase::Idle],
        );
        let written = self.dir.write_files(&incoming).await?;
        info!("Applied {} broadcast files from {}", written, from);
        self.enter(
            from,
            SessionPhase::Idle,
            &[SessionPhase::ApplyingServerFiles],
        );
        Ok(())
    }
}
