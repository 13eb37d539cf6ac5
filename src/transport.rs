use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Identifies one connection: the remote endpoint plus a serial, so two
/// connections from the same endpoint never share an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    endpoint: String,
    connection: u64,
}

impl PeerId {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::connection(endpoint, 0)
    }

    pub fn connection(endpoint: impl Into<String>, serial: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            connection: serial,
        }
    }
}

impl From<iroh::PublicKey> for PeerId {
    fn from(key: iroh::PublicKey) -> Self {
        Self::new(key.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.endpoint, self.connection)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Peer(PeerId),
    /// Every connected peer except the given one
    AllExcept(PeerId),
}

/// Outbound half of the channel. Sends are fire-and-forget: implementations
/// queue the frame and return immediately.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, frame: Vec<u8>, destination: Destination);
}

pub type FrameSender = UnboundedSender<Vec<u8>>;

/// Server-side table of connected clients, each fed by its own writer task.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<PeerId, FrameSender>>>,
}

impl ClientRegistry {
    pub fn join(&self, peer: PeerId, sender: FrameSender) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.insert(peer, sender);
    }

    pub fn leave(&self, peer: &PeerId) -> bool {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.remove(peer).is_some()
    }

    pub fn connected(&self) -> Vec<PeerId> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let mut peers: Vec<_> = clients.keys().cloned().collect();
        peers.sort();
        peers
    }
}

impl Transport for ClientRegistry {
    fn send(&self, frame: Vec<u8>, destination: Destination) {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        match destination {
            Destination::Peer(peer) => match clients.get(&peer) {
                Some(sender) => {
                    if sender.send(frame).is_err() {
                        warn!("Writer for {} is gone, dropping frame", peer);
                    }
                }
                None => warn!("No connected client {}, dropping frame", peer),
            },
            Destination::AllExcept(origin) => {
                for (peer, sender) in clients.iter().filter(|(peer, _)| **peer != origin) {
                    debug!("Fanning out {} bytes to {}", frame.len(), peer);
                    if sender.send(frame.clone()).is_err() {
                        warn!("Writer for {} is gone, dropping frame", peer);
                    }
                }
            }
        }
    }
}

/// Client-side link to the single upstream server.
#[derive(Clone)]
pub struct ServerLink {
    sender: FrameSender,
}

impl ServerLink {
    pub fn new(sender: FrameSender) -> Self {
        Self { sender }
    }
}

impl Transport for ServerLink {
    fn send(&self, frame: Vec<u8>, destination: Destination) {
        if let Destination::AllExcept(_) = destination {
            warn!("Clients cannot fan out, sending upstream instead");
        }
        if self.sender.send(frame).is_err() {
            warn!("Server link is closed, dropping frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_fan_out_skips_origin() {
        let registry = ClientRegistry::default();
        let (tx_x, mut rx_x) = mpsc::unbounded_channel();
        let (tx_y, mut rx_y) = mpsc::unbounded_channel();
        let (tx_z, mut rx_z) = mpsc::unbounded_channel();
        registry.join(PeerId::new("x"), tx_x);
        registry.join(PeerId::new("y"), tx_y);
        registry.join(PeerId::new("z"), tx_z);

        registry.send(vec![7], Destination::AllExcept(PeerId::new("x")));

        assert!(rx_x.try_recv().is_err());
        assert_eq!(rx_y.try_recv().unwrap(), vec![7]);
        assert_eq!(rx_z.try_recv().unwrap(), vec![7]);
    }

    #[test]
    fn test_direct_send_and_leave() {
        let registry = ClientRegistry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.join(PeerId::new("only"), tx);

        registry.send(vec![1, 2], Destination::Peer(PeerId::new("only")));
        assert_eq!(rx.try_recv().unwrap(), vec![1, 2]);

        assert!(registry.leave(&PeerId::new("only")));
        assert!(registry.connected().is_empty());
        registry.send(vec![3], Destination::Peer(PeerId::new("only")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_same_endpoint_twice_stays_separate() {
        let registry = ClientRegistry::default();
        let first = PeerId::connection("laptop", 1);
        let second = PeerId::connection("laptop", 2);
        assert_ne!(first, second);

        let (tx_first, mut rx_first) = mpsc::unbounded_channel();
        let (tx_second, mut rx_second) = mpsc::unbounded_channel();
        registry.join(first.clone(), tx_first);
        registry.join(second.clone(), tx_second);
        assert_eq!(registry.connected().len(), 2);

        registry.send(vec![1], Destination::Peer(second.clone()));
        assert!(rx_first.try_recv().is_err());
        assert_eq!(rx_second.try_recv().unwrap(), vec![1]);

        registry.send(vec![2], Destination::AllExcept(first.clone()));
        assert!(rx_first.try_recv().is_err());
        assert_eq!(rx_second.try_recv().unwrap(), vec![2]);

        assert!(registry.leave(&first));
        assert_eq!(registry.connected(), vec![second.clone()]);
        registry.send(vec![3], Destination::Peer(second));
        assert_eq!(rx_second.try_recv().unwrap(), vec![3]);
    }
}
