//! Fingerprint-based comparison of two directory snapshots.
//!
//! The server computes one [`DiffDescriptor`] per session and ships it to the
//! client, so both ends act on the same classification.
//!
//! Names present on both sides with different content land in `conflicting`.
//! Both ends push those files, and the later write wins. The client writes
//! the server's files before reading its own outbound set, so after a full
//! exchange both ends hold the server's version.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::snapshot::{DirectorySnapshot, Fingerprint};

/// Classification of one session's two snapshots.
///
/// A name present on both sides with different fingerprints is kept only in
/// `conflicting`, never in either `files_only_*` set, so those two stay
/// disjoint. Callers that want "everything a side must send" should use
/// [`server_outbound`](Self::server_outbound) and
/// [`client_outbound`](Self::client_outbound), which both include it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffDescriptor {
    pub server_snapshot: DirectorySnapshot,
    pub client_snapshot: DirectorySnapshot,
    pub files_only_on_server: BTreeSet<String>,
    pub files_only_on_client: BTreeSet<String>,
    pub conflicting: BTreeSet<String>,
}

impl DiffDescriptor {
    /// Names the server sends in its Differences packet.
    pub fn server_outbound(&self) -> Vec<String> {
        self.files_only_on_server
            .union(&self.conflicting)
            .cloned()
            .collect()
    }

    /// Names the client sends back in its ClientFiles packet.
    pub fn client_outbound(&self) -> Vec<String> {
        self.files_only_on_client
            .union(&self.conflicting)
            .cloned()
            .collect()
    }

    pub fn is_in_sync(&self) -> bool {
        self.files_only_on_server.is_empty()
            && self.files_only_on_client.is_empty()
            && self.conflicting.is_empty()
    }
}

pub fn diff(server: DirectorySnapshot, client: DirectorySnapshot) -> DiffDescriptor {
    let server_map: HashMap<&str, &Fingerprint> = server
        .entries()
        .iter()
        .map(|m| (m.file_name.as_str(), &m.fingerprint))
        .collect();
    let client_map: HashMap<&str, &Fingerprint> = client
        .entries()
        .iter()
        .map(|m| (m.file_name.as_str(), &m.fingerprint))
        .collect();

    let mut files_only_on_server = BTreeSet::new();
    let mut conflicting = BTreeSet::new();
    for (name, fingerprint) in &server_map {
        match client_map.get(name) {
            None => {
                files_only_on_server.insert(name.to_string());
            }
            Some(theirs) if theirs != fingerprint => {
                conflicting.insert(name.to_string());
            }
            Some(_) => {}
        }
    }

    let files_only_on_client: BTreeSet<String> = client_map
        .keys()
        .filter(|name| !server_map.contains_key(*name))
        .map(|name| name.to_string())
        .collect();

    debug!(
        "Diff: {} server-only, {} client-only, {} conflicting",
        files_only_on_server.len(),
        files_only_on_client.len(),
        conflicting.len()
    );

    DiffDescriptor {
        server_snapshot: server,
        client_snapshot: client,
        files_only_on_server,
        files_only_on_client,
        conflicting,
    }
}
