//! Wire envelope for the reconciliation exchange.
//!
//! Encoding is two-layered and uses postcard at both layers. Each
//! [`FileContent`] payload is a postcard value: a snapshot, a descriptor or
//! raw file bytes. The [`Packet`] carrying those entries is itself
//! postcard-encoded and length-prefixed on the stream.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::diff::DiffDescriptor;
use crate::error::{Result, SyncError};
use crate::snapshot::DirectorySnapshot;

pub const ALPN: &[u8] = b"dirsync/1";

/// Sentinel name for the descriptor slot of Differences and ClientFiles packets
pub const DESCRIPTOR_ENTRY: &str = "differences";
/// Sentinel name for the snapshot slot of Metadata packets
pub const SNAPSHOT_ENTRY: &str = "metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    /// Client snapshot, sent on connect
    Metadata,
    /// Server reply: descriptor plus the server's outbound files
    Differences,
    /// Client reply: descriptor plus the client's outbound files
    ClientFiles,
    /// Server fan-out of freshly received client files
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub file_name: String,
    pub encoded_payload: Vec<u8>,
}

impl FileContent {
    pub fn file(file_name: impl Into<String>, contents: &[u8]) -> Result<Self> {
        Ok(Self {
            file_name: file_name.into(),
            encoded_payload: encode_payload(&contents)?,
        })
    }

    pub fn contents(&self) -> Result<Vec<u8>> {
        decode_payload(&self.encoded_payload)
            .map_err(|e| SyncError::malformed(format!("entry {:?}: {}", self.file_name, e)))
    }
}

/// A real file carried by a packet, after payload decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    pub file_name: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    kind: PacketKind,
    items: Vec<FileContent>,
}

impl Packet {
    pub fn metadata(snapshot: &DirectorySnapshot) -> Result<Self> {
        let sentinel = FileContent {
            file_name: SNAPSHOT_ENTRY.to_string(),
            encoded_payload: encode_payload(snapshot)?,
        };
        Ok(Self {
            kind: PacketKind::Metadata,
            items: vec![sentinel],
        })
    }

    pub fn differences(descriptor: &DiffDescriptor, files: Vec<FileContent>) -> Result<Self> {
        Self::with_descriptor(PacketKind::Differences, descriptor, files)
    }

    pub fn client_files(descriptor: &DiffDescriptor, files: Vec<FileContent>) -> Result<Self> {
        Self::with_descriptor(PacketKind::ClientFiles, descriptor, files)
    }

    pub fn broadcast(files: Vec<FileContent>) -> Self {
        Self {
            kind: PacketKind::Broadcast,
            items: files,
        }
    }

    fn with_descriptor(
        kind: PacketKind,
        descriptor: &DiffDescriptor,
        files: Vec<FileContent>,
    ) -> Result<Self> {
        let mut items = Vec::with_capacity(files.len() + 1);
        items.push(FileContent {
            file_name: DESCRIPTOR_ENTRY.to_string(),
            encoded_payload: encode_payload(descriptor)?,
        });
        items.extend(files);
        Ok(Self { kind, items })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(kind: PacketKind, items: Vec<FileContent>) -> Self {
        Self { kind, items }
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn items(&self) -> &[FileContent] {
        &self.items
    }

    /// Re-tags the packet as a Broadcast. The descriptor sentinel is dropped,
    /// leaving only real files.
    pub fn into_broadcast(self) -> Self {
        let mut items = self.items;
        if self.kind.has_descriptor() && !items.is_empty() {
            items.remove(0);
        }
        Self::broadcast(items)
    }

    pub fn snapshot(&self) -> Result<DirectorySnapshot> {
        let sentinel = self.sentinel(PacketKind::Metadata, SNAPSHOT_ENTRY)?;
        decode_payload(&sentinel.encoded_payload)
            .map_err(|e| SyncError::malformed(format!("snapshot sentinel: {}", e)))
    }

    pub fn descriptor(&self) -> Result<DiffDescriptor> {
        if !self.kind.has_descriptor() {
            return Err(SyncError::malformed(format!(
                "{:?} packet carries no descriptor",
                self.kind
            )));
        }
        let sentinel = self.sentinel(self.kind, DESCRIPTOR_ENTRY)?;
        decode_payload(&sentinel.encoded_payload)
            .map_err(|e| SyncError::malformed(format!("descriptor sentinel: {}", e)))
    }

    /// Decodes every real-file entry, skipping the sentinel where the kind
    /// has one. Fails on the first undecodable entry.
    pub fn files(&self) -> Result<Vec<IncomingFile>> {
        let skip = match self.kind {
            PacketKind::Metadata => {
                return Err(SyncError::malformed("Metadata packet carries no files"))
            }
            PacketKind::Differences | PacketKind::ClientFiles => 1,
            PacketKind::Broadcast => 0,
        };
        self.items
            .iter()
            .skip(skip)
            .map(|item| {
                Ok(IncomingFile {
                    file_name: item.file_name.clone(),
                    contents: item.contents()?,
                })
            })
            .collect()
    }

    fn sentinel(&self, expected: PacketKind, name: &str) -> Result<&FileContent> {
        if self.kind != expected {
            return Err(SyncError::malformed(format!(
                "expected {:?} packet, got {:?}",
                expected, self.kind
            )));
        }
        let first = self
            .items
            .first()
            .ok_or_else(|| SyncError::malformed(format!("{:?} packet is empty", self.kind)))?;
        if first.file_name != name {
            return Err(SyncError::malformed(format!(
                "expected sentinel {:?}, found {:?}",
                name, first.file_name
            )));
        }
        Ok(first)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_stdvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).map_err(|e| SyncError::malformed(format!("envelope: {}", e)))
    }
}

impl PacketKind {
    pub fn has_descriptor(self) -> bool {
        matches!(self, PacketKind::Differences | PacketKind::ClientFiles)
    }
}

pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(postcard::to_stdvec(value)?)
}

pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, postcard::Error> {
    postcard::from_bytes(bytes)
}

/// Largest frame either side will write or accept. Files travel whole inside
/// one packet, so this also caps the size of a single reconciliation.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

fn oversized(len: usize) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("frame of {} bytes exceeds limit of {} bytes", len, MAX_FRAME_LEN),
    )
}

pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(oversized(frame.len()));
    }
    let len = u32::try_from(frame.len()).map_err(|_| oversized(frame.len()))?;
    writer.write_u32(len).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// The length header is checked before anything is allocated for the body.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(oversized(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
