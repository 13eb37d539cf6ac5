use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::error::{Result, SyncError};

/// BLAKE3 digest of a file's bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Fingerprint({})", &hex[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_name: String,
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub modified_at: u64, // Unix timestamp
}

/// Point-in-time listing of one side's files, sorted by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot(Vec<FileMetadata>);

impl DirectorySnapshot {
    /// Sorts by name and drops repeated names, keeping the first occurrence.
    pub fn from_entries(mut entries: Vec<FileMetadata>) -> Self {
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        entries.dedup_by(|a, b| a.file_name == b.file_name);
        Self(entries)
    }

    pub fn entries(&self) -> &[FileMetadata] {
        &self.0
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|m| m.file_name.as_str())
    }

    #[cfg(test)]
    pub fn get(&self, file_name: &str) -> Option<&FileMetadata> {
        self.0
            .binary_search_by(|m| m.file_name.as_str().cmp(file_name))
            .ok()
            .map(|i| &self.0[i])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Scans the regular files directly under a directory into a
/// [`DirectorySnapshot`]. Subdirectories are not descended into.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Blocking; callers on the runtime go through `SyncDir::snapshot`.
    pub fn build(&self, root: &Path) -> Result<DirectorySnapshot> {
        let meta = std::fs::metadata(root).map_err(|e| SyncError::io_unavailable(root, e))?;
        if !meta.is_dir() {
            return Err(SyncError::io_unavailable(
                root,
                std::io::Error::other("not a directory"),
            ));
        }

        let walker = WalkDir::new(root).min_depth(1).max_depth(1);

        let mut entries = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                SyncError::io_unavailable(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();

            let meta = entry
                .metadata()
                .map_err(|e| SyncError::io_unavailable(path, e.into()))?;
            let modified_at = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let fingerprint =
                Fingerprint::of_file(path).map_err(|e| SyncError::io_unavailable(path, e))?;

            entries.push(FileMetadata {
                file_name,
                fingerprint,
                size: meta.len(),
                modified_at,
            });
        }

        Ok(DirectorySnapshot::from_entries(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_sorted_and_fingerprinted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta").unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();

        let snapshot = SnapshotBuilder.build(dir.path()).unwrap();
        let names: Vec<_> = snapshot.names().collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        let a = snapshot.get("a.txt").unwrap();
        assert_eq!(a.size, 5);
        assert_eq!(a.fingerprint, Fingerprint::of(b"alpha"));
    }

    #[test]
    fn test_same_content_same_fingerprint() {
        let left = TempDir::new().unwrap();
        let right = TempDir::new().unwrap();
        std::fs::write(left.path().join("same.txt"), "payload").unwrap();
        std::fs::write(right.path().join("same.txt"), "payload").unwrap();

        let builder = SnapshotBuilder;
        let l = builder.build(left.path()).unwrap();
        let r = builder.build(right.path()).unwrap();
        assert_eq!(
            l.get("same.txt").unwrap().fingerprint,
            r.get("same.txt").unwrap().fingerprint
        );
    }

    #[test]
    fn test_listing_skips_subdirectories() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("top.txt"), "top").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("deep.txt"), "deep").unwrap();

        let snapshot = SnapshotBuilder.build(dir.path()).unwrap();
        assert_eq!(snapshot.names().collect::<Vec<_>>(), vec!["top.txt"]);
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = SnapshotBuilder.build(&missing).unwrap_err();
        assert!(matches!(err, SyncError::IoUnavailable { .. }));
    }

    #[test]
    fn test_from_entries_dedups_names() {
        fn entry(name: &str, body: &[u8]) -> FileMetadata {
            FileMetadata {
                file_name: name.to_string(),
                fingerprint: Fingerprint::of(body),
                size: body.len() as u64,
                modified_at: 0,
            }
        }
        let snapshot = DirectorySnapshot::from_entries(vec![
            entry("z", b"1"),
            entry("a", b"2"),
            entry("z", b"3"),
        ]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.names().collect::<Vec<_>>(), vec!["a", "z"]);
    }
}
