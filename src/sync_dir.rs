use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::protocol::{FileContent, IncomingFile};
use crate::snapshot::{DirectorySnapshot, SnapshotBuilder};

/// The synchronized directory on disk.
///
/// Snapshots and reads share the guard; applying received files takes it
/// exclusively for the whole batch.
#[derive(Clone)]
pub struct SyncDir {
    root: Arc<PathBuf>,
    guard: Arc<RwLock<()>>,
}

/// Shared access to the directory. No write can land while a view is alive,
/// so everything read through one view describes the same directory state.
pub struct ReadView<'a> {
    dir: &'a SyncDir,
    _guard: RwLockReadGuard<'a, ()>,
}

impl SyncDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
            guard: Arc::new(RwLock::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn read_view(&self) -> ReadView<'_> {
        ReadView {
            dir: self,
            _guard: self.guard.read().await,
        }
    }

    pub async fn snapshot(&self) -> Result<DirectorySnapshot> {
        self.read_view().await.snapshot().await
    }

    pub async fn read_files(&self, names: &[String]) -> Result<Vec<FileContent>> {
        self.read_view().await.read_files(names).await
    }

    /// Writes every file or stops at the first failure. Names are checked
    /// before anything touches disk.
    pub async fn write_files(&self, files: &[IncomingFile]) -> Result<usize> {
        let targets = files
            .iter()
            .map(|f| self.resolve(&f.file_name))
            .collect::<Result<Vec<_>>>()?;

        let _write = self.guard.write().await;
        for (file, path) in files.iter().zip(&targets) {
            tokio::fs::write(path, &file.contents)
                .await
                .map_err(|source| SyncError::WriteFailed {
                    path: path.clone(),
                    source,
                })?;
            debug!("Wrote {:?} ({} bytes)", path, file.contents.len());
        }
        Ok(files.len())
    }

    /// Only bare file names directly under the root are accepted; the
    /// protocol never creates subdirectories.
    fn resolve(&self, file_name: &str) -> Result<PathBuf> {
        let mut components = Path::new(file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(self.root.join(name)),
            _ => Err(SyncError::malformed(format!(
                "file name {:?} is not a plain name in the synchronized directory",
                file_name
            ))),
        }
    }
}

impl ReadView<'_> {
    pub async fn snapshot(&self) -> Result<DirectorySnapshot> {
        let root = self.dir.root.clone();
        tokio::task::spawn_blocking(move || SnapshotBuilder.build(&root)).await?
    }

    pub async fn read_files(&self, names: &[String]) -> Result<Vec<FileContent>> {
        let mut contents = Vec::with_capacity(names.len());
        for name in names {
            let path = self.dir.resolve(name)?;
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| SyncError::io_unavailable(&path, e))?;
            contents.push(FileContent::file(name.clone(), &data)?);
        }
        Ok(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn incoming(name: &str, body: &str) -> IncomingFile {
        IncomingFile {
            file_name: name.to_string(),
            contents: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let sync_dir = SyncDir::new(dir.path());

        let written = sync_dir
            .write_files(&[incoming("a.txt", "alpha"), incoming("b.txt", "beta")])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let read = sync_dir.read_files(&["b.txt".to_string()]).await.unwrap();
        assert_eq!(read[0].file_name, "b.txt");
        assert_eq!(read[0].contents().unwrap(), b"beta");

        let snapshot = sync_dir.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_traversal_names_rejected_before_writing() {
        let dir = TempDir::new().unwrap();
        let sync_dir = SyncDir::new(dir.path());

        for bad in ["../escape.txt", "/etc/passwd", "", "."] {
            let err = sync_dir
                .write_files(&[incoming("ok.txt", "fine"), incoming(bad, "nope")])
                .await
                .unwrap_err();
            assert!(matches!(err, SyncError::MalformedPacket(_)), "{:?}", bad);
        }
        assert!(!dir.path().join("ok.txt").exists());
    }

    #[tokio::test]
    async fn test_nested_names_rejected_before_writing() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let sync_dir = SyncDir::new(dir.path());

        let err = sync_dir
            .write_files(&[incoming("top.txt", "top"), incoming("nested/deep.txt", "deep")])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedPacket(_)));
        assert!(!dir.path().join("top.txt").exists());
        assert!(!dir.path().join("nested").join("deep.txt").exists());

        let err = sync_dir
            .read_files(&["nested/deep.txt".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedPacket(_)));
    }

    #[tokio::test]
    async fn test_writes_wait_for_open_read_view() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shared.txt"), "before").unwrap();
        let sync_dir = SyncDir::new(dir.path());

        let view = sync_dir.read_view().await;
        let snapshot = view.snapshot().await.unwrap();

        let writer = {
            let sync_dir = sync_dir.clone();
            tokio::spawn(async move {
                sync_dir
                    .write_files(&[incoming("shared.txt", "after")])
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        let files = view.read_files(&["shared.txt".to_string()]).await.unwrap();
        assert_eq!(files[0].contents().unwrap(), b"before");
        assert_eq!(snapshot.len(), 1);
        drop(view);

        writer.await.unwrap().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("shared.txt")).unwrap(),
            "after"
        );
    }

    #[tokio::test]
    async fn test_reading_absent_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let sync_dir = SyncDir::new(dir.path());

        let err = sync_dir
            .read_files(&["ghost.txt".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::IoUnavailable { .. }));
    }
}
