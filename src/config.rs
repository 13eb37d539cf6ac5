use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::store::Store;

/// Settings threaded into the dispatcher for one run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory that is both snapshot source and write destination
    pub root: PathBuf,
}

impl SyncConfig {
    /// An explicit `--dir` wins over the root saved with `dirsync root`.
    pub fn resolve(store: &Store, dir: Option<PathBuf>) -> Result<Self> {
        let root = match dir {
            Some(dir) => dir,
            None => store.root()?.context(
                "No synchronized directory configured; pass --dir or run `dirsync root <PATH>`",
            )?,
        };
        let root = std::fs::canonicalize(&root)
            .with_context(|| format!("Failed to resolve directory {:?}", root))?;
        anyhow::ensure!(root.is_dir(), "{:?} is not a directory", root);

        Ok(Self { root })
    }
}

/// `~/.config/dirsync`, holding the settings database and the endpoint key.
pub fn config_dir() -> std::io::Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| std::io::Error::other("Could not find config directory"))?
        .join("dirsync");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_prefers_flag_then_store() {
        let state = TempDir::new().unwrap();
        let saved = TempDir::new().unwrap();
        let flagged = TempDir::new().unwrap();
        let store = Store::open(state.path().join("db")).unwrap();

        assert!(SyncConfig::resolve(&store, None).is_err());

        store.set_root(saved.path()).unwrap();
        let config = SyncConfig::resolve(&store, None).unwrap();
        assert_eq!(config.root, std::fs::canonicalize(saved.path()).unwrap());

        let config = SyncConfig::resolve(&store, Some(flagged.path().to_path_buf())).unwrap();
        assert_eq!(config.root, std::fs::canonicalize(flagged.path()).unwrap());
    }
}
