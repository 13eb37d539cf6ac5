use iroh::PublicKey;
use sled::{Db, Tree};
use std::path::{Path, PathBuf};

use crate::config::config_dir;

const ROOT_KEY: &[u8] = b"root";
const SERVER_KEY: &[u8] = b"server";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DbError(#[from] sled::Error),
    #[error("Invalid stored value: {0}")]
    EncodingError(#[from] std::string::FromUtf8Error),
    #[error("System error: {0}")]
    SystemError(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Local settings that outlive a single run.
#[derive(Clone)]
pub struct Store {
    settings: Tree,
}

impl Store {
    pub fn new() -> Result<Self> {
        let dir = config_dir().map_err(|e| StoreError::SystemError(e.to_string()))?;
        Self::open(dir.join("db"))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db: Db = sled::open(path)?;
        let settings = db.open_tree("settings")?;
        Ok(Self { settings })
    }

    pub fn set_root<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_str = path.as_ref().to_string_lossy();
        self.settings.insert(ROOT_KEY, path_str.as_bytes())?;
        self.settings.flush()?;
        Ok(())
    }

    pub fn root(&self) -> Result<Option<PathBuf>> {
        Ok(self.get_string(ROOT_KEY)?.map(PathBuf::from))
    }

    pub fn set_server(&self, peer: PublicKey) -> Result<()> {
        self.settings.insert(SERVER_KEY, peer.to_string().as_bytes())?;
        self.settings.flush()?;
        Ok(())
    }

    pub fn server(&self) -> Result<Option<PublicKey>> {
        match self.get_string(SERVER_KEY)? {
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|e| StoreError::SystemError(format!("Invalid stored server id: {}", e))),
            None => Ok(None),
        }
    }

    fn get_string(&self, key: &[u8]) -> Result<Option<String>> {
        match self.settings.get(key)? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes.to_vec())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("db")).unwrap();
        assert_eq!(store.root().unwrap(), None);
        assert!(store.server().unwrap().is_none());

        store.set_root("/srv/shared").unwrap();
        assert_eq!(store.root().unwrap(), Some(PathBuf::from("/srv/shared")));

        let peer = iroh::SecretKey::generate(&mut rand::rng()).public();
        store.set_server(peer).unwrap();
        assert_eq!(store.server().unwrap(), Some(peer));
    }
}
