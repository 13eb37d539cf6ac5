use iroh::{
    discovery::{dns::DnsDiscovery, mdns::MdnsDiscovery, pkarr::PkarrPublisher},
    Endpoint, SecretKey,
};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

use crate::{config::config_dir, protocol::ALPN};

const SECRET_KEY_FILE: &str = "secret_key";

#[derive(Debug, thiserror::Error)]
pub enum IrohUtilsError {
    #[error("Failed to generate secret key: {0}")]
    SecretKeyGenerationError(String),
    #[error("Failed to load secret key: {0}")]
    SecretKeyLoadError(String),
    #[error("Failed to bind endpoint: {0}")]
    BindError(String),
}

pub type Result<T> = std::result::Result<T, IrohUtilsError>;

fn secret_key_path() -> Result<PathBuf> {
    config_dir()
        .map(|dir| dir.join(SECRET_KEY_FILE))
        .map_err(|e| IrohUtilsError::SecretKeyLoadError(e.to_string()))
}

/// Creates the endpoint key on first run; later runs keep the same identity.
pub async fn init_secret_key() -> Result<()> {
    if load_secret_key().await.is_ok() {
        return Ok(());
    }
    let path = secret_key_path()?;
    let secret_key = SecretKey::generate(&mut rand::rng());
    fs::write(&path, secret_key.to_bytes())
        .await
        .map_err(|e| IrohUtilsError::SecretKeyGenerationError(e.to_string()))?;
    info!("Generated endpoint key at {:?}", path);
    Ok(())
}

pub async fn load_secret_key() -> Result<SecretKey> {
    let sk_vec = fs::read(secret_key_path()?)
        .await
        .map_err(|e| IrohUtilsError::SecretKeyLoadError(e.to_string()))?;
    let sk_bytes: [u8; 32] = sk_vec
        .as_slice()
        .try_into()
        .map_err(|_| IrohUtilsError::SecretKeyLoadError("Invalid secret key length".to_string()))?;
    Ok(SecretKey::from_bytes(&sk_bytes))
}

/// Binds an endpoint speaking the dirsync ALPN, discoverable by its id.
pub async fn bind_endpoint() -> Result<Endpoint> {
    let secret_key = load_secret_key().await?;
    Endpoint::builder()
        .discovery(PkarrPublisher::n0_dns())
        .discovery(DnsDiscovery::n0_dns())
        .discovery(MdnsDiscovery::builder())
        .secret_key(secret_key)
        .alpns(vec![ALPN.to_vec()])
        .bind()
        .await
        .map_err(|e| IrohUtilsError::BindError(e.to_string()))
}
