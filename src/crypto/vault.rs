use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rsa::pkcs8::DecodePrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::crypto::envelope;
use crate::error::{GatewayError, GatewayResult};

/// Vault of per-client RSA key pairs.
///
/// The gateway owns one 2048-bit key pair per allow-listed client, stored as
/// a PKCS#8 PEM file `<client-id>.pem` in the key directory. The public half
/// is handed to the client side for payload encryption; the private half
/// decrypts inbound payloads. Keys are loaded on first use and cached for
/// the process lifetime.
///
/// All failures (unknown client, unreadable or malformed PEM) surface as the
/// same opaque crypto error as a decrypt failure, so a caller cannot probe
/// which client ids have keys.
pub struct KeyVault {
    key_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<RsaPrivateKey>>>,
}

impl KeyVault {
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Decrypt an envelope with the private key of the given client.
    pub async fn decrypt(&self, client_id: &str, bytes: &[u8]) -> GatewayResult<Vec<u8>> {
        let key = self.private_key(client_id).await?;
        envelope::decrypt(&key, bytes)
    }

    /// The public key clients encrypt against.
    pub async fn public_key(&self, client_id: &str) -> GatewayResult<RsaPublicKey> {
        Ok(RsaPublicKey::from(self.private_key(client_id).await?.as_ref()))
    }

    async fn private_key(&self, client_id: &str) -> GatewayResult<Arc<RsaPrivateKey>> {
        if let Some(key) = self.cache.read().await.get(client_id) {
            return Ok(Arc::clone(key));
        }

        // client ids become file names; refuse anything that could escape
        // the key directory
        if client_id.is_empty()
            || !client_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            error!(client_id, "refusing key lookup for unsafe client id");
            return Err(GatewayError::Crypto);
        }

        let path = self.key_dir.join(format!("{}.pem", client_id));
        debug!(path = %path.display(), "loading client key");

        let pem = tokio::fs::read_to_string(&path).await.map_err(|e| {
            error!(client_id, error = %e, "failed to read client key file");
            GatewayError::Crypto
        })?;
        let key = RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| {
            error!(client_id, error = %e, "failed to parse client key file");
            GatewayError::Crypto
        })?;

        let key = Arc::new(key);
        self.cache
            .write()
            .await
            .insert(client_id.to_string(), Arc::clone(&key));
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    async fn vault_with_key(client_id: &str) -> (tempfile::TempDir, KeyVault, RsaPrivateKey) {
        let dir = tempfile::tempdir().unwrap();
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();
        std::fs::write(dir.path().join(format!("{}.pem", client_id)), pem.as_bytes()).unwrap();
        let vault = KeyVault::new(dir.path());
        (dir, vault, private)
    }

    #[tokio::test]
    async fn decrypts_with_client_key() {
        let (_dir, vault, _) = vault_with_key("acme").await;
        let public = vault.public_key("acme").await.unwrap();
        let envelope = envelope::encrypt(&public, b"hello").unwrap();
        assert_eq!(vault.decrypt("acme", &envelope).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn unknown_client_fails_opaquely() {
        let (_dir, vault, _) = vault_with_key("acme").await;
        let err = vault.decrypt("nobody", b"whatever").await.unwrap_err();
        assert!(matches!(err, GatewayError::Crypto));
    }

    #[tokio::test]
    async fn rejects_path_traversal_client_id() {
        let (_dir, vault, _) = vault_with_key("acme").await;
        assert!(vault.decrypt("../acme", b"x").await.is_err());
    }
}
