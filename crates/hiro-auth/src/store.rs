//! Encrypted-at-rest token store.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tracing::debug;

use hiro_crypto::{decrypt, encrypt, EncryptedEnvelope, EncryptionKey};
use hiro_types::{Config, TokenRecord};

/// Per-user persistent map from caller id to OAuth token record.
///
/// The backing file is read lazily on first access and cached for the life
/// of the process. A missing file is an empty store; a record that fails to
/// decrypt is a hard error for that user, since it indicates tampering with
/// the stored credentials.
pub struct TokenStore {
    path: PathBuf,
    key: EncryptionKey,
    entries: Mutex<Option<HashMap<String, EncryptedEnvelope>>>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>, key: EncryptionKey) -> Self {
        Self {
            path: path.into(),
            key,
            entries: Mutex::new(None),
        }
    }

    /// Build the store from configuration, validating the AEAD key.
    pub fn from_config(config: &Config) -> Result<Self> {
        let key = EncryptionKey::from_base64(config.token_encryption_key.expose_secret())
            .context("TOKEN_ENCRYPTION_KEY is invalid")?;
        Ok(Self::new(config.token_store_path.clone(), key))
    }

    /// Fetch and decrypt the record for `user_id`.
    pub async fn get(&self, user_id: &str) -> Result<Option<TokenRecord>> {
        let mut entries = self.entries.lock().await;
        let map = self.loaded(&mut entries).await?;
        let Some(envelope) = map.get(user_id) else {
            return Ok(None);
        };
        let plaintext = decrypt(&self.key, envelope)
            .with_context(|| format!("token record for '{user_id}' failed to decrypt"))?;
        let record = serde_json::from_slice(&plaintext)
            .with_context(|| format!("token record for '{user_id}' is malformed"))?;
        Ok(Some(record))
    }

    /// Encrypt and persist the record for `user_id`.
    pub async fn put(&self, user_id: &str, record: &TokenRecord) -> Result<()> {
        let plaintext = serde_json::to_vec(record).context("failed to serialize token record")?;
        let envelope = encrypt(&self.key, &plaintext)?;
        let mut entries = self.entries.lock().await;
        let map = self.loaded(&mut entries).await?;
        map.insert(user_id.to_string(), envelope);
        self.persist(map).await
    }

    /// Remove the record for `user_id`; returns whether one existed.
    pub async fn delete(&self, user_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let map = self.loaded(&mut entries).await?;
        if map.remove(user_id).is_none() {
            return Ok(false);
        }
        self.persist(map).await?;
        Ok(true)
    }

    async fn loaded<'a>(
        &self,
        entries: &'a mut Option<HashMap<String, EncryptedEnvelope>>,
    ) -> Result<&'a mut HashMap<String, EncryptedEnvelope>> {
        if entries.is_none() {
            let map = match tokio::fs::read(&self.path).await {
                Ok(raw) => serde_json::from_slice(&raw).with_context(|| {
                    format!("token store {} is not valid JSON", self.path.display())
                })?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "token store file absent, starting empty");
                    HashMap::new()
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to read token store {}", self.path.display())
                    })
                }
            };
            *entries = Some(map);
        }
        Ok(entries.as_mut().expect("entries populated above"))
    }

    async fn persist(&self, map: &HashMap<String, EncryptedEnvelope>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create token store directory {}", parent.display())
                })?;
            }
        }
        let payload = serde_json::to_vec_pretty(map).context("failed to serialize token store")?;
        tokio::fs::write(&self.path, payload)
            .await
            .with_context(|| format!("failed to write token store {}", self.path.display()))
    }
}
