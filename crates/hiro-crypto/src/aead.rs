//! AES-256-GCM envelope encryption for byte strings.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

/// Required key length in bytes.
pub const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A validated 32-byte AES-256-GCM key.
#[derive(Clone)]
pub struct EncryptionKey(Key<Aes256Gcm>);

impl EncryptionKey {
    /// Decode a base64-encoded key, rejecting anything that is not exactly
    /// 32 bytes after decoding.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .context("encryption key is not valid base64")?;
        if bytes.len() != KEY_LEN {
            anyhow::bail!(
                "encryption key must decode to exactly {KEY_LEN} bytes, got {}",
                bytes.len()
            );
        }
        Ok(Self(Key::<Aes256Gcm>::from_slice(&bytes).to_owned()))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// The persisted ciphertext record: IV, auth tag and ciphertext, each base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub iv: String,
    pub auth_tag: String,
    pub ciphertext: String,
}

/// Seal `plaintext` under a fresh random 96-bit IV.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
    let cipher = Aes256Gcm::new(&key.0);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| anyhow::anyhow!("AEAD encryption failed: {e:?}"))?;
    let auth_tag = sealed.split_off(sealed.len() - TAG_LEN);
    Ok(EncryptedEnvelope {
        iv: BASE64.encode(iv),
        auth_tag: BASE64.encode(auth_tag),
        ciphertext: BASE64.encode(sealed),
    })
}

/// Open an envelope, failing on any tampering with IV, tag or ciphertext.
pub fn decrypt(key: &EncryptionKey, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
    let iv = BASE64
        .decode(&envelope.iv)
        .context("envelope IV is not valid base64")?;
    if iv.len() != IV_LEN {
        anyhow::bail!("envelope IV must be {IV_LEN} bytes, got {}", iv.len());
    }
    let auth_tag = BASE64
        .decode(&envelope.auth_tag)
        .context("envelope auth tag is not valid base64")?;
    let mut sealed = BASE64
        .decode(&envelope.ciphertext)
        .context("envelope ciphertext is not valid base64")?;
    sealed.extend_from_slice(&auth_tag);
    Aes256Gcm::new(&key.0)
        .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
        .map_err(|e| anyhow::anyhow!("AEAD decryption failed: {e:?}"))
}
