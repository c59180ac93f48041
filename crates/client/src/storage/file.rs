//! File-backed token storage with per-value encryption.
//!
//! All keys share one JSON document on disk. Each token record is encrypted
//! individually with AES-256-GCM under a fresh random nonce and stored as
//! `hex(nonce):hex(ciphertext)`; TTL deadlines ride alongside as plain
//! `"<key>_expires"` millisecond timestamps.
//!
//! The default key is derived deterministically from the storage path and
//! platform, which is obfuscation at rest, not protection against an
//! attacker who can read this code. Use [`FileStorage::with_passphrase`] for
//! a real secret.
//!
//! Mutations within one process are serialized through an instance mutex and
//! land via a temp-file rename, so readers always see a complete document.
//! There is no cross-process locking; concurrent writers from separate
//! processes can lose updates.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::auth::TokenRecord;
use crate::error::StorageError;

use super::TokenStorage;

const NONCE_LEN: usize = 12;

/// Encrypted JSON-document token store.
pub struct FileStorage {
    path: PathBuf,
    cipher: Option<Aes256Gcm>,
    /// Serializes read-modify-write cycles within this process.
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStorage {
    /// Open (or lazily create) an encrypted store at `path`, with the key
    /// derived from the path and platform.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = expand_tilde(path.as_ref());
        let key = derive_default_key(&path);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self { path, cipher: Some(cipher), write_lock: tokio::sync::Mutex::new(()) }
    }

    /// An unencrypted store. Records are written as readable JSON.
    #[must_use]
    pub fn plaintext(path: impl AsRef<Path>) -> Self {
        Self {
            path: expand_tilde(path.as_ref()),
            cipher: None,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// An encrypted store whose key is derived from `passphrase` with
    /// Argon2id. The salt comes from the storage path, so reopening the same
    /// file with the same passphrase reproduces the key.
    ///
    /// # Errors
    /// Returns [`StorageError::Encrypt`] if key derivation fails.
    pub fn with_passphrase(
        path: impl AsRef<Path>,
        passphrase: &str,
    ) -> Result<Self, StorageError> {
        let path = expand_tilde(path.as_ref());
        let salt_digest = Sha256::digest(path.to_string_lossy().as_bytes());
        let mut key = [0u8; 32];
        argon2::Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt_digest[..16], &mut key)
            .map_err(|e| StorageError::Encrypt(format!("passphrase key derivation failed: {e}")))?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Ok(Self { path, cipher: Some(cipher), write_lock: tokio::sync::Mutex::new(()) })
    }

    /// The conventional per-user location for the token document.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("riptide")
            .join("tokens.json")
    }

    /// Where this store reads and writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Map<String, Value>, StorageError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "reading {}: {e}",
                    self.path.display()
                )))
            }
        };
        match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token document unreadable, treating as empty");
                Ok(Map::new())
            }
        }
    }

    async fn write_document(&self, doc: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(format!("creating {}: {e}", parent.display())))?;
            #[cfg(unix)]
            set_permissions(parent, 0o700).await?;
        }

        let serialized = serde_json::to_string_pretty(doc)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        // Write to a sibling temp file and rename it into place, so a reader
        // never observes a partially written document.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serialized)
            .await
            .map_err(|e| StorageError::Io(format!("writing {}: {e}", tmp.display())))?;
        #[cfg(unix)]
        set_permissions(&tmp, 0o600).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::Io(format!("renaming into {}: {e}", self.path.display())))?;
        Ok(())
    }

    fn encode_record(&self, record: &TokenRecord) -> Result<Value, StorageError> {
        match &self.cipher {
            None => serde_json::to_value(record)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            Some(cipher) => {
                let plaintext = serde_json::to_vec(record)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                let mut nonce_bytes = [0u8; NONCE_LEN];
                rand::thread_rng().fill_bytes(&mut nonce_bytes);
                let ciphertext = cipher
                    .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
                    .map_err(|e| StorageError::Encrypt(e.to_string()))?;
                Ok(Value::String(format!(
                    "{}:{}",
                    hex::encode(nonce_bytes),
                    hex::encode(ciphertext)
                )))
            }
        }
    }

    /// Decode one stored value. Malformed framing degrades to `None`;
    /// well-formed ciphertext that fails AEAD verification is the distinct
    /// key-mismatch error.
    fn decode_record(&self, key: &str, value: &Value) -> Result<Option<TokenRecord>, StorageError> {
        match &self.cipher {
            None => match serde_json::from_value::<TokenRecord>(value.clone()) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(key, error = %e, "stored record unparseable, treating as absent");
                    Ok(None)
                }
            },
            Some(cipher) => {
                let Some(raw) = value.as_str() else {
                    warn!(key, "stored value is not ciphertext, treating as absent");
                    return Ok(None);
                };
                let Some((nonce_hex, ct_hex)) = raw.split_once(':') else {
                    warn!(key, "malformed ciphertext framing, treating as absent");
                    return Ok(None);
                };
                let (Ok(nonce), Ok(ciphertext)) = (hex::decode(nonce_hex), hex::decode(ct_hex))
                else {
                    warn!(key, "ciphertext is not valid hex, treating as absent");
                    return Ok(None);
                };
                if nonce.len() != NONCE_LEN {
                    warn!(key, nonce_len = nonce.len(), "bad nonce length, treating as absent");
                    return Ok(None);
                }
                let plaintext = cipher
                    .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                    .map_err(|_| StorageError::Decrypt { key: key.to_string() })?;
                match serde_json::from_slice::<TokenRecord>(&plaintext) {
                    Ok(record) => Ok(Some(record)),
                    Err(e) => {
                        warn!(key, error = %e, "decrypted record unparseable, treating as absent");
                        Ok(None)
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TokenStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<TokenRecord>, StorageError> {
        let doc = self.read_document().await?;

        if let Some(deadline) = doc.get(&expiry_key(key)).and_then(Value::as_i64) {
            if Utc::now().timestamp_millis() >= deadline {
                debug!(key, "stored entry past its TTL");
                return Ok(None);
            }
        }

        match doc.get(key) {
            Some(value) => self.decode_record(key, value),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        record: TokenRecord,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        prune_expired(&mut doc);
        doc.insert(key.to_string(), self.encode_record(&record)?);
        match ttl {
            Some(ttl) => {
                let deadline = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
                doc.insert(expiry_key(key), Value::from(deadline));
            }
            None => {
                doc.remove(&expiry_key(key));
            }
        }
        self.write_document(&doc).await?;
        debug!(key, path = %self.path.display(), "token record persisted");
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        let removed = doc.remove(key).is_some();
        doc.remove(&expiry_key(key));
        let pruned = prune_expired(&mut doc);
        if removed || pruned {
            self.write_document(&doc).await?;
            debug!(key, "token record cleared");
        }
        Ok(())
    }
}

fn expiry_key(key: &str) -> String {
    format!("{key}_expires")
}

/// Drop entries whose TTL deadline has passed, along with their markers.
/// Returns whether anything was removed.
fn prune_expired(doc: &mut Map<String, Value>) -> bool {
    let now = Utc::now().timestamp_millis();
    let dead: Vec<String> = doc
        .iter()
        .filter_map(|(key, value)| {
            let base = key.strip_suffix("_expires")?;
            (value.as_i64()? <= now).then(|| base.to_string())
        })
        .collect();
    for base in &dead {
        doc.remove(base);
        doc.remove(&expiry_key(base));
    }
    !dead.is_empty()
}

/// Deterministic default key: sha256 over a path- and platform-salted label.
fn derive_default_key(path: &Path) -> [u8; 32] {
    let material = format!("riptide-{}-{}", path.display(), std::env::consts::OS);
    Sha256::digest(material.as_bytes()).into()
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

#[cfg(unix)]
async fn set_permissions(path: &Path, mode: u32) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| StorageError::Io(format!("chmod {}: {e}", path.display())))
}
