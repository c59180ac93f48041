//! Token persistence.
//!
//! [`TokenStorage`] is the seam between the OAuth2 lifecycle and wherever
//! credentials live. [`MemoryStorage`] is the per-process default;
//! [`FileStorage`] persists an encrypted JSON document on disk.

mod file;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::auth::TokenRecord;
use crate::error::StorageError;

pub use file::FileStorage;

/// Keyed token persistence with optional per-entry TTL.
///
/// Writes replace the whole record for a key. A `get` after the TTL has
/// passed behaves exactly as if the key were never set.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Fetch the record for `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<TokenRecord>, StorageError>;

    /// Store `record` under `key`, replacing any previous record. With a TTL
    /// the entry disappears once the duration elapses.
    async fn set(
        &self,
        key: &str,
        record: TokenRecord,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    /// Remove the record for `key`. Removing an absent key is not an error.
    async fn clear(&self, key: &str) -> Result<(), StorageError>;
}

struct StoredEntry {
    record: TokenRecord,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(deadline) if Utc::now() >= deadline)
    }
}

/// In-memory token store. Entries live as long as the process; expired
/// entries are pruned lazily on read.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<TokenRecord>, StorageError> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_expired() => true,
                Some(entry) => return Ok(Some(entry.record.clone())),
                None => return Ok(None),
            }
        };
        if expired {
            self.entries.write().remove(key);
            debug!(key, "expired token entry pruned");
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        record: TokenRecord,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let expires_at = ttl.map(|ttl| {
            Utc::now() + chrono::Duration::milliseconds(ttl.as_millis() as i64)
        });
        self.entries
            .write()
            .insert(key.to_string(), StoredEntry { record, expires_at });
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }
}
