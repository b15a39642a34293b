//! LMDB-backed distributed tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! store shared by every process on one host.
//!
//! # Value Format
//!
//! `[cached_at millis: 8 bytes LE][content_type_id: 4 bytes LE][node bytes]`
//!
//! The content type id sits in front of the opaque node bytes so a whole
//! content type can be removed with a key-prefix scan and no decoding.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and range scans
//! - Write transactions for `put`, `remove` and `remove_content_type`
//! - Statistics are kept behind an `RwLock`

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_core::{CacheError, ContentTypeId, EntityKind};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};

use super::key::NodeCacheKey;
use super::traits::{CacheStats, DistributedCache, DistributedEntry};

/// Bytes in front of the node payload.
const VALUE_HEADER_LEN: usize = 12;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Transaction(reason) => CacheError::TransactionFailed { reason },
            other => CacheError::TierUnavailable {
                reason: other.to_string(),
            },
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB distributed tier.
///
/// ```ignore
/// use folio_cache::hybrid::{LmdbDistributedCache, NodeCacheKey};
///
/// let tier = LmdbDistributedCache::new("/var/cache/folio", 1024)?;
/// tier.put(&NodeCacheKey::published(kind, key), &entry).await?;
/// let cached = tier.get(&NodeCacheKey::published(kind, key)).await?;
/// ```
pub struct LmdbDistributedCache {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    stats: Arc<RwLock<CacheStats>>,
}

impl std::fmt::Debug for LmdbDistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbDistributedCache")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

impl LmdbDistributedCache {
    /// Open (or create) the store under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        let mut entry_count = 0u64;
        let mut memory_bytes = 0u64;
        for result in db.iter(&wtxn).map_err(txn_error)? {
            let (_, value) = result.map_err(txn_error)?;
            entry_count += 1;
            memory_bytes += value.len() as u64;
        }
        wtxn.commit().map_err(txn_error)?;

        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats {
                entry_count,
                memory_bytes,
                ..CacheStats::default()
            })),
        })
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    fn encode_value(entry: &DistributedEntry) -> Vec<u8> {
        let mut value = Vec::with_capacity(VALUE_HEADER_LEN + entry.bytes.len());
        value.extend_from_slice(&entry.cached_at.timestamp_millis().to_le_bytes());
        value.extend_from_slice(&entry.content_type_id.to_le_bytes());
        value.extend_from_slice(&entry.bytes);
        value
    }

    /// Split a stored value. `None` if it is too short to carry the header.
    fn decode_value(value: &[u8]) -> Option<DistributedEntry> {
        let content_type_id = value_content_type(value)?;
        let millis_bytes: [u8; 8] = value.get(0..8)?.try_into().ok()?;
        let cached_at = DateTime::from_timestamp_millis(i64::from_le_bytes(millis_bytes))
            .unwrap_or_else(Utc::now);
        Some(DistributedEntry {
            content_type_id,
            cached_at,
            bytes: value[VALUE_HEADER_LEN..].to_vec(),
        })
    }

    /// Keys under `prefix` whose value belongs to `content_type_id`, with
    /// the size of each value.
    fn collect_content_type_keys(
        &self,
        txn: &RoTxn<'_>,
        prefix: &[u8],
        content_type_id: ContentTypeId,
    ) -> Result<Vec<(Vec<u8>, u64)>, LmdbCacheError> {
        let mut keys = Vec::new();
        for result in self.db.prefix_iter(txn, prefix).map_err(txn_error)? {
            let (key, value) = result.map_err(txn_error)?;
            if value_content_type(value) == Some(content_type_id) {
                keys.push((key.to_vec(), value.len() as u64));
            }
        }
        Ok(keys)
    }
}

fn value_content_type(value: &[u8]) -> Option<ContentTypeId> {
    let bytes: [u8; 4] = value.get(8..VALUE_HEADER_LEN)?.try_into().ok()?;
    Some(ContentTypeId::from_le_bytes(bytes))
}

#[async_trait]
impl DistributedCache for LmdbDistributedCache {
    async fn get(&self, key: &NodeCacheKey) -> Result<Option<DistributedEntry>, CacheError> {
        let encoded_key = key.encode();
        let rtxn = self.env.read_txn().map_err(txn_error)?;

        match self.db.get(&rtxn, &encoded_key) {
            Ok(Some(value)) => match Self::decode_value(value) {
                Some(entry) => {
                    self.record(|s| s.hits += 1);
                    Ok(Some(entry))
                }
                None => {
                    tracing::warn!(key = %key, len = value.len(), "Stored value too short, treating as miss");
                    self.record(|s| s.misses += 1);
                    Ok(None)
                }
            },
            Ok(None) => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
            Err(e) => {
                self.record(|s| s.misses += 1);
                Err(txn_error(e).into())
            }
        }
    }

    async fn put(&self, key: &NodeCacheKey, entry: &DistributedEntry) -> Result<(), CacheError> {
        let encoded_key = key.encode();
        let value = Self::encode_value(entry);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let previous = self
            .db
            .get(&wtxn, &encoded_key)
            .map_err(txn_error)?
            .map(|old| old.len() as u64);
        self.db
            .put(&mut wtxn, &encoded_key, &value)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        self.record(|s| {
            match previous {
                Some(old_len) => s.memory_bytes = s.memory_bytes.saturating_sub(old_len),
                None => s.entry_count += 1,
            }
            s.memory_bytes += value.len() as u64;
        });
        Ok(())
    }

    async fn remove(&self, key: &NodeCacheKey) -> Result<bool, CacheError> {
        let encoded_key = key.encode();

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let previous = self
            .db
            .get(&wtxn, &encoded_key)
            .map_err(txn_error)?
            .map(|old| old.len() as u64);
        let deleted = self.db.delete(&mut wtxn, &encoded_key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if deleted {
            let freed = previous.unwrap_or(0);
            self.record(|s| {
                s.entry_count = s.entry_count.saturating_sub(1);
                s.memory_bytes = s.memory_bytes.saturating_sub(freed);
                s.evictions += 1;
            });
        }
        Ok(deleted)
    }

    async fn remove_content_type(
        &self,
        kind: EntityKind,
        content_type_id: ContentTypeId,
    ) -> Result<u64, CacheError> {
        let prefix = NodeCacheKey::kind_prefix(kind);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let keys_to_delete = self.collect_content_type_keys(&wtxn, &prefix, content_type_id)?;
        let mut deleted = 0u64;
        let mut freed = 0u64;
        for (key, len) in &keys_to_delete {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
                freed += len;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        self.record(|s| {
            s.entry_count = s.entry_count.saturating_sub(deleted);
            s.memory_bytes = s.memory_bytes.saturating_sub(freed);
            s.evictions += deleted;
        });
        Ok(deleted)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}
