//! Plugin seams of the two-tier cache.
//!
//! The cache framework talks to three collaborators: a value serializer
//! that turns nodes into bytes, a distributed tier that stores those bytes
//! for every application instance, and the source of truth that rebuilds a
//! node when neither tier has it.

use async_trait::async_trait;
use folio_core::{
    CacheError, CodecError, ContentSnapshot, ContentTypeId, EntityKind, NodeKey, Timestamp,
};
use std::fmt;

use super::key::NodeCacheKey;

/// Value-serializer plugin contract of the cache framework.
///
/// `deserialize` never fails loudly: unreadable bytes are logged by the
/// implementation and reported as `None`, which the cache treats as a miss.
pub trait CacheValueSerializer<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn deserialize(&self, bytes: &[u8]) -> Option<T>;
}

/// One value stored in the distributed tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedEntry {
    /// Content type of the node, kept outside the opaque bytes so a whole
    /// content type can be dropped without decoding anything.
    pub content_type_id: ContentTypeId,
    pub cached_at: Timestamp,
    pub bytes: Vec<u8>,
}

/// Shared cache tier reachable by every application instance.
///
/// Implementations must be safe for concurrent use. Values are opaque.
#[async_trait]
pub trait DistributedCache: Send + Sync + fmt::Debug {
    async fn get(&self, key: &NodeCacheKey) -> Result<Option<DistributedEntry>, CacheError>;

    /// Store a value, replacing any previous one.
    async fn put(&self, key: &NodeCacheKey, entry: &DistributedEntry) -> Result<(), CacheError>;

    /// Remove a value. Returns whether one was present.
    async fn remove(&self, key: &NodeCacheKey) -> Result<bool, CacheError>;

    /// Remove every value of one content type, in both views.
    async fn remove_content_type(
        &self,
        kind: EntityKind,
        content_type_id: ContentTypeId,
    ) -> Result<u64, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Source of truth consulted when neither tier holds a node.
#[async_trait]
pub trait ContentNodeSource: Send + Sync {
    /// Load the current snapshot of a node, or `None` if it no longer exists.
    async fn load(&self, kind: EntityKind, key: NodeKey) -> Result<Option<ContentSnapshot>, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate stored size in bytes.
    pub memory_bytes: u64,
    /// Number of evictions due to capacity, age or invalidation.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
