//! In-process distributed tier, for tests and single-instance deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use folio_core::{CacheError, ContentTypeId, EntityKind};
use std::sync::atomic::{AtomicU64, Ordering};

use super::key::NodeCacheKey;
use super::traits::{CacheStats, DistributedCache, DistributedEntry};

/// Distributed tier kept in a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryDistributedCache {
    entries: DashMap<NodeCacheKey, DistributedEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryDistributedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &NodeCacheKey) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &NodeCacheKey) -> Result<Option<DistributedEntry>, CacheError> {
        let entry = self.entries.get(key).map(|e| e.value().clone());
        let counter = if entry.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(entry)
    }

    async fn put(&self, key: &NodeCacheKey, entry: &DistributedEntry) -> Result<(), CacheError> {
        self.entries.insert(*key, entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &NodeCacheKey) -> Result<bool, CacheError> {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn remove_content_type(
        &self,
        kind: EntityKind,
        content_type_id: ContentTypeId,
    ) -> Result<u64, CacheError> {
        let mut removed = 0u64;
        self.entries.retain(|key, entry| {
            let keep = key.kind() != kind || entry.content_type_id != content_type_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        self.evictions.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            memory_bytes: self.entries.iter().map(|e| e.bytes.len() as u64).sum(),
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn entry(content_type_id: ContentTypeId) -> DistributedEntry {
        DistributedEntry {
            content_type_id,
            cached_at: Utc::now(),
            bytes: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let tier = InMemoryDistributedCache::new();
        let key = NodeCacheKey::published(EntityKind::Document, Uuid::new_v4());

        assert!(tier.get(&key).await.expect("get should succeed").is_none());
        let stored = entry(1);
        tier.put(&key, &stored).await.expect("put should succeed");
        assert_eq!(tier.get(&key).await.expect("get should succeed"), Some(stored));
        assert!(tier.remove(&key).await.expect("remove should succeed"));
        assert!(tier.is_empty());

        let stats = tier.stats().await.expect("stats should succeed");
        assert_eq!((stats.hits, stats.misses, stats.evictions), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_remove_content_type_is_scoped_by_kind() {
        let tier = InMemoryDistributedCache::new();
        let doc = NodeCacheKey::published(EntityKind::Document, Uuid::new_v4());
        let doc_preview = NodeCacheKey::preview(doc.kind(), doc.node_key());
        let other = NodeCacheKey::published(EntityKind::Document, Uuid::new_v4());
        let media = NodeCacheKey::published(EntityKind::Media, Uuid::new_v4());

        tier.put(&doc, &entry(10)).await.expect("put should succeed");
        tier.put(&doc_preview, &entry(10)).await.expect("put should succeed");
        tier.put(&other, &entry(11)).await.expect("put should succeed");
        tier.put(&media, &entry(10)).await.expect("put should succeed");

        let removed = tier
            .remove_content_type(EntityKind::Document, 10)
            .await
            .expect("remove_content_type should succeed");
        assert_eq!(removed, 2);
        assert!(tier.contains(&other));
        assert!(tier.contains(&media));
    }
}
