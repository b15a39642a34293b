//! Two-tier node cache.
//!
//! The local tier is a concurrent in-process map bounded by capacity and
//! age. The distributed tier is shared by every application instance and
//! holds encoded nodes. The source of truth rebuilds a node when neither
//! tier can produce it.
//!
//! Each local entry moves through
//! `Absent -> Populating -> Present -> Stale -> Populating -> Present`, and
//! to `Evicted` on invalidation. Exactly one caller claims a population or
//! rebuild; concurrent readers of a stale entry keep getting the old node
//! until the rebuild lands, and readers of a populating entry wait for it.

use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use folio_core::{
    CacheSettings, ContentSnapshot, ContentTypeId, EntityKind, FolioResult, HybridCacheSettings,
};
use tokio::sync::Notify;

use super::key::NodeCacheKey;
use super::lmdb::{LmdbCacheError, LmdbDistributedCache};
use super::memory::InMemoryDistributedCache;
use super::serializer::HybridCacheSerializer;
use super::traits::{CacheStats, CacheValueSerializer, ContentNodeSource, DistributedCache, DistributedEntry};
use crate::builder::ContentDataBuilder;
use crate::intern::Interner;
use crate::node::ContentCacheNode;

/// Observable state of one local entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Nothing cached locally.
    Absent,
    /// A caller is loading or rebuilding the node.
    Populating,
    /// A current node is cached.
    Present,
    /// The cached node is outdated or expired and will be rebuilt on next read.
    Stale,
    /// The node was invalidated and will be reloaded on next read.
    Evicted,
}

/// Statistics of both tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HybridCacheStats {
    pub local: CacheStats,
    pub distributed: CacheStats,
}

#[derive(Debug)]
enum Slot {
    Populating,
    Ready {
        node: Arc<ContentCacheNode>,
        stale: bool,
        refreshing: bool,
    },
    Evicted,
}

#[derive(Debug)]
struct LocalEntry {
    slot: Slot,
    /// Changes whenever the entry is replaced, so a late loader cannot
    /// overwrite a newer value.
    generation: u64,
    /// Set when the entry is marked stale while a load or rebuild is in
    /// flight. The loaded node is installed as stale.
    invalidated: bool,
    stored_at: Instant,
}

enum Claim {
    Hit(Arc<ContentCacheNode>),
    Wait,
    Populate(u64),
    Refresh {
        node: Arc<ContentCacheNode>,
        generation: u64,
        from_source: bool,
    },
}

/// Open the distributed tier described by `settings`: LMDB when a path is
/// configured, in-memory otherwise.
pub fn open_distributed(settings: &HybridCacheSettings) -> Result<Arc<dyn DistributedCache>, LmdbCacheError> {
    let tier: Arc<dyn DistributedCache> = match &settings.distributed_path {
        Some(path) => Arc::new(LmdbDistributedCache::new(path, settings.distributed_max_size_mb)?),
        None => Arc::new(InMemoryDistributedCache::new()),
    };
    Ok(tier)
}

/// Two-tier cache of [`ContentCacheNode`]s.
pub struct HybridCache {
    local: DashMap<NodeCacheKey, LocalEntry>,
    distributed: Arc<dyn DistributedCache>,
    source: Arc<dyn ContentNodeSource>,
    serializer: HybridCacheSerializer,
    builder: ContentDataBuilder,
    capacity: usize,
    ttl: Duration,
    generation: AtomicU64,
    populated: Notify,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for HybridCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCache")
            .field("local_entries", &self.local.len())
            .field("distributed", &self.distributed)
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl HybridCache {
    pub fn new(
        settings: &HybridCacheSettings,
        serializer: HybridCacheSerializer,
        builder: ContentDataBuilder,
        distributed: Arc<dyn DistributedCache>,
        source: Arc<dyn ContentNodeSource>,
    ) -> Self {
        Self {
            local: DashMap::new(),
            distributed,
            source,
            serializer,
            builder,
            capacity: settings.local_capacity.max(1),
            ttl: settings.local_ttl(),
            generation: AtomicU64::new(0),
            populated: Notify::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_settings(
        settings: &CacheSettings,
        interner: Arc<dyn Interner>,
        distributed: Arc<dyn DistributedCache>,
        source: Arc<dyn ContentNodeSource>,
    ) -> Self {
        Self::new(
            &settings.hybrid,
            HybridCacheSerializer::from_settings(settings, Arc::clone(&interner)),
            ContentDataBuilder::new(interner),
            distributed,
            source,
        )
    }

    pub fn serializer(&self) -> &HybridCacheSerializer {
        &self.serializer
    }

    /// Cached node for `key`, loading it from the distributed tier or the
    /// source of truth on a miss. `None` when the node does not exist in the
    /// requested view.
    pub async fn get_or_load(&self, key: &NodeCacheKey) -> FolioResult<Option<Arc<ContentCacheNode>>> {
        loop {
            let mut notified = pin!(self.populated.notified());
            notified.as_mut().enable();

            match self.claim(key) {
                Claim::Hit(node) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "Local tier hit");
                    return Ok(Some(node));
                }
                Claim::Wait => {
                    notified.await;
                }
                Claim::Populate(generation) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "Local tier miss");
                    let guard = ClaimGuard::new(self, *key, generation, false);
                    return match self.load(key, generation).await {
                        Ok(loaded) => Ok(guard.complete(loaded)),
                        Err(e) => Err(e),
                    };
                }
                Claim::Refresh {
                    node,
                    generation,
                    from_source,
                } => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, from_source, "Rebuilding stale entry");
                    let guard = ClaimGuard::new(self, *key, generation, true);
                    let loaded = if from_source {
                        self.rebuild_from_source(key, generation).await
                    } else {
                        self.load(key, generation).await
                    };
                    return match loaded {
                        Ok(loaded) => Ok(guard.complete(loaded)),
                        Err(e) => {
                            tracing::warn!(error = %e, key = %key, "Rebuild failed, serving stale node");
                            Ok(Some(node))
                        }
                    };
                }
            }
        }
    }

    /// Build both views of `snapshot` and write them through to both tiers,
    /// replacing whatever was cached.
    pub async fn set(&self, snapshot: &ContentSnapshot) -> FolioResult<()> {
        let preview_key = NodeCacheKey::preview(snapshot.kind, snapshot.key);
        let preview = self.node_from_snapshot(snapshot, true)?;
        self.write_through(&preview_key, preview).await?;

        let published_key = NodeCacheKey::published(snapshot.kind, snapshot.key);
        if snapshot.published.is_some() {
            let published = self.node_from_snapshot(snapshot, false)?;
            self.write_through(&published_key, published).await?;
        } else {
            self.evict(&published_key).await?;
        }
        Ok(())
    }

    /// Flag a cached node as outdated. It keeps being served until the next
    /// reader rebuilds it from the source of truth. A node that is being
    /// loaded or rebuilt lands stale. Returns whether a node was cached or
    /// loading.
    pub fn mark_stale(&self, key: &NodeCacheKey) -> bool {
        let Some(mut entry) = self.local.get_mut(key) else {
            return false;
        };
        let entry = &mut *entry;
        match &mut entry.slot {
            Slot::Ready {
                stale, refreshing, ..
            } => {
                *stale = true;
                if *refreshing {
                    entry.invalidated = true;
                }
                true
            }
            Slot::Populating => {
                entry.invalidated = true;
                true
            }
            Slot::Evicted => false,
        }
    }

    /// Drop a node from both tiers. The local entry becomes a tombstone.
    pub async fn evict(&self, key: &NodeCacheKey) -> FolioResult<bool> {
        let local = match self.local.get_mut(key) {
            Some(mut entry) => {
                let was_ready = matches!(entry.slot, Slot::Ready { .. });
                entry.slot = Slot::Evicted;
                entry.generation = self.next_generation();
                was_ready
            }
            None => false,
        };
        if local {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.populated.notify_waiters();

        let remote = self.distributed.remove(key).await?;
        tracing::debug!(key = %key, local, remote, "Evicted node");
        Ok(local || remote)
    }

    /// Drop every node of one content type from both tiers. Returns the
    /// number of distributed entries removed.
    pub async fn evict_content_type(
        &self,
        kind: EntityKind,
        content_type_id: ContentTypeId,
    ) -> FolioResult<u64> {
        let mut local = 0u64;
        for mut entry in self.local.iter_mut() {
            if entry.key().kind() != kind {
                continue;
            }
            // The content type of a node still loading is unknown, so every
            // load of this kind is cancelled.
            let (matches, cached) = match &entry.slot {
                Slot::Ready { node, .. } => (node.content_type_id() == content_type_id, true),
                Slot::Populating => (true, false),
                Slot::Evicted => (false, false),
            };
            if matches {
                entry.slot = Slot::Evicted;
                entry.generation = self.next_generation();
                if cached {
                    local += 1;
                }
            }
        }
        self.evictions.fetch_add(local, Ordering::Relaxed);
        self.populated.notify_waiters();

        let remote = self.distributed.remove_content_type(kind, content_type_id).await?;
        tracing::debug!(%kind, content_type_id, local, remote, "Evicted content type");
        Ok(remote)
    }

    pub fn entry_state(&self, key: &NodeCacheKey) -> EntryState {
        let Some(entry) = self.local.get(key) else {
            return EntryState::Absent;
        };
        match &entry.slot {
            Slot::Populating => EntryState::Populating,
            Slot::Evicted => EntryState::Evicted,
            Slot::Ready { refreshing: true, .. } => EntryState::Populating,
            Slot::Ready { stale, .. } => {
                if *stale || self.expired(entry.stored_at) {
                    EntryState::Stale
                } else {
                    EntryState::Present
                }
            }
        }
    }

    pub async fn stats(&self) -> FolioResult<HybridCacheStats> {
        let mut entry_count = 0u64;
        let mut memory_bytes = 0u64;
        for entry in self.local.iter() {
            if let Slot::Ready { node, .. } = &entry.slot {
                entry_count += 1;
                memory_bytes += [node.state(false), node.state(true)]
                    .into_iter()
                    .flatten()
                    .map(|s| s.payload.len() as u64)
                    .sum::<u64>();
            }
        }

        Ok(HybridCacheStats {
            local: CacheStats {
                hits: self.hits.load(Ordering::Relaxed),
                misses: self.misses.load(Ordering::Relaxed),
                entry_count,
                memory_bytes,
                evictions: self.evictions.load(Ordering::Relaxed),
            },
            distributed: self.distributed.stats().await?,
        })
    }

    // ------------------------------------------------------------------------

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn expired(&self, stored_at: Instant) -> bool {
        stored_at.elapsed() >= self.ttl
    }

    fn claim(&self, key: &NodeCacheKey) -> Claim {
        match self.local.entry(*key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let expired = self.expired(entry.stored_at);
                match &mut entry.slot {
                    Slot::Populating => Claim::Wait,
                    Slot::Evicted => {
                        let generation = self.next_generation();
                        entry.slot = Slot::Populating;
                        entry.generation = generation;
                        entry.invalidated = false;
                        Claim::Populate(generation)
                    }
                    Slot::Ready {
                        node,
                        stale,
                        refreshing,
                    } => {
                        if (*stale || expired) && !*refreshing {
                            *refreshing = true;
                            entry.invalidated = false;
                            Claim::Refresh {
                                node: Arc::clone(node),
                                generation: entry.generation,
                                from_source: *stale,
                            }
                        } else {
                            Claim::Hit(Arc::clone(node))
                        }
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let generation = self.next_generation();
                vacant.insert(LocalEntry {
                    slot: Slot::Populating,
                    generation,
                    invalidated: false,
                    stored_at: Instant::now(),
                });
                Claim::Populate(generation)
            }
        }
    }

    /// Distributed tier first, then the source of truth. A distributed entry
    /// that cannot be decoded is removed and rebuilt.
    async fn load(&self, key: &NodeCacheKey, generation: u64) -> FolioResult<Option<ContentCacheNode>> {
        if let Some(entry) = self.distributed.get(key).await? {
            if let Some(node) = self.serializer.deserialize(&entry.bytes) {
                tracing::debug!(key = %key, "Distributed tier hit");
                return Ok(Some(node));
            }
            tracing::warn!(key = %key, "Dropping unreadable distributed entry");
            self.distributed.remove(key).await?;
        }
        self.rebuild_from_source(key, generation).await
    }

    /// Rebuild from the source of truth. The distributed tier is only
    /// touched while the claim `generation` is still current, and a write
    /// that races an eviction or a newer value is undone.
    async fn rebuild_from_source(
        &self,
        key: &NodeCacheKey,
        generation: u64,
    ) -> FolioResult<Option<ContentCacheNode>> {
        let snapshot = self.source.load(key.kind(), key.node_key()).await?;
        let snapshot = match snapshot {
            Some(snapshot) if key.is_preview() || snapshot.published.is_some() => snapshot,
            _ => {
                tracing::debug!(key = %key, "Node absent from source of truth");
                if self.owns_claim(key, generation) {
                    self.distributed.remove(key).await?;
                }
                return Ok(None);
            }
        };

        let node = self.node_from_snapshot(&snapshot, key.is_preview())?;
        if !self.owns_claim(key, generation) {
            tracing::debug!(key = %key, "Claim superseded, skipping distributed write");
            return Ok(Some(node));
        }
        self.write_distributed(key, &node).await?;
        if !self.owns_claim(key, generation) {
            tracing::debug!(key = %key, "Claim superseded during write, undoing it");
            self.distributed.remove(key).await?;
        }
        Ok(Some(node))
    }

    /// Whether the claim `generation` still holds the entry and nothing
    /// invalidated it meanwhile.
    fn owns_claim(&self, key: &NodeCacheKey, generation: u64) -> bool {
        self.local
            .get(key)
            .is_some_and(|entry| entry.generation == generation && !entry.invalidated)
    }

    fn node_from_snapshot(&self, snapshot: &ContentSnapshot, preview: bool) -> FolioResult<ContentCacheNode> {
        let strategy = self.serializer.factory().for_kind(snapshot.kind)?;
        let node = ContentCacheNode::from_snapshot(snapshot, &self.builder, strategy)?;
        Ok(if preview { node } else { node.without_draft() })
    }

    async fn write_distributed(&self, key: &NodeCacheKey, node: &ContentCacheNode) -> FolioResult<()> {
        let entry = DistributedEntry {
            content_type_id: node.content_type_id(),
            cached_at: Utc::now(),
            bytes: self.serializer.serialize(node)?,
        };
        self.distributed.put(key, &entry).await?;
        Ok(())
    }

    async fn write_through(&self, key: &NodeCacheKey, node: ContentCacheNode) -> FolioResult<()> {
        self.write_distributed(key, &node).await?;
        self.local.insert(
            *key,
            LocalEntry {
                slot: Slot::Ready {
                    node: Arc::new(node),
                    stale: false,
                    refreshing: false,
                },
                generation: self.next_generation(),
                invalidated: false,
                stored_at: Instant::now(),
            },
        );
        self.populated.notify_waiters();
        self.enforce_capacity();
        Ok(())
    }

    /// Replace the claimed entry if nobody replaced it meanwhile.
    fn install(&self, key: &NodeCacheKey, generation: u64, node: Option<Arc<ContentCacheNode>>) {
        let installed = match node {
            Some(node) => match self.local.get_mut(key) {
                Some(mut entry) if entry.generation == generation => {
                    entry.slot = Slot::Ready {
                        node,
                        stale: entry.invalidated,
                        refreshing: false,
                    };
                    entry.invalidated = false;
                    entry.generation = self.next_generation();
                    entry.stored_at = Instant::now();
                    true
                }
                _ => false,
            },
            None => {
                self.local
                    .remove_if(key, |_, entry| entry.generation == generation);
                false
            }
        };
        self.populated.notify_waiters();
        if installed {
            self.enforce_capacity();
        }
    }

    /// Undo an abandoned claim.
    fn release(&self, key: &NodeCacheKey, generation: u64, refresh: bool) {
        if refresh {
            if let Some(mut entry) = self.local.get_mut(key) {
                if entry.generation == generation {
                    if let Slot::Ready { refreshing, .. } = &mut entry.slot {
                        *refreshing = false;
                    }
                }
            }
        } else {
            self.local.remove_if(key, |_, entry| {
                entry.generation == generation && matches!(entry.slot, Slot::Populating)
            });
        }
        self.populated.notify_waiters();
    }

    /// Drop tombstones, then the oldest nodes, until the local tier fits.
    fn enforce_capacity(&self) {
        if self.local.len() <= self.capacity {
            return;
        }
        self.local.retain(|_, entry| !matches!(entry.slot, Slot::Evicted));
        let len = self.local.len();
        if len <= self.capacity {
            return;
        }

        let mut candidates: Vec<(Instant, NodeCacheKey, u64)> = self
            .local
            .iter()
            .filter_map(|entry| match &entry.slot {
                Slot::Ready {
                    refreshing: false, ..
                } => Some((entry.stored_at, *entry.key(), entry.generation)),
                _ => None,
            })
            .collect();
        candidates.sort_by_key(|(stored_at, _, _)| *stored_at);

        for (_, key, generation) in candidates.into_iter().take(len - self.capacity) {
            if self
                .local
                .remove_if(&key, |_, entry| entry.generation == generation)
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Evicted oldest local entry");
            }
        }
    }
}

/// Releases a population or rebuild claim if its owner goes away without
/// completing it, so waiters are never stranded.
struct ClaimGuard<'a> {
    cache: &'a HybridCache,
    key: NodeCacheKey,
    generation: u64,
    refresh: bool,
    done: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(cache: &'a HybridCache, key: NodeCacheKey, generation: u64, refresh: bool) -> Self {
        Self {
            cache,
            key,
            generation,
            refresh,
            done: false,
        }
    }

    fn complete(mut self, loaded: Option<ContentCacheNode>) -> Option<Arc<ContentCacheNode>> {
        self.done = true;
        let node = loaded.map(Arc::new);
        self.cache.install(&self.key, self.generation, node.clone());
        node
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cache.release(&self.key, self.generation, self.refresh);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::InternPool;
    use crate::testing::FakeSource;
    use folio_test_utils::fixtures;
    use uuid::Uuid;

    struct Harness {
        cache: Arc<HybridCache>,
        source: Arc<FakeSource>,
        distributed: Arc<InMemoryDistributedCache>,
    }

    fn harness_with(source: FakeSource, hybrid: HybridCacheSettings) -> Harness {
        crate::testing::init_tracing();
        let source = Arc::new(source);
        let distributed = Arc::new(InMemoryDistributedCache::new());
        let settings = CacheSettings {
            hybrid,
            ..CacheSettings::default()
        };
        let cache = HybridCache::from_settings(
            &settings,
            InternPool::shared(),
            distributed.clone(),
            source.clone(),
        );
        Harness {
            cache: Arc::new(cache),
            source,
            distributed,
        }
    }

    fn harness(source: FakeSource) -> Harness {
        harness_with(source, HybridCacheSettings::default())
    }

    fn article_keys() -> (NodeCacheKey, NodeCacheKey) {
        let article = fixtures::multi_culture_article();
        (
            NodeCacheKey::published(article.kind, article.key),
            NodeCacheKey::preview(article.kind, article.key),
        )
    }

    fn another_article() -> ContentSnapshot {
        let mut snapshot = fixtures::multi_culture_article();
        snapshot.id = 1003;
        snapshot.key = Uuid::new_v4();
        snapshot
    }

    #[tokio::test]
    async fn test_miss_loads_from_source_and_writes_through() {
        let h = harness(FakeSource::new().with(fixtures::multi_culture_article()));
        let (published, _) = article_keys();

        assert_eq!(h.cache.entry_state(&published), EntryState::Absent);
        let node = h
            .cache
            .get_or_load(&published)
            .await
            .expect("load should succeed")
            .expect("article is published");
        assert!(node.is_published());
        assert_eq!(h.source.loads(), 1);
        assert!(h.distributed.contains(&published));
        assert_eq!(h.cache.entry_state(&published), EntryState::Present);

        let again = h
            .cache
            .get_or_load(&published)
            .await
            .expect("load should succeed")
            .expect("cached");
        assert!(Arc::ptr_eq(&node, &again));
        assert_eq!(h.source.loads(), 1);

        let stats = h.cache.stats().await.expect("stats should succeed");
        assert_eq!((stats.local.hits, stats.local.misses), (1, 1));
        assert_eq!(stats.local.entry_count, 1);
    }

    #[tokio::test]
    async fn test_published_view_hides_draft() {
        let h = harness(FakeSource::new().with(fixtures::multi_culture_article()));
        let (published, preview) = article_keys();

        let public = h.cache.get_or_load(&published).await.expect("load").expect("node");
        let draft = h.cache.get_or_load(&preview).await.expect("load").expect("node");
        assert!(!public.is_draft());
        assert!(draft.is_draft());
    }

    #[tokio::test]
    async fn test_unknown_and_unpublished_nodes_resolve_none() {
        let mut unpublished = fixtures::multi_culture_article();
        unpublished.published = None;
        let h = harness(FakeSource::new().with(unpublished.clone()));

        let public = NodeCacheKey::published(unpublished.kind, unpublished.key);
        assert!(h.cache.get_or_load(&public).await.expect("load").is_none());
        assert_eq!(h.cache.entry_state(&public), EntryState::Absent);

        let preview = NodeCacheKey::preview(unpublished.kind, unpublished.key);
        assert!(h.cache.get_or_load(&preview).await.expect("load").is_some());

        let unknown = NodeCacheKey::published(EntityKind::Document, Uuid::new_v4());
        assert!(h.cache.get_or_load(&unknown).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_distributed_hit_skips_source() {
        let writer = harness(FakeSource::new());
        writer
            .cache
            .set(&fixtures::multi_culture_article())
            .await
            .expect("set should succeed");

        // A second instance sharing the distributed tier.
        let source = Arc::new(FakeSource::new());
        let reader = HybridCache::from_settings(
            &CacheSettings::default(),
            InternPool::shared(),
            writer.distributed.clone(),
            source.clone(),
        );
        let (published, _) = article_keys();
        let node = reader.get_or_load(&published).await.expect("load").expect("node");
        assert_eq!(source.loads(), 0);
        assert!(!node.is_decoded(true));
    }

    #[tokio::test]
    async fn test_corrupt_distributed_entry_is_rebuilt() {
        let h = harness(FakeSource::new().with(fixtures::multi_culture_article()));
        let (published, _) = article_keys();
        h.distributed
            .put(
                &published,
                &DistributedEntry {
                    content_type_id: 1060,
                    cached_at: Utc::now(),
                    bytes: b"definitely not a node".to_vec(),
                },
            )
            .await
            .expect("put should succeed");

        let node = h.cache.get_or_load(&published).await.expect("load").expect("node");
        assert_eq!(h.source.loads(), 1);
        assert_eq!(node.key(), fixtures::multi_culture_article().key);

        let repaired = h
            .distributed
            .get(&published)
            .await
            .expect("get should succeed")
            .expect("rewritten");
        assert!(h.cache.serializer().deserialize(&repaired.bytes).is_some());
    }

    #[tokio::test]
    async fn test_stale_entry_served_while_single_rebuild_runs() {
        let h = harness(FakeSource::gated().with(fixtures::multi_culture_article()));
        h.cache
            .set(&fixtures::multi_culture_article())
            .await
            .expect("set should succeed");
        let (published, _) = article_keys();
        let old = h.cache.get_or_load(&published).await.expect("load").expect("node");

        assert!(h.cache.mark_stale(&published));
        assert_eq!(h.cache.entry_state(&published), EntryState::Stale);

        let claimer = {
            let cache = Arc::clone(&h.cache);
            tokio::spawn(async move { cache.get_or_load(&published).await })
        };
        h.source.wait_entered().await;
        assert_eq!(h.cache.entry_state(&published), EntryState::Populating);

        for _ in 0..3 {
            let served = h.cache.get_or_load(&published).await.expect("load").expect("node");
            assert!(Arc::ptr_eq(&served, &old));
        }

        h.source.open_gate();
        let fresh = claimer
            .await
            .expect("claimer should not panic")
            .expect("rebuild should succeed")
            .expect("node");
        assert!(!Arc::ptr_eq(&fresh, &old));
        assert_eq!(h.source.loads(), 1);
        assert_eq!(h.cache.entry_state(&published), EntryState::Present);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_load() {
        let h = harness(FakeSource::gated().with(fixtures::multi_culture_article()));
        let (published, _) = article_keys();

        let spawn_reader = || {
            let cache = Arc::clone(&h.cache);
            tokio::spawn(async move { cache.get_or_load(&published).await })
        };
        let first = spawn_reader();
        let second = spawn_reader();

        h.source.wait_entered().await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.cache.entry_state(&published), EntryState::Populating);
        h.source.open_gate();

        for reader in [first, second] {
            let node = reader
                .await
                .expect("reader should not panic")
                .expect("load should succeed");
            assert!(node.is_some());
        }
        assert_eq!(h.source.loads(), 1);
    }

    #[tokio::test]
    async fn test_evict_leaves_tombstone_then_reloads() {
        let h = harness(FakeSource::new().with(fixtures::multi_culture_article()));
        h.cache
            .set(&fixtures::multi_culture_article())
            .await
            .expect("set should succeed");
        let (published, preview) = article_keys();

        assert!(h.cache.evict(&published).await.expect("evict should succeed"));
        assert_eq!(h.cache.entry_state(&published), EntryState::Evicted);
        assert!(!h.distributed.contains(&published));
        assert_eq!(h.cache.entry_state(&preview), EntryState::Present);

        h.cache.get_or_load(&published).await.expect("load").expect("node");
        assert_eq!(h.source.loads(), 1);
        assert_eq!(h.cache.entry_state(&published), EntryState::Present);
    }

    #[tokio::test]
    async fn test_evict_content_type() {
        let h = harness(FakeSource::new());
        let first = fixtures::multi_culture_article();
        let second = another_article();
        let page = fixtures::empty_invariant_document();
        for snapshot in [&first, &second, &page] {
            h.cache.set(snapshot).await.expect("set should succeed");
        }

        let removed = h
            .cache
            .evict_content_type(EntityKind::Document, first.content_type.id)
            .await
            .expect("evict should succeed");
        assert_eq!(removed, 4);

        for snapshot in [&first, &second] {
            let key = NodeCacheKey::published(snapshot.kind, snapshot.key);
            assert_eq!(h.cache.entry_state(&key), EntryState::Evicted);
        }
        let page_key = NodeCacheKey::published(page.kind, page.key);
        assert_eq!(h.cache.entry_state(&page_key), EntryState::Present);
        assert!(h.distributed.contains(&page_key));
    }

    #[tokio::test]
    async fn test_set_without_published_state_evicts_public_view() {
        let h = harness(FakeSource::new());
        let mut snapshot = fixtures::multi_culture_article();
        h.cache.set(&snapshot).await.expect("set should succeed");

        snapshot.published = None;
        h.cache.set(&snapshot).await.expect("set should succeed");

        let (published, preview) = article_keys();
        assert_eq!(h.cache.entry_state(&published), EntryState::Evicted);
        assert_eq!(h.cache.entry_state(&preview), EntryState::Present);
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest_entries() {
        let h = harness_with(
            FakeSource::new(),
            HybridCacheSettings {
                local_capacity: 2,
                ..HybridCacheSettings::default()
            },
        );
        let old = fixtures::multi_culture_article();
        let new = another_article();

        h.cache.set(&old).await.expect("set should succeed");
        std::thread::sleep(Duration::from_millis(5));
        h.cache.set(&new).await.expect("set should succeed");

        let old_key = NodeCacheKey::preview(old.kind, old.key);
        let new_key = NodeCacheKey::preview(new.kind, new.key);
        assert_eq!(h.cache.entry_state(&old_key), EntryState::Absent);
        assert_eq!(h.cache.entry_state(&new_key), EntryState::Present);
        // Still available from the distributed tier.
        assert!(h.distributed.contains(&old_key));

        let stats = h.cache.stats().await.expect("stats should succeed");
        assert_eq!(stats.local.entry_count, 2);
        assert_eq!(stats.local.evictions, 2);
    }

    #[tokio::test]
    async fn test_expired_entry_refreshes_from_distributed_tier() {
        let h = harness_with(
            FakeSource::new(),
            HybridCacheSettings {
                local_ttl_secs: 0,
                ..HybridCacheSettings::default()
            },
        );
        h.cache
            .set(&fixtures::multi_culture_article())
            .await
            .expect("set should succeed");
        let (published, _) = article_keys();
        assert_eq!(h.cache.entry_state(&published), EntryState::Stale);

        let node = h.cache.get_or_load(&published).await.expect("load").expect("node");
        assert!(node.is_published());
        assert_eq!(h.source.loads(), 0);
    }

    #[tokio::test]
    async fn test_mark_stale_during_rebuild_lands_stale() {
        let h = harness(FakeSource::gated().with(fixtures::multi_culture_article()));
        h.cache
            .set(&fixtures::multi_culture_article())
            .await
            .expect("set should succeed");
        let (published, _) = article_keys();
        assert!(h.cache.mark_stale(&published));

        let claimer = {
            let cache = Arc::clone(&h.cache);
            tokio::spawn(async move { cache.get_or_load(&published).await })
        };
        h.source.wait_entered().await;

        let mut edited = fixtures::multi_culture_article();
        if let Some(state) = edited.published.as_mut() {
            state.name = "EDITED".to_string();
        }
        h.source.put(edited);
        assert!(h.cache.mark_stale(&published));
        h.source.open_gate();

        let outdated = claimer
            .await
            .expect("claimer should not panic")
            .expect("rebuild should succeed")
            .expect("node");
        assert_eq!(outdated.metadata(true).expect("published").name, "Hello world");
        assert_eq!(h.cache.entry_state(&published), EntryState::Stale);

        let current = h.cache.get_or_load(&published).await.expect("load").expect("node");
        assert_eq!(current.metadata(true).expect("published").name, "EDITED");
        assert_eq!(h.cache.entry_state(&published), EntryState::Present);
    }

    #[tokio::test]
    async fn test_mark_stale_during_first_load_lands_stale() {
        let h = harness(FakeSource::gated().with(fixtures::multi_culture_article()));
        let (published, _) = article_keys();

        let loader = {
            let cache = Arc::clone(&h.cache);
            tokio::spawn(async move { cache.get_or_load(&published).await })
        };
        h.source.wait_entered().await;
        assert!(h.cache.mark_stale(&published));
        h.source.open_gate();

        loader
            .await
            .expect("loader should not panic")
            .expect("load should succeed")
            .expect("node");
        assert_eq!(h.cache.entry_state(&published), EntryState::Stale);
        // Known outdated, so never shared with other instances.
        assert!(!h.distributed.contains(&published));
    }

    #[tokio::test]
    async fn test_evict_during_load_keeps_node_out_of_distributed_tier() {
        let article = fixtures::multi_culture_article();
        let h = harness(FakeSource::gated().with(article.clone()));
        let (published, _) = article_keys();

        let loader = {
            let cache = Arc::clone(&h.cache);
            tokio::spawn(async move { cache.get_or_load(&published).await })
        };
        h.source.wait_entered().await;
        h.source.remove(article.key);
        h.cache.evict(&published).await.expect("evict should succeed");
        h.source.open_gate();

        loader
            .await
            .expect("loader should not panic")
            .expect("load should succeed");
        assert!(!h.distributed.contains(&published));
        assert_eq!(h.cache.entry_state(&published), EntryState::Evicted);

        let other = HybridCache::from_settings(
            &CacheSettings::default(),
            InternPool::shared(),
            h.distributed.clone(),
            Arc::new(FakeSource::new()),
        );
        assert!(other.get_or_load(&published).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_set_during_load_wins_over_loaded_node() {
        let h = harness(FakeSource::gated().with(fixtures::multi_culture_article()));
        let (published, _) = article_keys();

        let loader = {
            let cache = Arc::clone(&h.cache);
            tokio::spawn(async move { cache.get_or_load(&published).await })
        };
        h.source.wait_entered().await;

        let mut edited = fixtures::multi_culture_article();
        if let Some(state) = edited.published.as_mut() {
            state.name = "EDITED".to_string();
        }
        h.cache.set(&edited).await.expect("set should succeed");
        h.source.open_gate();
        loader
            .await
            .expect("loader should not panic")
            .expect("load should succeed");

        let entry = h
            .distributed
            .get(&published)
            .await
            .expect("get should succeed")
            .expect("written by set");
        let shared = h.cache.serializer().deserialize(&entry.bytes).expect("decodes");
        assert_eq!(shared.metadata(true).expect("published").name, "EDITED");

        let local = h.cache.get_or_load(&published).await.expect("load").expect("node");
        assert_eq!(local.metadata(true).expect("published").name, "EDITED");
    }

    #[tokio::test]
    async fn test_evict_content_type_cancels_loads_in_flight() {
        let article = fixtures::multi_culture_article();
        let h = harness(FakeSource::gated().with(article.clone()));
        let (published, _) = article_keys();

        let loader = {
            let cache = Arc::clone(&h.cache);
            tokio::spawn(async move { cache.get_or_load(&published).await })
        };
        h.source.wait_entered().await;
        h.cache
            .evict_content_type(EntityKind::Document, article.content_type.id)
            .await
            .expect("evict should succeed");
        h.source.open_gate();

        loader
            .await
            .expect("loader should not panic")
            .expect("load should succeed");
        assert_eq!(h.cache.entry_state(&published), EntryState::Evicted);
        assert!(!h.distributed.contains(&published));
    }

    #[tokio::test]
    async fn test_open_distributed_uses_lmdb_when_path_set() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let settings = HybridCacheSettings {
            distributed_path: Some(dir.path().join("nodes")),
            distributed_max_size_mb: 16,
            ..HybridCacheSettings::default()
        };
        let tier = open_distributed(&settings).expect("lmdb should open");
        let writer = HybridCache::from_settings(
            &CacheSettings::default(),
            InternPool::shared(),
            Arc::clone(&tier),
            Arc::new(FakeSource::new()),
        );
        writer
            .set(&fixtures::media_image())
            .await
            .expect("set should succeed");

        let image = fixtures::media_image();
        let key = NodeCacheKey::published(image.kind, image.key);
        let entry = tier.get(&key).await.expect("get should succeed").expect("stored");
        assert_eq!(entry.content_type_id, 1032);
        assert!(dir.path().join("nodes").join("data.mdb").exists());

        let memory = open_distributed(&HybridCacheSettings::default()).expect("memory tier");
        assert!(memory.get(&key).await.expect("get should succeed").is_none());
    }
}
