//! Two-tier cache of content nodes.
//!
//! A request first consults the in-process tier, then the distributed tier
//! shared by every instance, then the source of truth. Nodes travel through
//! the distributed tier as opaque bytes produced by
//! [`HybridCacheSerializer`]; their property payloads stay encoded until a
//! reader asks for them.
//!
//! # Example
//!
//! ```ignore
//! let distributed = open_distributed(&settings.hybrid)?;
//! let cache = HybridCache::from_settings(&settings, InternPool::shared(), distributed, source);
//!
//! let key = NodeCacheKey::published(EntityKind::Document, node_key);
//! if let Some(node) = cache.get_or_load(&key).await? {
//!     let data = node.data_model(true)?;
//! }
//!
//! // After an edit, readers keep the old node until one of them rebuilds it.
//! cache.mark_stale(&key);
//! ```

pub mod cache;
pub mod key;
pub mod lmdb;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use cache::{open_distributed, EntryState, HybridCache, HybridCacheStats};
pub use key::{NodeCacheKey, ENCODED_KEY_LEN};
pub use lmdb::{LmdbCacheError, LmdbDistributedCache};
pub use memory::InMemoryDistributedCache;
pub use serializer::HybridCacheSerializer;
pub use traits::{CacheStats, CacheValueSerializer, ContentNodeSource, DistributedCache, DistributedEntry};
