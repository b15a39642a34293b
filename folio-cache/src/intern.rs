//! Shared string pool for decoded dictionary keys, culture codes and segments.
//!
//! Property aliases and culture codes repeat across every cached node. The
//! decoders route those strings through an [`Interner`] so equal strings
//! share one allocation no matter how many nodes are resident.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Thread-safe string interning service.
///
/// Implementations return the same `Arc<str>` instance for equal input
/// (case-sensitive). Injected into codecs; never a process global.
pub trait Interner: Send + Sync + fmt::Debug {
    fn intern(&self, s: &str) -> Arc<str>;
}

/// Concurrent intern pool holding strong references.
///
/// Entries live as long as the pool. Create one at startup and share it.
#[derive(Debug, Default)]
pub struct InternPool {
    strings: DashMap<Arc<str>, ()>,
}

impl InternPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, the form codecs take.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of distinct strings held.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Interner for InternPool {
    fn intern(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return Arc::clone(existing.key());
        }
        // Racing inserts land on the same shard lock; the loser gets the
        // winner's key back.
        let entry = self.strings.entry(Arc::from(s)).or_insert(());
        Arc::clone(entry.key())
    }
}
