// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Sort Cache
//
// Memoises PhaseSorter results. Endpoints build a fresh chain per message from
// the same provider lists, so the sort input repeats almost every time.
//
// Key = SHA-256 over the catalog fingerprint and, per interceptor in input
// order, its allocation address plus descriptor. Each entry keeps the input
// Arcs alive, so an address cannot be reused by another interceptor while the
// entry exists.

use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::application::sorter::{ChainEntry, PhaseSorter};
use crate::domain::fault::ChainError;
use crate::domain::interceptor::Interceptor;
use crate::domain::phase::PhaseRegistry;

struct CachedSort {
    // Held only to pin the interceptor addresses used in the key
    _inputs: Vec<Arc<dyn Interceptor>>,
    sorted: Vec<ChainEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub clears: u64,
}

pub struct ChainCache {
    entries: DashMap<String, CachedSort>,
    max_entries: usize,
    stats: Mutex<CacheStats>,
}

impl ChainCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Sorted entries for `interceptors`, computed at most once per distinct
    /// input. Sort errors are returned as-is and never cached.
    pub fn sorted(
        &self,
        registry: &PhaseRegistry,
        interceptors: &[Arc<dyn Interceptor>],
    ) -> Result<Vec<ChainEntry>, ChainError> {
        let key = cache_key(registry, interceptors);

        if let Some(hit) = self.entries.get(&key) {
            self.stats.lock().hits += 1;
            metrics::counter!("conduit_sort_cache_hits_total").increment(1);
            return Ok(hit.sorted.clone());
        }

        self.stats.lock().misses += 1;
        metrics::counter!("conduit_sort_cache_misses_total").increment(1);

        let sorted = PhaseSorter::new(registry).sort(interceptors)?;

        if self.entries.len() >= self.max_entries {
            debug!("Sort cache full ({} entries), clearing", self.entries.len());
            self.entries.clear();
            self.stats.lock().clears += 1;
        }
        self.entries.insert(
            key,
            CachedSort {
                _inputs: interceptors.to_vec(),
                sorted: sorted.clone(),
            },
        );
        Ok(sorted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }
}

impl Default for ChainCache {
    fn default() -> Self {
        Self::new(256)
    }
}

fn cache_key(registry: &PhaseRegistry, interceptors: &[Arc<dyn Interceptor>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(registry.fingerprint().as_bytes());
    for interceptor in interceptors {
        let address = Arc::as_ptr(interceptor) as *const () as usize;
        hasher.update(address.to_le_bytes());

        let descriptor = interceptor.descriptor();
        hasher.update(descriptor.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(descriptor.phase.as_bytes());
        hasher.update([0u8]);
        for peer in &descriptor.before {
            hasher.update(b"<");
            hasher.update(peer.as_bytes());
        }
        for peer in &descriptor.after {
            hasher.update(b">");
            hasher.update(peer.as_bytes());
        }
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}
