//! Bounded cache of generated chunks.
//!
//! Generation is deterministic, so a cached result is always valid for the
//! same `(seed, x, y, resolution, biome_count)`.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crumble_gen::GeneratedChunk;
use lru::LruCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationKey {
    pub seed: u32,
    pub x: i32,
    pub y: i32,
    pub resolution: u32,
    pub biome_count: u32,
}

pub struct GenerationCache {
    inner: Option<Mutex<LruCache<GenerationKey, Arc<GeneratedChunk>>>>,
}

impl GenerationCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn get(&self, key: &GenerationKey) -> Option<Arc<GeneratedChunk>> {
        let cache = self.inner.as_ref()?;
        let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(key).cloned()
    }

    pub fn insert(&self, key: GenerationKey, chunk: Arc<GeneratedChunk>) {
        if let Some(cache) = &self.inner {
            let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.put(key, chunk);
        }
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            Some(cache) => cache.lock().unwrap_or_else(|e| e.into_inner()).len(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(x: i32) -> GenerationKey {
        GenerationKey {
            seed: 1,
            x,
            y: 0,
            resolution: 1,
            biome_count: 1,
        }
    }

    fn chunk() -> Arc<GeneratedChunk> {
        Arc::new(GeneratedChunk {
            resolution: 1,
            background: vec![0.0],
            foreground: vec![-0.0],
        })
    }

    #[test]
    fn test_cache_evicts_least_recent() {
        let cache = GenerationCache::new(2);
        cache.insert(key(0), chunk());
        cache.insert(key(1), chunk());
        assert!(cache.get(&key(0)).is_some());
        cache.insert(key(2), chunk());
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(0)).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = GenerationCache::new(0);
        cache.insert(key(0), chunk());
        assert!(cache.get(&key(0)).is_none());
        assert!(cache.is_empty());
    }
}
