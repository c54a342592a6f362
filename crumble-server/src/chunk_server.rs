//! Chunk fetch and save orchestration.
//!
//! A fetch checks the store for a prior edit first:
//! 1. No edit: generate and serve a Fresh payload
//! 2. Edit found: regenerate (the background is never stored), drop the
//!    generated foreground and serve a Restored payload carrying the stored
//!    mask image

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use crumble_codec::{ChunkPayload, mask_resolution};
use crumble_gen::coords::{check_alignment, check_biome_count};
use crumble_gen::noise_field::seed_hash;
use crumble_gen::{GeneratedChunk, NoiseField, NoiseGenerator, WorldGenerator};
use crumble_metrics::ServerMetrics;
use crumble_storage::{ChunkEdit, ChunkStore};
use log::{debug, warn};

use crate::cache::{GenerationCache, GenerationKey};
use crate::ValidationError;

pub struct ChunkServer {
    store: Arc<dyn ChunkStore>,
    cache: GenerationCache,
    metrics: Arc<ServerMetrics>,
}

impl ChunkServer {
    pub fn new(store: Arc<dyn ChunkStore>, cache_size: usize, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            store,
            cache: GenerationCache::new(cache_size),
            metrics,
        }
    }

    pub fn cached_chunks(&self) -> usize {
        self.cache.len()
    }

    /// Produce the payload for the chunk at sample-space origin `(x, y)`.
    ///
    /// Unaligned coordinates fail with [`crumble_gen::CoordError`]. An
    /// unreachable store does not fail the fetch: the chunk is served Fresh
    /// and the stored edit is picked up again once the store recovers. A
    /// stored mask of a different resolution is left in place and the chunk
    /// is served Fresh.
    pub async fn fetch(
        &self,
        world_id: &str,
        seed: &str,
        x: i32,
        y: i32,
        resolution: u32,
        biome_count: u32,
    ) -> Result<ChunkPayload> {
        check_alignment(x, y, resolution)?;
        check_biome_count(biome_count)?;

        let start = Instant::now();
        let stored = match self.store.load_chunk(world_id, x, y).await {
            Ok(stored) => {
                self.metrics.record_load(start.elapsed());
                stored
            }
            Err(e) => {
                warn!(
                    "Storage unavailable for chunk ({}, {}) of world {}: {:#}. Serving fresh.",
                    x, y, world_id, e
                );
                self.metrics.record_storage_failure();
                None
            }
        };

        // an edit saved at another resolution would never decode on the client
        let stored = stored.filter(|mask| match mask_resolution(mask) {
            Ok(r) if r == resolution => true,
            Ok(r) => {
                warn!(
                    "Stored mask of chunk ({}, {}) in world {} is {}x{}, requested {}. Serving fresh.",
                    x, y, world_id, r, r, resolution
                );
                false
            }
            Err(e) => {
                warn!("Stored mask of chunk ({}, {}) in world {} is unreadable: {}. Serving fresh.", x, y, world_id, e);
                false
            }
        });

        let generated = self.generated(seed, x, y, resolution, biome_count).await?;

        let payload = match stored {
            None => ChunkPayload::Fresh {
                background: generated.background.clone(),
                foreground: generated.foreground.clone(),
            },
            Some(mask_image) => ChunkPayload::Restored {
                background: generated.background.clone(),
                mask_image,
            },
        };
        debug!("Serving {} chunk ({}, {}) of world {}", payload.kind(), x, y, world_id);
        Ok(payload)
    }

    /// Apply a save batch. Each record is replaced wholesale; concurrent
    /// saves to the same coordinate resolve last-write-wins.
    pub async fn save(&self, world_id: &str, edits: Vec<ChunkEdit>) -> Result<usize> {
        for edit in &edits {
            let resolution = mask_resolution(&edit.mask)
                .map_err(|e| ValidationError(format!("chunk ({}, {}): {}", edit.x, edit.y, e)))?;
            check_alignment(edit.x, edit.y, resolution)?;
        }

        let start = Instant::now();
        self.store
            .save_chunks(world_id, &edits)
            .await
            .with_context(|| format!("Failed to save {} chunks of world {}", edits.len(), world_id))?;
        self.metrics.record_save(edits.len(), start.elapsed());
        Ok(edits.len())
    }

    async fn generated(
        &self,
        seed: &str,
        x: i32,
        y: i32,
        resolution: u32,
        biome_count: u32,
    ) -> Result<Arc<GeneratedChunk>> {
        let key = GenerationKey {
            seed: seed_hash(seed),
            x,
            y,
            resolution,
            biome_count,
        };

        if let Some(chunk) = self.cache.get(&key) {
            self.metrics.record_cache_hit();
            return Ok(chunk);
        }
        self.metrics.record_cache_miss();

        let start = Instant::now();
        let generator = NoiseGenerator::with_field(NoiseField::from_hash(key.seed));
        let chunk = tokio::task::spawn_blocking(move || {
            generator.generate_chunk(x, y, resolution, biome_count)
        })
        .await
        .context("Generation task failed")??;
        self.metrics.record_generation(start.elapsed());

        let chunk = Arc::new(chunk);
        self.cache.insert(key, chunk.clone());
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crumble_codec::{PayloadKind, decode_mask, encode_mask, fresh_len};
    use crumble_gen::CoordError;
    use crumble_storage::memory::MemoryStorage;

    const SEED: &str = "mgdlnkczmr";

    fn server(store: Arc<MemoryStorage>) -> ChunkServer {
        ChunkServer::new(store, 16, Arc::new(ServerMetrics::new("test".to_string())))
    }

    #[tokio::test]
    async fn test_fresh_when_never_edited() {
        let server = server(Arc::new(MemoryStorage::new()));
        let payload = server.fetch("w", SEED, 256, 256, 256, 6).await.unwrap();
        assert_eq!(payload.kind(), PayloadKind::Fresh);
        assert_eq!(payload.encode().len(), fresh_len(256));
        assert_eq!(payload.encode().len(), 2 * 256 * 256 * 4);
    }

    #[tokio::test]
    async fn test_restored_after_save() {
        let store = Arc::new(MemoryStorage::new());
        let server = server(store.clone());

        let fresh = server.fetch("w", SEED, 64, -64, 64, 6).await.unwrap();
        let ChunkPayload::Fresh { background, foreground } = fresh else {
            panic!("expected fresh");
        };

        let mut alpha: Vec<u8> = foreground
            .iter()
            .map(|v| if v.is_sign_negative() { 0 } else { 255 })
            .collect();
        alpha[0] = 0;
        alpha[1] = 255;
        let mask = encode_mask(&alpha, 64).unwrap();
        let saved = server
            .save("w", vec![ChunkEdit { x: 64, y: -64, mask }])
            .await
            .unwrap();
        assert_eq!(saved, 1);

        let restored = server.fetch("w", SEED, 64, -64, 64, 6).await.unwrap();
        let ChunkPayload::Restored { background: bg2, mask_image } = restored else {
            panic!("expected restored");
        };
        let bits = |v: &[f32]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&bg2), bits(&background));
        assert_eq!(decode_mask(&mask_image, 64).unwrap(), alpha);
    }

    #[tokio::test]
    async fn test_restored_decodes_through_codec() {
        let store = Arc::new(MemoryStorage::new());
        let server = server(store);
        let mask = encode_mask(&[0u8; 16 * 16], 16).unwrap();
        server.save("w", vec![ChunkEdit { x: 0, y: 0, mask }]).await.unwrap();

        let bytes = server.fetch("w", SEED, 0, 0, 16, 6).await.unwrap().encode();
        let decoded = ChunkPayload::decode(&bytes, 16).unwrap();
        assert_eq!(decoded.kind(), PayloadKind::Restored);
    }

    #[tokio::test]
    async fn test_storage_outage_serves_fresh() {
        let store = Arc::new(MemoryStorage::new());
        let server = server(store.clone());
        let mask = encode_mask(&[0u8; 16 * 16], 16).unwrap();
        server.save("w", vec![ChunkEdit { x: 0, y: 0, mask }]).await.unwrap();

        store.set_offline(true);
        let payload = server.fetch("w", SEED, 0, 0, 16, 6).await.unwrap();
        assert_eq!(payload.kind(), PayloadKind::Fresh);

        // the edit was not deleted
        store.set_offline(false);
        let payload = server.fetch("w", SEED, 0, 0, 16, 6).await.unwrap();
        assert_eq!(payload.kind(), PayloadKind::Restored);
    }

    #[tokio::test]
    async fn test_mask_of_other_resolution_serves_fresh() {
        let store = Arc::new(MemoryStorage::new());
        let server = server(store.clone());
        let mask = encode_mask(&[0u8; 16 * 16], 16).unwrap();
        server.save("w", vec![ChunkEdit { x: 64, y: 0, mask }]).await.unwrap();

        // same origin, different cell size
        let payload = server.fetch("w", SEED, 64, 0, 32, 6).await.unwrap();
        assert_eq!(payload.kind(), PayloadKind::Fresh);
        assert_eq!(payload.encode().len(), fresh_len(32));

        // the record is kept for clients at its own resolution
        assert_eq!(store.chunk_count().await, 1);
        let payload = server.fetch("w", SEED, 64, 0, 16, 6).await.unwrap();
        assert_eq!(payload.kind(), PayloadKind::Restored);
    }

    #[tokio::test]
    async fn test_unaligned_fetch_is_coord_error() {
        let server = server(Arc::new(MemoryStorage::new()));
        let err = server.fetch("w", SEED, 10, 0, 64, 6).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<CoordError>(),
            Some(&CoordError::Unaligned { x: 10, y: 0, resolution: 64 })
        );
    }

    #[tokio::test]
    async fn test_save_rejects_bad_masks() {
        let store = Arc::new(MemoryStorage::new());
        let server = server(store.clone());
        let err = server
            .save("w", vec![ChunkEdit { x: 0, y: 0, mask: vec![1, 2, 3] }])
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ValidationError>().is_some());

        // 16x16 mask at an origin that is not a multiple of 16
        let mask = encode_mask(&[0u8; 16 * 16], 16).unwrap();
        let err = server.save("w", vec![ChunkEdit { x: 8, y: 0, mask }]).await.unwrap_err();
        assert!(err.downcast_ref::<CoordError>().is_some());
        assert_eq!(store.chunk_count().await, 0);
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_fetches() {
        let metrics = Arc::new(ServerMetrics::new("test".to_string()));
        let server = ChunkServer::new(Arc::new(MemoryStorage::new()), 4, metrics.clone());
        let a = server.fetch("w", SEED, 0, 0, 32, 6).await.unwrap();
        let b = server.fetch("w", SEED, 0, 0, 32, 6).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(server.cached_chunks(), 1);
        assert_eq!(metrics.cache_hits(), 1);
        assert_eq!(metrics.chunks_generated(), 1);
    }
}
