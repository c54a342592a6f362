//! In-process storage used when no database is configured, and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{ChunkEdit, ChunkStore, WorldRecord, WorldState, WorldStore};

type ChunkKey = (String, i32, i32);

#[derive(Default)]
pub struct MemoryStorage {
    chunks: RwLock<HashMap<ChunkKey, Vec<u8>>>,
    worlds: RwLock<Vec<WorldRecord>>,
    offline: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backing store going away. While offline every chunk
    /// operation fails.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub async fn chunk_count(&self) -> usize {
        self.chunks.read().await.len()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            bail!("memory storage is offline");
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for MemoryStorage {
    async fn load_chunk(&self, world_id: &str, x: i32, y: i32) -> Result<Option<Vec<u8>>> {
        self.check_online()?;
        let chunks = self.chunks.read().await;
        Ok(chunks.get(&(world_id.to_string(), x, y)).cloned())
    }

    async fn save_chunks(&self, world_id: &str, edits: &[ChunkEdit]) -> Result<()> {
        self.check_online()?;
        let mut chunks = self.chunks.write().await;
        for edit in edits {
            chunks.insert((world_id.to_string(), edit.x, edit.y), edit.mask.clone());
        }
        Ok(())
    }

    async fn clear_world(&self, world_id: &str) -> Result<u64> {
        self.check_online()?;
        let mut chunks = self.chunks.write().await;
        let before = chunks.len();
        chunks.retain(|(world, _, _), _| world != world_id);
        Ok((before - chunks.len()) as u64)
    }
}

#[async_trait]
impl WorldStore for MemoryStorage {
    async fn list_worlds(&self) -> Result<Vec<WorldRecord>> {
        Ok(self.worlds.read().await.clone())
    }

    async fn get_world(&self, id: &str) -> Result<Option<WorldRecord>> {
        Ok(self.worlds.read().await.iter().find(|w| w.id == id).cloned())
    }

    async fn insert_world(&self, world: &WorldRecord) -> Result<()> {
        let mut worlds = self.worlds.write().await;
        if worlds.iter().any(|w| w.id == world.id) {
            bail!("world {} already exists", world.id);
        }
        worlds.push(world.clone());
        Ok(())
    }

    async fn delete_world(&self, id: &str) -> Result<bool> {
        let mut worlds = self.worlds.write().await;
        let before = worlds.len();
        worlds.retain(|w| w.id != id);
        let removed = worlds.len() != before;
        drop(worlds);

        if removed {
            self.chunks.write().await.retain(|(world, _, _), _| world != id);
        }
        Ok(removed)
    }

    async fn update_state(&self, id: &str, state: &WorldState) -> Result<bool> {
        let mut worlds = self.worlds.write().await;
        match worlds.iter_mut().find(|w| w.id == id) {
            Some(world) => {
                world.state = state.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(x: i32, y: i32, byte: u8) -> ChunkEdit {
        ChunkEdit { x, y, mask: vec![byte; 4] }
    }

    fn world(id: &str) -> WorldRecord {
        WorldRecord {
            id: id.to_string(),
            name: format!("world {}", id),
            seed: "seed".to_string(),
            state: WorldState::default(),
        }
    }

    #[tokio::test]
    async fn test_save_replaces_wholesale() {
        let store = MemoryStorage::new();
        store.save_chunks("w", &[edit(0, 0, 1)]).await.unwrap();
        store.save_chunks("w", &[edit(0, 0, 2)]).await.unwrap();
        assert_eq!(store.load_chunk("w", 0, 0).await.unwrap(), Some(vec![2; 4]));
        assert_eq!(store.chunk_count().await, 1);
    }

    #[tokio::test]
    async fn test_records_are_keyed_per_world() {
        let store = MemoryStorage::new();
        store.save_chunks("a", &[edit(256, 0, 1)]).await.unwrap();
        assert_eq!(store.load_chunk("b", 256, 0).await.unwrap(), None);
        assert_eq!(store.clear_world("a").await.unwrap(), 1);
        assert_eq!(store.load_chunk("a", 256, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_saves_different_coords() {
        let store = std::sync::Arc::new(MemoryStorage::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.save_chunks("w", &[edit(i * 64, 0, i as u8)]).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        for i in 0..16 {
            assert_eq!(
                store.load_chunk("w", i * 64, 0).await.unwrap(),
                Some(vec![i as u8; 4])
            );
        }
    }

    #[tokio::test]
    async fn test_offline_fails_loads() {
        let store = MemoryStorage::new();
        store.save_chunks("w", &[edit(0, 0, 1)]).await.unwrap();
        store.set_offline(true);
        assert!(store.load_chunk("w", 0, 0).await.is_err());
        store.set_offline(false);
        assert!(store.load_chunk("w", 0, 0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_world_lifecycle() {
        let store = MemoryStorage::new();
        store.insert_world(&world("1")).await.unwrap();
        assert!(store.insert_world(&world("1")).await.is_err());
        store.save_chunks("1", &[edit(0, 0, 9)]).await.unwrap();

        let mut state = WorldState::default();
        state.score = 77;
        assert!(store.update_state("1", &state).await.unwrap());
        assert!(!store.update_state("missing", &state).await.unwrap());
        assert_eq!(store.get_world("1").await.unwrap().unwrap().state.score, 77);

        assert!(store.delete_world("1").await.unwrap());
        assert!(!store.delete_world("1").await.unwrap());
        assert_eq!(store.chunk_count().await, 0);
    }
}
