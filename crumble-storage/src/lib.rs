//! Durable storage for worlds and edited chunk masks.
//!
//! Only the foreground (destructible) layer of a chunk is ever stored; the
//! background is regenerated from the world seed. A chunk record is keyed by
//! `(world_id, x, y)` where `x, y` is the chunk's sample-space origin, and the
//! value is the encoded mask image, replaced wholesale on every save.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use crumble_codec::wire::{PLAYER_SEGMENTS, WorldState};

pub mod memory;
pub mod postgres;

/// One edited chunk in a save batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEdit {
    pub x: i32,
    pub y: i32,
    pub mask: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldRecord {
    pub id: String,
    pub name: String,
    pub seed: String,
    pub state: WorldState,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Stored mask for the chunk, `None` when it was never edited.
    async fn load_chunk(&self, world_id: &str, x: i32, y: i32) -> Result<Option<Vec<u8>>>;

    /// Upsert every edit of the batch. Each record is replaced wholesale.
    async fn save_chunks(&self, world_id: &str, edits: &[ChunkEdit]) -> Result<()>;

    /// Remove every edit of a world, returning how many were removed.
    async fn clear_world(&self, world_id: &str) -> Result<u64>;
}

#[async_trait]
pub trait WorldStore: Send + Sync {
    async fn list_worlds(&self) -> Result<Vec<WorldRecord>>;
    async fn get_world(&self, id: &str) -> Result<Option<WorldRecord>>;
    async fn insert_world(&self, world: &WorldRecord) -> Result<()>;
    /// Returns false when no such world existed.
    async fn delete_world(&self, id: &str) -> Result<bool>;
    /// Returns false when no such world exists.
    async fn update_state(&self, id: &str, state: &WorldState) -> Result<bool>;
}
