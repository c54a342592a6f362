use std::sync::Arc;

use anyhow::{Context, Result};
use crumble_storage::{ChunkStore, WorldRecord, WorldState, WorldStore};
use log::info;
use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_NAME_LENGTH: usize = 64;

/// Public view of a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSummary {
    pub id: String,
    pub name: String,
    pub seed: String,
    pub data: WorldState,
}

impl From<WorldRecord> for WorldSummary {
    fn from(world: WorldRecord) -> Self {
        Self {
            id: world.id,
            name: world.name,
            seed: world.seed,
            data: world.state,
        }
    }
}

/// Owns the set of worlds. Terrain edits live in the chunk store and are
/// cleared together with the world.
pub struct WorldRegistry {
    worlds: Arc<dyn WorldStore>,
    chunks: Arc<dyn ChunkStore>,
}

impl WorldRegistry {
    pub fn new(worlds: Arc<dyn WorldStore>, chunks: Arc<dyn ChunkStore>) -> Self {
        Self { worlds, chunks }
    }

    pub async fn list(&self) -> Result<Vec<WorldSummary>> {
        let worlds = self.worlds.list_worlds().await?;
        Ok(worlds.into_iter().map(WorldSummary::from).collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<WorldRecord>> {
        self.worlds.get_world(id).await
    }

    pub async fn create(&self, name: &str, seed: &str) -> Result<WorldSummary> {
        let name = name.trim();
        let seed = seed.trim();
        if name.is_empty() || name.len() > MAX_NAME_LENGTH {
            return Err(ValidationError(format!(
                "world name must be 1..={} characters",
                MAX_NAME_LENGTH
            ))
            .into());
        }
        if seed.is_empty() {
            return Err(ValidationError("world seed must not be empty".to_string()).into());
        }

        let world = WorldRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            seed: seed.to_string(),
            state: WorldState::default(),
        };
        self.worlds.insert_world(&world).await?;
        info!("Created world {} ({:?})", world.id, world.name);
        Ok(world.into())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.worlds.delete_world(id).await?;
        if removed {
            self.chunks
                .clear_world(id)
                .await
                .with_context(|| format!("Failed to clear terrain of deleted world {}", id))?;
            info!("Deleted world {}", id);
        }
        Ok(removed)
    }

    /// Drop all terrain edits and gameplay progress.
    pub async fn reset(&self, id: &str) -> Result<Option<WorldSummary>> {
        let Some(mut world) = self.worlds.get_world(id).await? else {
            return Ok(None);
        };
        let cleared = self.chunks.clear_world(id).await?;
        world.state = WorldState::default();
        self.worlds.update_state(id, &world.state).await?;
        info!("Reset world {} ({} edited chunks cleared)", id, cleared);
        Ok(Some(world.into()))
    }

    pub async fn update_state(&self, id: &str, state: &WorldState) -> Result<bool> {
        self.worlds.update_state(id, state).await
    }
}
