//! JSON values exchanged next to the binary chunk payloads.

use serde::{Deserialize, Serialize};

/// Number of health segments a fresh player starts with, head included.
pub const PLAYER_SEGMENTS: usize = 5;

/// Sample-space origin of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
}

/// First part of a chunk save upload. One image part follows per entry of
/// `chunks_pos`, in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveManifest {
    pub world_id: String,
    pub chunks_pos: Vec<ChunkPos>,
}

/// Multipart field names of a save upload.
pub const MANIFEST_FIELD: &str = "manifest";
pub const CHUNK_FIELD: &str = "chunk";

/// Gameplay snapshot reported by the client. Last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldState {
    pub player_x: f32,
    pub player_y: f32,
    pub player_rot: f32,
    pub player_health: Vec<f32>,
    pub score: u64,
    pub elapsed_ms: u64,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            player_x: 0.0,
            player_y: 0.0,
            player_rot: 0.0,
            player_health: vec![1.0; PLAYER_SEGMENTS],
            score: 0,
            elapsed_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_wire_names() {
        let manifest = SaveManifest {
            world_id: "w".to_string(),
            chunks_pos: vec![ChunkPos { x: 256, y: -256 }],
        };
        let json = serde_json::to_string(&manifest).expect("serialize");
        assert_eq!(json, r#"{"worldId":"w","chunksPos":[{"x":256,"y":-256}]}"#);
    }

    #[test]
    fn test_world_state_wire_names() {
        let json = serde_json::to_value(WorldState::default()).expect("serialize");
        assert_eq!(json["playerHealth"].as_array().map(|a| a.len()), Some(PLAYER_SEGMENTS));
        assert_eq!(json["elapsedMs"], 0);
    }

    #[test]
    fn test_world_state_partial_json() {
        let state: WorldState = serde_json::from_str(r#"{"playerX": 12.5, "score": 40}"#).expect("parse");
        assert_eq!(state.player_x, 12.5);
        assert_eq!(state.score, 40);
        assert_eq!(state.player_health.len(), PLAYER_SEGMENTS);
    }
}
