//! Deterministic terrain generation.
//!
//! A chunk is generated as two density arrays (background floor, foreground
//! walls) sampled from a seeded coherent-noise field. Generation is a pure
//! function of `(seed, x, y, resolution, biome_count)`, which is what lets the
//! server skip storing terrain nobody has edited.

pub mod cell;
pub mod coords;
pub mod generator;
pub mod noise_field;

pub use cell::TerrainCell;
pub use coords::{ChunkCoord, CoordError, MAX_BIOMES, MAX_RESOLUTION};
pub use generator::{GeneratedChunk, NoiseGenerator, generate};
pub use noise_field::NoiseField;

pub trait WorldGenerator: Send + Sync {
    /// Generate the chunk whose sample-space origin is `(x, y)`.
    fn generate_chunk(
        &self,
        x: i32,
        y: i32,
        resolution: u32,
        biome_count: u32,
    ) -> Result<GeneratedChunk, CoordError>;
}
