//! Chunk addressing.
//!
//! The client addresses chunks by cell index. The wire and the store address
//! them by sample-space origin, `cell * resolution`, which is what the
//! generator consumes.

use std::fmt;
use std::ops::{Add, Sub};

/// Largest accepted samples-per-edge.
pub const MAX_RESOLUTION: u32 = 1024;
/// Largest accepted biome palette size.
pub const MAX_BIOMES: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Cell containing the world-space point. `chunk_size` is the edge length
    /// of a chunk in world units.
    pub fn from_world(world_x: f32, world_y: f32, chunk_size: f32) -> Self {
        Self {
            x: (world_x / chunk_size).floor() as i32,
            y: (world_y / chunk_size).floor() as i32,
        }
    }

    /// Bottom-left corner of this chunk in world units.
    pub fn world_origin(self, chunk_size: f32) -> (f32, f32) {
        (self.x as f32 * chunk_size, self.y as f32 * chunk_size)
    }

    /// Sample-space origin sent to the server and used as the storage key.
    pub fn sample_origin(self, resolution: u32) -> Result<(i32, i32), CoordError> {
        let res = i32::try_from(resolution).map_err(|_| CoordError::Resolution(resolution))?;
        let x = self.x.checked_mul(res).ok_or(CoordError::Overflow)?;
        let y = self.y.checked_mul(res).ok_or(CoordError::Overflow)?;
        Ok((x, y))
    }

    /// Inverse of [`ChunkCoord::sample_origin`]. Unaligned origins are
    /// rejected, never rounded.
    pub fn from_sample_origin(x: i32, y: i32, resolution: u32) -> Result<Self, CoordError> {
        check_alignment(x, y, resolution)?;
        let res = resolution as i32;
        Ok(Self { x: x / res, y: y / res })
    }

    /// Chebyshev (king-move) distance.
    pub fn ring_distance(self, other: ChunkCoord) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

impl Add for ChunkCoord {
    type Output = ChunkCoord;

    fn add(self, rhs: ChunkCoord) -> ChunkCoord {
        ChunkCoord::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for ChunkCoord {
    type Output = ChunkCoord;

    fn sub(self, rhs: ChunkCoord) -> ChunkCoord {
        ChunkCoord::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

/// Caller errors in generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordError {
    Unaligned { x: i32, y: i32, resolution: u32 },
    Resolution(u32),
    BiomeCount(u32),
    Overflow,
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::Unaligned { x, y, resolution } => write!(
                f,
                "incorrect chunk coordinates: ({}, {}) is not a multiple of {}",
                x, y, resolution
            ),
            CoordError::Resolution(res) => {
                write!(f, "resolution {} outside 1..={}", res, MAX_RESOLUTION)
            }
            CoordError::BiomeCount(n) => write!(f, "biome count {} outside 1..={}", n, MAX_BIOMES),
            CoordError::Overflow => write!(f, "chunk coordinate overflows sample space"),
        }
    }
}

impl std::error::Error for CoordError {}

pub fn check_resolution(resolution: u32) -> Result<(), CoordError> {
    if resolution == 0 || resolution > MAX_RESOLUTION {
        return Err(CoordError::Resolution(resolution));
    }
    Ok(())
}

pub fn check_biome_count(biome_count: u32) -> Result<(), CoordError> {
    if biome_count == 0 || biome_count > MAX_BIOMES {
        return Err(CoordError::BiomeCount(biome_count));
    }
    Ok(())
}

pub fn check_alignment(x: i32, y: i32, resolution: u32) -> Result<(), CoordError> {
    check_resolution(resolution)?;
    let res = resolution as i32;
    if x % res != 0 || y % res != 0 {
        return Err(CoordError::Unaligned { x, y, resolution });
    }
    Ok(())
}
