//! Procedural chunk generation.
//!
//! For every sample the classification channel (3 octaves) decides wall vs
//! open at the 0.5 threshold, and a separately scaled biome channel picks the
//! biome index and blend used for coloring.

use log::debug;
use rayon::prelude::*;

use crate::cell::TerrainCell;
use crate::coords::{check_alignment, check_biome_count};
use crate::noise_field::NoiseField;
use crate::{CoordError, WorldGenerator};

const WALL_THRESHOLD: f64 = 0.5;
const CLASSIFY_OCTAVES: u32 = 3;
const CLASSIFY_SCALE: f64 = 1.0 / 3.0;

const FLOOR_BIOME_SAMPLES: u32 = 5;
const FLOOR_BIOME_SCALE: f64 = 0.1;
const WALL_BIOME_SAMPLES: u32 = 4;
const WALL_BIOME_SCALE: f64 = 0.05;

/// Raw density arrays for one chunk, row-major (`sx + sy * resolution`).
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedChunk {
    pub resolution: u32,
    pub background: Vec<f32>,
    pub foreground: Vec<f32>,
}

impl GeneratedChunk {
    pub fn sample_count(&self) -> usize {
        self.background.len()
    }
}

pub struct NoiseGenerator {
    field: NoiseField,
}

impl NoiseGenerator {
    pub fn new(seed: &str) -> Self {
        Self {
            field: NoiseField::new(seed),
        }
    }

    pub fn with_field(field: NoiseField) -> Self {
        Self { field }
    }

    pub fn field(&self) -> &NoiseField {
        &self.field
    }

    fn sample_cell(&self, world_x: i64, world_y: i64, resolution: u32, biome_count: u32) -> (f32, f32) {
        let span = (resolution as f64) * 2.0;
        let u = world_x as f64 / span;
        let v = world_y as f64 / span;

        let classify = self
            .field
            .octave_sum(u * CLASSIFY_SCALE, v * CLASSIFY_SCALE, CLASSIFY_OCTAVES);
        let floor_value =
            self.field.biome_sum(u, v, FLOOR_BIOME_SAMPLES, FLOOR_BIOME_SCALE) * biome_count as f64;
        let floor = TerrainCell::from_biome_value(floor_value as f32, biome_count, false);

        let foreground = if classify >= WALL_THRESHOLD {
            let wall_value =
                self.field.biome_sum(u, v, WALL_BIOME_SAMPLES, WALL_BIOME_SCALE) * biome_count as f64;
            TerrainCell::from_biome_value(wall_value as f32, biome_count, true)
        } else {
            floor
        };

        (floor.to_background(), foreground.to_foreground())
    }
}

impl WorldGenerator for NoiseGenerator {
    fn generate_chunk(
        &self,
        x: i32,
        y: i32,
        resolution: u32,
        biome_count: u32,
    ) -> Result<GeneratedChunk, CoordError> {
        check_alignment(x, y, resolution)?;
        check_biome_count(biome_count)?;

        let res = resolution as usize;
        let mut background = vec![0.0f32; res * res];
        let mut foreground = vec![0.0f32; res * res];

        background
            .par_chunks_mut(res)
            .zip(foreground.par_chunks_mut(res))
            .enumerate()
            .for_each(|(sy, (bg_row, fg_row))| {
                let world_y = y as i64 + sy as i64;
                for sx in 0..res {
                    let world_x = x as i64 + sx as i64;
                    let (bg, fg) = self.sample_cell(world_x, world_y, resolution, biome_count);
                    bg_row[sx] = bg;
                    fg_row[sx] = fg;
                }
            });

        debug!(
            "generated chunk ({}, {}) res={} biomes={} seed={:#x}",
            x,
            y,
            resolution,
            biome_count,
            self.field.seed()
        );

        Ok(GeneratedChunk {
            resolution,
            background,
            foreground,
        })
    }
}

/// One-shot generation for callers that do not keep a generator around.
pub fn generate(
    seed: &str,
    x: i32,
    y: i32,
    resolution: u32,
    biome_count: u32,
) -> Result<GeneratedChunk, CoordError> {
    NoiseGenerator::new(seed).generate_chunk(x, y, resolution, biome_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(values: &[f32]) -> Vec<u32> {
        values.iter().map(|v| v.to_bits()).collect()
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = generate("determinism", 256, -512, 64, 6).expect("generate");
        let b = generate("determinism", 256, -512, 64, 6).expect("generate");
        assert_eq!(bits(&a.background), bits(&b.background));
        assert_eq!(bits(&a.foreground), bits(&b.foreground));
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = generate("one", 0, 0, 32, 6).expect("generate");
        let b = generate("two", 0, 0, 32, 6).expect("generate");
        assert_ne!(bits(&a.background), bits(&b.background));
    }

    #[test]
    fn test_array_sizes() {
        let chunk = generate("sizes", 0, 0, 48, 3).expect("generate");
        assert_eq!(chunk.background.len(), 48 * 48);
        assert_eq!(chunk.foreground.len(), 48 * 48);
    }

    #[test]
    fn test_unaligned_coordinates_rejected() {
        let err = generate("unaligned", 10, 0, 64, 6).unwrap_err();
        assert_eq!(err, CoordError::Unaligned { x: 10, y: 0, resolution: 64 });
        assert!(generate("unaligned", 0, 0, 0, 6).is_err());
        assert!(generate("unaligned", 0, 0, 64, 0).is_err());
    }

    #[test]
    fn test_values_within_biome_range() {
        let chunk = generate("range", -64, 64, 64, 6).expect("generate");
        for (bg, fg) in chunk.background.iter().zip(&chunk.foreground) {
            assert!(!bg.is_sign_negative());
            assert!(*bg <= 5.0);
            assert!(fg.abs() <= 5.0);
            // open cells carry the floor biome
            if fg.is_sign_negative() {
                assert_eq!(fg.abs().to_bits(), bg.to_bits());
            }
        }
    }

    #[test]
    fn test_adjacent_chunks_are_continuous() {
        // The last column of one chunk and the first of its neighbour sample
        // neighbouring world positions, so they must be close.
        let left = generate("seam", 0, 0, 32, 6).expect("generate");
        let right = generate("seam", 32, 0, 32, 6).expect("generate");
        for row in 0..32 {
            let a = left.background[31 + row * 32];
            let b = right.background[row * 32];
            assert!((a - b).abs() < 0.5, "seam jump {} -> {}", a, b);
        }
    }
}
