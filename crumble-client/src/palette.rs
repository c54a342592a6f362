//! Biome colors and the colorization pass turning density values into RGBA.

use crumble_gen::TerrainCell;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub type Rgb = [u8; 3];

/// Shade of a chunk that has not been colorized yet.
pub const UNCOLORED: [u8; 4] = [128, 128, 128, 255];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub biomes: Vec<Rgb>,
    pub wall: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            biomes: vec![
                [255, 128, 128],
                [128, 255, 128],
                [128, 128, 255],
                [255, 255, 128],
                [128, 255, 255],
                [255, 128, 255],
            ],
            wall: [129, 212, 250],
        }
    }
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t).round().clamp(0.0, 255.0) as u8
}

impl Palette {
    fn biome(&self, index: u32) -> Rgb {
        if self.biomes.is_empty() {
            return [UNCOLORED[0], UNCOLORED[1], UNCOLORED[2]];
        }
        self.biomes[index as usize % self.biomes.len()]
    }

    /// Color of a cell, blended toward the next biome by its fractional part.
    pub fn cell_color(&self, cell: TerrainCell) -> Rgb {
        let from = self.biome(cell.biome);
        let to = self.biome(cell.biome + 1);
        [
            lerp(from[0], to[0], cell.blend),
            lerp(from[1], to[1], cell.blend),
            lerp(from[2], to[2], cell.blend),
        ]
    }

    /// Fill `out` (RGBA, four bytes per value) with opaque floor colors.
    pub fn colorize_background(&self, values: &[f32], biome_count: u32, out: &mut [u8]) {
        out.par_chunks_mut(4).zip(values.par_iter()).for_each(|(pixel, &value)| {
            let [r, g, b] = self.cell_color(TerrainCell::from_background(value, biome_count));
            pixel.copy_from_slice(&[r, g, b, 255]);
        });
    }

    /// Walls become opaque wall color, open cells fully transparent.
    pub fn colorize_foreground(&self, values: &[f32], biome_count: u32, out: &mut [u8]) {
        let [r, g, b] = self.wall;
        out.par_chunks_mut(4).zip(values.par_iter()).for_each(|(pixel, &value)| {
            let cell = TerrainCell::from_foreground(value, biome_count);
            let alpha = if cell.wall { 255 } else { 0 };
            pixel.copy_from_slice(&[r, g, b, alpha]);
        });
    }

    /// Foreground from a stored alpha mask.
    pub fn apply_mask(&self, mask: &[u8], out: &mut [u8]) {
        let [r, g, b] = self.wall;
        out.par_chunks_mut(4).zip(mask.par_iter()).for_each(|(pixel, &alpha)| {
            pixel.copy_from_slice(&[r, g, b, alpha]);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_between_neighbours() {
        let palette = Palette::default();
        let half = TerrainCell { biome: 0, blend: 0.5, wall: false };
        assert_eq!(palette.cell_color(half), [192, 192, 128]);
        let last = TerrainCell { biome: 5, blend: 0.0, wall: false };
        assert_eq!(palette.cell_color(last), [255, 128, 255]);
    }

    #[test]
    fn test_foreground_alpha_follows_sign() {
        let palette = Palette::default();
        let mut out = vec![0u8; 12];
        palette.colorize_foreground(&[1.5, -1.5, -0.0], 6, &mut out);
        assert_eq!(out[3], 255);
        assert_eq!(out[7], 0);
        assert_eq!(out[11], 0);
        assert_eq!(&out[0..3], &[129, 212, 250]);
    }

    #[test]
    fn test_background_is_opaque() {
        let palette = Palette::default();
        let mut out = vec![0u8; 8];
        palette.colorize_background(&[0.0, 2.0], 6, &mut out);
        assert_eq!(out, vec![255, 128, 128, 255, 128, 128, 255, 255]);
    }
}
