//! Per-sample terrain value.
//!
//! On the wire a sample is a single `f32`: the integer part is the biome
//! index, the fractional part the blend toward the next biome, and the sign
//! bit of a foreground value marks an open (non-wall) cell. Everything past
//! the codec works with [`TerrainCell`] instead.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainCell {
    pub biome: u32,
    /// Blend toward `biome + 1`, in `[0, 1)`.
    pub blend: f32,
    pub wall: bool,
}

impl TerrainCell {
    /// Build a cell from an unclamped biome value (`index + blend`).
    pub fn from_biome_value(value: f32, biome_count: u32, wall: bool) -> Self {
        let max = biome_count.saturating_sub(1) as f32;
        let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, max) };
        let biome = clamped.floor();
        Self {
            biome: biome as u32,
            blend: clamped - biome,
            wall,
        }
    }

    /// Decode a background sample. Background cells are never walls.
    pub fn from_background(value: f32, biome_count: u32) -> Self {
        Self::from_biome_value(value.abs(), biome_count, false)
    }

    /// Decode a foreground sample: sign bit set means open.
    pub fn from_foreground(value: f32, biome_count: u32) -> Self {
        Self::from_biome_value(value.abs(), biome_count, !value.is_sign_negative())
    }

    pub fn biome_value(&self) -> f32 {
        self.biome as f32 + self.blend
    }

    pub fn to_background(&self) -> f32 {
        self.biome_value()
    }

    /// Encode as a foreground sample. Open cells carry the sign bit, even for
    /// biome value zero (`-0.0`).
    pub fn to_foreground(&self) -> f32 {
        let value = self.biome_value();
        if self.wall { value } else { -value }
    }
}
