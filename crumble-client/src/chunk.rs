//! Client-resident chunk and its lifecycle.
//!
//! ```text
//! Requested -> Loaded -> PostGenerated -> Destroyed
//!     |  ^                                   ^
//!     +--+ (failed fetch, retried)           |
//!     +--------------------------------------+ (evicted while in flight)
//! ```

use crumble_codec::PayloadKind;
use crumble_gen::ChunkCoord;

use crate::palette::UNCOLORED;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Requested,
    Loaded,
    PostGenerated,
    Destroyed,
}

/// Identifies one request generation of a slot. Responses carrying an older
/// ticket are dropped.
pub type Ticket = u64;

#[derive(Debug)]
pub struct Chunk {
    pub coord: ChunkCoord,
    pub resolution: u32,
    pub ticket: Ticket,
    pub state: ChunkState,
    pub kind: Option<PayloadKind>,
    /// RGBA, `resolution²` pixels.
    pub background: Vec<u8>,
    /// RGBA, `resolution²` pixels. The alpha channel is the collision mask.
    pub foreground: Vec<u8>,
    /// Density values waiting for the colorize pass.
    pub(crate) density: Option<(Vec<f32>, Vec<f32>)>,
    pub(crate) attempts: u32,
    pub(crate) stalled: bool,
    /// Foreground was edited since the last save snapshot.
    pub need_foreground_image_data_update: bool,
    pub need_texture_update: bool,
}

impl Chunk {
    pub fn new(coord: ChunkCoord, resolution: u32, ticket: Ticket) -> Self {
        let pixels = (resolution as usize) * (resolution as usize);
        Self {
            coord,
            resolution,
            ticket,
            state: ChunkState::Requested,
            kind: None,
            background: UNCOLORED.repeat(pixels),
            foreground: UNCOLORED.repeat(pixels),
            density: None,
            attempts: 0,
            stalled: false,
            need_foreground_image_data_update: false,
            need_texture_update: true,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ChunkState::PostGenerated
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn index(&self, px: u32, py: u32) -> usize {
        (px as usize + py as usize * self.resolution as usize) * 4
    }

    pub fn foreground_alpha(&self, px: u32, py: u32) -> u8 {
        self.foreground[self.index(px, py) + 3]
    }

    pub fn set_foreground_alpha(&mut self, px: u32, py: u32, alpha: u8) {
        let i = self.index(px, py) + 3;
        self.foreground[i] = alpha;
    }

    /// Alpha channel of the foreground, one byte per pixel.
    pub fn alpha_mask(&self) -> Vec<u8> {
        self.foreground.chunks_exact(4).map(|p| p[3]).collect()
    }

    /// Column-major 3x3 transform from unit chunk space to world space.
    pub fn placement(&self, chunk_size: f32) -> [f32; 9] {
        let (x, y) = self.coord.world_origin(chunk_size);
        [chunk_size, 0.0, 0.0, 0.0, chunk_size, 0.0, x, y, 1.0]
    }

    /// Returns and clears the texture flag.
    pub fn take_texture_update(&mut self) -> bool {
        std::mem::take(&mut self.need_texture_update)
    }

    pub(crate) fn destroy(&mut self) {
        self.state = ChunkState::Destroyed;
        self.density = None;
        self.background = Vec::new();
        self.foreground = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chunk_is_gray_and_requested() {
        let chunk = Chunk::new(ChunkCoord::new(1, -1), 4, 7);
        assert_eq!(chunk.state, ChunkState::Requested);
        assert_eq!(chunk.background.len(), 4 * 4 * 4);
        assert_eq!(&chunk.background[..4], &UNCOLORED);
        assert!(!chunk.is_ready());
    }

    #[test]
    fn test_alpha_access() {
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0), 4, 0);
        chunk.set_foreground_alpha(3, 2, 0);
        assert_eq!(chunk.foreground_alpha(3, 2), 0);
        assert_eq!(chunk.alpha_mask()[3 + 2 * 4], 0);
        assert_eq!(chunk.alpha_mask()[0], 255);
    }

    #[test]
    fn test_placement() {
        let chunk = Chunk::new(ChunkCoord::new(2, -1), 1, 0);
        let m = chunk.placement(256.0);
        assert_eq!((m[6], m[7]), (512.0, -256.0));
        assert_eq!(m[0], 256.0);
    }
}
