//! Terrain destruction.

use crumble_gen::ChunkCoord;

use crate::grid::ChunkGrid;

/// Erase a disc of foreground around `(world_x, world_y)`.
///
/// A pixel is erased when the circle intersects its square, so a tiny radius
/// still clears the pixel under the center. Every ready chunk the circle
/// touches is marked for saving. Returns the number of chunks touched.
pub fn clear_circle(grid: &mut ChunkGrid, world_x: f32, world_y: f32, radius: f32) -> usize {
    if radius.is_nan() || radius <= 0.0 {
        return 0;
    }
    let chunk_size = grid.config().chunk_size;
    let resolution = grid.config().resolution;
    let scale = resolution as f32 / chunk_size;

    // only cells inside the window can hold a chunk
    let center = grid.center();
    let (hw, hh) = (grid.config().half_width(), grid.config().half_height());
    let min = ChunkCoord::from_world(world_x - radius, world_y - radius, chunk_size);
    let max = ChunkCoord::from_world(world_x + radius, world_y + radius, chunk_size);
    let (min_x, max_x) = (min.x.max(center.x - hw), max.x.min(center.x + hw));
    let (min_y, max_y) = (min.y.max(center.y - hh), max.y.min(center.y + hh));

    let mut touched = 0;
    for cy in min_y..=max_y {
        for cx in min_x..=max_x {
            let coord = ChunkCoord::new(cx, cy);
            let Some(chunk) = grid.chunk_mut(coord).filter(|c| c.is_ready()) else {
                continue;
            };

            let (ox, oy) = coord.world_origin(chunk_size);
            let lx = (world_x - ox) * scale;
            let ly = (world_y - oy) * scale;
            let r = radius * scale;

            let last = resolution as i64 - 1;
            let x0 = ((lx - r).floor() as i64).clamp(0, last);
            let x1 = ((lx + r).floor() as i64).clamp(0, last);
            let y0 = ((ly - r).floor() as i64).clamp(0, last);
            let y1 = ((ly + r).floor() as i64).clamp(0, last);

            let mut covered = false;
            for py in y0..=y1 {
                for px in x0..=x1 {
                    let nx = lx.clamp(px as f32, px as f32 + 1.0) - lx;
                    let ny = ly.clamp(py as f32, py as f32 + 1.0) - ly;
                    if nx * nx + ny * ny < r * r {
                        chunk.set_foreground_alpha(px as u32, py as u32, 0);
                        covered = true;
                    }
                }
            }

            if covered {
                chunk.need_foreground_image_data_update = true;
                chunk.need_texture_update = true;
                touched += 1;
            }
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendFuture, FetchRequest};
    use crate::chunk::Chunk;
    use crate::config::ClientConfig;
    use crumble_codec::ChunkPayload;
    use crumble_codec::wire::WorldState;
    use crumble_storage::ChunkEdit;
    use std::sync::Arc;
    use std::time::Duration;

    /// Every cell is a wall.
    struct WallBackend;

    impl Backend for WallBackend {
        fn fetch_chunk(&self, request: FetchRequest) -> BackendFuture<Vec<u8>> {
            let samples = (request.resolution * request.resolution) as usize;
            let payload = ChunkPayload::Fresh {
                background: vec![0.0; samples],
                foreground: vec![1.0; samples],
            };
            Box::pin(async move { Ok(payload.encode()) })
        }

        fn save_chunks(&self, _world_id: &str, _edits: Vec<ChunkEdit>) -> BackendFuture<()> {
            Box::pin(async { Ok(()) })
        }

        fn report_state(&self, _world_id: &str, _state: WorldState) -> BackendFuture<()> {
            Box::pin(async { Ok(()) })
        }
    }

    async fn ready_grid() -> ChunkGrid {
        let config = ClientConfig {
            grid_width: 3,
            grid_height: 3,
            chunk_size: 16.0,
            resolution: 16,
            ..ClientConfig::default()
        };
        let mut grid = ChunkGrid::new(config, "w", Arc::new(WallBackend), tokio::runtime::Handle::current()).unwrap();
        grid.load(8.0, 8.0);
        for _ in 0..2000 {
            grid.tick();
            if grid.chunks().all(Chunk::is_ready) {
                return grid;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("grid did not load");
    }

    #[tokio::test]
    async fn test_tiny_circle_clears_center_pixel() {
        let mut grid = ready_grid().await;
        let touched = clear_circle(&mut grid, 5.5, 7.5, 0.1);
        assert_eq!(touched, 1);
        let chunk = grid.chunk(ChunkCoord::new(0, 0)).unwrap();
        assert_eq!(chunk.foreground_alpha(5, 7), 0);
        assert_eq!(chunk.foreground_alpha(4, 7), 255);
        assert_eq!(chunk.foreground_alpha(5, 8), 255);
        assert_eq!(grid.dirty_coords(), vec![ChunkCoord::new(0, 0)]);
    }

    #[tokio::test]
    async fn test_circle_on_corner_touches_four_chunks() {
        let mut grid = ready_grid().await;
        let touched = clear_circle(&mut grid, 16.0, 16.0, 0.1);
        assert_eq!(touched, 4);
        assert_eq!(grid.chunk(ChunkCoord::new(1, 1)).unwrap().foreground_alpha(0, 0), 0);
        assert_eq!(grid.chunk(ChunkCoord::new(0, 0)).unwrap().foreground_alpha(15, 15), 0);
        assert_eq!(grid.dirty_coords().len(), 4);
    }

    #[tokio::test]
    async fn test_disc_shape() {
        let mut grid = ready_grid().await;
        clear_circle(&mut grid, 8.0, 8.0, 3.0);
        let chunk = grid.chunk(ChunkCoord::new(0, 0)).unwrap();
        assert_eq!(chunk.foreground_alpha(8, 8), 0);
        assert_eq!(chunk.foreground_alpha(10, 7), 0);
        // inside the bounding box, beyond the rim
        assert_eq!(chunk.foreground_alpha(11, 10), 255);
        assert_eq!(chunk.foreground_alpha(12, 8), 255);
    }

    #[tokio::test]
    async fn test_huge_radius_stays_in_window() {
        let mut grid = ready_grid().await;
        assert_eq!(clear_circle(&mut grid, 8.0, 8.0, 1.0e9), 9);
        assert!(grid.chunks().all(|c| c.foreground_alpha(0, 0) == 0));
        assert_eq!(clear_circle(&mut grid, 1.0e6, 1.0e6, 4.0), 0);
    }

    #[tokio::test]
    async fn test_zero_radius_is_noop() {
        let mut grid = ready_grid().await;
        assert_eq!(clear_circle(&mut grid, 8.0, 8.0, 0.0), 0);
        assert!(grid.dirty_coords().is_empty());
    }
}
