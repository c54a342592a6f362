//! Terrain collision against the foreground alpha of the grid.
//!
//! Unloaded terrain is solid: anything not yet colorized, stalled or outside
//! the window reads as [`SOLID`].

use std::f32::consts::TAU;

use crate::chunk::Chunk;
use crate::grid::ChunkGrid;

/// Alpha of an intact wall pixel.
pub const SOLID: u8 = 255;

const RAYS: usize = 32;
const RAY_STEPS: usize = 3;
/// Cap on nudges per resolve.
const PUSH_STEPS: usize = 4;
/// Nudge length as a fraction of the chunk size.
const COLLISION_PUSH_FACTOR: f32 = 0.01;

/// Foreground alpha at a world position.
pub fn sample_alpha(grid: &ChunkGrid, world_x: f32, world_y: f32) -> u8 {
    let Some(chunk) = grid.chunk_at_world(world_x, world_y).filter(|c| c.is_ready()) else {
        return SOLID;
    };
    let chunk_size = grid.config().chunk_size;
    let (ox, oy) = chunk.coord.world_origin(chunk_size);
    let nx = (world_x - ox) / chunk_size;
    let ny = (world_y - oy) / chunk_size;
    if !((0.0..=1.0).contains(&nx) && (0.0..=1.0).contains(&ny)) {
        return SOLID;
    }
    alpha_at(chunk, nx, ny)
}

fn alpha_at(chunk: &Chunk, nx: f32, ny: f32) -> u8 {
    let last = chunk.resolution - 1;
    let px = ((nx * chunk.resolution as f32) as u32).min(last);
    let py = ((ny * chunk.resolution as f32) as u32).min(last);
    chunk.foreground_alpha(px, py)
}

pub fn is_solid(grid: &ChunkGrid, world_x: f32, world_y: f32) -> bool {
    sample_alpha(grid, world_x, world_y) == SOLID
}

/// A moving object. `width` doubles as the probe radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Heading in radians, counterclockwise from +x.
    pub rotation: f32,
}

impl Body {
    pub fn new(x: f32, y: f32, radius: f32) -> Self {
        Self {
            x,
            y,
            width: radius,
            height: radius,
            rotation: 0.0,
        }
    }

    pub fn radius(&self) -> f32 {
        self.width
    }

    pub fn heading(&self) -> (f32, f32) {
        (self.rotation.cos(), self.rotation.sin())
    }
}

/// Cast rays around the body and sum the directions pointing away from
/// solid terrain. `None` when every ray is clear.
pub fn probe(grid: &ChunkGrid, body: &Body) -> Option<(f32, f32)> {
    let radius = body.radius();
    let mut push = (0.0f32, 0.0f32);
    let mut found = false;

    for ray in 0..RAYS {
        let angle = TAU * ray as f32 / RAYS as f32;
        let (sin, cos) = angle.sin_cos();
        for step in (1..=RAY_STEPS).rev() {
            let r = radius * step as f32 / RAY_STEPS as f32;
            let (dx, dy) = (cos * r, sin * r);
            if is_solid(grid, body.x + dx, body.y + dy) {
                push.0 -= dx;
                push.1 -= dy;
                found = true;
                break;
            }
        }
    }
    found.then_some(push)
}

fn normalize((x, y): (f32, f32)) -> Option<(f32, f32)> {
    let len = (x * x + y * y).sqrt();
    (len > f32::EPSILON).then(|| (x / len, y / len))
}

/// Result of resolving a body against terrain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Unit push-out direction.
    pub normal: (f32, f32),
    /// Whether the heading was mirrored off the wall.
    pub bounced: bool,
}

/// Push the body out of solid terrain and bounce its heading.
///
/// The body moves along the push-out normal in small steps until the probe
/// comes back clear or the step cap is hit. If it was heading into the wall
/// its heading is mirrored across the normal.
pub fn resolve(grid: &ChunkGrid, body: &mut Body) -> Option<Contact> {
    let push = probe(grid, body)?;
    // rays cancelled out: fully enclosed, nothing sensible to do
    let normal = normalize(push)?;

    let step = COLLISION_PUSH_FACTOR * grid.config().chunk_size;
    for _ in 0..PUSH_STEPS {
        body.x += normal.0 * step;
        body.y += normal.1 * step;
        if probe(grid, body).is_none() {
            break;
        }
    }

    let (fx, fy) = body.heading();
    let dot = fx * normal.0 + fy * normal.1;
    if dot > 0.0 {
        return Some(Contact { normal, bounced: false });
    }
    let bx = fx - 2.0 * dot * normal.0;
    let by = fy - 2.0 * dot * normal.1;
    body.rotation = by.atan2(bx);
    Some(Contact { normal, bounced: true })
}

pub fn circles_overlap(a: &Body, b: &Body) -> bool {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let reach = a.radius() + b.radius();
    dx * dx + dy * dy < reach * reach
}

/// Separate two overlapping bodies along the line between their centers.
/// An immovable `b` stays put and `a` takes the whole displacement.
/// Returns false when they did not overlap.
pub fn separate(a: &mut Body, b: &mut Body, b_immovable: bool) -> bool {
    if !circles_overlap(a, b) {
        return false;
    }
    for _ in 0..PUSH_STEPS {
        let (dx, dy) = (a.x - b.x, a.y - b.y);
        let dist = (dx * dx + dy * dy).sqrt();
        let (nx, ny) = normalize((dx, dy)).unwrap_or((1.0, 0.0));
        let overlap = a.radius() + b.radius() - dist;
        if overlap <= 0.0 {
            break;
        }
        // a hair extra so float error cannot leave them touching
        let shift = overlap + 1e-4;
        if b_immovable {
            a.x += nx * shift;
            a.y += ny * shift;
        } else {
            a.x += nx * shift / 2.0;
            a.y += ny * shift / 2.0;
            b.x -= nx * shift / 2.0;
            b.y -= ny * shift / 2.0;
        }
    }
    true
}
