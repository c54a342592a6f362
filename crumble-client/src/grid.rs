//! Sliding window of chunks around the focus.
//!
//! Slots form a torus: shifting the window by one cell rewrites one edge and
//! moves the origin offset instead of shuffling the whole array. Logical slot
//! `(i, j)` always holds the chunk at
//! `(center.x - half_width + i, center.y - half_height + j)`.
//!
//! Network and decode work runs on the tokio runtime and reports back
//! through a channel drained by [`ChunkGrid::tick`]. Everything that mutates
//! a chunk happens inside `tick` on the caller's thread, after checking the
//! completion's ticket against the slot.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use crumble_codec::{ChunkPayload, DecodeError, PayloadKind, decode_mask};
use crumble_gen::ChunkCoord;
use log::{debug, error, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::backend::{Backend, BackendError, FetchRequest, with_deadline};
use crate::chunk::{Chunk, ChunkState, Ticket};
use crate::config::ClientConfig;
use crate::palette::Palette;
use crate::work_queue::WorkQueue;

#[derive(Debug)]
enum FetchError {
    Backend(BackendError),
    Protocol(DecodeError),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Backend(e) => e.fmt(f),
            FetchError::Protocol(e) => e.fmt(f),
        }
    }
}

enum Completion {
    Fetched {
        coord: ChunkCoord,
        ticket: Ticket,
        result: Result<ChunkPayload, FetchError>,
    },
    MaskDecoded {
        coord: ChunkCoord,
        ticket: Ticket,
        result: Result<Vec<u8>, DecodeError>,
    },
}

/// Cells of a `(2*half_width+1) x (2*half_height+1)` window in load order:
/// the center first, then outward ring by ring.
pub fn spiral_order(center: ChunkCoord, half_width: i32, half_height: i32) -> Vec<ChunkCoord> {
    const DIRS: [(i32, i32); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

    let total = ((2 * half_width + 1) * (2 * half_height + 1)) as usize;
    let mut order = Vec::with_capacity(total);
    let (mut dx, mut dy) = (0i32, 0i32);
    order.push(center);

    let mut run = 1;
    let mut dir = 0;
    while order.len() < total {
        for _ in 0..2 {
            let (sx, sy) = DIRS[dir];
            for _ in 0..run {
                dx += sx;
                dy += sy;
                if dx.abs() <= half_width && dy.abs() <= half_height {
                    order.push(ChunkCoord::new(center.x + dx, center.y + dy));
                }
            }
            dir = (dir + 1) % 4;
        }
        run += 1;
    }
    order
}

/// Edge indices from the middle outward, so a new row loads nearest first.
fn edge_order(len: usize) -> Vec<usize> {
    let mid = len / 2;
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by_key(|&i| i.abs_diff(mid));
    order
}

pub struct ChunkGrid {
    config: ClientConfig,
    world_id: String,
    backend: Arc<dyn Backend>,
    handle: Handle,
    palette: Palette,

    center: ChunkCoord,
    focus: (f32, f32),
    loaded: bool,
    slots: Vec<Option<Chunk>>,
    offset: (usize, usize),

    pending: VecDeque<(ChunkCoord, Ticket)>,
    in_flight: usize,
    colorize: WorkQueue<(ChunkCoord, Ticket)>,
    tx: UnboundedSender<Completion>,
    rx: UnboundedReceiver<Completion>,
    next_ticket: Ticket,

    evicted_edits: Vec<(ChunkCoord, Vec<u8>)>,
    /// Masks of edited chunks that left the window, kept until the server
    /// has them. A chunk coming back before that gets them re-applied.
    unsaved: HashMap<ChunkCoord, Vec<u8>>,
    discarded: u64,
}

impl ChunkGrid {
    pub fn new(config: ClientConfig, world_id: &str, backend: Arc<dyn Backend>, handle: Handle) -> Result<Self> {
        config.validate()?;
        let area = config.grid_width * config.grid_height;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            world_id: world_id.to_string(),
            backend,
            handle,
            palette: Palette::default(),
            center: ChunkCoord::new(0, 0),
            focus: (0.0, 0.0),
            loaded: false,
            slots: (0..area).map(|_| None).collect(),
            offset: (0, 0),
            pending: VecDeque::new(),
            in_flight: 0,
            colorize: WorkQueue::new(area),
            tx,
            rx,
            next_ticket: 0,
            evicted_edits: Vec::new(),
            unsaved: HashMap::new(),
            discarded: 0,
            config,
        })
    }

    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = palette;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn world_id(&self) -> &str {
        &self.world_id
    }

    pub fn center(&self) -> ChunkCoord {
        self.center
    }

    pub fn focus(&self) -> (f32, f32) {
        self.focus
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn pending_fetches(&self) -> usize {
        self.pending.len()
    }

    /// Responses dropped because their chunk was evicted or re-requested.
    pub fn discarded_responses(&self) -> u64 {
        self.discarded
    }

    fn physical(&self, i: usize, j: usize) -> usize {
        let x = (self.offset.0 + i) % self.config.grid_width;
        let y = (self.offset.1 + j) % self.config.grid_height;
        x + y * self.config.grid_width
    }

    fn logical(&self, coord: ChunkCoord) -> Option<(usize, usize)> {
        let i = coord.x as i64 - (self.center.x as i64 - self.config.half_width() as i64);
        let j = coord.y as i64 - (self.center.y as i64 - self.config.half_height() as i64);
        let in_range = |v: i64, len: usize| v >= 0 && (v as usize) < len;
        if in_range(i, self.config.grid_width) && in_range(j, self.config.grid_height) {
            Some((i as usize, j as usize))
        } else {
            None
        }
    }

    /// Chunk in logical slot `(i, j)`.
    pub fn slot(&self, i: usize, j: usize) -> Option<&Chunk> {
        if i >= self.config.grid_width || j >= self.config.grid_height {
            return None;
        }
        self.slots[self.physical(i, j)].as_ref()
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        let (i, j) = self.logical(coord)?;
        self.slots[self.physical(i, j)].as_ref()
    }

    fn slot_index(&self, coord: ChunkCoord) -> Option<usize> {
        let (i, j) = self.logical(coord)?;
        Some(self.physical(i, j))
    }

    pub(crate) fn chunk_mut(&mut self, coord: ChunkCoord) -> Option<&mut Chunk> {
        let idx = self.slot_index(coord)?;
        self.slots[idx].as_mut()
    }

    fn current_mut(&mut self, coord: ChunkCoord, ticket: Ticket) -> Option<&mut Chunk> {
        self.chunk_mut(coord).filter(|c| c.ticket == ticket)
    }

    pub fn chunk_at_world(&self, world_x: f32, world_y: f32) -> Option<&Chunk> {
        self.chunk(ChunkCoord::from_world(world_x, world_y, self.config.chunk_size))
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.slots.iter().flatten()
    }

    pub(crate) fn chunks_mut(&mut self) -> impl Iterator<Item = &mut Chunk> {
        self.slots.iter_mut().flatten()
    }

    /// Drop the whole window and request it again around `(world_x, world_y)`
    /// in spiral order.
    pub fn load(&mut self, world_x: f32, world_y: f32) {
        self.evict_all();
        self.focus = (world_x, world_y);
        self.center = ChunkCoord::from_world(world_x, world_y, self.config.chunk_size);
        self.offset = (0, 0);
        self.loaded = true;

        for coord in spiral_order(self.center, self.config.half_width(), self.config.half_height()) {
            self.request(coord);
        }
        self.pump();
    }

    /// Follow the focus, shifting one cell at a time until the center
    /// chunk contains it.
    pub fn set_focus(&mut self, world_x: f32, world_y: f32) {
        if !self.loaded {
            self.load(world_x, world_y);
            return;
        }
        self.focus = (world_x, world_y);
        let target = ChunkCoord::from_world(world_x, world_y, self.config.chunk_size);
        while self.center != target {
            let dx = (target.x - self.center.x).signum();
            let dy = (target.y - self.center.y).signum();
            self.move_grid(dx, dy);
        }
    }

    /// Shift the window by one cell along each non-zero axis.
    pub fn move_grid(&mut self, dx: i32, dy: i32) {
        match dx.signum() {
            1 => self.shift_x(true),
            -1 => self.shift_x(false),
            _ => {}
        }
        match dy.signum() {
            1 => self.shift_y(true),
            -1 => self.shift_y(false),
            _ => {}
        }
        self.pump();
    }

    fn shift_x(&mut self, forward: bool) {
        let w = self.config.grid_width;
        let h = self.config.grid_height;
        let trailing = if forward { 0 } else { w - 1 };
        for j in 0..h {
            self.evict(trailing, j);
        }
        if forward {
            self.offset.0 = (self.offset.0 + 1) % w;
            self.center.x += 1;
        } else {
            self.offset.0 = (self.offset.0 + w - 1) % w;
            self.center.x -= 1;
        }
        let x = if forward {
            self.center.x + self.config.half_width()
        } else {
            self.center.x - self.config.half_width()
        };
        let top = self.center.y - self.config.half_height();
        for j in edge_order(h) {
            self.request(ChunkCoord::new(x, top + j as i32));
        }
    }

    fn shift_y(&mut self, forward: bool) {
        let w = self.config.grid_width;
        let h = self.config.grid_height;
        let trailing = if forward { 0 } else { h - 1 };
        for i in 0..w {
            self.evict(i, trailing);
        }
        if forward {
            self.offset.1 = (self.offset.1 + 1) % h;
            self.center.y += 1;
        } else {
            self.offset.1 = (self.offset.1 + h - 1) % h;
            self.center.y -= 1;
        }
        let y = if forward {
            self.center.y + self.config.half_height()
        } else {
            self.center.y - self.config.half_height()
        };
        let left = self.center.x - self.config.half_width();
        for i in edge_order(w) {
            self.request(ChunkCoord::new(left + i as i32, y));
        }
    }

    /// Put a new `Requested` chunk into the slot of `coord`.
    fn renew(&mut self, coord: ChunkCoord) -> Option<Ticket> {
        let idx = self.slot_index(coord)?;
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.slots[idx] = Some(Chunk::new(coord, self.config.resolution, ticket));
        Some(ticket)
    }

    fn request(&mut self, coord: ChunkCoord) {
        if let Some(ticket) = self.renew(coord) {
            self.pending.push_back((coord, ticket));
        }
    }

    fn evict(&mut self, i: usize, j: usize) {
        let idx = self.physical(i, j);
        let Some(mut chunk) = self.slots[idx].take() else {
            return;
        };
        if chunk.need_foreground_image_data_update && chunk.is_ready() {
            let mask = chunk.alpha_mask();
            self.unsaved.insert(chunk.coord, mask.clone());
            self.evicted_edits.push((chunk.coord, mask));
        }
        let (coord, ticket) = (chunk.coord, chunk.ticket);
        self.colorize.retain(|&(c, t)| c != coord || t != ticket);
        chunk.destroy();
        debug!("Evicted chunk {}", coord);
    }

    fn evict_all(&mut self) {
        for j in 0..self.config.grid_height {
            for i in 0..self.config.grid_width {
                self.evict(i, j);
            }
        }
        self.pending.clear();
    }

    /// Evict everything, keeping unsaved edits for the save queue.
    pub fn teardown(&mut self) {
        self.evict_all();
        self.loaded = false;
    }

    /// Issue queued fetches up to the concurrency limit, in queue order.
    fn pump(&mut self) {
        while self.in_flight < self.config.max_concurrent_fetches {
            let Some((coord, ticket)) = self.pending.pop_front() else {
                break;
            };
            let live = self
                .chunk(coord)
                .is_some_and(|c| c.ticket == ticket && c.state == ChunkState::Requested);
            if !live {
                continue;
            }

            let resolution = self.config.resolution;
            let (x, y) = match coord.sample_origin(resolution) {
                Ok(origin) => origin,
                Err(e) => {
                    error!("Cannot request chunk {}: {}", coord, e);
                    if let Some(chunk) = self.chunk_mut(coord) {
                        chunk.stalled = true;
                    }
                    continue;
                }
            };
            let request = FetchRequest {
                world_id: self.world_id.clone(),
                x,
                y,
                resolution,
                biome_count: self.config.biome_count,
            };
            let fut = self.backend.fetch_chunk(request);
            let deadline = self.config.fetch_timeout();
            let tx = self.tx.clone();
            self.handle.spawn(async move {
                let result = match with_deadline(deadline, fut).await {
                    Ok(bytes) => ChunkPayload::decode(&bytes, resolution).map_err(FetchError::Protocol),
                    Err(e) => Err(FetchError::Backend(e)),
                };
                // receiver gone means the grid was dropped
                let _ = tx.send(Completion::Fetched { coord, ticket, result });
            });
            self.in_flight += 1;
            debug!("Requested chunk {} (ticket {})", coord, ticket);
        }
    }

    /// Apply finished background work, issue queued fetches and run one
    /// colorize step. Call once per frame.
    pub fn tick(&mut self) {
        while let Ok(completion) = self.rx.try_recv() {
            match completion {
                Completion::Fetched { coord, ticket, result } => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    self.on_fetched(coord, ticket, result);
                }
                Completion::MaskDecoded { coord, ticket, result } => {
                    self.on_mask_decoded(coord, ticket, result);
                }
            }
        }
        self.pump();
        self.colorize_step();
    }

    fn on_fetched(&mut self, coord: ChunkCoord, ticket: Ticket, result: Result<ChunkPayload, FetchError>) {
        let is_current = self
            .chunk(coord)
            .is_some_and(|c| c.ticket == ticket && c.state == ChunkState::Requested);
        if !is_current {
            debug!("Discarding stale response for chunk {}", coord);
            self.discarded += 1;
            return;
        }

        match result {
            Ok(ChunkPayload::Fresh { background, foreground }) => {
                if let Some(chunk) = self.current_mut(coord, ticket) {
                    chunk.kind = Some(PayloadKind::Fresh);
                    chunk.density = Some((background, foreground));
                    chunk.state = ChunkState::Loaded;
                    chunk.attempts = 0;
                }
                if let Err(entry) = self.colorize.push((coord, ticket)) {
                    self.colorize_now(entry.0, entry.1);
                }
            }
            Ok(ChunkPayload::Restored { background, mask_image }) => {
                let biome_count = self.config.biome_count;
                let resolution = self.config.resolution;
                let idx = self.slot_index(coord);
                if let Some(chunk) = idx.and_then(|i| self.slots[i].as_mut()) {
                    self.palette.colorize_background(&background, biome_count, &mut chunk.background);
                    chunk.kind = Some(PayloadKind::Restored);
                    chunk.state = ChunkState::Loaded;
                    chunk.attempts = 0;
                    chunk.need_texture_update = true;
                }
                let tx = self.tx.clone();
                self.handle.spawn_blocking(move || {
                    let result = decode_mask(&mask_image, resolution);
                    let _ = tx.send(Completion::MaskDecoded { coord, ticket, result });
                });
            }
            Err(e) => self.retry(coord, ticket, &e.to_string()),
        }
    }

    fn on_mask_decoded(&mut self, coord: ChunkCoord, ticket: Ticket, result: Result<Vec<u8>, DecodeError>) {
        let is_current = self
            .chunk(coord)
            .is_some_and(|c| c.ticket == ticket && c.state == ChunkState::Loaded);
        if !is_current {
            debug!("Discarding stale mask for chunk {}", coord);
            self.discarded += 1;
            return;
        }

        match result {
            Ok(mask) => {
                let idx = self.slot_index(coord);
                if let Some(chunk) = idx.and_then(|i| self.slots[i].as_mut()) {
                    self.palette.apply_mask(&mask, &mut chunk.foreground);
                    chunk.state = ChunkState::PostGenerated;
                    chunk.need_texture_update = true;
                    debug!("Chunk {} restored", coord);
                }
                self.reapply_unsaved(coord);
            }
            Err(e) => {
                // start over with a clean slot
                let attempts = self.chunk(coord).map_or(0, |c| c.attempts);
                let Some(ticket) = self.renew(coord) else {
                    return;
                };
                if let Some(chunk) = self.chunk_mut(coord) {
                    chunk.attempts = attempts;
                }
                self.retry(coord, ticket, &e.to_string());
            }
        }
    }

    fn retry(&mut self, coord: ChunkCoord, ticket: Ticket, reason: &str) {
        let max_attempts = self.config.max_fetch_attempts;
        let Some(chunk) = self.current_mut(coord, ticket) else {
            return;
        };
        chunk.attempts += 1;
        if chunk.attempts >= max_attempts {
            chunk.stalled = true;
            error!("Chunk {} failed {} times ({}), giving up until retried", coord, chunk.attempts, reason);
        } else {
            warn!("Fetch of chunk {} failed ({}), retrying ({}/{})", coord, reason, chunk.attempts, max_attempts);
            self.pending.push_back((coord, ticket));
        }
    }

    /// Re-request chunks that exhausted their fetch attempts.
    pub fn retry_stalled(&mut self) {
        let mut stalled = Vec::new();
        for chunk in self.chunks_mut() {
            if chunk.stalled {
                chunk.stalled = false;
                chunk.attempts = 0;
                stalled.push((chunk.coord, chunk.ticket));
            }
        }
        self.pending.extend(stalled);
        self.pump();
    }

    fn colorize_step(&mut self) {
        // stalled chunks would pause colorization forever
        let waiting = self
            .chunks()
            .any(|c| c.state == ChunkState::Requested && !c.stalled);
        if waiting {
            return;
        }
        for (coord, ticket) in self.colorize.take(self.config.colorize_per_tick) {
            self.colorize_now(coord, ticket);
        }
    }

    fn colorize_now(&mut self, coord: ChunkCoord, ticket: Ticket) {
        let biome_count = self.config.biome_count;
        let Some(idx) = self.slot_index(coord) else {
            return;
        };
        let Some(chunk) = self.slots[idx].as_mut().filter(|c| c.ticket == ticket) else {
            return;
        };
        if chunk.state != ChunkState::Loaded {
            return;
        }
        let Some((background, foreground)) = chunk.density.take() else {
            return;
        };
        self.palette.colorize_background(&background, biome_count, &mut chunk.background);
        self.palette.colorize_foreground(&foreground, biome_count, &mut chunk.foreground);
        chunk.state = ChunkState::PostGenerated;
        chunk.need_texture_update = true;
        debug!("Chunk {} colorized", coord);
        self.reapply_unsaved(coord);
    }

    /// Erase again what an unsaved edit erased before the chunk left the
    /// window, and mark the chunk for saving so the live mask carries it.
    fn reapply_unsaved(&mut self, coord: ChunkCoord) {
        let Some(idx) = self.slot_index(coord) else {
            return;
        };
        let Some(chunk) = self.slots[idx].as_mut().filter(|c| c.is_ready()) else {
            return;
        };
        let Some(mask) = self.unsaved.remove(&coord) else {
            return;
        };
        for (pixel, &alpha) in chunk.foreground.chunks_exact_mut(4).zip(&mask) {
            pixel[3] = pixel[3].min(alpha);
        }
        chunk.need_foreground_image_data_update = true;
        chunk.need_texture_update = true;
        debug!("Re-applied unsaved edit of chunk {}", coord);
    }

    /// True while any chunk of the 2x2 block nearest the focus is not ready.
    pub fn is_frozen(&self) -> bool {
        let size = self.config.chunk_size;
        let bx = (self.focus.0 / size - 0.5).floor() as i32;
        let by = (self.focus.1 / size - 0.5).floor() as i32;
        (0..2).any(|dy| {
            (0..2).any(|dx| {
                !self
                    .chunk(ChunkCoord::new(bx + dx, by + dy))
                    .is_some_and(Chunk::is_ready)
            })
        })
    }

    /// Coordinates of ready chunks edited since their last save snapshot.
    pub fn dirty_coords(&self) -> Vec<ChunkCoord> {
        self.chunks()
            .filter(|c| c.need_foreground_image_data_update && c.is_ready())
            .map(|c| c.coord)
            .collect()
    }

    /// Snapshot the foreground mask of an edited chunk and clear its dirty
    /// flag.
    pub fn take_mask(&mut self, coord: ChunkCoord) -> Option<Vec<u8>> {
        let chunk = self.chunk_mut(coord).filter(|c| c.is_ready())?;
        chunk.need_foreground_image_data_update = false;
        Some(chunk.alpha_mask())
    }

    /// Masks of edited chunks that left the window since the last call.
    pub fn take_evicted_edits(&mut self) -> Vec<(ChunkCoord, Vec<u8>)> {
        std::mem::take(&mut self.evicted_edits)
    }

    /// The server confirmed an evicted edit of `coord`. Forget the kept mask
    /// unless the chunk is back in the window or was evicted again since.
    pub(crate) fn release_unsaved(&mut self, coord: ChunkCoord) {
        if self.chunk(coord).is_none() && !self.evicted_edits.iter().any(|(c, _)| *c == coord) {
            self.unsaved.remove(&coord);
        }
    }

    /// Edits of evicted chunks not yet confirmed saved.
    pub fn unsaved_edits(&self) -> usize {
        self.unsaved.len()
    }
}
