//! Batches edited chunks back to the server.
//!
//! Each drain takes up to `max_batch_size` queued chunks, snapshots their
//! masks, PNG-encodes them off the game thread and uploads them as one
//! request. Only one batch is in flight at a time. A batch that times out is
//! queued again (unless a newer edit of the same chunk is already waiting);
//! any other failure drops the batch.
//!
//! The grid keeps the mask of an edited chunk that leaves the window until a
//! batch carrying it succeeds, so a chunk that comes back first still shows
//! the edit and saves it with its next live mask.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crumble_codec::encode_mask;
use crumble_gen::ChunkCoord;
use crumble_storage::ChunkEdit;
use log::{debug, error, warn};
use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::backend::{Backend, BackendError, with_deadline};
use crate::config::ClientConfig;
use crate::grid::ChunkGrid;

#[derive(Debug)]
enum MaskSource {
    /// Read from the grid at drain time.
    Live,
    /// Alpha mask of a chunk that left the window.
    Snapshot(Vec<u8>),
    /// PNG of a batch that timed out.
    Encoded(Vec<u8>),
}

#[derive(Debug)]
struct Queued {
    coord: ChunkCoord,
    source: MaskSource,
}

struct BatchOutcome {
    sent: Vec<(ChunkCoord, Vec<u8>)>,
    result: Result<(), BackendError>,
}

enum Pending {
    Alpha(Vec<u8>),
    Encoded(Vec<u8>),
}

pub struct SaveQueue {
    world_id: String,
    backend: Arc<dyn Backend>,
    handle: Handle,
    resolution: u32,
    max_batch_size: usize,
    interval_ticks: u32,
    timeout: Duration,

    queued: VecDeque<Queued>,
    ticks: u32,
    in_flight: Option<oneshot::Receiver<BatchOutcome>>,
    saved: u64,
    lost: u64,
}

impl SaveQueue {
    pub fn new(config: &ClientConfig, world_id: &str, backend: Arc<dyn Backend>, handle: Handle) -> Self {
        Self {
            world_id: world_id.to_string(),
            backend,
            handle,
            resolution: config.resolution,
            max_batch_size: config.max_batch_size.max(1),
            interval_ticks: config.save_interval_ticks.max(1),
            timeout: config.save_timeout(),
            queued: VecDeque::new(),
            ticks: 0,
            in_flight: None,
            saved: 0,
            lost: 0,
        }
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_none()
    }

    /// Chunks confirmed saved.
    pub fn saved(&self) -> u64 {
        self.saved
    }

    /// Chunks dropped with a failed batch.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Call once per frame. Drains every `save_interval_ticks` calls.
    pub fn tick(&mut self, grid: &mut ChunkGrid) {
        self.poll_in_flight(grid);
        self.collect(grid);
        self.ticks += 1;
        if self.ticks >= self.interval_ticks {
            self.ticks = 0;
            self.drain(grid);
        }
    }

    /// Drain now, ignoring the cadence.
    pub fn flush(&mut self, grid: &mut ChunkGrid) {
        self.poll_in_flight(grid);
        self.collect(grid);
        self.drain(grid);
    }

    fn position(&self, coord: ChunkCoord) -> Option<usize> {
        self.queued.iter().position(|q| q.coord == coord)
    }

    fn collect(&mut self, grid: &mut ChunkGrid) {
        for (coord, mask) in grid.take_evicted_edits() {
            match self.position(coord) {
                Some(i) => self.queued[i].source = MaskSource::Snapshot(mask),
                None => self.queued.push_back(Queued {
                    coord,
                    source: MaskSource::Snapshot(mask),
                }),
            }
        }
        // a dirty chunk back in the window already carries its evicted edit
        for coord in grid.dirty_coords() {
            match self.position(coord) {
                Some(i) => self.queued[i].source = MaskSource::Live,
                None => self.queued.push_back(Queued {
                    coord,
                    source: MaskSource::Live,
                }),
            }
        }
    }

    fn poll_in_flight(&mut self, grid: &mut ChunkGrid) {
        let Some(rx) = self.in_flight.as_mut() else {
            return;
        };
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Closed) => {
                self.in_flight = None;
                error!("Save task ended without reporting a result");
                return;
            }
        };
        self.in_flight = None;

        let count = outcome.sent.len() as u64;
        match outcome.result {
            Ok(()) => {
                self.saved += count;
                debug!("Saved {} chunks", count);
                for (coord, _) in outcome.sent {
                    if self.position(coord).is_none() {
                        grid.release_unsaved(coord);
                    }
                }
            }
            Err(BackendError::Timeout) => {
                warn!("Save of {} chunks timed out, queueing again", count);
                for (coord, image) in outcome.sent {
                    if self.position(coord).is_none() {
                        self.queued.push_back(Queued {
                            coord,
                            source: MaskSource::Encoded(image),
                        });
                    }
                }
            }
            Err(e) => {
                self.lost += count;
                error!("Lost save batch of {} chunks: {}", count, e);
            }
        }
    }

    fn drain(&mut self, grid: &mut ChunkGrid) {
        if self.in_flight.is_some() {
            return;
        }

        let mut batch = Vec::new();
        while batch.len() < self.max_batch_size {
            let Some(entry) = self.queued.pop_front() else {
                break;
            };
            let pending = match entry.source {
                MaskSource::Live => match grid.take_mask(entry.coord) {
                    Some(mask) => Pending::Alpha(mask),
                    None => {
                        debug!("Chunk {} left before its save, skipping", entry.coord);
                        continue;
                    }
                },
                MaskSource::Snapshot(mask) => Pending::Alpha(mask),
                MaskSource::Encoded(image) => Pending::Encoded(image),
            };
            match entry.coord.sample_origin(self.resolution) {
                Ok(origin) => batch.push((entry.coord, origin, pending)),
                Err(e) => error!("Cannot save chunk {}: {}", entry.coord, e),
            }
        }
        if batch.is_empty() {
            return;
        }

        let (tx, rx) = oneshot::channel();
        self.in_flight = Some(rx);

        let backend = self.backend.clone();
        let world_id = self.world_id.clone();
        let resolution = self.resolution;
        let deadline = self.timeout;
        self.handle.spawn(async move {
            let encoded = tokio::task::spawn_blocking(move || encode_batch(batch, resolution)).await;
            let outcome = match encoded {
                Ok(sent) => {
                    let edits = sent
                        .iter()
                        .map(|(_, (x, y), image)| ChunkEdit {
                            x: *x,
                            y: *y,
                            mask: image.clone(),
                        })
                        .collect();
                    let result = with_deadline(deadline, backend.save_chunks(&world_id, edits)).await;
                    BatchOutcome {
                        sent: sent.into_iter().map(|(coord, _, image)| (coord, image)).collect(),
                        result,
                    }
                }
                Err(e) => BatchOutcome {
                    sent: Vec::new(),
                    result: Err(BackendError::Failed(format!("encoder task failed: {}", e))),
                },
            };
            let _ = tx.send(outcome);
        });
    }
}

fn encode_batch(
    batch: Vec<(ChunkCoord, (i32, i32), Pending)>,
    resolution: u32,
) -> Vec<(ChunkCoord, (i32, i32), Vec<u8>)> {
    batch
        .into_iter()
        .filter_map(|(coord, origin, pending)| match pending {
            Pending::Encoded(image) => Some((coord, origin, image)),
            Pending::Alpha(mask) => match encode_mask(&mask, resolution) {
                Ok(image) => Some((coord, origin, image)),
                Err(e) => {
                    error!("Failed to encode mask of chunk {}: {:#}", coord, e);
                    None
                }
            },
        })
        .collect()
}
