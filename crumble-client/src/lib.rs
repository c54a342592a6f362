//! Client side of the terrain: the streaming chunk window, destruction,
//! edit persistence and collision queries.
//!
//! Nothing here blocks the caller. Fetches, mask decodes and uploads run on
//! the tokio runtime handed in at construction; their results are applied
//! by the owner calling [`ChunkGrid::tick`] and [`SaveQueue::tick`] once per
//! frame.

pub mod backend;
pub mod chunk;
pub mod collision;
pub mod config;
pub mod grid;
pub mod painter;
pub mod palette;
pub mod save_queue;
pub mod sensor;
pub mod snapshot;
pub mod work_queue;

pub use backend::{Backend, BackendError, FetchRequest, HttpBackend, LocalBackend};
pub use chunk::{Chunk, ChunkState};
pub use collision::{Body, Contact, SOLID, probe, resolve, sample_alpha};
pub use config::ClientConfig;
pub use grid::{ChunkGrid, spiral_order};
pub use painter::clear_circle;
pub use palette::Palette;
pub use save_queue::SaveQueue;
pub use sensor::Sensor;
pub use snapshot::SnapshotThrottle;
pub use work_queue::WorkQueue;
