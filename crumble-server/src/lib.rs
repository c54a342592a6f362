//! Terrain server: world registry, chunk fetch/save and the HTTP surface.

use std::fmt;
use std::sync::Arc;

use crumble_metrics::ServerMetrics;
use crumble_storage::{ChunkStore, WorldStore};

pub mod api;
pub mod cache;
pub mod chunk_server;
pub mod registry;

pub use api::router;
pub use chunk_server::ChunkServer;
pub use registry::{WorldRegistry, WorldSummary};

/// Request content the server refuses to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ValidationError {}

pub struct AppState {
    pub registry: WorldRegistry,
    pub chunks: ChunkServer,
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn new<S>(storage: Arc<S>, cache_size: usize, metrics: Arc<ServerMetrics>) -> Self
    where
        S: ChunkStore + WorldStore + 'static,
    {
        Self {
            registry: WorldRegistry::new(storage.clone(), storage.clone()),
            chunks: ChunkServer::new(storage, cache_size, metrics.clone()),
            metrics,
        }
    }
}
