//! Transports between the client and the terrain server.
//!
//! Calls return boxed futures. The call order is recorded when the method
//! is called; the request itself may not go out until the future is first
//! polled.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crumble_codec::PayloadKind;
use crumble_codec::wire::{CHUNK_FIELD, ChunkPos, MANIFEST_FIELD, SaveManifest, WorldState};
use crumble_server::AppState;
use crumble_storage::ChunkEdit;

pub type BackendFuture<T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The call missed its deadline. Safe to retry unchanged.
    Timeout,
    Failed(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Timeout => f.write_str("request timed out"),
            BackendError::Failed(msg) => write!(f, "request failed: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Address of a chunk fetch. `x`/`y` are the sample-space origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub world_id: String,
    pub x: i32,
    pub y: i32,
    pub resolution: u32,
    pub biome_count: u32,
}

pub trait Backend: Send + Sync {
    fn fetch_chunk(&self, request: FetchRequest) -> BackendFuture<Vec<u8>>;

    /// Upload a save batch; one image per edit, in order.
    fn save_chunks(&self, world_id: &str, edits: Vec<ChunkEdit>) -> BackendFuture<()>;

    fn report_state(&self, world_id: &str, state: WorldState) -> BackendFuture<()>;
}

/// Run `fut` with a deadline, mapping expiry to [`BackendError::Timeout`].
pub async fn with_deadline<T>(deadline: Duration, fut: BackendFuture<T>) -> Result<T, BackendError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout),
    }
}

/// In-process backend calling straight into a server state. Used for
/// offline play and tests.
pub struct LocalBackend {
    state: Arc<AppState>,
}

impl LocalBackend {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

fn failed(e: anyhow::Error) -> BackendError {
    BackendError::Failed(format!("{:#}", e))
}

impl Backend for LocalBackend {
    fn fetch_chunk(&self, request: FetchRequest) -> BackendFuture<Vec<u8>> {
        let state = self.state.clone();
        Box::pin(async move {
            let world = state
                .registry
                .get(&request.world_id)
                .await
                .map_err(failed)?
                .ok_or_else(|| BackendError::Failed(format!("unknown world {}", request.world_id)))?;
            let payload = state
                .chunks
                .fetch(&world.id, &world.seed, request.x, request.y, request.resolution, request.biome_count)
                .await
                .map_err(failed)?;
            let bytes = payload.encode();
            state
                .metrics
                .record_served(payload.kind() == PayloadKind::Restored, bytes.len());
            Ok(bytes)
        })
    }

    fn save_chunks(&self, world_id: &str, edits: Vec<ChunkEdit>) -> BackendFuture<()> {
        let state = self.state.clone();
        let world_id = world_id.to_string();
        Box::pin(async move {
            if state.registry.get(&world_id).await.map_err(failed)?.is_none() {
                return Err(BackendError::Failed(format!("unknown world {}", world_id)));
            }
            state.chunks.save(&world_id, edits).await.map_err(failed)?;
            Ok(())
        })
    }

    fn report_state(&self, world_id: &str, snapshot: WorldState) -> BackendFuture<()> {
        let state = self.state.clone();
        let world_id = world_id.to_string();
        Box::pin(async move {
            match state.registry.update_state(&world_id, &snapshot).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(BackendError::Failed(format!("unknown world {}", world_id))),
                Err(e) => Err(failed(e)),
            }
        })
    }
}

/// Backend talking to a remote server over HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

fn from_reqwest(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Failed(e.to_string())
    }
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn chunk_url(&self, request: &FetchRequest) -> String {
        format!(
            "{}/worlds/{}/chunks/{}/{}/{}/{}",
            self.base_url, request.world_id, request.x, request.y, request.resolution, request.biome_count
        )
    }
}

impl Backend for HttpBackend {
    fn fetch_chunk(&self, request: FetchRequest) -> BackendFuture<Vec<u8>> {
        let pending = self.client.get(self.chunk_url(&request)).send();
        Box::pin(async move {
            let response = pending.await.map_err(from_reqwest)?;
            let response = response.error_for_status().map_err(from_reqwest)?;
            let bytes = response.bytes().await.map_err(from_reqwest)?;
            Ok(bytes.to_vec())
        })
    }

    fn save_chunks(&self, world_id: &str, edits: Vec<ChunkEdit>) -> BackendFuture<()> {
        let manifest = SaveManifest {
            world_id: world_id.to_string(),
            chunks_pos: edits.iter().map(|e| ChunkPos { x: e.x, y: e.y }).collect(),
        };
        let client = self.client.clone();
        let url = format!("{}/worlds/chunks", self.base_url);
        Box::pin(async move {
            let manifest = serde_json::to_string(&manifest)
                .map_err(|e| BackendError::Failed(e.to_string()))?;
            let mut form = reqwest::multipart::Form::new().text(MANIFEST_FIELD, manifest);
            for edit in edits {
                let part = reqwest::multipart::Part::bytes(edit.mask)
                    .file_name(format!("{}_{}.png", edit.x, edit.y))
                    .mime_str("image/png")
                    .map_err(from_reqwest)?;
                form = form.part(CHUNK_FIELD, part);
            }
            client
                .put(url)
                .multipart(form)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(from_reqwest)?;
            Ok(())
        })
    }

    fn report_state(&self, world_id: &str, state: WorldState) -> BackendFuture<()> {
        let pending = self
            .client
            .patch(format!("{}/worlds/{}/playerPos", self.base_url, world_id))
            .json(&state)
            .send();
        Box::pin(async move {
            pending
                .await
                .and_then(|r| r.error_for_status())
                .map_err(from_reqwest)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crumble_codec::{ChunkPayload, encode_mask};
    use crumble_metrics::ServerMetrics;
    use crumble_storage::memory::MemoryStorage;

    fn local() -> (LocalBackend, Arc<AppState>) {
        let metrics = Arc::new(ServerMetrics::new("test".to_string()));
        let state = Arc::new(AppState::new(Arc::new(MemoryStorage::new()), 4, metrics));
        (LocalBackend::new(state.clone()), state)
    }

    fn request(world_id: &str) -> FetchRequest {
        FetchRequest {
            world_id: world_id.to_string(),
            x: 32,
            y: 0,
            resolution: 32,
            biome_count: 6,
        }
    }

    #[tokio::test]
    async fn test_local_fetch_and_save() {
        let (backend, state) = local();
        let world = state.registry.create("local", "seed").await.unwrap();

        let bytes = backend.fetch_chunk(request(&world.id)).await.unwrap();
        assert_eq!(ChunkPayload::decode(&bytes, 32).unwrap().kind(), PayloadKind::Fresh);

        let mask = encode_mask(&[0u8; 32 * 32], 32).unwrap();
        backend
            .save_chunks(&world.id, vec![ChunkEdit { x: 32, y: 0, mask }])
            .await
            .unwrap();
        let bytes = backend.fetch_chunk(request(&world.id)).await.unwrap();
        assert_eq!(ChunkPayload::decode(&bytes, 32).unwrap().kind(), PayloadKind::Restored);
    }

    #[tokio::test]
    async fn test_local_unknown_world_fails() {
        let (backend, _) = local();
        let err = backend.fetch_chunk(request("nope")).await.unwrap_err();
        assert!(matches!(err, BackendError::Failed(_)));
        assert!(backend.report_state("nope", WorldState::default()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_maps_to_timeout() {
        let never: BackendFuture<()> = Box::pin(std::future::pending());
        let err = with_deadline(Duration::from_millis(50), never).await.unwrap_err();
        assert_eq!(err, BackendError::Timeout);
    }

    #[test]
    fn test_chunk_url() {
        let backend = HttpBackend::new("http://host:4000/");
        let url = backend.chunk_url(&FetchRequest {
            world_id: "w".to_string(),
            x: -256,
            y: 512,
            resolution: 256,
            biome_count: 6,
        });
        assert_eq!(url, "http://host:4000/worlds/w/chunks/-256/512/256/6");
    }
}
