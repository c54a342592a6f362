//! HTTP surface.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use crumble_codec::wire::{CHUNK_FIELD, MANIFEST_FIELD, SaveManifest, WorldState};
use crumble_codec::{DecodeError, PayloadKind};
use crumble_gen::CoordError;
use crumble_storage::ChunkEdit;
use log::error;
use serde::{Deserialize, Serialize};

use crate::registry::WorldSummary;
use crate::{AppState, ValidationError};

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/worlds", get(list_worlds).post(create_world))
        .route("/worlds/chunks", put(save_chunks))
        .route("/worlds/{id}", get(get_world).delete(delete_world))
        .route("/worlds/{id}/reset", post(reset_world))
        .route("/worlds/{id}/playerPos", patch(update_player))
        .route("/worlds/{id}/chunks/{x}/{y}/{size}/{biomes}", get(fetch_chunk))
        .route("/stats", get(stats))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<CoordError>() {
            return ApiError::BadRequest(e.to_string());
        }
        if let Some(e) = err.downcast_ref::<ValidationError>() {
            return ApiError::BadRequest(e.to_string());
        }
        if let Some(e) = err.downcast_ref::<DecodeError>() {
            return ApiError::BadRequest(e.to_string());
        }
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Internal(err) => {
                error!("Request failed: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err)).into_response()
            }
        }
    }
}

fn world_not_found(id: &str) -> ApiError {
    ApiError::NotFound(format!("World with given id does not exist: {}", id))
}

#[derive(Debug, Deserialize)]
struct CreateWorld {
    name: String,
    seed: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveResponse {
    pub saved: usize,
}

async fn list_worlds(State(state): State<Arc<AppState>>) -> Result<Json<Vec<WorldSummary>>, ApiError> {
    Ok(Json(state.registry.list().await?))
}

async fn create_world(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateWorld>,
) -> Result<Json<WorldSummary>, ApiError> {
    Ok(Json(state.registry.create(&req.name, &req.seed).await?))
}

async fn get_world(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WorldSummary>, ApiError> {
    match state.registry.get(&id).await? {
        Some(world) => Ok(Json(world.into())),
        None => Err(world_not_found(&id)),
    }
}

async fn delete_world(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.registry.delete(&id).await? {
        Ok(StatusCode::OK)
    } else {
        Err(world_not_found(&id))
    }
}

async fn reset_world(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WorldSummary>, ApiError> {
    match state.registry.reset(&id).await? {
        Some(world) => Ok(Json(world)),
        None => Err(world_not_found(&id)),
    }
}

async fn update_player(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(snapshot): Json<WorldState>,
) -> Result<StatusCode, ApiError> {
    if state.registry.update_state(&id, &snapshot).await? {
        Ok(StatusCode::OK)
    } else {
        Err(world_not_found(&id))
    }
}

async fn fetch_chunk(
    State(state): State<Arc<AppState>>,
    Path((id, x, y, size, biomes)): Path<(String, i32, i32, u32, u32)>,
) -> Result<Response, ApiError> {
    let world = state.registry.get(&id).await?.ok_or_else(|| world_not_found(&id))?;

    let payload = match state.chunks.fetch(&world.id, &world.seed, x, y, size, biomes).await {
        Ok(payload) => payload,
        Err(e) => {
            let err = ApiError::from(e);
            if matches!(err, ApiError::BadRequest(_)) {
                state.metrics.record_rejected();
            }
            return Err(err);
        }
    };

    let restored = payload.kind() == PayloadKind::Restored;
    let bytes = payload.encode();
    state.metrics.record_served(restored, bytes.len());
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

async fn save_chunks(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<SaveResponse>, ApiError> {
    let bad_part = |e: axum::extract::multipart::MultipartError| ApiError::BadRequest(e.to_string());

    let mut manifest: Option<SaveManifest> = None;
    let mut images: Vec<Vec<u8>> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_part)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(MANIFEST_FIELD) => {
                let text = field.text().await.map_err(bad_part)?;
                let parsed = serde_json::from_str(&text)
                    .map_err(|e| ApiError::BadRequest(format!("Malformed manifest: {}", e)))?;
                manifest = Some(parsed);
            }
            Some(CHUNK_FIELD) => images.push(field.bytes().await.map_err(bad_part)?.to_vec()),
            _ => {}
        }
    }

    let manifest = manifest.ok_or_else(|| ApiError::BadRequest("Missing manifest part".to_string()))?;
    if manifest.chunks_pos.len() != images.len() {
        return Err(ApiError::BadRequest(format!(
            "Manifest lists {} chunks but {} images were sent",
            manifest.chunks_pos.len(),
            images.len()
        )));
    }
    if state.registry.get(&manifest.world_id).await?.is_none() {
        return Err(world_not_found(&manifest.world_id));
    }

    let edits = manifest
        .chunks_pos
        .iter()
        .zip(images)
        .map(|(pos, mask)| ChunkEdit { x: pos.x, y: pos.y, mask })
        .collect();
    let saved = state.chunks.save(&manifest.world_id, edits).await?;
    Ok(Json(SaveResponse { saved }))
}

async fn stats(State(state): State<Arc<AppState>>) -> String {
    state.metrics.generate_report()
}
