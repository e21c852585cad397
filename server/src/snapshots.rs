//! HTTP surface of the snapshot store.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use sketchroom_shared::{Snapshot, SnapshotBody, SnapshotCreated};
use tracing::{error, info};

use crate::error::StoreError;
use crate::state::AppState;
use crate::storage::new_snapshot_id;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const MAX_NAME_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid anti-forgery token")]
    Forbidden,
    #[error("{0}")]
    BadRequest(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Backend(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "snapshot request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn require_csrf(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::Forbidden)?;
    match &state.csrf_token {
        Some(expected) if expected.as_ref() != presented => Err(ApiError::Forbidden),
        _ => Ok(()),
    }
}

/// Names are stored exactly as given; a blank name is rejected.
fn checked_name(name: String) -> Result<String, ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::BadRequest("name is too long"));
    }
    Ok(name)
}

pub async fn create_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SnapshotBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_csrf(&state, &headers)?;
    let now = Utc::now();
    let snapshot = Snapshot {
        id: new_snapshot_id(),
        name: checked_name(body.name)?,
        image: body.image,
        created_at: now,
        updated_at: now,
    };
    state.store.save(&snapshot).await?;
    info!(id = %snapshot.id, name = %snapshot.name, bytes = snapshot.image.len(), "snapshot created");
    Ok((
        StatusCode::CREATED,
        Json(SnapshotCreated { id: snapshot.id }),
    ))
}

pub async fn list_snapshots(State(state): State<AppState>) -> Result<Json<Vec<Snapshot>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

pub async fn get_snapshot(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.store.load(&id).await?))
}

pub async fn update_snapshot(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SnapshotBody>,
) -> Result<StatusCode, ApiError> {
    require_csrf(&state, &headers)?;
    let name = checked_name(body.name)?;
    let mut snapshot = state.store.load(&id).await?;
    snapshot.name = name;
    snapshot.image = body.image;
    snapshot.updated_at = Utc::now();
    state.store.update(&snapshot).await?;
    info!(id = %snapshot.id, "snapshot updated");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_snapshot(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_csrf(&state, &headers)?;
    state.store.remove(&id).await?;
    info!(id = %id, "snapshot deleted");
    Ok(StatusCode::NO_CONTENT)
}
