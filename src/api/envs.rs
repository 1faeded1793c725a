//! `/producers/:producerId/envs/...` routes: file read/write and
//! environment (branch) lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::config::AppState;
use crate::error::StoreError;

const ENV_PREFIX: &str = "env/";

fn env_ref(env_id: &str) -> String {
    format!("{ENV_PREFIX}{env_id}")
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/producers/:producer_id/envs/:env_id",
            get(get_env).put(put_env).delete(delete_env),
        )
        .route(
            "/producers/:producer_id/envs/:env_id/files/*path",
            get(get_file),
        )
        .route(
            "/producers/:producer_id/envs/:env_id/files",
            patch(patch_files),
        )
}

#[derive(Serialize)]
struct EnvInfo {
    id: String,
    revision: String,
}

async fn get_env(
    State(state): State<Arc<AppState>>,
    Path((producer_id, env_id)): Path<(String, String)>,
) -> Result<Json<EnvInfo>, StoreError> {
    let repo = state.repo_manager.get(&producer_id)?;
    let revision = repo.branch_revision(&env_ref(&env_id))?;
    Ok(Json(EnvInfo {
        id: env_id,
        revision,
    }))
}

#[derive(Deserialize)]
struct PutEnvRequest {
    revision: String,
}

async fn put_env(
    State(state): State<Arc<AppState>>,
    Path((producer_id, env_id)): Path<(String, String)>,
    Json(req): Json<PutEnvRequest>,
) -> Result<Json<EnvInfo>, StoreError> {
    let repo = state.repo_manager.get(&producer_id)?;
    let revision = repo.upsert_branch(&env_ref(&env_id), &req.revision)?;
    Ok(Json(EnvInfo {
        id: env_id,
        revision,
    }))
}

#[derive(Serialize)]
struct CountResponse {
    count: u32,
}

async fn delete_env(
    State(state): State<Arc<AppState>>,
    Path((producer_id, env_id)): Path<(String, String)>,
) -> Result<Json<CountResponse>, StoreError> {
    let repo = state.repo_manager.get(&producer_id)?;
    let removed = repo.delete_branch(&env_ref(&env_id))?;
    Ok(Json(CountResponse {
        count: removed as u32,
    }))
}

async fn get_file(
    State(state): State<Arc<AppState>>,
    Path((producer_id, env_id, path)): Path<(String, String, String)>,
) -> Result<Response, StoreError> {
    let repo = state.repo_manager.get(&producer_id)?;
    let (content, etag) = repo.get_file(&env_ref(&env_id), &path)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::ETAG, format!("\"{etag}\"")),
        ],
        content,
    )
        .into_response())
}

async fn patch_files(
    State(state): State<Arc<AppState>>,
    Path((producer_id, env_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(files): Json<HashMap<String, String>>,
) -> Result<Response, StoreError> {
    let repo = state.repo_manager.get(&producer_id)?;
    let branch = env_ref(&env_id);

    for (name, content) in &files {
        state.validator.validate(name, content.as_bytes())?;
    }

    let parent_revision = headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_string());

    let byte_files: HashMap<String, Vec<u8>> = files
        .into_iter()
        .map(|(k, v)| (k, v.into_bytes()))
        .collect();

    let new_revision =
        repo.update_branch_files(&branch, parent_revision.as_deref(), &byte_files)?;

    Ok((
        StatusCode::NO_CONTENT,
        [(header::ETAG, format!("\"{new_revision}\""))],
    )
        .into_response())
}
