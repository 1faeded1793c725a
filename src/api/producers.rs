//! `POST/GET/DELETE /producers` and the accesskey routes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::accesskey;
use crate::config::AppState;
use crate::error::StoreError;
use crate::git_repo::GitRepo;

const ACCESSKEY_CONFIG_KEY: &str = "lunchbadger.accesskey";
const ENV_PREFIX: &str = "env/";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/producers", post(create_producer).get(list_producers))
        .route(
            "/producers/:id",
            get(get_producer).delete(delete_producer),
        )
        .route("/producers/:id/exists", get(producer_exists))
        .route(
            "/producers/:id/accesskey",
            get(get_accesskey).post(regenerate_accesskey),
        )
}

#[derive(Serialize)]
pub struct ProducerInfo {
    pub id: String,
    pub envs: HashMap<String, String>,
}

fn envs_of(repo: &GitRepo) -> Result<HashMap<String, String>, StoreError> {
    let mut envs = HashMap::new();
    for name in repo.branches()? {
        if let Some(env_id) = name.strip_prefix(ENV_PREFIX) {
            envs.insert(env_id.to_string(), repo.branch_revision(&name)?);
        }
    }
    Ok(envs)
}

#[derive(Deserialize)]
pub struct CreateProducerRequest {
    id: String,
}

async fn create_producer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProducerRequest>,
) -> Result<Response, StoreError> {
    let repo = state.repo_manager.create(&req.id)?;
    let envs = envs_of(&repo)?;
    Ok((
        StatusCode::CREATED,
        Json(ProducerInfo { id: req.id, envs }),
    )
        .into_response())
}

async fn list_producers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProducerInfo>>, StoreError> {
    let mut producers = Vec::new();
    for id in state.repo_manager.list()? {
        let repo = state.repo_manager.get(&id)?;
        let envs = envs_of(&repo)?;
        producers.push(ProducerInfo { id, envs });
    }
    Ok(Json(producers))
}

async fn get_producer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProducerInfo>, StoreError> {
    let repo = state.repo_manager.get(&id)?;
    let envs = envs_of(&repo)?;
    Ok(Json(ProducerInfo { id, envs }))
}

#[derive(Serialize)]
struct ExistsResponse {
    exists: bool,
}

async fn producer_exists(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<ExistsResponse> {
    Json(ExistsResponse {
        exists: state.repo_manager.exists(&id),
    })
}

#[derive(Serialize)]
struct CountResponse {
    count: u32,
}

async fn delete_producer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CountResponse>, StoreError> {
    let removed = state.repo_manager.remove(&id)?;
    Ok(Json(CountResponse {
        count: removed as u32,
    }))
}

#[derive(Serialize)]
struct AccessKeyResponse {
    #[serde(rename = "accessKey")]
    access_key: String,
}

async fn get_accesskey(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AccessKeyResponse>, StoreError> {
    let repo = state.repo_manager.get(&id)?;
    let access_key = repo.config_get(ACCESSKEY_CONFIG_KEY)?;
    Ok(Json(AccessKeyResponse { access_key }))
}

async fn regenerate_accesskey(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AccessKeyResponse>, StoreError> {
    let repo = state.repo_manager.get(&id)?;
    let access_key = accesskey::generate();
    let mut entries = HashMap::new();
    entries.insert(
        ACCESSKEY_CONFIG_KEY.to_string(),
        serde_json::Value::String(access_key.clone()),
    );
    repo.config_set(&entries)?;
    Ok(Json(AccessKeyResponse { access_key }))
}
