//! Multi-tenant configuration store keyed on Git repositories, with a REST
//! surface layered directly on Git objects and a Smart-HTTP Git front-end.

pub mod accesskey;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod git_http;
pub mod git_repo;
pub mod lock;
pub mod repo_manager;
pub mod validator;

use std::sync::Arc;

use axum::Router;

use crate::config::AppState;

/// Build the full Axum router: the REST surface at the root plus the Git
/// Smart-HTTP endpoints mounted under `/git`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::router())
        .nest("/git", git_http::router())
        .with_state(state)
}
