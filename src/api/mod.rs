//! The thin REST surface mapping HTTP verbs onto the repository engine,
//! validator, and event bus.

mod envs;
mod producers;
mod stream;

use std::sync::Arc;

use axum::Router;

use crate::config::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(producers::router())
        .merge(envs::router())
        .merge(stream::router())
}
