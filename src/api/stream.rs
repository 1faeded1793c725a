//! `GET /producers/:producerId/change-stream`: an SSE feed of `{initial}`,
//! `{push}`, and interleaved `{keepalive}` events.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::Router;
use futures_core::Stream;

use crate::config::AppState;
use crate::error::StoreError;

const ENV_PREFIX: &str = "env/";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/producers/:producer_id/change-stream",
        get(change_stream),
    )
}

async fn change_stream(
    State(state): State<Arc<AppState>>,
    Path(producer_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StoreError> {
    let repo = state.repo_manager.get(&producer_id)?;
    let mut branches = HashMap::new();
    for name in repo.branches()? {
        if let Some(env_id) = name.strip_prefix(ENV_PREFIX) {
            branches.insert(env_id.to_string(), repo.branch_revision(&name)?);
        }
    }

    let mut subscription = state.event_bus.subscribe(producer_id, branches);
    let stream = async_stream::stream! {
        while let Some(event) = subscription.receiver.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                yield Ok(Event::default().data(json));
            }
        }
    };
    Ok(Sse::new(stream))
}
