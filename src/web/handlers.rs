//! HTTP request handlers.

use super::AppState;
use crate::cache::CacheView;
use crate::model::MetricsSnapshot;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct CacheQuery {
    #[serde(rename = "ignoreCache", default)]
    pub ignore_cache: bool,
}

#[derive(Serialize)]
struct ServerInfoResponse<'a> {
    #[serde(flatten)]
    snapshot: &'a MetricsSnapshot,
    last_updated: DateTime<Utc>,
}

#[derive(Serialize)]
struct HealthResponse {
    state: crate::scheduler::CycleState,
    ready: bool,
    targets: usize,
    generation: Option<u64>,
    last_updated: Option<DateTime<Utc>>,
}

/// Cached view, refreshed first when asked to or when nothing is cached yet.
async fn current_view(state: &AppState, query: &CacheQuery) -> CacheView {
    let view = state.scheduler.cache().read();
    if query.ignore_cache || !view.is_ready() {
        return state.scheduler.force_refresh().await;
    }
    view
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "status": "unavailable" })),
    )
        .into_response()
}

pub async fn handle_server_info(
    State(state): State<AppState>,
    Query(query): Query<CacheQuery>,
) -> Response {
    match current_view(&state, &query).await {
        CacheView::Ready(cached) => Json(ServerInfoResponse {
            snapshot: &cached.snapshot,
            last_updated: cached.last_updated,
        })
        .into_response(),
        CacheView::Unavailable => unavailable(),
    }
}

pub async fn handle_servers(
    State(state): State<AppState>,
    Query(query): Query<CacheQuery>,
) -> Response {
    match current_view(&state, &query).await {
        CacheView::Ready(cached) => Json(cached.probe_results.clone()).into_response(),
        CacheView::Unavailable => unavailable(),
    }
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.scheduler.cache().read();
    let cached = view.state();

    Json(HealthResponse {
        state: state.scheduler.state(),
        ready: view.is_ready(),
        targets: state.scheduler.targets().len(),
        generation: cached.map(|c| c.generation),
        last_updated: cached.map(|c| c.last_updated),
    })
}
