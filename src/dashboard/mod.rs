use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{stream, Stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::db::models::ResourceKey;
use crate::db::Database;
use crate::hub::{LiveHub, SubscriberId};
use crate::standings::Reconciler;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub hub: Arc<LiveHub>,
    pub reconciler: Arc<Reconciler>,
}

/// Build the Axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/live/:league/:season", get(live_handler))
        .route("/api/live/:league/:season/:subscriber", delete(unsubscribe_handler))
        .route("/api/live/:league/:season/subscribers", get(subscribers_handler))
        .route("/api/fixtures/:league/:season/today", get(fixtures_today_handler))
        .route("/api/fixture/:id", get(fixture_handler))
        .route("/api/standings/:league/:season", get(standings_handler))
        .route("/api/standings/:league/:season/start", post(standings_start_handler))
        .route("/api/standings/:league/:season/stop", post(standings_stop_handler))
        .route("/api/standings/:league/:season/status", get(standings_status_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "poll_loops": state.hub.scheduler().running_count(),
    }))
}

/// GET /api/live/:league/:season
///
/// SSE stream of events. The first frame is `subscribed` and carries the
/// subscriber id; the subscription ends when the client disconnects or is
/// removed through the DELETE route.
async fn live_handler(
    State(state): State<Arc<AppState>>,
    Path((league, season)): Path<(i64, i32)>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::Error>>> {
    let key = ResourceKey::new(league, season);
    let subscription = state.hub.subscribe(key);
    info!("SSE client {} subscribed to {}", subscription.id(), subscription.key());

    let hello = SseEvent::default()
        .event("subscribed")
        .json_data(json!({ "subscriber_id": subscription.id(), "resource_key": key }));
    let events = subscription
        .into_stream()
        .map(|event| SseEvent::default().event(event.kind.as_str()).json_data(&*event));
    Sse::new(stream::once(async move { hello }).chain(events)).keep_alive(KeepAlive::default())
}

/// DELETE /api/live/:league/:season/:subscriber
async fn unsubscribe_handler(
    State(state): State<Arc<AppState>>,
    Path((league, season, subscriber)): Path<(i64, i32, Uuid)>,
) -> StatusCode {
    let key = ResourceKey::new(league, season);
    if state.hub.unsubscribe(SubscriberId::from(subscriber), key) {
        info!("SSE client {} unsubscribed from {}", subscriber, key);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// GET /api/live/:league/:season/subscribers
async fn subscribers_handler(
    State(state): State<Arc<AppState>>,
    Path((league, season)): Path<(i64, i32)>,
) -> impl IntoResponse {
    let key = ResourceKey::new(league, season);
    Json(json!({
        "subscribers": state.hub.subscriber_count(key),
        "polling": state.hub.is_polling(key),
    }))
}

/// GET /api/fixtures/:league/:season/today
async fn fixtures_today_handler(
    State(state): State<Arc<AppState>>,
    Path((league, season)): Path<(i64, i32)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .fixtures_for_day(ResourceKey::new(league, season), Utc::now().date_naive())
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /api/fixture/:id
async fn fixture_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match state.db.get_fixture(id) {
        Ok(Some(fixture)) => Ok(Json(fixture)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("fixture {} not stored", id))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// GET /api/standings/:league/:season
async fn standings_handler(
    State(state): State<Arc<AppState>>,
    Path((league, season)): Path<(i64, i32)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let key = ResourceKey::new(league, season);
    state
        .reconciler
        .cache()
        .get(key)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("no standings cached for {}", key)))
}

/// POST /api/standings/:league/:season/start
async fn standings_start_handler(
    State(state): State<Arc<AppState>>,
    Path((league, season)): Path<(i64, i32)>,
) -> impl IntoResponse {
    let key = ResourceKey::new(league, season);
    let started = state.reconciler.start(key);
    Json(json!({ "started": started, "status": state.reconciler.status(key) }))
}

/// POST /api/standings/:league/:season/stop
async fn standings_stop_handler(
    State(state): State<Arc<AppState>>,
    Path((league, season)): Path<(i64, i32)>,
) -> impl IntoResponse {
    let key = ResourceKey::new(league, season);
    let stopped = state.reconciler.stop(key);
    Json(json!({ "stopped": stopped, "status": state.reconciler.status(key) }))
}

/// GET /api/standings/:league/:season/status
async fn standings_status_handler(
    State(state): State<Arc<AppState>>,
    Path((league, season)): Path<(i64, i32)>,
) -> impl IntoResponse {
    Json(state.reconciler.status(ResourceKey::new(league, season)))
}
