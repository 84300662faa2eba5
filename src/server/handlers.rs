//! HTTP request handlers for API endpoints

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;

use super::error::ApiError;
use super::state::AppState;
use crate::polling::PollUpdate;
use crate::replay::{ControlAction, ReplayState};
use crate::scoreboard::ScoreboardSnapshot;

/// Response header telling whether the proxy cache served the body
pub const CACHE_HEADER: &str = "x-cache";
/// Response header carrying the replay snapshot number in simulation mode
pub const SIMULATION_HEADER: &str = "x-simulation";

/// Health check endpoint
///
/// Returns a simple status response to verify the server is running
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok"
    }))
}

/// Replay state as reported to clients
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatus {
    pub enabled: bool,
    /// 0-based index into the fixtures
    pub current_snapshot: usize,
    pub total_snapshots: usize,
    pub speed: f64,
    pub is_playing: bool,
    pub timestamp: DateTime<Utc>,
}

/// GET /api/simulation/status
pub async fn simulation_status(State(state): State<Arc<AppState>>) -> Json<SimulationStatus> {
    let replay = state.bridge.state();
    Json(SimulationStatus {
        enabled: replay.simulation_mode_enabled,
        current_snapshot: replay.current_index,
        total_snapshots: state.bridge.max_snapshots(),
        speed: replay.speed,
        is_playing: replay.is_playing,
        timestamp: Utc::now(),
    })
}

/// Body of a control request
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default)]
    pub snapshot: Option<i64>,
    #[serde(default)]
    pub speed: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub state: ReplayState,
}

/// POST /api/simulation/control
///
/// Invalid requests are rejected with 400 and leave the replay state untouched.
pub async fn simulation_control(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, ApiError> {
    let Json(request) = payload?;
    let action = ControlAction::parse(
        &request.action,
        request.snapshot,
        request.speed,
        state.bridge.max_snapshots(),
    )?;

    let replay = state.bridge.apply(action);
    tracing::info!(
        "Simulation control {:?} -> index {}, playing {}, speed {}, enabled {}",
        action,
        replay.current_index,
        replay.is_playing,
        replay.speed,
        replay.simulation_mode_enabled
    );

    Ok(Json(ControlResponse {
        success: true,
        state: replay,
    }))
}

/// GET /api/simulation/debug
pub async fn simulation_debug(State(state): State<Arc<AppState>>) -> Json<Value> {
    let coordinator = &state.coordinator;
    Json(json!({
        "replay": state.bridge.debug_snapshot(),
        "polling": {
            "phase": coordinator.phase().to_string(),
            "isPolling": coordinator.is_polling(),
            "subscribers": coordinator.subscriber_count(),
            "retryCount": coordinator.retry_count(),
            "fetchCount": coordinator.fetch_count(),
            "hasLiveItems": coordinator.has_live_items(),
            "lastUpdated": coordinator.last_updated(),
        },
        "cache": {
            "entries": state.proxy.cache().len(),
            "ttlMs": state.proxy.cache().ttl().num_milliseconds(),
        },
        "snapshots": {
            "cached": state.store().cached_count(),
            "max": state.store().max_snapshots(),
        },
        "simulationConfig": state.simulation,
    }))
}

/// Query parameters for the scoreboard proxy
#[derive(Debug, Deserialize)]
pub struct ScoreboardQuery {
    pub week: Option<u32>,
}

/// GET /api/scoreboard
///
/// In simulation mode the fixture selected by the replay bridge is served and
/// `week` is ignored; otherwise the request goes through the response cache.
pub async fn get_scoreboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScoreboardQuery>,
) -> Result<Response, ApiError> {
    if state.bridge.is_simulation_enabled() {
        let (number, snapshot) = state.replay.current().await?;
        let headers = [
            (CACHE_HEADER, "MISS".to_string()),
            (SIMULATION_HEADER, number.to_string()),
        ];
        return Ok((headers, Json(snapshot.as_ref())).into_response());
    }

    let (body, cache_status) = state.proxy.scoreboard_json(query.week).await?;
    Ok(([(CACHE_HEADER, cache_status.as_header())], Json(body)).into_response())
}

/// Payload of an `update` event on the scoreboard stream
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUpdate<'a> {
    pub value: Option<&'a ScoreboardSnapshot>,
    pub error: Option<&'a str>,
    pub has_live_items: bool,
}

impl<'a> From<&'a PollUpdate<ScoreboardSnapshot>> for StreamUpdate<'a> {
    fn from(update: &'a PollUpdate<ScoreboardSnapshot>) -> Self {
        StreamUpdate {
            value: update.value.as_deref(),
            error: update.error.as_deref(),
            has_live_items: update
                .value
                .as_ref()
                .map(|v| v.has_live_items())
                .unwrap_or(false),
        }
    }
}

/// GET /api/scoreboard/stream - SSE feed of polling updates
///
/// The stream owns the polling subscription, so a client disconnect drops it
/// and the loop stops once nobody else is listening.
pub async fn scoreboard_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PollUpdate<ScoreboardSnapshot>>();
    let subscription = state.coordinator.subscribe(move |update| {
        // Receiver gone means the stream is being torn down
        let _ = tx.send(update.clone());
    });
    tracing::info!(
        "Scoreboard stream opened ({} subscribers)",
        state.coordinator.subscriber_count()
    );

    let stream = async_stream::stream! {
        let _subscription = subscription;
        while let Some(update) = rx.recv().await {
            match Event::default().event("update").json_data(StreamUpdate::from(&update)) {
                Ok(event) => yield Ok(event),
                Err(e) => tracing::warn!("Dropping unserializable update: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
