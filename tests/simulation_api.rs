//! HTTP-level checks of the simulation surface against the bundled fixtures

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use livescore::server::{create_router, AppState, ServerConfig, SIMULATION_HEADER};
use livescore::{FileSnapshotLoader, SnapshotStore};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

fn simulated_state() -> Arc<AppState> {
    let config = ServerConfig {
        fixtures_dir: fixtures_dir(),
        simulation_override: Some(true),
        ..ServerConfig::default()
    };
    Arc::new(AppState::new(config).unwrap())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_control(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/simulation/control")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn bundled_fixtures_all_load() {
    let store = SnapshotStore::new(
        Arc::new(FileSnapshotLoader::new(fixtures_dir().join("snapshots"))),
        25,
    );
    let numbers: Vec<usize> = (1..=25).collect();

    assert_eq!(store.preload(&numbers).await, 25);

    let first = store.get_snapshot(1).await.unwrap();
    let last = store.get_snapshot(25).await.unwrap();
    assert!(!first.has_live_items());
    assert!(store.get_snapshot(13).await.unwrap().has_live_items());
    assert!(!last.has_live_items());
}

#[tokio::test]
async fn health_check_responds() {
    let app = create_router(simulated_state());
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn status_reflects_navigation() {
    let state = simulated_state();
    let app = create_router(Arc::clone(&state));

    for action in ["next", "next", "next", "previous"] {
        let response = app
            .clone()
            .oneshot(post_control(json!({"action": action})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(Request::get("/api/simulation/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = body_json(response).await;

    assert_eq!(status["enabled"], json!(true));
    assert_eq!(status["currentSnapshot"], json!(2));
    assert_eq!(status["isPlaying"], json!(false));
    assert_eq!(status["speed"], json!(1.0));
    assert!(status["timestamp"].is_string());
}

#[tokio::test]
async fn previous_at_start_stays_put() {
    let app = create_router(simulated_state());

    let response = app
        .oneshot(post_control(json!({"action": "previous"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"]["currentIndex"], json!(0));
}

#[tokio::test]
async fn play_and_speed_controls() {
    let app = create_router(simulated_state());

    let response = app
        .clone()
        .oneshot(post_control(json!({"action": "set_speed", "speed": 50.0})))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["state"]["speed"], json!(10.0));

    let response = app
        .oneshot(post_control(json!({"action": "play"})))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["state"]["isPlaying"], json!(true));
}

#[tokio::test]
async fn malformed_control_body_is_bad_request() {
    let app = create_router(simulated_state());
    let request = Request::builder()
        .method("POST")
        .uri("/api/simulation/control")
        .header("content-type", "application/json")
        .body(Body::from("{\"snapshot\": 3}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn scoreboard_serves_selected_fixture() {
    let app = create_router(simulated_state());

    app.clone()
        .oneshot(post_control(json!({"action": "set_snapshot", "snapshot": 24})))
        .await
        .unwrap();
    let response = app
        .oneshot(Request::get("/api/scoreboard").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[SIMULATION_HEADER], "25");
    let body = body_json(response).await;
    assert_eq!(body["league"]["league_key"], json!("nfl.l.4242"));
    assert_eq!(body["league"]["scoreboard"]["matchups"][0]["status"], json!("postevent"));
}

#[tokio::test]
async fn debug_endpoint_reports_components() {
    let app = create_router(simulated_state());
    let response = app
        .oneshot(Request::get("/api/simulation/debug").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let debug = body_json(response).await;

    assert_eq!(debug["replay"]["maxSnapshots"], json!(25));
    assert_eq!(debug["polling"]["phase"], json!("Idle"));
    assert_eq!(debug["snapshots"]["max"], json!(25));
    assert_eq!(debug["simulationConfig"]["availableWeeks"], json!([1]));
}

#[tokio::test]
async fn stream_delivers_updates_and_unsubscribes_on_close() {
    let state = simulated_state();
    state.bridge.set_current_snapshot(5);
    let app = create_router(Arc::clone(&state));

    let response = app
        .oneshot(Request::get("/api/scoreboard/stream").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.coordinator.subscriber_count(), 1);

    let mut frames = response.into_body().into_data_stream();
    let mut seen = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !seen.contains("\"hasLiveItems\":true") {
            let chunk = frames.next().await.unwrap().unwrap();
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .unwrap();

    assert!(seen.starts_with("event: update"));
    assert!(seen.contains("\"league_key\":\"nfl.l.4242\""));

    drop(frames);
    assert_eq!(state.coordinator.subscriber_count(), 0);
    assert!(!state.coordinator.is_polling());
}

#[tokio::test]
async fn startup_query_overrides_environment_flag() {
    let config = ServerConfig {
        fixtures_dir: fixtures_dir(),
        simulation_override: Some(true),
        startup_query: Some("?simulation=false".to_string()),
        ..ServerConfig::default()
    };
    let state = AppState::new(config).unwrap();
    assert!(!state.bridge.is_simulation_enabled());

    let config = ServerConfig {
        fixtures_dir: fixtures_dir(),
        simulation_override: Some(true),
        ..ServerConfig::default()
    };
    assert!(AppState::new(config).unwrap().bridge.is_simulation_enabled());
}
