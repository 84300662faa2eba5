//! Live-mode proxy behaviour against a local stand-in for the upstream API

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use livescore::server::{create_router, AppState, ServerConfig, CACHE_HEADER, SIMULATION_HEADER};
use livescore::UpstreamConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

#[derive(Clone)]
struct Upstream {
    hits: Arc<AtomicUsize>,
    failing: bool,
}

async fn scoreboard(
    State(upstream): State<Upstream>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    if upstream.failing {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "maintenance"})));
    }

    let week: u32 = params.get("week").and_then(|w| w.parse().ok()).unwrap_or(1);
    let body = json!({
        "league": {
            "league_key": params.get("league").cloned().unwrap_or_default(),
            "name": "Live League",
            "scoreboard": {
                "week": week,
                "matchups": [{
                    "matchup_id": "m1",
                    "status": "midevent",
                    "teams": [
                        {"team_key": "a", "name": "A", "points": 61.2},
                        {"team_key": "b", "name": "B", "points": 48.0}
                    ]
                }]
            }
        }
    });
    (StatusCode::OK, Json(body))
}

async fn spawn_upstream(failing: bool) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/scoreboard", get(scoreboard))
        .with_state(Upstream {
            hits: Arc::clone(&hits),
            failing,
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), hits)
}

fn live_state(base_url: String) -> Arc<AppState> {
    let config = ServerConfig {
        fixtures_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
        simulation_override: Some(false),
        upstream: UpstreamConfig {
            base_url,
            league_key: "nfl.l.1001".to_string(),
            ..UpstreamConfig::default()
        },
        ..ServerConfig::default()
    };
    Arc::new(AppState::new(config).unwrap())
}

fn get_request(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn repeated_request_is_a_cache_hit() {
    let (base_url, hits) = spawn_upstream(false).await;
    let app = create_router(live_state(base_url));

    let response = app.clone().oneshot(get_request("/api/scoreboard?week=4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_HEADER], "MISS");
    assert!(response.headers().get(SIMULATION_HEADER).is_none());
    let body = body_json(response).await;
    assert_eq!(body["league"]["league_key"], json!("nfl.l.1001"));
    assert_eq!(body["league"]["scoreboard"]["week"], json!(4));

    let response = app.clone().oneshot(get_request("/api/scoreboard?week=4")).await.unwrap();
    assert_eq!(response.headers()[CACHE_HEADER], "HIT");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let response = app.oneshot(get_request("/api/scoreboard?week=5")).await.unwrap();
    assert_eq!(response.headers()[CACHE_HEADER], "MISS");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn upstream_failure_is_bad_gateway() {
    let (base_url, hits) = spawn_upstream(true).await;
    let app = create_router(live_state(base_url));

    let response = app.oneshot(get_request("/api/scoreboard")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["type"], json!("UpstreamFailed"));
    assert!(body["error"].as_str().unwrap().contains("503"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn enabling_simulation_switches_away_from_upstream() {
    let (base_url, hits) = spawn_upstream(false).await;
    let state = live_state(base_url);
    let app = create_router(Arc::clone(&state));

    let request = Request::builder()
        .method("POST")
        .uri("/api/simulation/control")
        .header("content-type", "application/json")
        .body(Body::from(json!({"action": "enable"}).to_string()))
        .unwrap();
    assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);

    let response = app.oneshot(get_request("/api/scoreboard")).await.unwrap();
    assert_eq!(response.headers()[SIMULATION_HEADER], "1");
    assert_eq!(response.headers()[CACHE_HEADER], "MISS");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
