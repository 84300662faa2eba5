//! REST API server with Server-Sent Events support

mod error;
mod handlers;
mod routes;
mod state;

pub use crate::config::ServerConfig;
pub use error::ApiError;
pub use handlers::{
    ControlRequest, ControlResponse, SimulationStatus, StreamUpdate, CACHE_HEADER,
    SIMULATION_HEADER,
};
pub use routes::create_router;
pub use state::AppState;

use crate::replay::spawn_autoplay;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Runs the API server
///
/// Loads the simulation defaults and fixtures from `config.fixtures_dir`,
/// preloads every snapshot, starts the autoplay driver and serves until the
/// listener fails.
///
/// # Example
/// ```rust,no_run
/// use livescore::server::{run_server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     run_server(ServerConfig::default()).await?;
///     Ok(())
/// }
/// ```
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG controls verbosity; `log` records from library modules are
    // forwarded too
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let addr = format!("{}:{}", config.host, config.port);
    let autoplay_step = config.autoplay_step();

    let state = Arc::new(AppState::new(config)?);
    tracing::info!(
        "Simulation mode {} ({} snapshots)",
        if state.bridge.is_simulation_enabled() { "enabled" } else { "disabled" },
        state.bridge.max_snapshots()
    );

    let numbers: Vec<usize> = (1..=state.bridge.max_snapshots()).collect();
    state.store().preload(&numbers).await;

    let _autoplay = spawn_autoplay(Arc::clone(&state.bridge), autoplay_step);

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
