//! Live scoreboard API server binary
//!
//! Run with: `cargo run --bin livescore-server [?simulation=true]`

use livescore::{run_server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tracing is initialized in run_server(); RUST_LOG controls the level:
    //   RUST_LOG=debug cargo run --bin livescore-server
    //   RUST_LOG=livescore::polling=debug cargo run --bin livescore-server
    let mut config = ServerConfig::from_env();
    config.startup_query = std::env::args().nth(1);

    println!("Starting live scoreboard server...");
    println!("   Host: {}", config.host);
    println!("   Port: {}", config.port);
    println!("   Fixtures: {}", config.fixtures_dir.display());
    println!("   Upstream: {} ({})", config.upstream.base_url, config.upstream.league_key);
    match (&config.startup_query, config.simulation_override) {
        (Some(query), _) => println!("   Simulation query: {}", query),
        (None, Some(enabled)) => println!("   Simulation: {} (environment)", enabled),
        (None, None) => println!("   Simulation: from simulation-config.json"),
    }
    println!();
    println!("Available endpoints:");
    println!("  GET  /health                   - Health check");
    println!("  GET  /api/simulation/status    - Replay state");
    println!("  POST /api/simulation/control   - Replay control");
    println!("  GET  /api/simulation/debug     - Component diagnostics");
    println!("  GET  /api/scoreboard?week=N    - Scoreboard (cached proxy or replay)");
    println!("  GET  /api/scoreboard/stream    - SSE scoreboard updates");
    println!();

    run_server(config).await?;

    Ok(())
}
