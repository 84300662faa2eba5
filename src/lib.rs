pub mod clock;
pub mod config;
pub mod mock;
pub mod polling;
pub mod replay;
pub mod response_cache;
pub mod scoreboard;
pub mod server;
pub mod snapshot_store;
pub mod upstream;


pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ServerConfig, SimulationConfig};
pub use mock::{ModeAwareSource, ReplaySource};
pub use polling::{
    backoff_delay, Pollable, PollPhase, PollUpdate, PollingConfig, PollingCoordinator,
    Subscription, UpstreamSource,
};
pub use replay::{
    spawn_autoplay, ControlAction, ControlError, ListenerHandle, ReplayBridge, ReplayEvent,
    ReplayState,
};
pub use response_cache::{cache_key, ResponseCache};
pub use scoreboard::{
    League, Matchup, MatchupStatus, ParseError, Scoreboard, ScoreboardSnapshot, TeamScore,
};
pub use server::{create_router, run_server, ApiError, AppState};
pub use snapshot_store::{
    FileSnapshotLoader, InMemorySnapshotLoader, SnapshotError, SnapshotLoader, SnapshotStore,
};
pub use upstream::{
    CacheStatus, FetchError, LiveScoreboardSource, ScoreboardProxy, UpstreamClient, UpstreamConfig,
};
