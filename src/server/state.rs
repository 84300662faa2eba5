//! Shared application state for the API server

use crate::clock::SystemClock;
use crate::config::{ServerConfig, SimulationConfig};
use crate::mock::{ModeAwareSource, ReplaySource};
use crate::polling::{PollingConfig, PollingCoordinator, UpstreamSource};
use crate::replay::{ListenerHandle, ReplayBridge, ReplayEvent};
use crate::response_cache::ResponseCache;
use crate::scoreboard::ScoreboardSnapshot;
use crate::snapshot_store::{FileSnapshotLoader, SnapshotStore};
use crate::upstream::{FetchError, LiveScoreboardSource, ScoreboardProxy, UpstreamClient};
use std::sync::Arc;

/// Every long-lived service, constructed once and shared by the handlers
pub struct AppState {
    pub config: ServerConfig,
    /// Bundled simulation defaults, as loaded at startup
    pub simulation: SimulationConfig,
    pub bridge: Arc<ReplayBridge>,
    pub replay: Arc<ReplaySource>,
    /// Live upstream access through the shared response cache
    pub proxy: Arc<ScoreboardProxy>,
    /// Single polling loop feeding every scoreboard stream
    pub coordinator: Arc<PollingCoordinator<ScoreboardSnapshot>>,
    /// Refreshes the coordinator when the replay position or mode changes
    _replay_refresh: ListenerHandle,
}

impl AppState {
    /// Builds the file-backed state described by `config`
    pub fn new(config: ServerConfig) -> Result<Self, FetchError> {
        let simulation = SimulationConfig::load_or_default(&config.simulation_config_path());
        let enabled = config.initial_simulation_mode(simulation.enabled);

        let bridge = Arc::new(ReplayBridge::new(config.max_snapshots, enabled));
        let loader = Arc::new(FileSnapshotLoader::new(config.snapshots_dir()));
        let store = Arc::new(SnapshotStore::new(loader, config.max_snapshots));

        let client = UpstreamClient::new(config.upstream.clone())?;
        let cache = Arc::new(ResponseCache::with_clock(
            chrono::Duration::milliseconds(config.cache_ttl_ms),
            Arc::new(SystemClock),
        ));
        let proxy = Arc::new(ScoreboardProxy::new(client, cache));

        let polling = config.polling();
        Ok(Self::from_parts(config, simulation, bridge, store, proxy, polling))
    }

    /// Wires already-built services, polling live data through `proxy`
    pub fn from_parts(
        config: ServerConfig,
        simulation: SimulationConfig,
        bridge: Arc<ReplayBridge>,
        store: Arc<SnapshotStore>,
        proxy: Arc<ScoreboardProxy>,
        polling: PollingConfig,
    ) -> Self {
        let live: Arc<dyn UpstreamSource<ScoreboardSnapshot>> =
            Arc::new(LiveScoreboardSource::new(Arc::clone(&proxy), None));
        let replay = Arc::new(ReplaySource::new(Arc::clone(&bridge), store));
        let source: Arc<dyn UpstreamSource<ScoreboardSnapshot>> =
            Arc::new(ModeAwareSource::new(Arc::clone(&replay), live));
        let coordinator = Arc::new(PollingCoordinator::new(source, polling));

        let weak = Arc::downgrade(&coordinator);
        let replay_refresh = bridge.subscribe(move |event| {
            if matches!(
                event,
                ReplayEvent::IndexChanged { .. } | ReplayEvent::SimulationModeChanged(_)
            ) {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.refresh();
                }
            }
        });

        AppState {
            config,
            simulation,
            bridge,
            replay,
            proxy,
            coordinator,
            _replay_refresh: replay_refresh,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        self.replay.store()
    }
}
