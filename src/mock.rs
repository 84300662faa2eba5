//! Mock data layer
//!
//! [`ReplaySource`] serves the snapshot matching the bridge's current index
//! (index `i` serves `snapshot_<i+1>`). [`ModeAwareSource`] picks between
//! replay and the live upstream on every fetch, so toggling simulation mode
//! takes effect on the next poll without rebuilding the coordinator.

use crate::polling::UpstreamSource;
use crate::replay::ReplayBridge;
use crate::scoreboard::ScoreboardSnapshot;
use crate::snapshot_store::{SnapshotError, SnapshotStore};
use crate::upstream::FetchError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

impl From<SnapshotError> for FetchError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Invalid { error, .. } => FetchError::Parse(error),
            other => FetchError::Unavailable(other.to_string()),
        }
    }
}

/// Serves recorded snapshots at the bridge's current position
pub struct ReplaySource {
    bridge: Arc<ReplayBridge>,
    store: Arc<SnapshotStore>,
}

impl ReplaySource {
    pub fn new(bridge: Arc<ReplayBridge>, store: Arc<SnapshotStore>) -> Self {
        ReplaySource { bridge, store }
    }

    pub fn bridge(&self) -> &Arc<ReplayBridge> {
        &self.bridge
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// The 1-based snapshot number and its data for the current index
    pub async fn current(&self) -> Result<(usize, Arc<ScoreboardSnapshot>), SnapshotError> {
        let number = self.bridge.state().snapshot_number();
        let snapshot = self.store.load(number).await?;
        Ok((number, snapshot))
    }
}

impl UpstreamSource<ScoreboardSnapshot> for ReplaySource {
    fn fetch(&self) -> BoxFuture<'_, Result<ScoreboardSnapshot, FetchError>> {
        async move {
            let (number, snapshot) = self.current().await?;
            log::debug!("Serving replay snapshot {}", number);
            Ok(snapshot.as_ref().clone())
        }
        .boxed()
    }
}

/// Routes each fetch to replay or live depending on simulation mode
pub struct ModeAwareSource {
    replay: Arc<ReplaySource>,
    live: Arc<dyn UpstreamSource<ScoreboardSnapshot>>,
}

impl ModeAwareSource {
    pub fn new(
        replay: Arc<ReplaySource>,
        live: Arc<dyn UpstreamSource<ScoreboardSnapshot>>,
    ) -> Self {
        ModeAwareSource { replay, live }
    }
}

impl UpstreamSource<ScoreboardSnapshot> for ModeAwareSource {
    fn fetch(&self) -> BoxFuture<'_, Result<ScoreboardSnapshot, FetchError>> {
        if self.replay.bridge().is_simulation_enabled() {
            self.replay.fetch()
        } else {
            self.live.fetch()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoreboard::testing::scoreboard_json;
    use crate::snapshot_store::InMemorySnapshotLoader;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLive {
        calls: AtomicUsize,
    }

    impl UpstreamSource<ScoreboardSnapshot> for CountingLive {
        fn fetch(&self) -> BoxFuture<'_, Result<ScoreboardSnapshot, FetchError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Err(FetchError::Status(503))).boxed()
        }
    }

    fn replay_with(weeks: &[usize], max: usize) -> Arc<ReplaySource> {
        let mut loader = InMemorySnapshotLoader::new();
        for &n in weeks {
            loader.insert(n, scoreboard_json(n as u32, &["midevent"]).to_string());
        }
        let bridge = Arc::new(ReplayBridge::new(max, true));
        let store = Arc::new(SnapshotStore::new(Arc::new(loader), max));
        Arc::new(ReplaySource::new(bridge, store))
    }

    #[tokio::test]
    async fn test_index_maps_to_next_snapshot_number() {
        let replay = replay_with(&[1, 2, 6], 25);

        let (number, snapshot) = replay.current().await.unwrap();
        assert_eq!(number, 1);
        assert_eq!(snapshot.week(), 1);

        replay.bridge().set_current_snapshot(5);
        let snapshot = replay.fetch().await.unwrap();
        assert_eq!(snapshot.week(), 6);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_unavailable() {
        let replay = replay_with(&[1], 25);
        replay.bridge().set_current_snapshot(2);

        assert!(matches!(
            replay.fetch().await,
            Err(FetchError::Unavailable(msg)) if msg.contains("Snapshot 3")
        ));
    }

    #[tokio::test]
    async fn test_mode_aware_source_follows_bridge() {
        let replay = replay_with(&[1], 25);
        let live = Arc::new(CountingLive {
            calls: AtomicUsize::new(0),
        });
        let source = ModeAwareSource::new(Arc::clone(&replay), live.clone());

        assert_eq!(source.fetch().await.unwrap().week(), 1);
        assert_eq!(live.calls.load(Ordering::SeqCst), 0);

        replay.bridge().set_simulation_mode(false);
        assert_eq!(source.fetch().await.unwrap_err(), FetchError::Status(503));
        assert_eq!(live.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_snapshot_maps_to_parse_error() {
        let err = SnapshotError::Invalid {
            number: 2,
            error: crate::scoreboard::ParseError::MissingField("league".to_string()),
        };
        assert!(matches!(FetchError::from(err), FetchError::Parse(_)));
    }
}
