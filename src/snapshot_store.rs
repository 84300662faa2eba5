//! Numbered scoreboard fixtures for replay
//!
//! Snapshots are addressed 1-based (`snapshot_01.json` is the first). A
//! snapshot is cached only after it loads and passes the shape check, so a
//! broken fixture is retried on every request instead of being remembered as
//! a failure.

use crate::scoreboard::{ParseError, ScoreboardSnapshot};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Errors that can occur while loading a snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotError {
    /// Requested number is outside `[1, max]`
    OutOfRange { number: usize, max: usize },
    /// No fixture exists for this number
    NotFound(usize),
    /// Fixture exists but could not be read
    Io(String),
    /// Fixture was read but did not parse or failed the shape check
    Invalid { number: usize, error: ParseError },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::OutOfRange { number, max } => {
                write!(f, "Snapshot {} out of range (1..={})", number, max)
            }
            SnapshotError::NotFound(number) => write!(f, "Snapshot {} not found", number),
            SnapshotError::Io(msg) => write!(f, "Snapshot read failed: {}", msg),
            SnapshotError::Invalid { number, error } => {
                write!(f, "Snapshot {} is invalid: {}", number, error)
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Source of raw fixture bytes
pub trait SnapshotLoader: Send + Sync {
    /// Reads the raw body of snapshot `number` (1-based)
    fn load(&self, number: usize) -> BoxFuture<'_, Result<Vec<u8>, SnapshotError>>;
}

/// File name of a fixture, e.g. `snapshot_07.json`
pub fn snapshot_file_name(number: usize) -> String {
    format!("snapshot_{:02}.json", number)
}

/// Loads fixtures from `<dir>/snapshot_<NN>.json`
#[derive(Debug, Clone)]
pub struct FileSnapshotLoader {
    dir: PathBuf,
}

impl FileSnapshotLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSnapshotLoader { dir: dir.into() }
    }

    pub fn path_for(&self, number: usize) -> PathBuf {
        self.dir.join(snapshot_file_name(number))
    }
}

impl SnapshotLoader for FileSnapshotLoader {
    fn load(&self, number: usize) -> BoxFuture<'_, Result<Vec<u8>, SnapshotError>> {
        let path = self.path_for(number);
        async move {
            tokio::fs::read(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SnapshotError::NotFound(number),
                _ => SnapshotError::Io(format!("{}: {}", path.display(), e)),
            })
        }
        .boxed()
    }
}

/// In-memory fixtures, counting how often each one is loaded
#[derive(Debug, Default)]
pub struct InMemorySnapshotLoader {
    bodies: HashMap<usize, Vec<u8>>,
    loads: Mutex<HashMap<usize, usize>>,
    total_loads: AtomicUsize,
}

impl InMemorySnapshotLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the body served for `number`
    pub fn insert(&mut self, number: usize, body: impl Into<Vec<u8>>) -> &mut Self {
        self.bodies.insert(number, body.into());
        self
    }

    /// How many times `number` has been requested from this loader
    pub fn load_count(&self, number: usize) -> usize {
        self.loads.lock().get(&number).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.total_loads.load(Ordering::SeqCst)
    }
}

impl SnapshotLoader for InMemorySnapshotLoader {
    fn load(&self, number: usize) -> BoxFuture<'_, Result<Vec<u8>, SnapshotError>> {
        *self.loads.lock().entry(number).or_insert(0) += 1;
        self.total_loads.fetch_add(1, Ordering::SeqCst);
        let result = self
            .bodies
            .get(&number)
            .cloned()
            .ok_or(SnapshotError::NotFound(number));
        futures::future::ready(result).boxed()
    }
}

/// Memoizing, validating front for a [`SnapshotLoader`]
pub struct SnapshotStore {
    loader: Arc<dyn SnapshotLoader>,
    max_snapshots: usize,
    cache: Mutex<HashMap<usize, Arc<ScoreboardSnapshot>>>,
}

impl SnapshotStore {
    /// Creates a store serving snapshots `1..=max_snapshots`
    pub fn new(loader: Arc<dyn SnapshotLoader>, max_snapshots: usize) -> Self {
        SnapshotStore {
            loader,
            max_snapshots,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    /// Loads snapshot `number`, reporting why it is unavailable
    pub async fn load(&self, number: usize) -> Result<Arc<ScoreboardSnapshot>, SnapshotError> {
        if number == 0 || number > self.max_snapshots {
            return Err(SnapshotError::OutOfRange {
                number,
                max: self.max_snapshots,
            });
        }

        let cached = self.cache.lock().get(&number).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let bytes = self.loader.load(number).await?;
        let snapshot = ScoreboardSnapshot::from_slice(&bytes)
            .map(Arc::new)
            .map_err(|error| SnapshotError::Invalid { number, error })?;

        log::debug!("Cached snapshot {} (week {})", number, snapshot.week());
        self.cache.lock().insert(number, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Returns snapshot `number`, or `None` if it is out of range or fails to
    /// load. Failures are logged and never cached.
    pub async fn get_snapshot(&self, number: usize) -> Option<Arc<ScoreboardSnapshot>> {
        match self.load(number).await {
            Ok(snapshot) => Some(snapshot),
            Err(SnapshotError::OutOfRange { .. }) => None,
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    /// Loads every requested snapshot concurrently, ignoring individual
    /// failures. Returns how many are available afterwards.
    pub async fn preload(&self, numbers: &[usize]) -> usize {
        let results = join_all(numbers.iter().map(|&n| self.get_snapshot(n))).await;
        let loaded = results.iter().filter(|r| r.is_some()).count();
        log::info!("Preloaded {}/{} snapshots", loaded, numbers.len());
        loaded
    }

    /// Drops every memoized snapshot
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_cached(&self, number: usize) -> bool {
        self.cache.lock().contains_key(&number)
    }
}
