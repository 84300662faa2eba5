//! Polling Coordinator
//!
//! Owns a single polling loop against an [`UpstreamSource`] for as long as at
//! least one subscriber is attached, and fans every outcome out to all of
//! them. Failed fetches are retried with bounded exponential backoff before a
//! failure is broadcast.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Fetching -> Success
//!                  -> RetryScheduled -> Fetching
//!                  -> Failed
//! ```
//!
//! The first subscriber starts the loop (one fetch immediately, then one per
//! interval tick). Dropping the last [`Subscription`] stops it; a fetch that
//! is already in flight is allowed to finish but its result is thrown away.

use crate::scoreboard::ScoreboardSnapshot;
use crate::upstream::FetchError;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Anything the coordinator can poll for
pub trait UpstreamSource<T>: Send + Sync {
    /// Performs one fetch
    fn fetch(&self) -> BoxFuture<'_, Result<T, FetchError>>;
}

/// Payloads the coordinator can report live status for
pub trait Pollable: Send + Sync + 'static {
    fn has_live_items(&self) -> bool;
}

impl Pollable for ScoreboardSnapshot {
    fn has_live_items(&self) -> bool {
        ScoreboardSnapshot::has_live_items(self)
    }
}

/// Configuration for the polling loop
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Time between interval-triggered fetches (default: 20s)
    pub interval: Duration,
    /// Retries after a failed fetch before the failure is broadcast (default: 3)
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry (default: 1s)
    pub base_backoff: Duration,
    /// Upper bound on any retry delay (default: 10s)
    pub max_backoff: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            interval: Duration::from_secs(20),
            max_retries: 3,
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(10_000),
        }
    }
}

/// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped
pub fn backoff_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32
        .checked_shl(retry.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// No loop running
    Idle,
    /// A fetch is in flight
    Fetching,
    /// Last fetch succeeded
    Success,
    /// Last fetch failed, retry `attempt` will start after `delay`
    RetryScheduled { attempt: u32, delay: Duration },
    /// Retries exhausted, waiting for the next interval tick
    Failed,
}

impl fmt::Display for PollPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollPhase::Idle => write!(f, "Idle"),
            PollPhase::Fetching => write!(f, "Fetching"),
            PollPhase::Success => write!(f, "Success"),
            PollPhase::RetryScheduled { attempt, delay } => {
                write!(f, "RetryScheduled (attempt {} in {:?})", attempt, delay)
            }
            PollPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// What subscribers receive: last good value plus last error, if any
#[derive(Debug)]
pub struct PollUpdate<T> {
    pub value: Option<Arc<T>>,
    pub error: Option<String>,
}

impl<T> Clone for PollUpdate<T> {
    fn clone(&self) -> Self {
        PollUpdate {
            value: self.value.clone(),
            error: self.error.clone(),
        }
    }
}

/// Latest known state of the polled data
struct PolledValue<T> {
    value: Option<Arc<T>>,
    error: Option<String>,
    retry_count: u32,
    updated_at: Option<DateTime<Utc>>,
}

impl<T> PolledValue<T> {
    fn empty() -> Self {
        PolledValue {
            value: None,
            error: None,
            retry_count: 0,
            updated_at: None,
        }
    }

    fn update(&self) -> PollUpdate<T> {
        PollUpdate {
            value: self.value.clone(),
            error: self.error.clone(),
        }
    }
}

/// Subscriber callback type
pub type Callback<T> = Arc<dyn Fn(&PollUpdate<T>) + Send + Sync>;

struct LoopHandle {
    generation: u64,
    stop: Arc<Notify>,
    refresh: Arc<Notify>,
}

struct Shared<T> {
    subscribers: Vec<(Uuid, Callback<T>)>,
    polled: PolledValue<T>,
    phase: PollPhase,
    active: Option<LoopHandle>,
    next_generation: u64,
}

impl<T> Shared<T> {
    fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|handle| handle.generation == generation)
    }
}

enum Step {
    /// Loop was stopped; discard and exit
    Stopped,
    /// Cycle finished, outcome broadcast
    Done,
    /// Retry after this delay
    Retry(Duration),
}

/// Single polling loop shared by any number of subscribers
pub struct PollingCoordinator<T: Pollable> {
    source: Arc<dyn UpstreamSource<T>>,
    config: PollingConfig,
    shared: Mutex<Shared<T>>,
    /// Serializes deliveries so a new subscriber's first update cannot
    /// interleave with a broadcast. Re-entrant so callbacks may call back in.
    delivery: ReentrantMutex<()>,
    fetch_count: AtomicU64,
}

impl<T: Pollable> PollingCoordinator<T> {
    pub fn new(source: Arc<dyn UpstreamSource<T>>, config: PollingConfig) -> Self {
        PollingCoordinator {
            source,
            config,
            shared: Mutex::new(Shared {
                subscribers: Vec::new(),
                polled: PolledValue::empty(),
                phase: PollPhase::Idle,
                active: None,
                next_generation: 0,
            }),
            delivery: ReentrantMutex::new(()),
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Attaches `callback`, hands it the current value straight away and
    /// starts polling if it is the first subscriber.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription<T>
    where
        F: Fn(&PollUpdate<T>) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let callback: Callback<T> = Arc::new(callback);

        let _delivery = self.delivery.lock();
        let (current, start) = {
            let mut shared = self.shared.lock();
            shared.subscribers.push((id, Arc::clone(&callback)));

            let start = if shared.active.is_none() {
                let generation = shared.next_generation;
                shared.next_generation += 1;
                let handle = LoopHandle {
                    generation,
                    stop: Arc::new(Notify::new()),
                    refresh: Arc::new(Notify::new()),
                };
                let start = (
                    generation,
                    Arc::clone(&handle.stop),
                    Arc::clone(&handle.refresh),
                );
                shared.active = Some(handle);
                Some(start)
            } else {
                None
            };
            (shared.polled.update(), start)
        };

        deliver(&callback, &current);

        if let Some((generation, stop, refresh)) = start {
            log::info!("Starting polling loop {} every {:?}", generation, self.config.interval);
            tokio::spawn(Arc::clone(self).run_loop(generation, stop, refresh));
        }

        Subscription {
            id,
            coordinator: Arc::downgrade(self),
        }
    }

    /// Requests an immediate fetch. Ignored when nobody is subscribed. The
    /// interval schedule is left as it is.
    pub fn refresh(&self) {
        let shared = self.shared.lock();
        if let Some(handle) = &shared.active {
            log::debug!("Refresh requested for polling loop {}", handle.generation);
            handle.refresh.notify_one();
        }
    }

    /// Latest value and error, without side effects
    pub fn current(&self) -> PollUpdate<T> {
        self.shared.lock().polled.update()
    }

    /// Whether the latest value has anything in progress
    pub fn has_live_items(&self) -> bool {
        self.shared
            .lock()
            .polled
            .value
            .as_ref()
            .is_some_and(|value| value.has_live_items())
    }

    pub fn is_polling(&self) -> bool {
        self.shared.lock().active.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    pub fn phase(&self) -> PollPhase {
        self.shared.lock().phase
    }

    pub fn retry_count(&self) -> u32 {
        self.shared.lock().polled.retry_count
    }

    /// Time of the last successful fetch
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().polled.updated_at
    }

    /// Total fetches issued since creation
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    fn unsubscribe(&self, id: Uuid) {
        let mut shared = self.shared.lock();
        shared.subscribers.retain(|(sub_id, _)| *sub_id != id);

        if shared.subscribers.is_empty() {
            if let Some(handle) = shared.active.take() {
                log::info!("Last subscriber left, stopping polling loop {}", handle.generation);
                handle.stop.notify_one();
                shared.phase = PollPhase::Idle;
            }
        }
    }

    async fn run_loop(self: Arc<Self>, generation: u64, stop: Arc<Notify>, refresh: Arc<Notify>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let keep_going = tokio::select! {
                biased;
                _ = stop.notified() => false,
                _ = ticker.tick() => self.run_cycle(generation, &stop, true).await,
                _ = refresh.notified() => self.run_cycle(generation, &stop, false).await,
            };
            if !keep_going {
                break;
            }
        }

        log::debug!("Polling loop {} exited", generation);
    }

    /// One fetch plus its retries. Returns false once the loop has been
    /// stopped.
    async fn run_cycle(&self, generation: u64, stop: &Notify, interval_tick: bool) -> bool {
        if interval_tick && !self.reset_retries(generation) {
            return false;
        }

        loop {
            if !self.begin_fetch(generation) {
                return false;
            }
            let outcome = self.source.fetch().await;

            match self.apply_outcome(generation, outcome) {
                Step::Stopped => return false,
                Step::Done => return true,
                Step::Retry(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.notified() => return false,
                    }
                }
            }
        }
    }

    fn reset_retries(&self, generation: u64) -> bool {
        let mut shared = self.shared.lock();
        if !shared.is_current(generation) {
            return false;
        }
        shared.polled.retry_count = 0;
        true
    }

    fn begin_fetch(&self, generation: u64) -> bool {
        let mut shared = self.shared.lock();
        if !shared.is_current(generation) {
            return false;
        }
        shared.phase = PollPhase::Fetching;
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Records a fetch outcome and broadcasts it when it is final
    fn apply_outcome(&self, generation: u64, outcome: Result<T, FetchError>) -> Step {
        let _delivery = self.delivery.lock();

        let (update, subscribers) = {
            let mut shared = self.shared.lock();
            if !shared.is_current(generation) {
                log::debug!("Discarding fetch result from stopped loop {}", generation);
                return Step::Stopped;
            }

            match outcome {
                Ok(value) => {
                    shared.polled.value = Some(Arc::new(value));
                    shared.polled.error = None;
                    shared.polled.retry_count = 0;
                    shared.polled.updated_at = Some(Utc::now());
                    shared.phase = PollPhase::Success;
                }
                Err(err) => {
                    shared.polled.retry_count += 1;
                    let retry = shared.polled.retry_count;

                    if retry <= self.config.max_retries {
                        let delay =
                            backoff_delay(retry, self.config.base_backoff, self.config.max_backoff);
                        log::warn!(
                            "Fetch failed ({}), retry {}/{} in {:?}",
                            err,
                            retry,
                            self.config.max_retries,
                            delay
                        );
                        shared.phase = PollPhase::RetryScheduled {
                            attempt: retry,
                            delay,
                        };
                        return Step::Retry(delay);
                    }

                    log::error!("Fetch failed after {} retries: {}", self.config.max_retries, err);
                    shared.polled.error = Some(err.to_string());
                    shared.phase = PollPhase::Failed;
                }
            }

            let subscribers: Vec<Callback<T>> = shared
                .subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect();
            (shared.polled.update(), subscribers)
        };

        for callback in &subscribers {
            deliver(callback, &update);
        }
        Step::Done
    }
}

fn deliver<T>(callback: &Callback<T>, update: &PollUpdate<T>) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(update))).is_err() {
        log::error!("Polling subscriber panicked while handling an update");
    }
}

/// Handle returned by [`PollingCoordinator::subscribe`]; dropping it detaches
/// the subscriber.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription<T: Pollable> {
    id: Uuid,
    coordinator: Weak<PollingCoordinator<T>>,
}

impl<T: Pollable> Subscription<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl<T: Pollable> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.unsubscribe(self.id);
        }
    }
}

impl<T: Pollable> PartialEq for Subscription<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: Pollable> Eq for Subscription<T> {}
