//! Replay Bridge
//!
//! Holds the replay/simulation state (snapshot index, play state, speed and
//! whether simulation mode is on) for the whole process. The mock data layer,
//! the HTTP control surface and the autoplay driver all read and mutate the
//! same [`ReplayBridge`] and observe changes through typed [`ReplayEvent`]s.
//!
//! Every setter clamps its input and does nothing when the value would not
//! change, so listeners only ever see real transitions. Delivery is
//! synchronous and in registration order; a panicking listener is logged and
//! skipped.

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 10.0;
pub const DEFAULT_SPEED: f64 = 1.0;
pub const DEFAULT_MAX_SNAPSHOTS: usize = 25;

/// Environment flag consulted for the initial simulation mode
pub const SIMULATION_ENV_VAR: &str = "LIVESCORE_SIMULATION";
/// Query parameter consulted (before the environment) for the initial mode
pub const SIMULATION_QUERY_PARAM: &str = "simulation";

/// Snapshot of the bridge state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayState {
    /// 0-based index into the snapshot set
    pub current_index: usize,
    pub is_playing: bool,
    pub speed: f64,
    pub simulation_mode_enabled: bool,
}

impl ReplayState {
    fn initial(simulation_mode_enabled: bool) -> Self {
        ReplayState {
            current_index: 0,
            is_playing: false,
            speed: DEFAULT_SPEED,
            simulation_mode_enabled,
        }
    }

    /// 1-based number of the fixture this state points at
    pub fn snapshot_number(&self) -> usize {
        self.current_index + 1
    }
}

/// Change notifications emitted by the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    /// Full state, delivered once to every new listener
    Snapshot(ReplayState),
    IndexChanged { previous: usize, current: usize },
    PlayStateChanged(bool),
    SpeedChanged { previous: f64, current: f64 },
    SimulationModeChanged(bool),
}

impl ReplayEvent {
    /// Short machine-friendly name, used in logs and the SSE stream
    pub fn kind(&self) -> &'static str {
        match self {
            ReplayEvent::Snapshot(_) => "STATE_SNAPSHOT",
            ReplayEvent::IndexChanged { .. } => "INDEX_CHANGE",
            ReplayEvent::PlayStateChanged(_) => "PLAY_STATE_CHANGE",
            ReplayEvent::SpeedChanged { .. } => "SPEED_CHANGE",
            ReplayEvent::SimulationModeChanged(_) => "SIMULATION_MODE_CHANGE",
        }
    }
}

/// Listener callback type
pub type Listener = Arc<dyn Fn(&ReplayEvent) + Send + Sync>;

/// Read-only view for debugging tools
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayDebugInfo {
    pub state: ReplayState,
    pub max_snapshots: usize,
    pub listener_count: usize,
    pub events_emitted: u64,
}

/// Errors from applying a control action
#[derive(Debug, Clone, PartialEq)]
pub enum ControlError {
    /// Action name is not recognized
    UnknownAction(String),
    /// A required field for the action is missing
    MissingField { action: &'static str, field: &'static str },
    /// Snapshot index outside `[0, max]`
    SnapshotOutOfRange { index: i64, max: usize },
    /// Speed is not a finite number
    InvalidSpeed(f64),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::UnknownAction(action) => write!(f, "Unknown action: {}", action),
            ControlError::MissingField { action, field } => {
                write!(f, "Action '{}' requires '{}'", action, field)
            }
            ControlError::SnapshotOutOfRange { index, max } => {
                write!(f, "Snapshot {} out of range (0..={})", index, max)
            }
            ControlError::InvalidSpeed(speed) => write!(f, "Invalid speed: {}", speed),
        }
    }
}

impl std::error::Error for ControlError {}

/// A validated control request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    Enable,
    Disable,
    SetSnapshot(usize),
    Next,
    Previous,
    Reset,
    Play,
    Pause,
    SetSpeed(f64),
}

impl ControlAction {
    /// Validates a raw control request against a bridge of `max_snapshots`
    pub fn parse(
        action: &str,
        snapshot: Option<i64>,
        speed: Option<f64>,
        max_snapshots: usize,
    ) -> Result<Self, ControlError> {
        match action {
            "enable" => Ok(ControlAction::Enable),
            "disable" => Ok(ControlAction::Disable),
            "next" => Ok(ControlAction::Next),
            "previous" => Ok(ControlAction::Previous),
            "reset" => Ok(ControlAction::Reset),
            "play" => Ok(ControlAction::Play),
            "pause" => Ok(ControlAction::Pause),
            "set_snapshot" => {
                let index = snapshot.ok_or(ControlError::MissingField {
                    action: "set_snapshot",
                    field: "snapshot",
                })?;
                let last = max_snapshots.saturating_sub(1);
                if index < 0 || index as u64 > last as u64 {
                    return Err(ControlError::SnapshotOutOfRange { index, max: last });
                }
                Ok(ControlAction::SetSnapshot(index as usize))
            }
            "set_speed" => {
                let speed = speed.ok_or(ControlError::MissingField {
                    action: "set_speed",
                    field: "speed",
                })?;
                if !speed.is_finite() {
                    return Err(ControlError::InvalidSpeed(speed));
                }
                Ok(ControlAction::SetSpeed(speed))
            }
            other => Err(ControlError::UnknownAction(other.to_string())),
        }
    }
}

/// Parses a boolean flag as written in query strings and environment vars
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Picks the initial simulation mode: the `simulation` query parameter wins,
/// then the (already parsed) environment flag, then `fallback`.
pub fn resolve_simulation_mode(
    query: Option<&str>,
    env_flag: Option<bool>,
    fallback: bool,
) -> bool {
    let from_query = query.and_then(|q| {
        q.trim_start_matches('?')
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == SIMULATION_QUERY_PARAM)
            .and_then(|(_, value)| parse_flag(value))
    });

    from_query.or(env_flag).unwrap_or(fallback)
}

/// Process-wide replay state with typed change events
pub struct ReplayBridge {
    max_snapshots: usize,
    state: Mutex<ReplayState>,
    listeners: Mutex<Vec<(Uuid, Listener)>>,
    /// Serializes commits and deliveries; re-entrant so listeners may call
    /// setters.
    delivery: ReentrantMutex<()>,
    events_emitted: AtomicU64,
}

impl ReplayBridge {
    /// Creates a bridge over `max_snapshots` fixtures (at least one)
    pub fn new(max_snapshots: usize, simulation_mode_enabled: bool) -> Self {
        ReplayBridge {
            max_snapshots: max_snapshots.max(1),
            state: Mutex::new(ReplayState::initial(simulation_mode_enabled)),
            listeners: Mutex::new(Vec::new()),
            delivery: ReentrantMutex::new(()),
            events_emitted: AtomicU64::new(0),
        }
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    pub fn state(&self) -> ReplayState {
        *self.state.lock()
    }

    pub fn is_simulation_enabled(&self) -> bool {
        self.state.lock().simulation_mode_enabled
    }

    /// Moves to `index`, clamped to `[0, max_snapshots - 1]`
    pub fn set_current_snapshot(&self, index: i64) -> bool {
        let last = (self.max_snapshots - 1) as i64;
        let clamped = index.clamp(0, last) as usize;
        self.commit(|state| {
            if state.current_index == clamped {
                return None;
            }
            let previous = state.current_index;
            state.current_index = clamped;
            Some(ReplayEvent::IndexChanged {
                previous,
                current: clamped,
            })
        })
    }

    pub fn set_play_state(&self, playing: bool) -> bool {
        self.commit(|state| {
            if state.is_playing == playing {
                return None;
            }
            state.is_playing = playing;
            Some(ReplayEvent::PlayStateChanged(playing))
        })
    }

    /// Sets playback speed, clamped to `[MIN_SPEED, MAX_SPEED]`. NaN is
    /// ignored.
    pub fn set_speed(&self, speed: f64) -> bool {
        if speed.is_nan() {
            return false;
        }
        let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.commit(|state| {
            if state.speed == clamped {
                return None;
            }
            let previous = state.speed;
            state.speed = clamped;
            Some(ReplayEvent::SpeedChanged {
                previous,
                current: clamped,
            })
        })
    }

    pub fn set_simulation_mode(&self, enabled: bool) -> bool {
        self.commit(|state| {
            if state.simulation_mode_enabled == enabled {
                return None;
            }
            state.simulation_mode_enabled = enabled;
            Some(ReplayEvent::SimulationModeChanged(enabled))
        })
    }

    /// Steps forward one snapshot; no effect at the last one
    pub fn next(&self) -> bool {
        let _delivery = self.delivery.lock();
        let current = self.state().current_index as i64;
        self.set_current_snapshot(current + 1)
    }

    /// Steps back one snapshot; no effect at the first one
    pub fn previous(&self) -> bool {
        let _delivery = self.delivery.lock();
        let current = self.state().current_index as i64;
        self.set_current_snapshot(current - 1)
    }

    /// Back to the first snapshot, paused, at normal speed. Simulation mode
    /// is left alone.
    pub fn reset(&self) -> bool {
        let _delivery = self.delivery.lock();
        let index = self.set_current_snapshot(0);
        let play = self.set_play_state(false);
        let speed = self.set_speed(DEFAULT_SPEED);
        index || play || speed
    }

    /// Applies a validated control action and returns the resulting state
    pub fn apply(&self, action: ControlAction) -> ReplayState {
        let _delivery = self.delivery.lock();
        match action {
            ControlAction::Enable => self.set_simulation_mode(true),
            ControlAction::Disable => self.set_simulation_mode(false),
            ControlAction::SetSnapshot(index) => self.set_current_snapshot(index as i64),
            ControlAction::Next => self.next(),
            ControlAction::Previous => self.previous(),
            ControlAction::Reset => self.reset(),
            ControlAction::Play => self.set_play_state(true),
            ControlAction::Pause => self.set_play_state(false),
            ControlAction::SetSpeed(speed) => self.set_speed(speed),
        };
        self.state()
    }

    /// Registers `listener` and immediately hands it the full current state
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> ListenerHandle
    where
        F: Fn(&ReplayEvent) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let listener: Listener = Arc::new(listener);

        let _delivery = self.delivery.lock();
        self.listeners.lock().push((id, Arc::clone(&listener)));
        let current = self.state();
        deliver(&listener, &ReplayEvent::Snapshot(current));

        ListenerHandle {
            id,
            bridge: Arc::downgrade(self),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// State plus bookkeeping, for debugging tools only
    pub fn debug_snapshot(&self) -> ReplayDebugInfo {
        ReplayDebugInfo {
            state: self.state(),
            max_snapshots: self.max_snapshots,
            listener_count: self.listener_count(),
            events_emitted: self.events_emitted.load(Ordering::SeqCst),
        }
    }

    fn unsubscribe(&self, id: Uuid) {
        self.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
    }

    /// Applies `mutate` and, if it reports a change, delivers the event to a
    /// copy of the listener list.
    fn commit<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut ReplayState) -> Option<ReplayEvent>,
    {
        let _delivery = self.delivery.lock();
        let event = {
            let mut state = self.state.lock();
            mutate(&mut state)
        };

        let Some(event) = event else {
            return false;
        };

        self.events_emitted.fetch_add(1, Ordering::SeqCst);
        log::debug!("Replay bridge emitting {}: {:?}", event.kind(), event);

        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &listeners {
            deliver(listener, &event);
        }
        true
    }
}

fn deliver(listener: &Listener, event: &ReplayEvent) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event))).is_err() {
        log::error!("Replay listener panicked while handling {}", event.kind());
    }
}

/// Registration returned by [`ReplayBridge::subscribe`]; dropping it
/// unregisters the listener.
#[must_use = "dropping the handle unsubscribes the listener"]
pub struct ListenerHandle {
    id: Uuid,
    bridge: Weak<ReplayBridge>,
}

impl ListenerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.unsubscribe(self.id);
        }
    }
}

impl PartialEq for ListenerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ListenerHandle {}

/// Advances the bridge while it is playing, one snapshot every
/// `base_step / speed`. Playback pauses itself at the last snapshot.
pub fn spawn_autoplay(bridge: Arc<ReplayBridge>, base_step: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let wake = Arc::new(Notify::new());
        let waker = Arc::clone(&wake);
        let _listener = bridge.subscribe(move |event| {
            if matches!(
                event,
                ReplayEvent::PlayStateChanged(_) | ReplayEvent::SpeedChanged { .. }
            ) {
                waker.notify_one();
            }
        });

        loop {
            let state = bridge.state();
            if !state.is_playing {
                wake.notified().await;
                continue;
            }

            let step = base_step.div_f64(state.speed);
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                // Play state or speed changed mid-step; start over with the new values
                _ = wake.notified() => continue,
            }

            if !bridge.state().is_playing {
                continue;
            }
            if !bridge.next() {
                log::info!("Autoplay reached the last snapshot, pausing");
                bridge.set_play_state(false);
            }
        }
    })
}
