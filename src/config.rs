//! Server and simulation configuration
//!
//! [`ServerConfig`] has usable defaults and can be overridden from the
//! environment. [`SimulationConfig`] is the bundled `simulation-config.json`
//! that supplies the default simulation mode when nothing else overrides it.

use crate::polling::PollingConfig;
use crate::replay::{
    parse_flag, resolve_simulation_mode, DEFAULT_MAX_SNAPSHOTS, SIMULATION_ENV_VAR,
};
use crate::response_cache::DEFAULT_TTL_MS;
use crate::upstream::UpstreamConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// File name of the simulation defaults inside the fixtures directory
pub const SIMULATION_CONFIG_FILE: &str = "simulation-config.json";

/// Errors loading configuration files
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, message } => {
                write!(f, "Failed to read {}: {}", path.display(), message)
            }
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host address (default: "127.0.0.1")
    pub host: String,
    /// Server port (default: 3000)
    pub port: u16,
    /// Directory holding `snapshots/` and `simulation-config.json`
    pub fixtures_dir: PathBuf,
    /// Number of replay snapshots (default: 25)
    pub max_snapshots: usize,
    /// Seconds between polls (default: 20)
    pub poll_interval_secs: u64,
    /// Proxy cache time-to-live in milliseconds (default: 20000)
    pub cache_ttl_ms: i64,
    /// Autoplay step at speed 1.0, in milliseconds (default: 5000)
    pub autoplay_step_ms: u64,
    /// Simulation mode from the environment, overriding the bundled default
    pub simulation_override: Option<bool>,
    /// Startup query string; its `simulation=` flag beats the environment
    pub startup_query: Option<String>,
    pub upstream: UpstreamConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            fixtures_dir: PathBuf::from("fixtures"),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            poll_interval_secs: 20,
            cache_ttl_ms: DEFAULT_TTL_MS,
            autoplay_step_ms: 5_000,
            simulation_override: None,
            startup_query: None,
            upstream: UpstreamConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Creates a configuration with defaults apart from the listen address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerConfig {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Defaults overridden by process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    /// Unparseable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ServerConfig::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        parse_into(&lookup, "PORT", &mut config.port);
        if let Some(dir) = lookup("FIXTURES_DIR") {
            config.fixtures_dir = PathBuf::from(dir);
        }
        parse_into(&lookup, "MAX_SNAPSHOTS", &mut config.max_snapshots);
        config.max_snapshots = config.max_snapshots.max(1);
        parse_into(&lookup, "POLL_INTERVAL_SECS", &mut config.poll_interval_secs);
        parse_into(&lookup, "CACHE_TTL_MS", &mut config.cache_ttl_ms);
        parse_into(&lookup, "AUTOPLAY_STEP_MS", &mut config.autoplay_step_ms);

        if let Some(raw) = lookup(SIMULATION_ENV_VAR) {
            config.simulation_override = parse_flag(&raw);
            if config.simulation_override.is_none() {
                log::warn!("Ignoring unrecognised {}={:?}", SIMULATION_ENV_VAR, raw);
            }
        }

        if let Some(url) = lookup("UPSTREAM_BASE_URL") {
            config.upstream.base_url = url;
        }
        if let Some(token) = lookup("UPSTREAM_TOKEN").filter(|t| !t.is_empty()) {
            config.upstream.token = Some(token);
        }
        if let Some(league) = lookup("LEAGUE_KEY") {
            config.upstream.league_key = league;
        }

        config
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.fixtures_dir.join("snapshots")
    }

    pub fn simulation_config_path(&self) -> PathBuf {
        self.fixtures_dir.join(SIMULATION_CONFIG_FILE)
    }

    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            ..PollingConfig::default()
        }
    }

    pub fn autoplay_step(&self) -> Duration {
        Duration::from_millis(self.autoplay_step_ms.max(1))
    }

    /// Initial simulation mode: startup query, then environment, then `bundled`
    pub fn initial_simulation_mode(&self, bundled: bool) -> bool {
        resolve_simulation_mode(
            self.startup_query.as_deref(),
            self.simulation_override,
            bundled,
        )
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("Ignoring invalid {}={:?}", key, raw),
        }
    }
}

/// Bundled simulation defaults (`simulation-config.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_week")]
    pub current_week: u32,
    #[serde(default)]
    pub available_weeks: Vec<u32>,
}

fn default_week() -> u32 {
    1
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            enabled: false,
            current_week: default_week(),
            available_weeks: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Parses and validates a config body
    pub fn from_json(body: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig =
            serde_json::from_str(body).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `currentWeek` must be one of `availableWeeks` when any are listed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.available_weeks.is_empty() && !self.available_weeks.contains(&self.current_week) {
            return Err(ConfigError::Invalid(format!(
                "currentWeek {} is not in availableWeeks {:?}",
                self.current_week, self.available_weeks
            )));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&body)
    }

    /// Loads `path`, falling back to defaults when it is missing or broken
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Using default simulation config: {}", e);
                SimulationConfig::default()
            }
        }
    }
}
