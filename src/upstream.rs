//! Upstream fantasy API client and cached proxy
//!
//! [`UpstreamClient`] performs raw GET requests against the third-party API.
//! [`ScoreboardProxy`] puts the shared [`ResponseCache`] in front of it; it is
//! the only TTL cache in the system, used both by the HTTP proxy endpoint and
//! by the polling loop (through [`LiveScoreboardSource`]).

use crate::polling::UpstreamSource;
use crate::response_cache::ResponseCache;
use crate::scoreboard::{ParseError, ScoreboardSnapshot};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Endpoint name used for scoreboard requests and their cache keys
pub const SCOREBOARD_ENDPOINT: &str = "scoreboard";

/// Errors from fetching upstream data
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// HTTP client creation failed
    ClientCreation(String),
    /// Request never produced a response
    Network(String),
    /// Upstream answered with a non-2xx status
    Status(u16),
    /// Response arrived but is not a usable payload
    Parse(ParseError),
    /// Replay data for the current position is unavailable
    Unavailable(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::ClientCreation(msg) => write!(f, "Client creation error: {}", msg),
            FetchError::Network(msg) => write!(f, "Network error: {}", msg),
            FetchError::Status(code) => write!(f, "Upstream returned HTTP {}", code),
            FetchError::Parse(err) => write!(f, "Malformed upstream payload: {}", err),
            FetchError::Unavailable(msg) => write!(f, "Data unavailable: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<ParseError> for FetchError {
    fn from(err: ParseError) -> Self {
        FetchError::Parse(err)
    }
}

/// Configuration for the upstream client
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the upstream API, without a trailing slash
    pub base_url: String,
    /// League whose scoreboard is polled
    pub league_key: String,
    /// Bearer token, if the upstream requires one
    pub token: Option<String>,
    /// Request timeout in seconds (default: 10)
    pub timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            base_url: "https://fantasysports.yahooapis.com/fantasy/v2".to_string(),
            league_key: "nfl.l.0".to_string(),
            token: None,
            timeout_seconds: 10,
        }
    }
}

/// Thin HTTP client for the upstream API
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| FetchError::ClientCreation(e.to_string()))?;

        Ok(UpstreamClient { client, config })
    }

    /// GETs `<base_url>/<endpoint>` with `params` and decodes the JSON body
    pub async fn get_json(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint);

        let mut request = self.client.get(&url).query(params);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::Parse(ParseError::InvalidJson(e.to_string())))
    }
}

/// Whether a proxied response came from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    /// Value for the `X-Cache` response header
    pub fn as_header(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Upstream client with the shared response cache in front of it
pub struct ScoreboardProxy {
    client: UpstreamClient,
    cache: Arc<ResponseCache<Value>>,
}

impl ScoreboardProxy {
    pub fn new(client: UpstreamClient, cache: Arc<ResponseCache<Value>>) -> Self {
        ScoreboardProxy { client, cache }
    }

    pub fn cache(&self) -> &ResponseCache<Value> {
        &self.cache
    }

    fn scoreboard_params(&self, week: Option<u32>) -> Vec<(String, String)> {
        let mut params = vec![("league".to_string(), self.client.config.league_key.clone())];
        if let Some(week) = week {
            params.push(("week".to_string(), week.to_string()));
        }
        params
    }

    /// Cached body when fresh, otherwise a fresh upstream body together
    /// with its parsed form. Only bodies that parse completely are cached.
    async fn lookup(
        &self,
        week: Option<u32>,
    ) -> Result<(Value, Option<ScoreboardSnapshot>, CacheStatus), FetchError> {
        let params = self.scoreboard_params(week);

        if let Some(body) = self.cache.get(SCOREBOARD_ENDPOINT, params.iter().cloned()) {
            log::debug!("Scoreboard cache hit (week {:?})", week);
            return Ok((body, None, CacheStatus::Hit));
        }

        let body = self.client.get_json(SCOREBOARD_ENDPOINT, &params).await?;
        let snapshot = ScoreboardSnapshot::from_value(body.clone())?;
        self.cache.put(SCOREBOARD_ENDPOINT, params, body.clone());
        Ok((body, Some(snapshot), CacheStatus::Miss))
    }

    /// Raw scoreboard body, from the cache when fresh. Bodies that fail to
    /// parse are returned as errors and never cached.
    pub async fn scoreboard_json(
        &self,
        week: Option<u32>,
    ) -> Result<(Value, CacheStatus), FetchError> {
        let (body, _, status) = self.lookup(week).await?;
        Ok((body, status))
    }

    /// Typed scoreboard
    pub async fn scoreboard(
        &self,
        week: Option<u32>,
    ) -> Result<(ScoreboardSnapshot, CacheStatus), FetchError> {
        let (body, parsed, status) = self.lookup(week).await?;
        let snapshot = match parsed {
            Some(snapshot) => snapshot,
            None => ScoreboardSnapshot::from_value(body)?,
        };
        Ok((snapshot, status))
    }
}

/// Polls the live scoreboard through the proxy
pub struct LiveScoreboardSource {
    proxy: Arc<ScoreboardProxy>,
    week: Option<u32>,
}

impl LiveScoreboardSource {
    /// `week` of `None` asks upstream for the current week
    pub fn new(proxy: Arc<ScoreboardProxy>, week: Option<u32>) -> Self {
        LiveScoreboardSource { proxy, week }
    }
}

impl UpstreamSource<ScoreboardSnapshot> for LiveScoreboardSource {
    fn fetch(&self) -> BoxFuture<'_, Result<ScoreboardSnapshot, FetchError>> {
        async move {
            let (snapshot, _) = self.proxy.scoreboard(self.week).await?;
            Ok(snapshot)
        }
        .boxed()
    }
}
