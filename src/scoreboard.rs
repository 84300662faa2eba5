//! Typed scoreboard payload
//!
//! Upstream bodies are parsed in two steps: [`validate_shape`] walks the raw
//! JSON and checks the `league.scoreboard.matchups` path, then the body is
//! deserialized into [`ScoreboardSnapshot`]. Anything that fails either step
//! is reported as a [`ParseError`], never passed through half-typed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Errors produced while turning an upstream body into a typed record
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Body is not JSON at all
    InvalidJson(String),
    /// A required field is absent
    MissingField(String),
    /// A required field has the wrong JSON type
    WrongType { path: String, expected: &'static str },
    /// Shape check passed but the typed deserialization did not
    Malformed(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidJson(msg) => write!(f, "Invalid JSON: {}", msg),
            ParseError::MissingField(path) => write!(f, "Missing field: {}", path),
            ParseError::WrongType { path, expected } => {
                write!(f, "Field {} should be {}", path, expected)
            }
            ParseError::Malformed(msg) => write!(f, "Malformed payload: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// One full scoreboard response at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreboardSnapshot {
    pub league: League,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct League {
    pub league_key: String,
    pub name: String,
    #[serde(default)]
    pub season: Option<u16>,
    #[serde(default)]
    pub current_week: Option<u32>,
    pub scoreboard: Scoreboard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scoreboard {
    pub week: u32,
    pub matchups: Vec<Matchup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matchup {
    pub matchup_id: String,
    pub status: MatchupStatus,
    #[serde(default)]
    pub teams: Vec<TeamScore>,
}

/// Game state of a matchup, as reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchupStatus {
    /// Not started
    PreEvent,
    /// In progress
    MidEvent,
    /// Finished
    PostEvent,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamScore {
    pub team_key: String,
    pub name: String,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub projected_points: Option<f64>,
}

impl ScoreboardSnapshot {
    /// Parses raw bytes, running the shape check first
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Parses an already-decoded JSON body, running the shape check first
    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        validate_shape(&value)?;
        serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))
    }

    /// True if any matchup is currently being played
    pub fn has_live_items(&self) -> bool {
        self.league
            .scoreboard
            .matchups
            .iter()
            .any(|m| m.status == MatchupStatus::MidEvent)
    }

    pub fn week(&self) -> u32 {
        self.league.scoreboard.week
    }
}

/// Checks that `league`, `league.scoreboard` and `league.scoreboard.matchups`
/// are present with the right container types.
pub fn validate_shape(value: &Value) -> Result<(), ParseError> {
    let league = require_object(value, "league", "league")?;
    let scoreboard = require_object(league, "scoreboard", "league.scoreboard")?;
    match scoreboard.get("matchups") {
        None | Some(Value::Null) => Err(ParseError::MissingField(
            "league.scoreboard.matchups".to_string(),
        )),
        Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(ParseError::WrongType {
            path: "league.scoreboard.matchups".to_string(),
            expected: "an array",
        }),
    }
}

fn require_object<'a>(parent: &'a Value, key: &str, path: &str) -> Result<&'a Value, ParseError> {
    match parent.get(key) {
        None | Some(Value::Null) => Err(ParseError::MissingField(path.to_string())),
        Some(v @ Value::Object(_)) => Ok(v),
        Some(_) => Err(ParseError::WrongType {
            path: path.to_string(),
            expected: "an object",
        }),
    }
}
