use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default window length: 15 minutes in milliseconds
pub const WINDOW_DURATION_MS: i64 = 15 * 60 * 1000;

/// One row of the signal log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalRecord {
    pub timestamp: DateTime<Utc>,
    /// Directional label, e.g. "BUY UP", "BUY DOWN", "NEUTRAL"
    pub signal: String,
    /// Strength tier plus optional timing tier, e.g. "STRONG_EARLY"
    pub recommendation: String,
    pub model_up: Option<f64>,
    pub model_down: Option<f64>,
    pub edge_up: Option<f64>,
    pub edge_down: Option<f64>,
    /// Market regime label, e.g. TREND_UP, RANGE, CHOP
    pub regime: String,
}

impl SignalRecord {
    /// Minimal record for a signal/recommendation pair; the rest is informational.
    pub fn new(timestamp: DateTime<Utc>, signal: &str, recommendation: &str, regime: &str) -> Self {
        Self {
            timestamp,
            signal: signal.to_string(),
            recommendation: recommendation.to_string(),
            model_up: None,
            model_down: None,
            edge_up: None,
            edge_down: None,
            regime: regime.to_string(),
        }
    }
}

/// Realized direction of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Majority call for a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vote {
    Up,
    Down,
    Neutral,
}

impl Vote {
    /// The direction this vote predicts, `None` for a no-call
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Vote::Up => Some(Direction::Up),
            Vote::Down => Some(Direction::Down),
            Vote::Neutral => None,
        }
    }
}

impl From<Direction> for Vote {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => Vote::Up,
            Direction::Down => Vote::Down,
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::Up => f.write_str("UP"),
            Vote::Down => f.write_str("DOWN"),
            Vote::Neutral => f.write_str("NEUTRAL"),
        }
    }
}

/// How a candle that closes exactly at its open is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlatClose {
    /// `close > open` is UP, everything else DOWN
    #[default]
    Down,
    /// `close >= open` is UP
    Up,
}

impl FlatClose {
    pub fn resolve(&self, open: Decimal, close: Decimal) -> Direction {
        let up = match self {
            FlatClose::Down => close > open,
            FlatClose::Up => close >= open,
        };
        if up {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

/// Realized prices for one window, keyed by its start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub window_start: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub result: Direction,
}

/// Confidence level for an accuracy estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    /// n < 10
    Unreliable,
    /// 10 <= n < 30
    Weak,
    /// 30 <= n < 100
    Moderate,
    /// n >= 100
    Strong,
}

impl ConfidenceLevel {
    pub fn from_sample_count(n: u32) -> Self {
        if n < 10 {
            ConfidenceLevel::Unreliable
        } else if n < 30 {
            ConfidenceLevel::Weak
        } else if n < 100 {
            ConfidenceLevel::Moderate
        } else {
            ConfidenceLevel::Strong
        }
    }
}
