use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{Gating, TierConfig};
use crate::models::{SignalRecord, Vote};

/// Signal records grouped by aligned window start (ms), ascending
pub type WindowMap = BTreeMap<i64, Vec<SignalRecord>>;

/// Get the aligned window start (ms) for an epoch-millisecond timestamp
/// Floors toward negative infinity so pre-epoch instants stay in their window
pub fn window_start_ms(timestamp_ms: i64, duration_ms: i64) -> i64 {
    timestamp_ms.div_euclid(duration_ms) * duration_ms
}

/// Get the aligned window start (ms) for a UTC instant
/// With the default duration windows start at :00, :15, :30, :45
pub fn window_start(timestamp: DateTime<Utc>, duration_ms: i64) -> i64 {
    window_start_ms(timestamp.timestamp_millis(), duration_ms)
}

/// Ordered tag list matched against free-form text by substring.
/// The first tag contained in the text wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPolicy {
    tags: Vec<String>,
}

impl TagPolicy {
    pub fn new<S: Into<String>>(tags: impl IntoIterator<Item = S>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| text.contains(tag.as_str()))
            .map(String::as_str)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.first_match(text).is_some()
    }
}

/// Directional tokens looked up in a record's `signal` label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteTokens {
    pub up: String,
    pub down: String,
}

impl Default for VoteTokens {
    fn default() -> Self {
        Self {
            up: "UP".to_string(),
            down: "DOWN".to_string(),
        }
    }
}

impl From<&TierConfig> for VoteTokens {
    fn from(tiers: &TierConfig) -> Self {
        Self {
            up: tiers.up_token.clone(),
            down: tiers.down_token.clone(),
        }
    }
}

/// Group records into windows and keep only windows with an actionable record.
///
/// Records keep their input order inside a window. Gating is at window level:
/// a kept window retains every record, actionable or not.
pub fn aggregate<I, F>(records: I, duration_ms: i64, actionable: F) -> WindowMap
where
    I: IntoIterator<Item = SignalRecord>,
    F: Fn(&str) -> bool,
{
    let mut windows: WindowMap = BTreeMap::new();

    for record in records {
        let start = window_start(record.timestamp, duration_ms);
        windows.entry(start).or_default().push(record);
    }

    windows.retain(|_, records| records.iter().any(|r| actionable(&r.recommendation)));
    windows
}

/// Aggregate under the configured gating policy
pub fn aggregate_with_gating<I>(
    records: I,
    duration_ms: i64,
    actionable: &TagPolicy,
    gating: Gating,
) -> WindowMap
where
    I: IntoIterator<Item = SignalRecord>,
{
    let mut windows = aggregate(records, duration_ms, |rec| actionable.matches(rec));

    if gating == Gating::Record {
        for records in windows.values_mut() {
            records.retain(|r| actionable.matches(&r.recommendation));
        }
    }

    windows
}

/// Count UP and DOWN labels. A label holding both tokens counts as UP.
pub fn vote_counts(records: &[SignalRecord], tokens: &VoteTokens) -> (usize, usize) {
    let mut up = 0;
    let mut down = 0;

    for record in records {
        if record.signal.contains(tokens.up.as_str()) {
            up += 1;
        } else if record.signal.contains(tokens.down.as_str()) {
            down += 1;
        }
    }

    (up, down)
}

/// Majority vote over a window's records, ties (including 0-0) are NEUTRAL
pub fn resolve_vote(records: &[SignalRecord], tokens: &VoteTokens) -> Vote {
    let (up, down) = vote_counts(records, tokens);

    if up > down {
        Vote::Up
    } else if down > up {
        Vote::Down
    } else {
        Vote::Neutral
    }
}
