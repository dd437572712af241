//! Signal log loading and distribution summary
//!
//! Reads the bot's CSV log (`timestamp, signal, recommendation, model_up,
//! model_down, edge_up, edge_down, regime`, extra columns ignored).
//! Timestamps without an offset are taken as UTC.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::config::FilterConfig;
use crate::error::InputError;
use crate::models::SignalRecord;

const REQUIRED_COLUMNS: [&str; 8] = [
    "timestamp",
    "signal",
    "recommendation",
    "model_up",
    "model_down",
    "edge_up",
    "edge_down",
    "regime",
];

#[derive(Debug, Deserialize)]
struct RawSignalRow {
    timestamp: String,
    signal: String,
    recommendation: String,
    model_up: Option<f64>,
    model_down: Option<f64>,
    edge_up: Option<f64>,
    edge_down: Option<f64>,
    regime: String,
}

/// Parse an ISO-8601-like instant. Naive values are UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M:%S%.f%z",
    ] {
        if let Ok(ts) = DateTime::parse_from_str(value, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(ts.and_utc());
        }
    }
    None
}

/// Load the signal log from a CSV file
pub fn load_signals(path: &Path) -> Result<Vec<SignalRecord>, InputError> {
    let file = std::fs::File::open(path).map_err(|source| InputError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_signals(file)
}

/// Parse signal records from any CSV source
pub fn read_signals<R: Read>(reader: R) -> Result<Vec<SignalRecord>, InputError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = rdr.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(InputError::MissingColumn(column.to_string()));
        }
    }

    let mut records = Vec::new();
    for (idx, row) in rdr.deserialize::<RawSignalRow>().enumerate() {
        // header is line 1
        let line = idx + 2;
        let row = row.map_err(|e| InputError::MalformedRow {
            row: line,
            message: e.to_string(),
        })?;

        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| InputError::Timestamp {
            row: line,
            value: row.timestamp.clone(),
        })?;

        records.push(SignalRecord {
            timestamp,
            signal: row.signal,
            recommendation: row.recommendation,
            model_up: row.model_up,
            model_down: row.model_down,
            edge_up: row.edge_up,
            edge_down: row.edge_down,
            regime: row.regime,
        });
    }

    Ok(records)
}

/// Keep records inside the configured date range
pub fn filter_records(records: Vec<SignalRecord>, filter: &FilterConfig) -> Vec<SignalRecord> {
    records.into_iter().filter(|r| filter.contains(r.timestamp)).collect()
}

/// Label frequency with its share of all records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
    pub pct: f64,
}

/// Distribution of the raw signal log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSummary {
    pub total_records: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub signals: Vec<LabelCount>,
    pub recommendations: Vec<LabelCount>,
    pub regimes: Vec<LabelCount>,
    pub mean_model_up: Option<f64>,
}

impl SignalSummary {
    pub fn duration(&self) -> Option<Duration> {
        match (self.first, self.last) {
            (Some(first), Some(last)) => Some(last - first),
            _ => None,
        }
    }
}

/// Count labels, most frequent first (ties by label)
fn count_labels<'a>(labels: impl Iterator<Item = &'a str>, total: usize) -> Vec<LabelCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }

    let mut out: Vec<LabelCount> = counts
        .into_iter()
        .map(|(label, count)| LabelCount {
            label: label.to_string(),
            count,
            pct: if total == 0 { 0.0 } else { count as f64 / total as f64 * 100.0 },
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    out
}

pub fn summarize(records: &[SignalRecord]) -> SignalSummary {
    let total = records.len();

    let model_up: Vec<f64> = records
        .iter()
        .filter_map(|r| r.model_up)
        .filter(|v| v.is_finite())
        .collect();
    let mean_model_up = if model_up.is_empty() {
        None
    } else {
        Some(model_up.iter().sum::<f64>() / model_up.len() as f64)
    };

    SignalSummary {
        total_records: total,
        first: records.iter().map(|r| r.timestamp).min(),
        last: records.iter().map(|r| r.timestamp).max(),
        signals: count_labels(records.iter().map(|r| r.signal.as_str()), total),
        recommendations: count_labels(records.iter().map(|r| r.recommendation.as_str()), total),
        regimes: count_labels(records.iter().map(|r| r.regime.as_str()), total),
        mean_model_up,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HEADER: &str = "timestamp,signal,recommendation,model_up,model_down,edge_up,edge_down,regime\n";

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 4, 10, 7, 30).unwrap();
        assert_eq!(parse_timestamp("2026-02-04T10:07:30Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-02-04T11:07:30+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-02-04 10:07:30"), Some(expected));
        assert_eq!(parse_timestamp("2026-02-04T10:07:30"), Some(expected));
        assert_eq!(parse_timestamp("2026-02-04 10:07:30+00:00"), Some(expected));
        assert!(parse_timestamp("2026-02-04 10:07:30.250").is_some());
        assert_eq!(parse_timestamp("2026-02-04T10:07:30+0000"), Some(expected));
        assert_eq!(parse_timestamp("2026-02-04T11:07:30.000+0100"), Some(expected));

        let minute = Utc.with_ymd_and_hms(2026, 2, 4, 10, 7, 0).unwrap();
        assert_eq!(parse_timestamp("2026-02-04T10:07"), Some(minute));
        assert_eq!(parse_timestamp("2026-02-04 10:07"), Some(minute));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_read_signals_parses_rows() {
        let csv = format!(
            "{}2026-02-04T10:01:00Z,BUY UP,STRONG_EARLY,0.62,0.38,0.05,-0.03,TREND_UP\n\
             2026-02-04 10:02:00,NEUTRAL,SKIP,,,,,RANGE\n",
            HEADER
        );
        let records = read_signals(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].signal, "BUY UP");
        assert_eq!(records[0].model_up, Some(0.62));
        assert_eq!(records[1].model_up, None);
        assert_eq!(records[1].regime, "RANGE");
    }

    #[test]
    fn test_minute_and_basic_offset_rows_load() {
        let csv = format!(
            "{}2026-02-04T10:07,BUY UP,STRONG,,,,,RANGE\n\
             2026-02-04T10:07:30+0000,BUY DOWN,GOOD,,,,,CHOP\n",
            HEADER
        );
        let records = read_signals(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].timestamp, Utc.with_ymd_and_hms(2026, 2, 4, 10, 7, 30).unwrap());
    }

    #[test]
    fn test_missing_column_is_input_error() {
        let csv = "timestamp,signal,recommendation\n2026-02-04T10:01:00Z,BUY UP,STRONG\n";
        match read_signals(csv.as_bytes()) {
            Err(InputError::MissingColumn(col)) => assert_eq!(col, "model_up"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_timestamp_reports_line() {
        let csv = format!("{}not-a-time,BUY UP,STRONG,0.5,0.5,0,0,RANGE\n", HEADER);
        match read_signals(csv.as_bytes()) {
            Err(InputError::Timestamp { row, value }) => {
                assert_eq!(row, 2);
                assert_eq!(value, "not-a-time");
            }
            other => panic!("expected Timestamp error, got {:?}", other),
        }
    }

    #[test]
    fn test_summarize_counts() {
        let ts = Utc.with_ymd_and_hms(2026, 2, 4, 10, 0, 0).unwrap();
        let mut records = vec![
            SignalRecord::new(ts, "BUY UP", "STRONG_EARLY", "TREND_UP"),
            SignalRecord::new(ts + Duration::minutes(30), "BUY UP", "GOOD_MID", "RANGE"),
            SignalRecord::new(ts + Duration::hours(2), "BUY DOWN", "GOOD_MID", "RANGE"),
        ];
        records[0].model_up = Some(0.6);
        records[1].model_up = Some(0.4);

        let summary = summarize(&records);
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.signals[0].label, "BUY UP");
        assert_eq!(summary.signals[0].count, 2);
        assert!((summary.signals[0].pct - 66.666).abs() < 0.01);
        assert_eq!(summary.recommendations[0].label, "GOOD_MID");
        assert_eq!(summary.duration(), Some(Duration::hours(2)));
        assert!((summary.mean_model_up.unwrap() - 0.5).abs() < 1e-9);
    }
}
