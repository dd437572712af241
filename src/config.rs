use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::{FlatClose, WINDOW_DURATION_MS};
use crate::processor::TagPolicy;
use crate::signals::parse_timestamp;

/// Analysis configuration loaded from YAML file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub tiers: TierConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub binance: BinanceConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    /// Window length in milliseconds (900000 = 15m)
    #[serde(default = "default_duration_ms")]
    pub duration_ms: i64,
}

fn default_duration_ms() -> i64 { WINDOW_DURATION_MS }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            duration_ms: WINDOW_DURATION_MS,
        }
    }
}

/// Which records of an active window take part in voting and scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gating {
    /// A window with one actionable record keeps all of its records
    #[default]
    Window,
    /// Only actionable records are kept
    Record,
}

/// Recommendation taxonomy and regime registry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierConfig {
    /// Tokens that make a recommendation actionable
    #[serde(default = "default_actionable")]
    pub actionable: Vec<String>,
    /// Strength tiers, first match wins
    #[serde(default = "default_strength")]
    pub strength: Vec<String>,
    /// Timing tiers, first match wins
    #[serde(default = "default_timing")]
    pub timing: Vec<String>,
    /// Regimes that get their own bucket
    #[serde(default = "default_regimes")]
    pub regimes: Vec<String>,
    #[serde(default = "default_up_token")]
    pub up_token: String,
    #[serde(default = "default_down_token")]
    pub down_token: String,
    #[serde(default)]
    pub flat_close: FlatClose,
    #[serde(default)]
    pub gating: Gating,
}

fn default_actionable() -> Vec<String> { vec!["STRONG".into(), "GOOD".into()] }
fn default_strength() -> Vec<String> { vec!["STRONG".into(), "GOOD".into(), "OPTIONAL".into()] }
fn default_timing() -> Vec<String> { vec!["EARLY".into(), "MID".into(), "LATE".into()] }
fn default_regimes() -> Vec<String> {
    vec!["TREND_UP".into(), "TREND_DOWN".into(), "RANGE".into(), "CHOP".into()]
}
fn default_up_token() -> String { "UP".into() }
fn default_down_token() -> String { "DOWN".into() }

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            actionable: default_actionable(),
            strength: default_strength(),
            timing: default_timing(),
            regimes: default_regimes(),
            up_token: default_up_token(),
            down_token: default_down_token(),
            flat_close: FlatClose::default(),
            gating: Gating::default(),
        }
    }
}

impl TierConfig {
    pub fn actionable_policy(&self) -> TagPolicy {
        TagPolicy::new(self.actionable.clone())
    }

    pub fn strength_policy(&self) -> TagPolicy {
        TagPolicy::new(self.strength.clone())
    }

    pub fn timing_policy(&self) -> TagPolicy {
        TagPolicy::new(self.timing.clone())
    }
}

/// Date range applied to record timestamps before aggregation
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilterConfig {
    /// Inclusive lower bound
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl FilterConfig {
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| timestamp >= from) && self.to.map_or(true, |to| timestamp < to)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BinanceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Kline interval, must span exactly `window.duration_ms`
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Klines per request (Binance max 1000)
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// Per-request timeout (ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Pause between pages (ms)
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
}

/// Length of an epoch-aligned Binance kline interval in ms
pub fn interval_ms(interval: &str) -> Option<i64> {
    let ms = match interval {
        "1m" => 60_000,
        "3m" => 180_000,
        "5m" => 300_000,
        "15m" => 900_000,
        "30m" => 1_800_000,
        "1h" => 3_600_000,
        "2h" => 7_200_000,
        "4h" => 14_400_000,
        "6h" => 21_600_000,
        "8h" => 28_800_000,
        "12h" => 43_200_000,
        "1d" => 86_400_000,
        _ => return None,
    };
    Some(ms)
}

fn default_base_url() -> String { "https://api.binance.com".into() }
fn default_symbol() -> String { "BTCUSDT".into() }
fn default_interval() -> String { "15m".into() }
fn default_page_limit() -> u32 { 1000 }
fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_page_delay_ms() -> u64 { 200 }

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            symbol: default_symbol(),
            interval: default_interval(),
            page_limit: default_page_limit(),
            request_timeout_ms: default_request_timeout_ms(),
            page_delay_ms: default_page_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Scored windows listed in the detail table
    #[serde(default = "default_recent_windows")]
    pub recent_windows: usize,
    /// Recommendations listed in the distribution summary
    #[serde(default = "default_top_recommendations")]
    pub top_recommendations: usize,
    /// Previous run's JSON report to compare against
    #[serde(default)]
    pub baseline: Option<PathBuf>,
}

fn default_recent_windows() -> usize { 20 }
fn default_top_recommendations() -> usize { 15 }

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            recent_windows: default_recent_windows(),
            top_recommendations: default_top_recommendations(),
            baseline: None,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AnalysisConfig = serde_yaml::from_str(&contents)
            .with_context(|| "Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Load with environment variable overrides
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Ok(val) = std::env::var("BINANCE_API_URL") {
            config.binance.base_url = val;
        }
        if let Ok(val) = std::env::var("VERIFY_SYMBOL") {
            config.binance.symbol = val;
        }
        if let Ok(val) = std::env::var("VERIFY_REQUEST_TIMEOUT_MS") {
            config.binance.request_timeout_ms = val.parse().unwrap_or(config.binance.request_timeout_ms);
        }
        if let Ok(val) = std::env::var("VERIFY_FILTER_FROM") {
            config.filter.from = Some(
                parse_timestamp(&val).with_context(|| format!("Bad VERIFY_FILTER_FROM: {}", val))?,
            );
        }
        if let Ok(val) = std::env::var("VERIFY_FILTER_TO") {
            config.filter.to = Some(
                parse_timestamp(&val).with_context(|| format!("Bad VERIFY_FILTER_TO: {}", val))?,
            );
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window.duration_ms <= 0 {
            bail!("window.duration_ms must be positive, got {}", self.window.duration_ms);
        }
        match interval_ms(&self.binance.interval) {
            None => bail!("binance.interval {:?} is not a supported kline interval", self.binance.interval),
            Some(ms) if ms != self.window.duration_ms => bail!(
                "binance.interval {} spans {} ms but window.duration_ms is {}",
                self.binance.interval,
                ms,
                self.window.duration_ms
            ),
            Some(_) => {}
        }
        if self.binance.page_limit == 0 || self.binance.page_limit > 1000 {
            bail!("binance.page_limit must be within 1..=1000, got {}", self.binance.page_limit);
        }
        if self.tiers.actionable.is_empty() {
            bail!("tiers.actionable must name at least one tier");
        }
        if self.tiers.up_token.is_empty() || self.tiers.down_token.is_empty() {
            bail!("tiers.up_token and tiers.down_token must be non-empty");
        }
        if let (Some(from), Some(to)) = (self.filter.from, self.filter.to) {
            if from >= to {
                bail!("filter.from ({}) must be before filter.to ({})", from, to);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults_match_btc_15m() {
        let config = AnalysisConfig::default();
        assert_eq!(config.window.duration_ms, 900_000);
        assert_eq!(config.tiers.actionable, vec!["STRONG", "GOOD"]);
        assert_eq!(config.tiers.strength, vec!["STRONG", "GOOD", "OPTIONAL"]);
        assert_eq!(config.binance.page_limit, 1000);
        assert_eq!(config.tiers.gating, Gating::Window);
        assert_eq!(config.tiers.flat_close, FlatClose::Down);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
tiers:
  actionable: [STRONG]
  regimes: [TREND_UP]
  gating: record
  flat_close: up
filter:
  from: "2026-02-12T00:00:00Z"
"#;
        let config: AnalysisConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tiers.actionable, vec!["STRONG"]);
        assert_eq!(config.tiers.timing, vec!["EARLY", "MID", "LATE"]);
        assert_eq!(config.tiers.gating, Gating::Record);
        assert_eq!(config.tiers.flat_close, FlatClose::Up);
        assert_eq!(config.filter.from, Some(Utc.with_ymd_and_hms(2026, 2, 12, 0, 0, 0).unwrap()));
        assert_eq!(config.binance.symbol, "BTCUSDT");
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/analysis.yaml");
        let config = AnalysisConfig::load(&path).unwrap();
        assert_eq!(config.tiers.actionable, vec!["STRONG", "GOOD"]);
        assert_eq!(config.binance.interval, "15m");
        assert!(config.filter.from.is_none());
        assert!(config.report.baseline.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AnalysisConfig::default();
        config.binance.page_limit = 1001;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.window.duration_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.filter.from = Some(Utc.with_ymd_and_hms(2026, 2, 5, 0, 0, 0).unwrap());
        config.filter.to = Some(Utc.with_ymd_and_hms(2026, 2, 4, 0, 0, 0).unwrap());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_window_must_match_kline_interval() {
        // 1h windows scored on 15m candles would only see the first quarter hour
        let mut config = AnalysisConfig::default();
        config.window.duration_ms = 3_600_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("binance.interval 15m"));

        config.binance.interval = "1h".into();
        assert!(config.validate().is_ok());

        config.binance.interval = "1M".into();
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.window.duration_ms = 300_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_lengths() {
        assert_eq!(interval_ms("15m"), Some(WINDOW_DURATION_MS));
        assert_eq!(interval_ms("4h"), Some(4 * 3_600_000));
        assert_eq!(interval_ms("1d"), Some(86_400_000));
        assert_eq!(interval_ms("1w"), None);
        assert_eq!(interval_ms(""), None);
    }

    #[test]
    fn test_yaml_with_mismatched_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.yaml");
        std::fs::write(&path, "window:\n  duration_ms: 3600000\n").unwrap();
        assert!(AnalysisConfig::load(&path).is_err());

        std::fs::write(&path, "window:\n  duration_ms: 3600000\nbinance:\n  interval: 1h\n").unwrap();
        let config = AnalysisConfig::load(&path).unwrap();
        assert_eq!(config.window.duration_ms, 3_600_000);
    }

    #[test]
    fn test_filter_range_is_half_open() {
        let filter = FilterConfig {
            from: Some(Utc.with_ymd_and_hms(2026, 2, 4, 0, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2026, 2, 5, 0, 0, 0).unwrap()),
        };
        assert!(filter.contains(Utc.with_ymd_and_hms(2026, 2, 4, 0, 0, 0).unwrap()));
        assert!(filter.contains(Utc.with_ymd_and_hms(2026, 2, 4, 23, 59, 59).unwrap()));
        assert!(!filter.contains(Utc.with_ymd_and_hms(2026, 2, 5, 0, 0, 0).unwrap()));
        assert!(!filter.contains(Utc.with_ymd_and_hms(2026, 2, 3, 23, 59, 59).unwrap()));
    }
}
