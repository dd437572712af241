//! Verification run: filter → window → vote → fetch outcomes → score

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::binance_klines::{fetch_outcomes, FetchOptions, FetchStop, KlineSource};
use crate::config::AnalysisConfig;
use crate::models::SignalRecord;
use crate::processor::aggregate_with_gating;
use crate::signals::{filter_records, summarize, SignalSummary};
use crate::stats::{RunStatistics, ScoringEngine, Streaks};

/// What the outcome fetch covered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSummary {
    pub pages: usize,
    pub candles: usize,
    /// `Some` when the run is truncated
    pub stopped: Option<FetchStop>,
}

/// Result of a run that had at least one active window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub window_duration_ms: i64,
    pub signals: SignalSummary,
    pub statistics: RunStatistics,
    pub streaks: Streaks,
    pub fetch: FetchSummary,
}

impl RunReport {
    /// Global accuracy in percent, `None` if nothing was scored
    pub fn accuracy_pct(&self) -> Option<f64> {
        self.statistics.total.accuracy_pct()
    }
}

#[derive(Debug, Clone)]
pub enum Verification {
    /// No window held an actionable record
    NothingToScore { signals: SignalSummary },
    Scored(Box<RunReport>),
}

/// Run the whole pipeline over a loaded signal log
pub async fn verify<S>(records: Vec<SignalRecord>, config: &AnalysisConfig, source: &S) -> Verification
where
    S: KlineSource + ?Sized,
{
    let loaded = records.len();
    let records = filter_records(records, &config.filter);
    if records.len() != loaded {
        info!("Date filter kept {} of {} records", records.len(), loaded);
    }

    let signals = summarize(&records);
    let duration_ms = config.window.duration_ms;

    let windows = aggregate_with_gating(
        records,
        duration_ms,
        &config.tiers.actionable_policy(),
        config.tiers.gating,
    );
    info!(
        "Active windows ({}): {}",
        config.tiers.actionable.join("/"),
        windows.len()
    );

    if windows.is_empty() {
        warn!("No actionable signals found");
        return Verification::NothingToScore { signals };
    }

    let starts: Vec<i64> = windows.keys().copied().collect();
    let options = FetchOptions {
        page_limit: config.binance.page_limit,
        page_delay_ms: config.binance.page_delay_ms,
        flat_close: config.tiers.flat_close,
    };
    let fetched = fetch_outcomes(source, &starts, duration_ms, options).await;
    if let Some(stop) = &fetched.stopped {
        warn!("Outcome fetch stopped early at {}: {:?}", stop.at_ms, stop.reason);
    }

    let engine = ScoringEngine::from_config(&config.tiers);
    let statistics = engine.score(&windows, &fetched.outcomes);
    let streaks = statistics.streaks();

    info!(
        "Scored {} windows ({} missing outcome, {} neutral)",
        statistics.coverage.scored, statistics.coverage.missing_outcome, statistics.coverage.neutral
    );

    Verification::Scored(Box::new(RunReport {
        window_duration_ms: duration_ms,
        signals,
        statistics,
        streaks,
        fetch: FetchSummary {
            pages: fetched.pages,
            candles: fetched.outcomes.len(),
            stopped: fetched.stopped,
        },
    }))
}

/// Overall assessment of a run's global accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// >= 60%
    Profitable,
    /// 55-60%
    Edge,
    /// 50-55%
    Marginal,
    /// below 50% but better than the baseline run
    SlightImprovement,
    /// below 50%
    NotProfitable,
    /// nothing scored
    NoData,
}

impl Verdict {
    pub fn evaluate(accuracy_pct: Option<f64>, baseline_pct: Option<f64>) -> Self {
        let Some(acc) = accuracy_pct else {
            return Verdict::NoData;
        };

        if acc >= 60.0 {
            Verdict::Profitable
        } else if acc >= 55.0 {
            Verdict::Edge
        } else if acc >= 50.0 {
            Verdict::Marginal
        } else if baseline_pct.is_some_and(|base| acc > base) {
            Verdict::SlightImprovement
        } else {
            Verdict::NotProfitable
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Verdict::Profitable => "[GREEN] PROFITABLE - accuracy >= 60%",
            Verdict::Edge => "[GREEN-YELLOW] POSITIVE EDGE - accuracy 55-60%",
            Verdict::Marginal => "[YELLOW] MARGINAL - accuracy 50-55%",
            Verdict::SlightImprovement => "[ORANGE] SLIGHT IMPROVEMENT over baseline",
            Verdict::NotProfitable => "[RED] NOT PROFITABLE - accuracy < 50%",
            Verdict::NoData => "[GREY] NO SCORED WINDOWS",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_thresholds() {
        assert_eq!(Verdict::evaluate(Some(61.0), None), Verdict::Profitable);
        assert_eq!(Verdict::evaluate(Some(60.0), None), Verdict::Profitable);
        assert_eq!(Verdict::evaluate(Some(57.5), None), Verdict::Edge);
        assert_eq!(Verdict::evaluate(Some(50.0), None), Verdict::Marginal);
        assert_eq!(Verdict::evaluate(Some(47.0), Some(44.68)), Verdict::SlightImprovement);
        assert_eq!(Verdict::evaluate(Some(40.0), Some(44.68)), Verdict::NotProfitable);
        assert_eq!(Verdict::evaluate(Some(47.0), None), Verdict::NotProfitable);
        assert_eq!(Verdict::evaluate(None, Some(50.0)), Verdict::NoData);
    }
}
