use chrono::{DateTime, NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::TierConfig;
use crate::models::{ConfidenceLevel, Direction, Outcome};
use crate::processor::{resolve_vote, TagPolicy, VoteTokens, WindowMap};

/// Z-score for 95% confidence interval
const Z_95: f64 = 1.96;

/// Calculate Wilson Score Confidence Interval for a binomial proportion
///
/// Returns (lower_bound, upper_bound) for P(success) at 95% confidence
pub fn wilson_score_interval(successes: u32, total: u32) -> (f64, f64) {
    if total == 0 {
        return (0.0, 1.0);
    }

    let n = total as f64;
    let p_hat = successes as f64 / n;
    let z = Z_95;
    let z_squared = z * z;

    let denominator = 1.0 + z_squared / n;

    let center = (p_hat + z_squared / (2.0 * n)) / denominator;

    let margin = z * ((p_hat * (1.0 - p_hat) + z_squared / (4.0 * n)) / n).sqrt() / denominator;

    let lower = (center - margin).max(0.0);
    let upper = (center + margin).min(1.0);

    (lower, upper)
}

/// Credible interval of the Beta(1 + correct, 1 + wrong) posterior, shown next to
/// the Wilson interval in the bucket tables
/// Returns (lower, upper) for the given credible level (e.g., 0.95 for 95%)
pub fn beta_credible_interval(correct: u32, wrong: u32, credible_level: f64) -> (f64, f64) {
    use statrs::distribution::{Beta, ContinuousCDF};

    let tail = (1.0 - credible_level) / 2.0;

    match Beta::new(1.0 + correct as f64, 1.0 + wrong as f64) {
        Ok(dist) => (dist.inverse_cdf(tail), dist.inverse_cdf(1.0 - tail)),
        Err(_) => (0.0, 1.0),
    }
}

/// Correct/wrong counter for one dimension value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBucket {
    pub correct: u32,
    pub wrong: u32,
}

impl ScoreBucket {
    pub fn record(&mut self, correct: bool) {
        if correct {
            self.correct += 1;
        } else {
            self.wrong += 1;
        }
    }

    pub fn total(&self) -> u32 {
        self.correct + self.wrong
    }

    /// Hit rate in percent, `None` when the bucket is empty
    pub fn accuracy_pct(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.correct as f64 / total as f64 * 100.0),
        }
    }

    pub fn summary(&self, name: impl Into<String>) -> BucketSummary {
        let total = self.total();
        let (wilson_lower, wilson_upper) = wilson_score_interval(self.correct, total);
        let (credible_lower, credible_upper) = beta_credible_interval(self.correct, self.wrong, 0.95);

        BucketSummary {
            name: name.into(),
            correct: self.correct,
            wrong: self.wrong,
            total,
            accuracy_pct: self.accuracy_pct(),
            wilson_lower_pct: wilson_lower * 100.0,
            wilson_upper_pct: wilson_upper * 100.0,
            credible_lower_pct: credible_lower * 100.0,
            credible_upper_pct: credible_upper * 100.0,
            confidence: ConfidenceLevel::from_sample_count(total),
        }
    }
}

/// A bucket's counts with derived accuracy and intervals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub name: String,
    pub correct: u32,
    pub wrong: u32,
    pub total: u32,
    /// `None` means no data
    pub accuracy_pct: Option<f64>,
    pub wilson_lower_pct: f64,
    pub wilson_upper_pct: f64,
    pub credible_lower_pct: f64,
    pub credible_upper_pct: f64,
    pub confidence: ConfidenceLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedBucket {
    pub name: String,
    pub bucket: ScoreBucket,
}

/// Fixed, ordered set of buckets for one dimension. Unregistered names are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRegistry {
    entries: Vec<NamedBucket>,
}

impl BucketRegistry {
    pub fn with_names<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Self {
        let mut registry = Self::default();
        for name in names {
            let name = name.as_ref();
            if registry.get(name).is_none() {
                registry.entries.push(NamedBucket {
                    name: name.to_string(),
                    bucket: ScoreBucket::default(),
                });
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&ScoreBucket> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.bucket)
    }

    /// Returns false if `name` is not registered
    pub fn record(&mut self, name: &str, correct: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.bucket.record(correct);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScoreBucket)> {
        self.entries.iter().map(|e| (e.name.as_str(), &e.bucket))
    }

    pub fn summaries(&self) -> Vec<BucketSummary> {
        self.iter().map(|(name, bucket)| bucket.summary(name)).collect()
    }
}

/// One scored window in the chronological log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub window_start: i64,
    pub vote: Direction,
    pub result: Direction,
    pub correct: bool,
    pub open: Decimal,
    pub close: Decimal,
    pub num_signals: usize,
}

impl WindowResult {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.window_start)
    }
}

/// How many active windows made it into scoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub active_windows: usize,
    pub missing_outcome: usize,
    pub neutral: usize,
    pub scored: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streaks {
    pub best_winning: usize,
    pub worst_losing: usize,
}

/// Longest runs of correct and incorrect windows, in log order
pub fn compute_streaks(details: &[WindowResult]) -> Streaks {
    compute_streaks_from(details.iter().map(|d| d.correct))
}

pub fn compute_streaks_from(hits: impl IntoIterator<Item = bool>) -> Streaks {
    let mut streaks = Streaks::default();
    let mut current_win = 0;
    let mut current_loss = 0;

    for correct in hits {
        if correct {
            current_win += 1;
            current_loss = 0;
            streaks.best_winning = streaks.best_winning.max(current_win);
        } else {
            current_loss += 1;
            current_win = 0;
            streaks.worst_losing = streaks.worst_losing.max(current_loss);
        }
    }

    streaks
}

/// Everything a run computes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total: ScoreBucket,
    pub by_strength: BucketRegistry,
    pub by_timing: BucketRegistry,
    pub by_regime: BucketRegistry,
    pub by_vote: BucketRegistry,
    /// UTC hour of the window start
    pub by_hour: BTreeMap<u32, ScoreBucket>,
    /// UTC date of the window start
    pub by_day: BTreeMap<NaiveDate, ScoreBucket>,
    pub details: Vec<WindowResult>,
    pub coverage: Coverage,
}

impl RunStatistics {
    pub fn streaks(&self) -> Streaks {
        compute_streaks(&self.details)
    }
}

/// Scores windows against realized outcomes
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    strength: TagPolicy,
    timing: TagPolicy,
    regimes: Vec<String>,
    tokens: VoteTokens,
}

impl ScoringEngine {
    pub fn new(strength: TagPolicy, timing: TagPolicy, regimes: Vec<String>, tokens: VoteTokens) -> Self {
        Self {
            strength,
            timing,
            regimes,
            tokens,
        }
    }

    pub fn from_config(tiers: &TierConfig) -> Self {
        Self::new(
            tiers.strength_policy(),
            tiers.timing_policy(),
            tiers.regimes.clone(),
            VoteTokens::from(tiers),
        )
    }

    fn empty_statistics(&self) -> RunStatistics {
        RunStatistics {
            total: ScoreBucket::default(),
            by_strength: BucketRegistry::with_names(self.strength.tags()),
            by_timing: BucketRegistry::with_names(self.timing.tags()),
            by_regime: BucketRegistry::with_names(&self.regimes),
            by_vote: BucketRegistry::with_names([Direction::Up.as_str(), Direction::Down.as_str()]),
            by_hour: BTreeMap::new(),
            by_day: BTreeMap::new(),
            details: Vec::new(),
            coverage: Coverage::default(),
        }
    }

    /// Score every window that has an outcome and a non-neutral vote.
    ///
    /// Window-level buckets (total, vote, hour, day) count once per window.
    /// Strength, timing and regime buckets count once per record of the window.
    pub fn score(&self, windows: &WindowMap, outcomes: &BTreeMap<i64, Outcome>) -> RunStatistics {
        let mut stats = self.empty_statistics();
        stats.coverage.active_windows = windows.len();

        for (&window_start, records) in windows {
            let Some(outcome) = outcomes.get(&window_start) else {
                stats.coverage.missing_outcome += 1;
                continue;
            };

            let Some(vote) = resolve_vote(records, &self.tokens).direction() else {
                stats.coverage.neutral += 1;
                continue;
            };

            let correct = vote == outcome.result;
            stats.coverage.scored += 1;

            stats.total.record(correct);
            stats.by_vote.record(vote.as_str(), correct);

            if let Some(start) = DateTime::from_timestamp_millis(window_start) {
                stats.by_hour.entry(start.hour()).or_default().record(correct);
                stats.by_day.entry(start.date_naive()).or_default().record(correct);
            }

            for record in records {
                if let Some(tier) = self.strength.first_match(&record.recommendation) {
                    stats.by_strength.record(tier, correct);
                }
                if let Some(tier) = self.timing.first_match(&record.recommendation) {
                    stats.by_timing.record(tier, correct);
                }
                stats.by_regime.record(&record.regime, correct);
            }

            stats.details.push(WindowResult {
                window_start,
                vote,
                result: outcome.result,
                correct,
                open: outcome.open,
                close: outcome.close,
                num_signals: records.len(),
            });
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlatClose, SignalRecord, WINDOW_DURATION_MS};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn engine() -> ScoringEngine {
        ScoringEngine::from_config(&TierConfig::default())
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 12, h, m, 0).unwrap()
    }

    fn outcome(start: i64, open: Decimal, close: Decimal) -> Outcome {
        Outcome {
            window_start: start,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: dec!(0),
            result: FlatClose::Down.resolve(open, close),
        }
    }

    #[test]
    fn test_wilson_score_interval() {
        // 50 out of 100 successes
        let (lower, upper) = wilson_score_interval(50, 100);
        assert!(lower > 0.39 && lower < 0.41);
        assert!(upper > 0.59 && upper < 0.61);

        // 8 out of 10 successes (small sample)
        let (lower, upper) = wilson_score_interval(8, 10);
        assert!(lower > 0.44 && lower < 0.55);
        assert!(upper > 0.92 && upper < 0.99);

        // Edge case: no data
        assert_eq!(wilson_score_interval(0, 0), (0.0, 1.0));
    }

    #[test]
    fn test_beta_credible_interval_brackets_mean() {
        let (lower, upper) = beta_credible_interval(8, 2, 0.95);
        // posterior mean 9/12
        assert!(lower < 0.75 && upper > 0.75);
        assert!(lower > 0.4 && upper < 0.97);
    }

    #[test]
    fn test_empty_bucket_has_no_accuracy() {
        let bucket = ScoreBucket::default();
        assert_eq!(bucket.accuracy_pct(), None);
        let summary = bucket.summary("STRONG");
        assert_eq!(summary.accuracy_pct, None);
        assert_eq!(summary.confidence, ConfidenceLevel::Unreliable);
    }

    #[test]
    fn test_registry_ignores_unregistered_names() {
        let mut registry = BucketRegistry::with_names(["TREND_UP", "TREND_DOWN", "TREND_UP"]);
        assert_eq!(registry.iter().count(), 2);
        assert!(registry.record("TREND_UP", true));
        assert!(!registry.record("SIDEWAYS", true));
        assert_eq!(registry.get("TREND_UP"), Some(&ScoreBucket { correct: 1, wrong: 0 }));
    }

    #[test]
    fn test_majority_up_scores_correct() {
        let start = at(10, 0).timestamp_millis();
        let mut windows = WindowMap::new();
        windows.insert(
            start,
            vec![
                SignalRecord::new(at(10, 1), "BUY UP", "STRONG_EARLY", "TREND_UP"),
                SignalRecord::new(at(10, 2), "BUY UP", "GOOD_MID", "RANGE"),
                SignalRecord::new(at(10, 3), "BUY DOWN", "OPTIONAL_LATE", "CHOP"),
            ],
        );
        let outcomes = BTreeMap::from([(start, outcome(start, dec!(100), dec!(105)))]);

        let stats = engine().score(&windows, &outcomes);

        assert_eq!(stats.total, ScoreBucket { correct: 1, wrong: 0 });
        assert_eq!(stats.by_vote.get("UP").unwrap().correct, 1);
        assert_eq!(stats.by_hour[&10].correct, 1);
        assert_eq!(stats.by_day[&NaiveDate::from_ymd_opt(2026, 2, 12).unwrap()].correct, 1);
        // the DOWN record still counts towards its own tiers
        assert_eq!(stats.by_strength.get("OPTIONAL").unwrap().correct, 1);
        assert_eq!(stats.by_timing.get("LATE").unwrap().correct, 1);
        assert_eq!(stats.by_regime.get("CHOP").unwrap().correct, 1);
        assert_eq!(stats.details.len(), 1);
        assert_eq!(stats.details[0].num_signals, 3);
    }

    #[test]
    fn test_neutral_and_missing_outcome_are_skipped() {
        let tie = at(10, 0).timestamp_millis();
        let missing = at(10, 15).timestamp_millis();
        let mut windows = WindowMap::new();
        windows.insert(
            tie,
            vec![
                SignalRecord::new(at(10, 1), "UP", "STRONG", "RANGE"),
                SignalRecord::new(at(10, 2), "DOWN", "STRONG", "RANGE"),
            ],
        );
        windows.insert(missing, vec![SignalRecord::new(at(10, 16), "UP", "GOOD", "RANGE")]);
        let outcomes = BTreeMap::from([(tie, outcome(tie, dec!(100), dec!(90)))]);

        let stats = engine().score(&windows, &outcomes);

        assert_eq!(stats.total.total(), 0);
        assert!(stats.by_strength.iter().all(|(_, b)| b.total() == 0));
        assert!(stats.by_hour.is_empty());
        assert!(stats.details.is_empty());
        assert_eq!(
            stats.coverage,
            Coverage { active_windows: 2, missing_outcome: 1, neutral: 1, scored: 0 }
        );
    }

    #[test]
    fn test_strength_first_match_and_multi_count() {
        let start = at(11, 0).timestamp_millis();
        let mut windows = WindowMap::new();
        windows.insert(
            start,
            vec![
                SignalRecord::new(at(11, 1), "BUY DOWN", "STRONG_GOOD_EARLY", "TREND_DOWN"),
                SignalRecord::new(at(11, 2), "BUY DOWN", "GOOD_MID", "TREND_DOWN"),
                SignalRecord::new(at(11, 3), "BUY DOWN", "SKIP", "UNKNOWN"),
            ],
        );
        let outcomes = BTreeMap::from([(start, outcome(start, dec!(100), dec!(105)))]);

        let stats = engine().score(&windows, &outcomes);

        assert_eq!(stats.total, ScoreBucket { correct: 0, wrong: 1 });
        assert_eq!(stats.by_strength.get("STRONG").unwrap().wrong, 1);
        assert_eq!(stats.by_strength.get("GOOD").unwrap().wrong, 1);
        assert_eq!(stats.by_regime.get("TREND_DOWN").unwrap().wrong, 2);
        let strength_total: u32 = stats.by_strength.iter().map(|(_, b)| b.total()).sum();
        assert!(strength_total > stats.total.total());
    }

    #[test]
    fn test_own_result_as_vote_is_always_correct() {
        let mut windows = WindowMap::new();
        let mut outcomes = BTreeMap::new();
        let prices = [(100, 105), (100, 95), (100, 100), (50, 51)];
        for (i, (open, close)) in prices.iter().enumerate() {
            let start = at(12, 0).timestamp_millis() + i as i64 * WINDOW_DURATION_MS;
            let out = outcome(start, Decimal::from(*open), Decimal::from(*close));
            let label = format!("BUY {}", out.result);
            windows.insert(start, vec![SignalRecord::new(at(12, 0), &label, "GOOD", "RANGE")]);
            outcomes.insert(start, out);
        }

        let stats = engine().score(&windows, &outcomes);
        assert_eq!(stats.total, ScoreBucket { correct: 4, wrong: 0 });
        assert!(stats.details.iter().all(|d| d.correct));
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let mut windows = WindowMap::new();
        let mut outcomes = BTreeMap::new();
        for i in 0..12i64 {
            let start = at(0, 0).timestamp_millis() + i * WINDOW_DURATION_MS;
            let signal = if i % 3 == 0 { "BUY DOWN" } else { "BUY UP" };
            windows.insert(start, vec![SignalRecord::new(at(0, 0), signal, "STRONG_MID", "RANGE")]);
            let close = if i % 2 == 0 { dec!(101) } else { dec!(99) };
            outcomes.insert(start, outcome(start, dec!(100), close));
        }

        let engine = engine();
        assert_eq!(engine.score(&windows, &outcomes), engine.score(&windows, &outcomes));
    }

    #[test]
    fn test_bucket_totals_never_shrink_as_windows_accumulate() {
        let labels = [
            ("STRONG_EARLY", "TREND_UP"),
            ("GOOD_MID", "CHOP"),
            ("OPTIONAL_LATE", "RANGE"),
            ("STRONG_LATE", "TREND_DOWN"),
        ];
        let mut windows = WindowMap::new();
        let mut outcomes = BTreeMap::new();
        for i in 0..16i64 {
            let start = at(0, 0).timestamp_millis() + i * WINDOW_DURATION_MS;
            let ts = DateTime::from_timestamp_millis(start + 60_000).unwrap();
            let signal = if i % 2 == 0 { "BUY UP" } else { "BUY DOWN" };
            let records = (0..=(i % 3) as usize)
                .map(|k| {
                    let (rec, regime) = labels[(i as usize + k) % labels.len()];
                    SignalRecord::new(ts, signal, rec, regime)
                })
                .collect();
            windows.insert(start, records);
            let close = if i % 4 == 1 { dec!(99) } else { dec!(101) };
            outcomes.insert(start, outcome(start, dec!(100), close));
        }

        let engine = engine();
        let totals = |stats: &RunStatistics| -> Vec<u32> {
            let mut totals = vec![stats.total.total()];
            for registry in [&stats.by_strength, &stats.by_timing, &stats.by_regime, &stats.by_vote] {
                totals.extend(registry.iter().map(|(_, b)| b.total()));
            }
            totals.extend(stats.by_hour.values().map(ScoreBucket::total));
            totals
        };

        let mut previous = totals(&engine.score(&WindowMap::new(), &outcomes));
        for n in 1..=windows.len() {
            let prefix: WindowMap = windows.iter().take(n).map(|(k, v)| (*k, v.clone())).collect();
            let stats = engine.score(&prefix, &outcomes);
            let current = totals(&stats);

            assert_eq!(stats.total.total() as usize, n);
            // new hour buckets are appended after the existing ones
            for (before, after) in previous.iter().zip(current.iter()) {
                assert!(after >= before, "bucket shrank after {} windows: {:?} -> {:?}", n, previous, current);
            }
            previous = current;
        }
    }

    #[test]
    fn test_streaks() {
        let streaks = compute_streaks_from([true, true, false, true, true, true]);
        assert_eq!(streaks, Streaks { best_winning: 3, worst_losing: 1 });

        let streaks = compute_streaks_from([false, false, true, false]);
        assert_eq!(streaks, Streaks { best_winning: 1, worst_losing: 2 });

        assert_eq!(compute_streaks_from(Vec::new()), Streaks::default());
    }
}
