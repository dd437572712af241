use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::config::ReportConfig;
use crate::db::{BacktestDbSummary, ValueCount};
use crate::signals::{LabelCount, SignalSummary};
use crate::stats::{BucketRegistry, BucketSummary, ScoreBucket, WindowResult};
use crate::verifier::{RunReport, Verdict};

const RULE: &str = "════════════════════════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "────────────────────────────────────────────────────────────────────────────────";

/// Export the full run report to JSON
pub fn export_to_json(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    let mut file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

/// Load a previous run's JSON report to compare against
pub fn load_baseline(path: &Path) -> Result<RunReport> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read baseline report: {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse baseline report: {}", path.display()))
}

#[derive(Debug, Serialize)]
struct DetailCsvRow {
    window_start: String,
    vote: String,
    result: String,
    correct: bool,
    open: String,
    close: String,
    num_signals: usize,
}

/// Export the chronological detail log to CSV
pub fn export_details_to_csv(report: &RunReport, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;

    for detail in &report.statistics.details {
        wtr.serialize(DetailCsvRow {
            window_start: detail
                .start_time()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| detail.window_start.to_string()),
            vote: detail.vote.to_string(),
            result: detail.result.to_string(),
            correct: detail.correct,
            open: detail.open.to_string(),
            close: detail.close.to_string(),
            num_signals: detail.num_signals,
        })?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn format_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes();
    let (days, hours, mins) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
    if days > 0 {
        format!("{}d {}h {}m", days, hours, mins)
    } else {
        format!("{}h {}m", hours, mins)
    }
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_pct(pct: Option<f64>) -> String {
    match pct {
        Some(p) => format!("{:.1}%", p),
        None => "no data".to_string(),
    }
}

#[derive(Tabled)]
struct BucketRow {
    #[tabled(rename = "Bucket")]
    name: String,
    #[tabled(rename = "Correct")]
    correct: u32,
    #[tabled(rename = "Wrong")]
    wrong: u32,
    #[tabled(rename = "Total")]
    total: u32,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Wilson 95%")]
    interval: String,
    #[tabled(rename = "Credible 95%")]
    credible: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
}

impl From<BucketSummary> for BucketRow {
    fn from(s: BucketSummary) -> Self {
        let (interval, credible) = if s.total == 0 {
            ("-".to_string(), "-".to_string())
        } else {
            (
                format!("{:.1}%-{:.1}%", s.wilson_lower_pct, s.wilson_upper_pct),
                format!("{:.1}%-{:.1}%", s.credible_lower_pct, s.credible_upper_pct),
            )
        };
        Self {
            name: s.name,
            correct: s.correct,
            wrong: s.wrong,
            total: s.total,
            accuracy: format_pct(s.accuracy_pct),
            interval,
            credible,
            confidence: format!("{:?}", s.confidence),
        }
    }
}

fn bucket_table(summaries: Vec<BucketSummary>) -> String {
    let rows: Vec<BucketRow> = summaries.into_iter().map(BucketRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

fn registry_table(registry: &BucketRegistry) -> String {
    bucket_table(registry.summaries())
}

#[derive(Tabled)]
struct HourRow {
    #[tabled(rename = "Hour (UTC)")]
    hour: String,
    #[tabled(rename = "Hits")]
    hits: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "")]
    bar: String,
}

fn hour_row(hour: u32, bucket: &ScoreBucket) -> HourRow {
    let acc = bucket.accuracy_pct();
    HourRow {
        hour: format!("{:02}:00", hour),
        hits: format!("{}/{}", bucket.correct, bucket.total()),
        accuracy: format_pct(acc),
        // one mark per 5%
        bar: "#".repeat(acc.map_or(0, |a| (a / 5.0) as usize)),
    }
}

#[derive(Tabled)]
struct DetailRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Vote")]
    vote: String,
    #[tabled(rename = "Real")]
    result: String,
    #[tabled(rename = "Open")]
    open: String,
    #[tabled(rename = "Close")]
    close: String,
    #[tabled(rename = "OK?")]
    ok: String,
}

fn detail_row(detail: &WindowResult) -> DetailRow {
    let start = detail.start_time();
    DetailRow {
        date: start.map_or_else(|| "-".into(), |t| t.format("%m-%d").to_string()),
        time: start.map_or_else(|| "-".into(), |t| t.format("%H:%M").to_string()),
        vote: detail.vote.to_string(),
        result: detail.result.to_string(),
        open: format!("{:.2}", detail.open),
        close: format!("{:.2}", detail.close),
        ok: if detail.correct { "[OK]".into() } else { "[X]".into() },
    }
}

#[derive(Tabled)]
struct LabelRow {
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Count")]
    count: usize,
    #[tabled(rename = "Share")]
    share: String,
}

fn label_table(labels: &[LabelCount], limit: usize) -> String {
    let rows: Vec<LabelRow> = labels
        .iter()
        .take(limit)
        .map(|l| LabelRow {
            label: l.label.clone(),
            count: l.count,
            share: format!("{:.1}%", l.pct),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// One line of the run-vs-baseline comparison
#[derive(Debug, Clone, PartialEq, Tabled)]
pub struct ComparisonRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Baseline")]
    pub baseline: String,
    #[tabled(rename = "Current")]
    pub current: String,
    #[tabled(rename = "Delta")]
    pub delta: String,
}

fn accuracy_row(metric: &str, baseline: Option<f64>, current: Option<f64>) -> ComparisonRow {
    let delta = match (baseline, current) {
        (Some(b), Some(c)) => format!("{:+.1} pts", c - b),
        _ => "-".to_string(),
    };
    ComparisonRow {
        metric: metric.to_string(),
        baseline: format_pct(baseline),
        current: format_pct(current),
        delta,
    }
}

fn registry_accuracy(registry: &BucketRegistry, name: &str) -> Option<f64> {
    registry.get(name).and_then(ScoreBucket::accuracy_pct)
}

/// Global, per-strength and per-vote accuracy side by side with a previous run
pub fn compare(current: &RunReport, baseline: &RunReport) -> Vec<ComparisonRow> {
    let mut rows = vec![accuracy_row("Global accuracy", baseline.accuracy_pct(), current.accuracy_pct())];

    for (name, bucket) in current.statistics.by_strength.iter() {
        rows.push(accuracy_row(
            name,
            registry_accuracy(&baseline.statistics.by_strength, name),
            bucket.accuracy_pct(),
        ));
    }
    for (name, bucket) in current.statistics.by_vote.iter() {
        rows.push(accuracy_row(
            &format!("{} votes", name),
            registry_accuracy(&baseline.statistics.by_vote, name),
            bucket.accuracy_pct(),
        ));
    }

    let span = |r: &RunReport| r.signals.duration().map_or_else(|| "-".to_string(), format_duration);
    rows.push(ComparisonRow {
        metric: "Scored windows".to_string(),
        baseline: format!("{} in {}", baseline.statistics.total.total(), span(baseline)),
        current: format!("{} in {}", current.statistics.total.total(), span(current)),
        delta: format!(
            "{:+}",
            i64::from(current.statistics.total.total()) - i64::from(baseline.statistics.total.total())
        ),
    });

    rows
}

/// Distribution of the raw signal log
pub fn render_signal_summary(summary: &SignalSummary, top_n: usize) -> String {
    let mut out = String::new();

    out.push_str("📊 SIGNAL LOG\n");
    out.push_str(THIN_RULE);
    out.push('\n');
    out.push_str(&format!("  Period:    {} -> {}\n", format_time(summary.first), format_time(summary.last)));
    if let Some(duration) = summary.duration() {
        out.push_str(&format!("  Duration:  {}\n", format_duration(duration)));
    }
    out.push_str(&format!("  Records:   {}\n", summary.total_records));
    if let Some(mean) = summary.mean_model_up {
        out.push_str(&format!("  Mean model_up: {:.3}\n", mean));
    }

    out.push_str("\nSignals:\n");
    out.push_str(&label_table(&summary.signals, usize::MAX));
    out.push_str(&format!("\n\nTop {} recommendations:\n", top_n));
    out.push_str(&label_table(&summary.recommendations, top_n));
    out.push_str("\n\nRegimes:\n");
    out.push_str(&label_table(&summary.regimes, usize::MAX));
    out.push('\n');

    out
}

/// Full text report for a scored run
pub fn generate_report(report: &RunReport, config: &ReportConfig, baseline: Option<&RunReport>) -> String {
    let stats = &report.statistics;
    let mut out = String::new();

    out.push_str("╔══════════════════════════════════════════════════════════════════╗\n");
    out.push_str("║          BTC 15M SIGNAL ACCURACY - VERIFICATION REPORT           ║\n");
    out.push_str("╚══════════════════════════════════════════════════════════════════╝\n\n");

    out.push_str(&render_signal_summary(&report.signals, config.top_recommendations));

    out.push_str("\n🔎 COVERAGE\n");
    out.push_str(THIN_RULE);
    out.push('\n');
    out.push_str(&format!("  Active windows:        {}\n", stats.coverage.active_windows));
    out.push_str(&format!("  Without outcome:       {}\n", stats.coverage.missing_outcome));
    out.push_str(&format!("  Neutral (tied) votes:  {}\n", stats.coverage.neutral));
    out.push_str(&format!("  Scored windows:        {}\n", stats.coverage.scored));
    out.push_str(&format!(
        "  Klines fetched:        {} in {} pages\n",
        report.fetch.candles, report.fetch.pages
    ));
    if let Some(stop) = &report.fetch.stopped {
        let at = DateTime::from_timestamp_millis(stop.at_ms);
        out.push_str(&format!(
            "  ⚠️  Outcome fetch stopped early at {} ({:?}); later windows are unscored\n",
            format_time(at),
            stop.reason
        ));
    }

    out.push_str(&format!("\n{}\n", RULE));
    match stats.total.accuracy_pct() {
        Some(acc) => out.push_str(&format!(
            ">>> GLOBAL ACCURACY: {}/{} = {:.2}% <<<\n",
            stats.total.correct,
            stats.total.total(),
            acc
        )),
        None => out.push_str(">>> GLOBAL ACCURACY: no verifiable windows <<<\n"),
    }
    out.push_str(RULE);
    out.push('\n');

    out.push_str("\n[BY SIGNAL STRENGTH]\n");
    out.push_str(&registry_table(&stats.by_strength));
    out.push_str("\n\n[BY ENTRY TIMING]\n");
    out.push_str(&registry_table(&stats.by_timing));
    out.push_str("\n\n[BY VOTE DIRECTION]\n");
    out.push_str(&registry_table(&stats.by_vote));
    out.push_str("\n\n[BY MARKET REGIME]\n");
    out.push_str(&registry_table(&stats.by_regime));

    out.push_str("\n\n[BY DAY (UTC)]\n");
    let days = stats
        .by_day
        .iter()
        .map(|(day, bucket)| bucket.summary(day.format("%Y-%m-%d").to_string()))
        .collect();
    out.push_str(&bucket_table(days));

    out.push_str("\n\n[BY HOUR (UTC)]\n");
    let hours: Vec<HourRow> = stats.by_hour.iter().map(|(h, b)| hour_row(*h, b)).collect();
    out.push_str(&Table::new(hours).with(Style::rounded()).to_string());

    out.push_str("\n\n[STREAKS]\n");
    out.push_str(&format!("  Best winning streak: {}\n", report.streaks.best_winning));
    out.push_str(&format!("  Worst losing streak: {}\n", report.streaks.worst_losing));

    let recent = config.recent_windows.min(stats.details.len());
    out.push_str(&format!("\n[LAST {} WINDOWS]\n", recent));
    let rows: Vec<DetailRow> = stats.details[stats.details.len() - recent..]
        .iter()
        .map(detail_row)
        .collect();
    out.push_str(&Table::new(rows).with(Style::rounded()).to_string());
    out.push('\n');

    if let Some(baseline) = baseline {
        out.push_str(&format!("\n{}\nCOMPARISON WITH BASELINE RUN\n{}\n", RULE, RULE));
        out.push_str(&Table::new(compare(report, baseline)).with(Style::rounded()).to_string());
        out.push('\n');
    }

    let verdict = Verdict::evaluate(report.accuracy_pct(), baseline.and_then(RunReport::accuracy_pct));
    out.push_str(&format!("\n{}\n{}\n{}\n", RULE, verdict, RULE));

    out
}

/// Report for a run with no actionable window
pub fn render_nothing_to_score(summary: &SignalSummary, actionable: &[String], top_n: usize) -> String {
    let mut out = render_signal_summary(summary, top_n);
    out.push_str(&format!(
        "\n⚠️  No actionable signals ({}) - nothing to score\n",
        actionable.join("/")
    ));
    out
}

fn value_lines(out: &mut String, title: &str, values: &[ValueCount]) {
    if values.is_empty() {
        return;
    }
    out.push_str(&format!("   {}:\n", title));
    for v in values {
        out.push_str(&format!("      {}: {}\n", v.value, v.count));
    }
}

/// Text summary of the secondary backtest database
pub fn render_db_summary(summary: &BacktestDbSummary) -> String {
    let mut out = String::new();

    out.push_str(&format!("{}\nBACKTEST DATABASE\n{}\n", RULE, RULE));

    match &summary.market_outcomes {
        Some(outcomes) => {
            out.push_str(&format!("\n[MARKET OUTCOMES] {} resolved markets\n", outcomes.rows));
            value_lines(&mut out, "Outcomes", &outcomes.by_outcome);
        }
        None => out.push_str("\n[MARKET OUTCOMES] table not present\n"),
    }

    match &summary.trades {
        Some(trades) => {
            out.push_str(&format!("\n[SIMULATED TRADES] {} trades\n", trades.rows));
            value_lines(&mut out, "Outcomes", &trades.by_outcome);
            if let Some(total) = trades.pnl_total {
                out.push_str(&format!("   PnL total: {:.4}\n", total));
            }
            if let Some(mean) = trades.pnl_mean {
                out.push_str(&format!("   PnL mean:  {:.4}\n", mean));
            }
            value_lines(&mut out, "By side", &trades.by_side);
        }
        None => out.push_str("\n[SIMULATED TRADES] table not present\n"),
    }

    if let Some(snapshots) = summary.snapshots {
        out.push_str(&format!("\n[SNAPSHOTS] {} stored\n", snapshots));
    }

    out
}
