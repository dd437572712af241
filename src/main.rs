use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use btc_signal_verifier::binance_klines::BinanceKlinesClient;
use btc_signal_verifier::config::AnalysisConfig;
use btc_signal_verifier::verifier::{self, Verification};
use btc_signal_verifier::{db, output, signals};

#[derive(Parser)]
#[command(name = "btc-signal-verifier")]
#[command(about = "Score a BTC 15m signal log against Binance kline outcomes")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch outcomes and score every active window
    Verify {
        /// Signal log CSV
        #[arg(default_value = "signals.csv")]
        signals: PathBuf,

        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only records at or after this instant
        #[arg(long, value_parser = parse_time_arg)]
        from: Option<DateTime<Utc>>,

        /// Only records strictly before this instant
        #[arg(long, value_parser = parse_time_arg)]
        to: Option<DateTime<Utc>>,

        /// Output directory for report.txt, report.json and details.csv
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Previous report.json to compare against
        #[arg(short, long)]
        baseline: Option<PathBuf>,

        /// Backtest SQLite database to summarize after the report
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show the signal distribution without fetching outcomes
    Summary {
        #[arg(default_value = "signals.csv")]
        signals: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, value_parser = parse_time_arg)]
        from: Option<DateTime<Utc>>,

        #[arg(long, value_parser = parse_time_arg)]
        to: Option<DateTime<Utc>>,
    },

    /// Summarize the backtest SQLite database
    Db {
        #[arg(default_value = "backtest.db")]
        path: PathBuf,
    },
}

fn parse_time_arg(value: &str) -> Result<DateTime<Utc>, String> {
    signals::parse_timestamp(value).ok_or_else(|| format!("unrecognized timestamp: {}", value))
}

fn init_logging(json: bool) {
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,btc_signal_verifier=debug".to_string());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&log_filter))
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Commands::Verify {
            signals,
            config,
            from,
            to,
            output_dir,
            baseline,
            db,
        } => {
            let config = load_config(config.as_deref(), from, to)?;
            run_verify(&signals, config, &output_dir, baseline, db).await?;
        }
        Commands::Summary {
            signals,
            config,
            from,
            to,
        } => {
            let config = load_config(config.as_deref(), from, to)?;
            show_summary(&signals, &config)?;
        }
        Commands::Db { path } => {
            show_db(&path)?;
        }
    }

    Ok(())
}

/// Config file + env overrides, then CLI date bounds on top
fn load_config(
    path: Option<&Path>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<AnalysisConfig> {
    let mut config = AnalysisConfig::load_with_env(path)?;
    if from.is_some() {
        config.filter.from = from;
    }
    if to.is_some() {
        config.filter.to = to;
    }
    config.validate()?;
    Ok(config)
}

async fn run_verify(
    signals_path: &Path,
    mut config: AnalysisConfig,
    output_dir: &Path,
    baseline: Option<PathBuf>,
    db_path: Option<PathBuf>,
) -> Result<()> {
    println!("📂 Loading signals from {}...", signals_path.display());
    let records = signals::load_signals(signals_path)?;
    println!("✅ Loaded {} records", records.len());

    if let Some(path) = baseline {
        config.report.baseline = Some(path);
    }
    let baseline = match &config.report.baseline {
        Some(path) => Some(output::load_baseline(path)?),
        None => None,
    };

    let client = BinanceKlinesClient::new(&config.binance)?;
    info!(
        "Fetching {} {} klines from {}",
        config.binance.symbol, config.binance.interval, config.binance.base_url
    );

    let report = match verifier::verify(records, &config, &client).await {
        Verification::NothingToScore { signals } => {
            print!(
                "{}",
                output::render_nothing_to_score(&signals, &config.tiers.actionable, config.report.top_recommendations)
            );
            return Ok(());
        }
        Verification::Scored(report) => report,
    };

    let text = output::generate_report(&report, &config.report, baseline.as_ref());
    println!("\n{}", text);

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let json_path = output_dir.join("report.json");
    let csv_path = output_dir.join("details.csv");
    let report_path = output_dir.join("report.txt");

    println!("💾 Exporting results...");

    output::export_to_json(&report, &json_path)?;
    println!("  ✅ JSON: {}", json_path.display());

    output::export_details_to_csv(&report, &csv_path)?;
    println!("  ✅ CSV: {}", csv_path.display());

    std::fs::write(&report_path, &text)?;
    println!("  ✅ Report: {}", report_path.display());

    if let Some(path) = db_path {
        println!();
        show_db(&path)?;
    }

    Ok(())
}

fn show_summary(signals_path: &Path, config: &AnalysisConfig) -> Result<()> {
    let records = signals::load_signals(signals_path)?;
    let records = signals::filter_records(records, &config.filter);
    let summary = signals::summarize(&records);

    print!("{}", output::render_signal_summary(&summary, config.report.top_recommendations));
    Ok(())
}

fn show_db(path: &Path) -> Result<()> {
    match db::summarize_backtest_db(path)? {
        Some(summary) => print!("{}", output::render_db_summary(&summary)),
        None => println!("⚠️  No backtest database at {}", path.display()),
    }
    Ok(())
}
