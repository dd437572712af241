//! Binance Klines Fetcher
//!
//! Fetches BTC/USDT 15m klines from the Binance REST API and turns each
//! candle into the realized outcome of the window it opens.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::BinanceConfig;
use crate::error::FetchError;
use crate::models::{FlatClose, Outcome};

/// Kline data from Binance API
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Kline {
    /// Parse one `[open_time, open, high, low, close, volume, ...]` row
    pub fn from_row(row: &[serde_json::Value]) -> Result<Self, FetchError> {
        if row.len() < 6 {
            return Err(FetchError::Payload(format!("kline row has {} fields", row.len())));
        }

        let open_time = row[0]
            .as_i64()
            .ok_or_else(|| FetchError::Payload(format!("bad open_time: {}", row[0])))?;

        Ok(Self {
            open_time,
            open: parse_decimal(&row[1])?,
            high: parse_decimal(&row[2])?,
            low: parse_decimal(&row[3])?,
            close: parse_decimal(&row[4])?,
            volume: parse_decimal(&row[5])?,
        })
    }

    pub fn into_outcome(self, flat: FlatClose) -> Outcome {
        Outcome {
            window_start: self.open_time,
            result: flat.resolve(self.open, self.close),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

fn parse_decimal(value: &serde_json::Value) -> Result<Decimal, FetchError> {
    let parsed = match value {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| FetchError::Payload(format!("bad decimal: {}", value)))
}

/// A paged source of consecutive klines
#[async_trait]
pub trait KlineSource {
    /// Klines with `start_ms <= open_time <= end_ms`, at most `limit`, ascending
    async fn fetch_klines(&self, start_ms: i64, end_ms: i64, limit: u32) -> Result<Vec<Kline>, FetchError>;
}

/// Binance klines client
pub struct BinanceKlinesClient {
    http: reqwest::Client,
    base_url: String,
    symbol: String,
    interval: String,
}

impl BinanceKlinesClient {
    pub fn new(config: &BinanceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            symbol: config.symbol.clone(),
            interval: config.interval.clone(),
        })
    }
}

#[async_trait]
impl KlineSource for BinanceKlinesClient {
    async fn fetch_klines(&self, start_ms: i64, end_ms: i64, limit: u32) -> Result<Vec<Kline>, FetchError> {
        let url = format!("{}/api/v3/klines", self.base_url);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("symbol", self.symbol.clone()),
                ("interval", self.interval.clone()),
                ("startTime", start_ms.to_string()),
                ("endTime", end_ms.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        // Binance returns klines as arrays of arrays
        let data: Vec<Vec<serde_json::Value>> = response.json().await?;

        data.iter().map(|row| Kline::from_row(row)).collect()
    }
}

/// Why pagination ended before the requested range was covered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    EmptyPage,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStop {
    /// Start of the page that failed (ms)
    pub at_ms: i64,
    pub reason: StopReason,
}

/// Outcomes keyed by window start, possibly partial
#[derive(Debug, Clone, Default)]
pub struct OutcomeFetch {
    pub outcomes: BTreeMap<i64, Outcome>,
    pub pages: usize,
    /// `Some` when fetching stopped before the end of the range
    pub stopped: Option<FetchStop>,
}

impl OutcomeFetch {
    pub fn is_complete(&self) -> bool {
        self.stopped.is_none()
    }
}

/// Pagination settings for [`fetch_outcomes`]
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Klines per request (Binance max 1000)
    pub page_limit: u32,
    /// Pause between requests
    pub page_delay_ms: u64,
    pub flat_close: FlatClose,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_limit: 1000,
            page_delay_ms: 200,
            flat_close: FlatClose::Down,
        }
    }
}

/// Fetch outcomes for `[min_start, max_start + duration)`.
///
/// Each page starts one millisecond after the newest candle already seen, until
/// the candle of the last window arrives. An empty page or a failed request ends
/// pagination; whatever was fetched so far is returned with `stopped` set. An empty
/// page when only the last window is left means that candle is missing, and the
/// fetch still counts as complete.
pub async fn fetch_outcomes<S>(
    source: &S,
    window_starts: &[i64],
    duration_ms: i64,
    options: FetchOptions,
) -> OutcomeFetch
where
    S: KlineSource + ?Sized,
{
    let mut fetch = OutcomeFetch::default();

    let (Some(&first), Some(&last)) = (window_starts.iter().min(), window_starts.iter().max()) else {
        return fetch;
    };
    let end = last + duration_ms;

    let total_windows = (end - first) / duration_ms;
    let limit = i64::from(options.page_limit.max(1));
    info!(
        "Fetching {} windows of klines (~{} requests)",
        total_windows,
        (total_windows + limit - 1) / limit
    );

    let mut current = first;
    while current < end {
        let page = match source.fetch_klines(current, end - 1, options.page_limit).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Kline fetch failed at {}: {}", current, e);
                fetch.stopped = Some(FetchStop {
                    at_ms: current,
                    reason: StopReason::Error(e.to_string()),
                });
                break;
            }
        };

        let Some(newest) = page.iter().map(|k| k.open_time).max() else {
            if fetch.pages > 0 && current > last - duration_ms {
                // only the last window is left, its candle is a gap rather than a cut-off
                debug!("No kline for the last window at {}", last);
                break;
            }
            warn!("No klines returned from {} to {}", current, end);
            fetch.stopped = Some(FetchStop {
                at_ms: current,
                reason: StopReason::EmptyPage,
            });
            break;
        };

        debug!("Page {}: {} klines from {}", fetch.pages + 1, page.len(), current);
        fetch.pages += 1;
        for kline in page {
            fetch
                .outcomes
                .insert(kline.open_time, kline.into_outcome(options.flat_close));
        }

        if newest < current {
            fetch.stopped = Some(FetchStop {
                at_ms: current,
                reason: StopReason::Error(format!("page ended at {} before its start", newest)),
            });
            break;
        }
        if newest + duration_ms >= end {
            break;
        }
        current = newest + 1;

        if current < end && options.page_delay_ms > 0 {
            // Rate limiting: stay well under 1200 requests/minute
            tokio::time::sleep(std::time::Duration::from_millis(options.page_delay_ms)).await;
        }
    }

    info!("Fetched {} klines in {} pages", fetch.outcomes.len(), fetch.pages);
    fetch
}
