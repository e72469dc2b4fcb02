use chrono::{Duration as ChronoDuration, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::api::ApiError;
use crate::backfill::converter::{sort_and_dedupe, CandleConverter};
use crate::models::{Candle, Interval};

pub const DEFAULT_MARKET_BASE_URL: &str = "https://api.bitget.com";
const HISTORY_CANDLES_PATH: &str = "/api/v2/spot/market/history-candles";
const SUCCESS_CODE: &str = "00000";

type PageRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Deserialize)]
struct CandleResponse {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
}

/// `(now - days - hours, now)` in epoch milliseconds
pub fn get_time_range(days: i64, hours: i64) -> (i64, i64) {
    let now = Utc::now();
    let start = now - ChronoDuration::days(days) - ChronoDuration::hours(hours);
    (start.timestamp_millis(), now.timestamp_millis())
}

/// Client for the public history-candles endpoint, bound to one symbol and interval
///
/// Reads are best-effort: failures are logged and surface as `None`, never as errors.
/// Clones share the same page rate limiter.
#[derive(Clone)]
pub struct MarketDataClient {
    client: Client,
    base_url: String,
    symbol: String,
    interval: Interval,
    rate_limiter: Option<Arc<PageRateLimiter>>,
}

impl MarketDataClient {
    /// `page_pause` is the minimum spacing between requests; zero disables pacing
    pub fn new(
        base_url: impl Into<String>,
        symbol: impl Into<String>,
        interval: Interval,
        page_pause: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let rate_limiter = Quota::with_period(page_pause)
            .map(|quota| Arc::new(RateLimiter::direct(quota)));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            symbol: symbol.into(),
            interval,
            rate_limiter,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// One page of candles ending at `end_time`
    ///
    /// Returns `None` on transport, HTTP or API errors (already logged).
    pub async fn fetch_candles(&self, end_time: i64, limit: usize) -> Option<Vec<Candle>> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let url = format!("{}{}", self.base_url, HISTORY_CANDLES_PATH);
        let query = [
            ("symbol", self.symbol.clone()),
            ("granularity", self.interval.label().to_string()),
            ("endTime", end_time.to_string()),
            ("limit", limit.to_string()),
        ];

        let response = match self.client.get(&url).query(&query).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Candle request failed for {}: {}", self.symbol, e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Candle request for {} returned {}: {}", self.symbol, status, body);
            return None;
        }

        let body: CandleResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to decode candle response for {}: {}", self.symbol, e);
                return None;
            }
        };

        let rows = match (&body.code, &body.data) {
            (Value::String(code), Value::Array(rows)) if code == SUCCESS_CODE => rows,
            _ => {
                tracing::warn!(
                    "Candle API error for {}: {}",
                    self.symbol,
                    body.msg.as_deref().unwrap_or("Unknown error")
                );
                return None;
            }
        };

        let rows: Vec<Vec<Value>> = rows
            .iter()
            .filter_map(|row| row.as_array().cloned())
            .collect();

        let converter = CandleConverter::new(self.symbol.clone(), self.interval);
        Some(converter.convert_rows(&rows))
    }

    /// Page backward from `end_time` until the history is exhausted or `start_time` is reached
    ///
    /// The result is ascending by open time with no repeated open times.
    pub async fn fetch_candles_range(
        &self,
        start_time: i64,
        end_time: i64,
        limit: usize,
    ) -> Vec<Candle> {
        let mut all_candles = Vec::new();
        let mut current_end = end_time;
        let mut pages = 0usize;

        while current_end > start_time {
            let page = match self.fetch_candles(current_end, limit).await {
                Some(page) if !page.is_empty() => page,
                _ => break,
            };
            pages += 1;

            let page_len = page.len();
            let earliest = page
                .iter()
                .map(|c| c.open_time)
                .min()
                .unwrap_or(current_end);
            all_candles.extend(page);

            if page_len < limit {
                break;
            }
            // Endpoint did not move backward; stop rather than re-request the same page
            if earliest >= current_end {
                tracing::warn!(
                    "Candle paging for {} stalled at {}, stopping",
                    self.symbol,
                    current_end
                );
                break;
            }
            current_end = earliest;
        }

        let candles = sort_and_dedupe(all_candles);
        tracing::debug!(
            "Fetched {} {} candles for {} in {} pages",
            candles.len(),
            self.interval,
            self.symbol,
            pages
        );
        candles
    }
}
