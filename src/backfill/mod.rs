pub mod converter;
pub mod validator;

use chrono::Utc;
use std::sync::Arc;

use crate::api::market_data::get_time_range;
use crate::api::MarketDataClient;
use crate::db::CandleStore;
use crate::models::{Candle, Interval};
use crate::Result;

pub use converter::CandleConverter;
pub use validator::{CandleValidator, ConsistencyReport};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const HOUR_MS: i64 = 60 * 60 * 1000;

/// Keeps one stored candle series (symbol + interval) in step with the exchange
pub struct CandleAgent<S> {
    client: MarketDataClient,
    store: Arc<S>,
}

impl<S: CandleStore> CandleAgent<S> {
    /// Binds the agent to the client's series and makes sure the symbol exists in storage
    pub async fn new(client: MarketDataClient, store: Arc<S>) -> Result<Self> {
        store.ensure_symbol(client.symbol()).await?;
        Ok(Self { client, store })
    }

    pub fn symbol(&self) -> &str {
        self.client.symbol()
    }

    pub fn interval(&self) -> Interval {
        self.client.interval()
    }

    /// Extend the stored series backward by `days` + `hours` from its oldest candle
    pub async fn fetch_past_candles(&self, days: i64, hours: i64, limit: usize) -> Result<Vec<Candle>> {
        let Some(oldest) = self.store.oldest_candle(self.symbol(), self.interval()).await? else {
            tracing::warn!(
                "No stored {} candles for {}, seed the series first",
                self.interval(),
                self.symbol()
            );
            return Ok(Vec::new());
        };

        let end_time = oldest.open_time;
        let start_time = end_time - days * DAY_MS - hours * HOUR_MS;
        Ok(self
            .client
            .fetch_candles_range(start_time, end_time, limit)
            .await)
    }

    /// Fetch everything from the newest stored candle up to now
    ///
    /// The newest stored bar is fetched again, so a bar that was still forming
    /// gets its final values on the next save.
    pub async fn fetch_future_candles(&self, limit: usize) -> Result<Vec<Candle>> {
        let Some(newest) = self.store.newest_candle(self.symbol(), self.interval()).await? else {
            tracing::warn!(
                "No stored {} candles for {}, seed the series first",
                self.interval(),
                self.symbol()
            );
            return Ok(Vec::new());
        };

        let end_time = Utc::now().timestamp_millis();
        Ok(self
            .client
            .fetch_candles_range(newest.open_time, end_time, limit)
            .await)
    }

    /// Upsert a batch in one transaction; returns the number of new rows
    pub async fn save_to_db(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            tracing::info!("No {} candles to save for {}", self.interval(), self.symbol());
            return Ok(0);
        }

        let inserted = self.store.save_candles(candles).await?;
        tracing::info!(
            "Saved {} {} candles for {} ({} new)",
            candles.len(),
            self.interval(),
            self.symbol(),
            inserted
        );

        Ok(inserted)
    }

    /// Initial fill of an empty series with the last `days` of history
    pub async fn seed(&self, days: i64, limit: usize) -> Result<usize> {
        if self
            .store
            .newest_candle(self.symbol(), self.interval())
            .await?
            .is_some()
        {
            tracing::debug!("{} {} series already seeded", self.symbol(), self.interval());
            return Ok(0);
        }

        tracing::info!(
            "Seeding {} days of {} candles for {}",
            days,
            self.interval(),
            self.symbol()
        );

        let (start_time, end_time) = get_time_range(days, 0);
        let candles = self
            .client
            .fetch_candles_range(start_time, end_time, limit)
            .await;
        self.save_to_db(&candles).await
    }

    /// Bring the series up to date: fetch future candles and save them
    pub async fn sync(&self, limit: usize) -> Result<usize> {
        let candles = self.fetch_future_candles(limit).await?;
        self.save_to_db(&candles).await
    }

    /// Report the first hole in the stored series
    pub async fn check_candles_consistency(&self) -> Result<ConsistencyReport> {
        let candles = self.store.load_candles(self.symbol(), self.interval()).await?;
        let report = CandleValidator::new(self.interval()).check(&candles);

        match &report {
            ConsistencyReport::Consistent { checked } => {
                tracing::info!(
                    "{} {} series is consistent ({} candles)",
                    self.symbol(),
                    self.interval(),
                    checked
                );
            }
            ConsistencyReport::Gap {
                previous_open_time,
                next_open_time,
            } => {
                tracing::warn!(
                    "{} {} series has a gap after {} (next candle at {})",
                    self.symbol(),
                    self.interval(),
                    previous_open_time,
                    next_open_time
                );
            }
        }

        Ok(report)
    }
}
