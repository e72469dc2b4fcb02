pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{Candle, Credentials, Interval, PositionState};
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PostgresPersistence;

/// Proof that this worker holds the position row for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleClaim {
    pub position_id: i64,
    pub token: Uuid,
}

/// Candle series storage keyed by `(open_time, symbol, interval)`
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Get-or-create the symbol row
    async fn ensure_symbol(&self, symbol: &str) -> Result<()>;

    async fn list_symbols(&self) -> Result<Vec<String>>;

    /// Upsert a batch atomically; returns how many rows were newly inserted
    async fn save_candles(&self, candles: &[Candle]) -> Result<usize>;

    async fn oldest_candle(&self, symbol: &str, interval: Interval) -> Result<Option<Candle>>;

    async fn newest_candle(&self, symbol: &str, interval: Interval) -> Result<Option<Candle>>;

    /// Whole series, ascending by open time
    async fn load_candles(&self, symbol: &str, interval: Interval) -> Result<Vec<Candle>>;

    /// Candles with `open_time > cursor_ms`, newest first
    async fn candles_after(
        &self,
        symbol: &str,
        interval: Interval,
        cursor_ms: i64,
    ) -> Result<Vec<Candle>>;
}

/// Storage for the single position-state row
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// The position row with the lowest id, if any
    async fn load_position_state(&self) -> Result<Option<PositionState>>;

    /// Fresh read of one position row, taken after claiming it
    async fn load_position_state_by_id(&self, position_id: i64) -> Result<Option<PositionState>>;

    async fn create_position_state(&self, credentials: &Credentials) -> Result<PositionState>;

    /// Persist everything except the claim columns
    async fn save_position_state(&self, state: &PositionState) -> Result<()>;

    /// Take the row for one cycle unless another live claim exists
    ///
    /// A claim older than `ttl` is considered abandoned and may be taken over.
    async fn claim_cycle(&self, position_id: i64, ttl: Duration) -> Result<Option<CycleClaim>>;

    /// Drop the claim; a claim that was taken over is left alone
    async fn release_cycle(&self, claim: &CycleClaim) -> Result<()>;
}
