use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::db::{CandleStore, CycleClaim, PositionStore};
use crate::models::{Candle, Credentials, Interval, PositionState};
use crate::Result;

/// (symbol, interval_ms, open_time)
type CandleKey = (String, i64, i64);

#[derive(Default)]
struct Inner {
    symbols: BTreeSet<String>,
    candles: BTreeMap<CandleKey, Candle>,
    positions: BTreeMap<i64, StoredPosition>,
    next_position_id: i64,
}

struct StoredPosition {
    state: PositionState,
    claim: Option<(Uuid, DateTime<Utc>)>,
}

/// In-process store with the same semantics as the Postgres one
///
/// Used by tests and dry runs. A candle batch referencing an unknown symbol is
/// rejected as a whole, like the foreign key would.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| "Memory store lock poisoned".into())
    }

    fn series(inner: &Inner, symbol: &str, interval: Interval) -> Vec<Candle> {
        let interval_ms = interval.duration_ms();
        let from = (symbol.to_string(), interval_ms, i64::MIN);
        let to = (symbol.to_string(), interval_ms, i64::MAX);
        inner
            .candles
            .range(from..=to)
            .map(|(_, candle)| candle.clone())
            .collect()
    }
}

#[async_trait]
impl CandleStore for MemoryStore {
    async fn ensure_symbol(&self, symbol: &str) -> Result<()> {
        self.lock()?.symbols.insert(symbol.to_string());
        Ok(())
    }

    async fn list_symbols(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.symbols.iter().cloned().collect())
    }

    async fn save_candles(&self, candles: &[Candle]) -> Result<usize> {
        let mut inner = self.lock()?;

        if let Some(unknown) = candles.iter().find(|c| !inner.symbols.contains(&c.symbol)) {
            return Err(format!("Unknown symbol {}", unknown.symbol).into());
        }

        let mut inserted = 0;
        for candle in candles {
            let key = (candle.symbol.clone(), candle.interval_ms, candle.open_time);
            if inner.candles.insert(key, candle.clone()).is_none() {
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn oldest_candle(&self, symbol: &str, interval: Interval) -> Result<Option<Candle>> {
        let inner = self.lock()?;
        Ok(Self::series(&inner, symbol, interval).into_iter().next())
    }

    async fn newest_candle(&self, symbol: &str, interval: Interval) -> Result<Option<Candle>> {
        let inner = self.lock()?;
        Ok(Self::series(&inner, symbol, interval).pop())
    }

    async fn load_candles(&self, symbol: &str, interval: Interval) -> Result<Vec<Candle>> {
        let inner = self.lock()?;
        Ok(Self::series(&inner, symbol, interval))
    }

    async fn candles_after(
        &self,
        symbol: &str,
        interval: Interval,
        cursor_ms: i64,
    ) -> Result<Vec<Candle>> {
        let inner = self.lock()?;
        let mut candles: Vec<Candle> = Self::series(&inner, symbol, interval)
            .into_iter()
            .filter(|c| c.open_time > cursor_ms)
            .collect();
        candles.reverse();
        Ok(candles)
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn load_position_state(&self) -> Result<Option<PositionState>> {
        let inner = self.lock()?;
        Ok(inner
            .positions
            .values()
            .next()
            .map(|stored| stored.state.clone()))
    }

    async fn load_position_state_by_id(&self, position_id: i64) -> Result<Option<PositionState>> {
        let inner = self.lock()?;
        Ok(inner
            .positions
            .get(&position_id)
            .map(|stored| stored.state.clone()))
    }

    async fn create_position_state(&self, credentials: &Credentials) -> Result<PositionState> {
        let mut inner = self.lock()?;
        inner.next_position_id += 1;
        let state = PositionState::new(inner.next_position_id, credentials.clone());
        inner.positions.insert(
            state.id,
            StoredPosition {
                state: state.clone(),
                claim: None,
            },
        );
        Ok(state)
    }

    async fn save_position_state(&self, state: &PositionState) -> Result<()> {
        let mut inner = self.lock()?;
        let stored = inner
            .positions
            .get_mut(&state.id)
            .ok_or_else(|| format!("Position state {} not found", state.id))?;

        stored.state = state.clone();
        stored.state.updated = Utc::now();
        Ok(())
    }

    async fn claim_cycle(&self, position_id: i64, ttl: Duration) -> Result<Option<CycleClaim>> {
        let mut inner = self.lock()?;
        let stored = inner
            .positions
            .get_mut(&position_id)
            .ok_or_else(|| format!("Position state {} not found", position_id))?;

        let now = Utc::now();
        let ttl = chrono::Duration::seconds(ttl.as_secs() as i64);
        if let Some((_, claimed_at)) = stored.claim {
            if claimed_at + ttl > now {
                return Ok(None);
            }
        }

        let token = Uuid::new_v4();
        stored.claim = Some((token, now));
        Ok(Some(CycleClaim { position_id, token }))
    }

    async fn release_cycle(&self, claim: &CycleClaim) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(stored) = inner.positions.get_mut(&claim.position_id) {
            if matches!(stored.claim, Some((token, _)) if token == claim.token) {
                stored.claim = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: i64 = 3_600_000;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            symbol: "DOGEUSDT".to_string(),
            interval_ms: H,
            open: 0.1,
            high: 0.2,
            low: 0.05,
            close,
            base_volume: 1.0,
            usdt_volume: 1.0,
            quote_volume: 1.0,
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            api_key: "k".to_string(),
            secret_key: "s".to_string(),
            api_passphrase: "p".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        store.ensure_symbol("DOGEUSDT").await.unwrap();
        let batch = vec![candle(0, 0.1), candle(H, 0.2)];

        assert_eq!(store.save_candles(&batch).await.unwrap(), 2);
        assert_eq!(store.save_candles(&batch).await.unwrap(), 0);

        let stored = store.load_candles("DOGEUSDT", Interval::Hour1).await.unwrap();
        assert_eq!(stored, batch);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_values() {
        let store = MemoryStore::new();
        store.ensure_symbol("DOGEUSDT").await.unwrap();
        store.save_candles(&[candle(0, 0.1)]).await.unwrap();

        // Last bar is still forming on the exchange, its close changes
        assert_eq!(store.save_candles(&[candle(0, 0.3)]).await.unwrap(), 0);

        let newest = store
            .newest_candle("DOGEUSDT", Interval::Hour1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(newest.close, 0.3);
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejects_whole_batch() {
        let store = MemoryStore::new();
        store.ensure_symbol("DOGEUSDT").await.unwrap();

        let mut foreign = candle(H, 0.1);
        foreign.symbol = "ETHUSDT".to_string();

        assert!(store.save_candles(&[candle(0, 0.1), foreign]).await.is_err());
        assert!(store
            .load_candles("DOGEUSDT", Interval::Hour1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_series_queries() {
        let store = MemoryStore::new();
        store.ensure_symbol("DOGEUSDT").await.unwrap();
        store
            .save_candles(&[candle(2 * H, 0.1), candle(0, 0.1), candle(H, 0.1)])
            .await
            .unwrap();

        let oldest = store.oldest_candle("DOGEUSDT", Interval::Hour1).await.unwrap();
        assert_eq!(oldest.map(|c| c.open_time), Some(0));

        let after: Vec<i64> = store
            .candles_after("DOGEUSDT", Interval::Hour1, 0)
            .await
            .unwrap()
            .iter()
            .map(|c| c.open_time)
            .collect();
        assert_eq!(after, vec![2 * H, H]);

        // Different interval is a different series
        assert!(store
            .newest_candle("DOGEUSDT", Interval::Hour4)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_claim_excludes_second_worker() {
        let store = MemoryStore::new();
        let state = store.create_position_state(&credentials()).await.unwrap();
        let ttl = Duration::from_secs(600);

        let first = store.claim_cycle(state.id, ttl).await.unwrap().unwrap();
        assert!(store.claim_cycle(state.id, ttl).await.unwrap().is_none());

        store.release_cycle(&first).await.unwrap();
        assert!(store.claim_cycle(state.id, ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_claim_is_taken_over() {
        let store = MemoryStore::new();
        let state = store.create_position_state(&credentials()).await.unwrap();

        let stale = store
            .claim_cycle(state.id, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let fresh = store
            .claim_cycle(state.id, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stale.token, fresh.token);

        // Releasing the stale claim must not drop the fresh one
        store.release_cycle(&stale).await.unwrap();
        assert!(store
            .claim_cycle(state.id, Duration::from_secs(600))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_position_state_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load_position_state().await.unwrap().is_none());

        let mut state = store.create_position_state(&credentials()).await.unwrap();
        state.timestamp_cursor = 42;
        state.remote_id = Some("sl-1".to_string());
        store.save_position_state(&state).await.unwrap();

        let loaded = store.load_position_state().await.unwrap().unwrap();
        assert_eq!(loaded.timestamp_cursor, 42);
        assert_eq!(loaded.remote_id.as_deref(), Some("sl-1"));

        assert_eq!(
            store.load_position_state_by_id(state.id).await.unwrap(),
            Some(loaded)
        );
        assert!(store
            .load_position_state_by_id(state.id + 1)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_symbols_listed_in_order() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            store.ensure_symbol("DOGEUSDT").await.unwrap();
            store.ensure_symbol("BTCUSDT").await.unwrap();
            store.ensure_symbol("DOGEUSDT").await.unwrap();

            assert_eq!(
                store.list_symbols().await.unwrap(),
                vec!["BTCUSDT".to_string(), "DOGEUSDT".to_string()]
            );
        });
    }
}
