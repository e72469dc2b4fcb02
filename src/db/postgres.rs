use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};
use std::time::Duration;
use uuid::Uuid;

use crate::db::{CandleStore, CycleClaim, PositionStore};
use crate::models::{Candle, Credentials, Interval, PositionState};
use crate::Result;

const CANDLE_COLUMNS: &str = "open_time, symbol, interval_ms, open, high, low, close, \
     base_volume, usdt_volume, quote_volume";

const POSITION_COLUMNS: &str = "id, api_key, secret_key, api_passphrase, timestamp_cursor, \
     is_position_active, remote_id, sl_order_price, created, updated, trace";

/// Postgres persistence for candles and the position state
pub struct PostgresPersistence {
    pool: PgPool,
}

fn candle_from_row(row: &PgRow) -> Candle {
    Candle {
        open_time: row.get("open_time"),
        symbol: row.get("symbol"),
        interval_ms: row.get("interval_ms"),
        open: row.get("open"),
        high: row.get("high"),
        low: row.get("low"),
        close: row.get("close"),
        base_volume: row.get("base_volume"),
        usdt_volume: row.get("usdt_volume"),
        quote_volume: row.get("quote_volume"),
    }
}

fn position_from_row(row: &PgRow) -> PositionState {
    let sl_order_price: Option<Decimal> = row.get("sl_order_price");
    let created: DateTime<Utc> = row.get("created");
    let updated: DateTime<Utc> = row.get("updated");

    PositionState {
        id: row.get("id"),
        credentials: Credentials {
            api_key: row.get("api_key"),
            secret_key: row.get("secret_key"),
            api_passphrase: row.get("api_passphrase"),
        },
        is_position_active: row.get("is_position_active"),
        timestamp_cursor: row.get("timestamp_cursor"),
        remote_id: row.get("remote_id"),
        sl_order_price,
        created,
        updated,
        trace: row.get("trace"),
    }
}

impl PostgresPersistence {
    /// Connect to Postgres and run pending migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    /// Delete every candle of a symbol (testing only)
    #[cfg(test)]
    pub async fn clear_candles(&self, symbol: &str) -> Result<()> {
        sqlx::query("DELETE FROM candles WHERE symbol = $1")
            .bind(symbol)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete every position row (testing only)
    #[cfg(test)]
    pub async fn clear_position_states(&self) -> Result<()> {
        sqlx::query("DELETE FROM position_state")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl CandleStore for PostgresPersistence {
    async fn ensure_symbol(&self, symbol: &str) -> Result<()> {
        sqlx::query("INSERT INTO symbols (symbol) VALUES ($1) ON CONFLICT (symbol) DO NOTHING")
            .bind(symbol)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_symbols(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT symbol FROM symbols ORDER BY symbol ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("symbol")).collect())
    }

    async fn save_candles(&self, candles: &[Candle]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for candle in candles {
            // xmax is 0 only for rows created by this statement
            let row = sqlx::query(
                r#"
                INSERT INTO candles (
                    open_time, symbol, interval_ms, open, high, low, close,
                    base_volume, usdt_volume, quote_volume
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (open_time, symbol, interval_ms) DO UPDATE SET
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    base_volume = EXCLUDED.base_volume,
                    usdt_volume = EXCLUDED.usdt_volume,
                    quote_volume = EXCLUDED.quote_volume
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(candle.open_time)
            .bind(&candle.symbol)
            .bind(candle.interval_ms)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.base_volume)
            .bind(candle.usdt_volume)
            .bind(candle.quote_volume)
            .fetch_one(&mut *tx)
            .await?;

            if row.get::<bool, _>("inserted") {
                inserted += 1;
            }
        }

        tx.commit().await?;

        tracing::debug!(
            "Upserted {} candles ({} new) to Postgres",
            candles.len(),
            inserted
        );

        Ok(inserted)
    }

    async fn oldest_candle(&self, symbol: &str, interval: Interval) -> Result<Option<Candle>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM candles WHERE symbol = $1 AND interval_ms = $2 \
             ORDER BY open_time ASC LIMIT 1",
            CANDLE_COLUMNS
        ))
        .bind(symbol)
        .bind(interval.duration_ms())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(candle_from_row))
    }

    async fn newest_candle(&self, symbol: &str, interval: Interval) -> Result<Option<Candle>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM candles WHERE symbol = $1 AND interval_ms = $2 \
             ORDER BY open_time DESC LIMIT 1",
            CANDLE_COLUMNS
        ))
        .bind(symbol)
        .bind(interval.duration_ms())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(candle_from_row))
    }

    async fn load_candles(&self, symbol: &str, interval: Interval) -> Result<Vec<Candle>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM candles WHERE symbol = $1 AND interval_ms = $2 \
             ORDER BY open_time ASC",
            CANDLE_COLUMNS
        ))
        .bind(symbol)
        .bind(interval.duration_ms())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(candle_from_row).collect())
    }

    async fn candles_after(
        &self,
        symbol: &str,
        interval: Interval,
        cursor_ms: i64,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM candles WHERE symbol = $1 AND interval_ms = $2 AND open_time > $3 \
             ORDER BY open_time DESC",
            CANDLE_COLUMNS
        ))
        .bind(symbol)
        .bind(interval.duration_ms())
        .bind(cursor_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(candle_from_row).collect())
    }
}

#[async_trait]
impl PositionStore for PostgresPersistence {
    async fn load_position_state(&self) -> Result<Option<PositionState>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM position_state ORDER BY id ASC LIMIT 1",
            POSITION_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(position_from_row))
    }

    async fn load_position_state_by_id(&self, position_id: i64) -> Result<Option<PositionState>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM position_state WHERE id = $1",
            POSITION_COLUMNS
        ))
        .bind(position_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(position_from_row))
    }

    async fn create_position_state(&self, credentials: &Credentials) -> Result<PositionState> {
        let row = sqlx::query(&format!(
            "INSERT INTO position_state (api_key, secret_key, api_passphrase) \
             VALUES ($1, $2, $3) RETURNING {}",
            POSITION_COLUMNS
        ))
        .bind(&credentials.api_key)
        .bind(&credentials.secret_key)
        .bind(&credentials.api_passphrase)
        .fetch_one(&self.pool)
        .await?;

        let state = position_from_row(&row);
        tracing::info!("Created position state {}", state.id);

        Ok(state)
    }

    async fn save_position_state(&self, state: &PositionState) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE position_state SET
                api_key = $2,
                secret_key = $3,
                api_passphrase = $4,
                timestamp_cursor = $5,
                is_position_active = $6,
                remote_id = $7,
                sl_order_price = $8,
                trace = $9,
                updated = NOW()
            WHERE id = $1
            "#,
        )
        .bind(state.id)
        .bind(&state.credentials.api_key)
        .bind(&state.credentials.secret_key)
        .bind(&state.credentials.api_passphrase)
        .bind(state.timestamp_cursor)
        .bind(state.is_position_active)
        .bind(&state.remote_id)
        .bind(state.sl_order_price)
        .bind(&state.trace)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(format!("Position state {} not found", state.id).into());
        }

        tracing::debug!("Saved position state {}", state.id);

        Ok(())
    }

    async fn claim_cycle(&self, position_id: i64, ttl: Duration) -> Result<Option<CycleClaim>> {
        let token = Uuid::new_v4();
        let stale_before = Utc::now() - chrono::Duration::seconds(ttl.as_secs() as i64);

        let result = sqlx::query(
            r#"
            UPDATE position_state
            SET claim_token = $2, claimed_at = NOW()
            WHERE id = $1 AND (claim_token IS NULL OR claimed_at < $3)
            "#,
        )
        .bind(position_id)
        .bind(token)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(CycleClaim { position_id, token }))
    }

    async fn release_cycle(&self, claim: &CycleClaim) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE position_state
            SET claim_token = NULL, claimed_at = NULL
            WHERE id = $1 AND claim_token = $2
            "#,
        )
        .bind(claim.position_id)
        .bind(claim.token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
