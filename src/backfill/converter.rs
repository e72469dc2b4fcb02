use serde_json::Value;

use crate::api::ApiError;
use crate::models::{Candle, Interval};

const ROW_LEN: usize = 8;
const FIELDS: [&str; ROW_LEN] = [
    "openTime",
    "open",
    "high",
    "low",
    "close",
    "baseVolume",
    "usdtVolume",
    "quoteVolume",
];

/// Converts raw candle rows from the public endpoint into stored candles
///
/// A row is `[openTime, open, high, low, close, baseVol, usdtVol, quoteVol]`,
/// each value either a JSON string or a number.
pub struct CandleConverter {
    symbol: String,
    interval: Interval,
}

impl CandleConverter {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
        }
    }

    pub fn convert_row(&self, row: &[Value]) -> Result<Candle, ApiError> {
        if row.len() < ROW_LEN {
            return Err(ApiError::UnknownTypeData(format!(
                "candle row with {} fields (expected {})",
                row.len(),
                ROW_LEN
            )));
        }

        let price = |i: usize| parse_f64(FIELDS[i], &row[i]);

        Ok(Candle {
            open_time: parse_i64(FIELDS[0], &row[0])?,
            symbol: self.symbol.clone(),
            interval_ms: self.interval.duration_ms(),
            open: price(1)?,
            high: price(2)?,
            low: price(3)?,
            close: price(4)?,
            base_volume: price(5)?,
            usdt_volume: price(6)?,
            quote_volume: price(7)?,
        })
    }

    /// Convert every row, dropping (and logging) the ones that do not parse
    pub fn convert_rows(&self, rows: &[Vec<Value>]) -> Vec<Candle> {
        rows.iter()
            .filter_map(|row| match self.convert_row(row) {
                Ok(candle) => Some(candle),
                Err(e) => {
                    tracing::warn!("Skipping malformed {} candle row {:?}: {}", self.symbol, row, e);
                    None
                }
            })
            .collect()
    }
}

/// Sort ascending by open time and drop repeated open times
pub fn sort_and_dedupe(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
    candles
}

fn invalid(field: &str, value: &Value) -> ApiError {
    ApiError::InvalidNumber {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn parse_f64(field: &str, value: &Value) -> Result<f64, ApiError> {
    match value {
        Value::String(s) => s.trim().parse().map_err(|_| invalid(field, value)),
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(field, value)),
        _ => Err(invalid(field, value)),
    }
}

fn parse_i64(field: &str, value: &Value) -> Result<i64, ApiError> {
    match value {
        Value::String(s) => s.trim().parse().map_err(|_| invalid(field, value)),
        Value::Number(n) => n.as_i64().ok_or_else(|| invalid(field, value)),
        _ => Err(invalid(field, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(values: Value) -> Vec<Value> {
        values.as_array().unwrap().clone()
    }

    #[test]
    fn test_convert_string_row() {
        let converter = CandleConverter::new("DOGEUSDT", Interval::Hour1);
        let candle = converter
            .convert_row(&row(json!([
                "1700000000000",
                "0.0612",
                "0.0620",
                "0.0605",
                "0.0618",
                "1500000",
                "91800.5",
                "91800.5"
            ])))
            .unwrap();

        assert_eq!(candle.open_time, 1_700_000_000_000);
        assert_eq!(candle.symbol, "DOGEUSDT");
        assert_eq!(candle.interval_ms, 3_600_000);
        assert_eq!(candle.open, 0.0612);
        assert_eq!(candle.close, 0.0618);
        assert_eq!(candle.base_volume, 1_500_000.0);
        assert!(candle.is_green());
    }

    #[test]
    fn test_convert_numeric_row() {
        let converter = CandleConverter::new("BTCUSDT", Interval::Min15);
        let candle = converter
            .convert_row(&row(json!([1700000000000i64, 100.0, 110.0, 90.0, 95.0, 1, 2, 3])))
            .unwrap();

        assert_eq!(candle.interval_ms, 900_000);
        assert!(candle.is_red());
        assert_eq!(candle.quote_volume, 3.0);
    }

    #[test]
    fn test_short_row_rejected() {
        let converter = CandleConverter::new("DOGEUSDT", Interval::Hour1);
        let result = converter.convert_row(&row(json!(["1700000000000", "1", "1"])));
        assert!(matches!(result, Err(ApiError::UnknownTypeData(_))));
    }

    #[test]
    fn test_bad_number_rejected() {
        let converter = CandleConverter::new("DOGEUSDT", Interval::Hour1);
        let result = converter.convert_row(&row(json!([
            "1700000000000", "abc", "1", "1", "1", "1", "1", "1"
        ])));
        assert!(matches!(result, Err(ApiError::InvalidNumber { ref field, .. }) if field == "open"));
    }

    #[test]
    fn test_convert_rows_skips_malformed() {
        let converter = CandleConverter::new("DOGEUSDT", Interval::Hour1);
        let rows = vec![
            row(json!(["1", "1", "1", "1", "1", "1", "1", "1"])),
            row(json!(["2", null, "1", "1", "1", "1", "1", "1"])),
            row(json!(["3", "1", "1", "1", "1", "1", "1", "1"])),
        ];

        let candles = converter.convert_rows(&rows);
        assert_eq!(
            candles.iter().map(|c| c.open_time).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn test_sort_and_dedupe() {
        let converter = CandleConverter::new("DOGEUSDT", Interval::Hour1);
        let make = |t: &str| {
            converter
                .convert_row(&row(json!([t, "1", "1", "1", "1", "1", "1", "1"])))
                .unwrap()
        };

        let candles = sort_and_dedupe(vec![make("30"), make("10"), make("20"), make("10")]);
        assert_eq!(
            candles.iter().map(|c| c.open_time).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
    }
}
