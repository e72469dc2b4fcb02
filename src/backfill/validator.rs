use crate::models::{Candle, Interval};

/// Outcome of a continuity check over a stored candle series
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyReport {
    /// Every neighbouring pair is exactly one interval apart
    Consistent { checked: usize },
    /// First pair that is not one interval apart
    Gap {
        previous_open_time: i64,
        next_open_time: i64,
    },
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        matches!(self, ConsistencyReport::Consistent { .. })
    }
}

/// Checks that a candle series has no holes
pub struct CandleValidator {
    interval_ms: i64,
}

impl CandleValidator {
    pub fn new(interval: Interval) -> Self {
        Self {
            interval_ms: interval.duration_ms(),
        }
    }

    /// Scan an ascending series and report the first discontinuity
    pub fn check(&self, candles: &[Candle]) -> ConsistencyReport {
        for pair in candles.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            if previous.open_time + self.interval_ms != next.open_time {
                return ConsistencyReport::Gap {
                    previous_open_time: previous.open_time,
                    next_open_time: next.open_time,
                };
            }
        }

        ConsistencyReport::Consistent {
            checked: candles.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: i64 = 3_600_000;

    fn candle(open_time: i64) -> Candle {
        Candle {
            open_time,
            symbol: "DOGEUSDT".to_string(),
            interval_ms: H,
            open: 0.1,
            high: 0.11,
            low: 0.09,
            close: 0.105,
            base_volume: 1000.0,
            usdt_volume: 100.0,
            quote_volume: 100.0,
        }
    }

    #[test]
    fn test_contiguous_series() {
        let validator = CandleValidator::new(Interval::Hour1);
        let candles: Vec<Candle> = (0..5).map(|i| candle(i * H)).collect();

        assert_eq!(
            validator.check(&candles),
            ConsistencyReport::Consistent { checked: 5 }
        );
    }

    #[test]
    fn test_empty_and_single_are_consistent() {
        let validator = CandleValidator::new(Interval::Hour1);
        assert!(validator.check(&[]).is_consistent());
        assert!(validator.check(&[candle(0)]).is_consistent());
    }

    #[test]
    fn test_reports_first_gap() {
        let validator = CandleValidator::new(Interval::Hour1);
        let candles = vec![candle(0), candle(H), candle(3 * H), candle(4 * H), candle(7 * H)];

        assert_eq!(
            validator.check(&candles),
            ConsistencyReport::Gap {
                previous_open_time: H,
                next_open_time: 3 * H,
            }
        );
    }

    #[test]
    fn test_wrong_interval_is_a_gap() {
        // Hourly data checked as 15-minute series
        let validator = CandleValidator::new(Interval::Min15);
        let candles = vec![candle(0), candle(H)];
        assert!(!validator.check(&candles).is_consistent());
    }
}
