use super::Strategy;
use crate::models::{Candle, Signal};
use crate::Result;

/// Consecutive same-colour candles needed to open a position
pub const STREAK_LENGTH: usize = 3;

/// Opens against nothing but the colour of the most recent candles
///
/// Scans newest to oldest. A red candle counts toward the red streak and marks
/// the green streak as interrupted, a green candle does the opposite. The scan
/// stops once both colours have been seen or either streak reaches its length.
/// A red streak opens a short, a green streak opens a long.
#[derive(Debug, Clone)]
pub struct StreakStrategy {
    streak_length: usize,
}

impl StreakStrategy {
    pub fn new(streak_length: usize) -> Self {
        Self { streak_length }
    }
}

impl Default for StreakStrategy {
    fn default() -> Self {
        Self::new(STREAK_LENGTH)
    }
}

impl Strategy for StreakStrategy {
    fn generate_signal(&self, candles: &[Candle]) -> Result<Signal> {
        let mut red_count = 0;
        let mut green_count = 0;
        let mut red_interrupted = false;
        let mut green_interrupted = false;

        for candle in candles {
            if candle.is_red() {
                red_count += 1;
                green_interrupted = true;
            } else {
                green_count += 1;
                red_interrupted = true;
            }

            if red_interrupted && green_interrupted {
                break;
            }
            if red_count == self.streak_length || green_count == self.streak_length {
                break;
            }
        }

        let signal = if red_count == self.streak_length {
            Signal::OpenShort
        } else if green_count == self.streak_length {
            Signal::OpenLong
        } else {
            Signal::Hold
        };

        tracing::debug!(
            "Streak over {} candles: red={} green={} -> {:?}",
            candles.len(),
            red_count,
            green_count,
            signal
        );

        Ok(signal)
    }

    fn name(&self) -> &str {
        "StreakStrategy"
    }

    fn min_candles_required(&self) -> usize {
        self.streak_length
    }
}
