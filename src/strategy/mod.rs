// Trading strategy module
pub mod streak;

use crate::models::{Candle, Signal};
use crate::Result;

pub use streak::StreakStrategy;

/// Base trait for signal strategies
pub trait Strategy: Send + Sync {
    /// Generate a trading signal from candles ordered newest first
    fn generate_signal(&self, candles: &[Candle]) -> Result<Signal>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Fewest candles that can ever produce a non-hold signal
    fn min_candles_required(&self) -> usize;
}
