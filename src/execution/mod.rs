// Order execution module
pub mod bracket;
pub mod cycle;

pub use bracket::{bracket_prices, order_quantity, Bracket, STOP_LOSS_PCT, TAKE_PROFIT_PCT};
pub use cycle::{CycleConfig, CycleOutcome, CycleRunner, OpenCheck, PositionCheck};
