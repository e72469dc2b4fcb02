use rust_decimal::{Decimal, RoundingStrategy};

use crate::api::ApiError;
use crate::models::PositionDirection;

/// Stop-loss distance from the entry price, in percent
pub const STOP_LOSS_PCT: u32 = 1;
/// Take-profit distance from the entry price, in percent
pub const TAKE_PROFIT_PCT: u32 = 8;

/// Trigger prices protecting a freshly opened position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bracket {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

fn pct(value: u32) -> Decimal {
    Decimal::from(value) / Decimal::ONE_HUNDRED
}

/// Stop-loss and take-profit for a position entered at `entry_price`
///
/// A short is stopped above entry and takes profit below it; a long is the mirror image.
pub fn bracket_prices(direction: PositionDirection, entry_price: Decimal) -> Bracket {
    let stop = pct(STOP_LOSS_PCT);
    let target = pct(TAKE_PROFIT_PCT);

    match direction {
        PositionDirection::Short => Bracket {
            stop_loss: entry_price * (Decimal::ONE + stop),
            take_profit: entry_price * (Decimal::ONE - target),
        },
        PositionDirection::Long => Bracket {
            stop_loss: entry_price * (Decimal::ONE - stop),
            take_profit: entry_price * (Decimal::ONE + target),
        },
    }
}

/// Contract size for a fixed USDT notional at `price`
///
/// Truncated to `precision` decimals so the order never exceeds the notional.
pub fn order_quantity(notional: Decimal, price: Decimal, precision: u32) -> Result<Decimal, ApiError> {
    if price <= Decimal::ZERO {
        return Err(ApiError::WrongRequest(format!("Invalid mark price {}", price)));
    }

    let quantity = notional
        .checked_div(price)
        .ok_or_else(|| ApiError::WrongRequest(format!("Cannot size {} at {}", notional, price)))?
        .round_dp_with_strategy(precision, RoundingStrategy::ToZero);

    if quantity.is_zero() {
        return Err(ApiError::WrongRequest(format!(
            "Notional {} is below one size step at {}",
            notional, price
        )));
    }

    Ok(quantity)
}
