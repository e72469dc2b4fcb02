use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::ApiError;

/// Bar duration with its API label and its storage duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Day1,
}

const MINUTE_MS: i64 = 60 * 1000;

impl Interval {
    pub const ALL: [Interval; 8] = [
        Interval::Min1,
        Interval::Min3,
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Hour1,
        Interval::Hour4,
        Interval::Day1,
    ];

    /// Granularity label used by the public candle endpoint (e.g. "1h")
    pub fn label(&self) -> &'static str {
        match self {
            Interval::Min1 => "1min",
            Interval::Min3 => "3min",
            Interval::Min5 => "5min",
            Interval::Min15 => "15min",
            Interval::Min30 => "30min",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1day",
        }
    }

    /// Bar duration in milliseconds, the key candles are stored under
    pub fn duration_ms(&self) -> i64 {
        match self {
            Interval::Min1 => MINUTE_MS,
            Interval::Min3 => 3 * MINUTE_MS,
            Interval::Min5 => 5 * MINUTE_MS,
            Interval::Min15 => 15 * MINUTE_MS,
            Interval::Min30 => 30 * MINUTE_MS,
            Interval::Hour1 => 60 * MINUTE_MS,
            Interval::Hour4 => 4 * 60 * MINUTE_MS,
            Interval::Day1 => 24 * 60 * MINUTE_MS,
        }
    }

    pub fn from_duration_ms(duration_ms: i64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.duration_ms() == duration_ms)
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.label() == s)
            .ok_or_else(|| format!("Unknown interval label: {}", s))
    }
}

impl TryFrom<String> for Interval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.label().to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One OHLCV bar as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub symbol: String,
    pub interval_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub base_volume: f64,
    pub usdt_volume: f64,
    pub quote_volume: f64,
}

impl Candle {
    pub fn is_green(&self) -> bool {
        self.close >= self.open
    }

    pub fn is_red(&self) -> bool {
        !self.is_green()
    }
}

/// Futures products traded on the private API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Coin {
    BtcSpot,
    BtcFutures,
    DogeFutures,
}

impl Coin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Coin::BtcSpot => "BTCUSDT_SPBL",
            Coin::BtcFutures => "BTCUSDT_UMCBL",
            Coin::DogeFutures => "DOGEUSDT_UMCBL",
        }
    }
}

impl FromStr for Coin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BTCUSDT_SPBL" => Ok(Coin::BtcSpot),
            "BTCUSDT_UMCBL" => Ok(Coin::BtcFutures),
            "DOGEUSDT_UMCBL" => Ok(Coin::DogeFutures),
            other => Err(format!("Unknown coin: {}", other)),
        }
    }
}

impl TryFrom<String> for Coin {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Coin> for String {
    fn from(coin: Coin) -> Self {
        coin.as_str().to_string()
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionDirection {
    Long,
    Short,
}

/// Order side on the futures API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuturesSide {
    OpenLong,
    CloseLong,
    OpenShort,
    CloseShort,
    Unknown,
}

impl FuturesSide {
    /// Direction of the position an opening side creates
    pub fn position_direction(&self) -> Option<PositionDirection> {
        match self {
            FuturesSide::OpenLong => Some(PositionDirection::Long),
            FuturesSide::OpenShort => Some(PositionDirection::Short),
            _ => None,
        }
    }

    pub fn opening(direction: PositionDirection) -> Self {
        match direction {
            PositionDirection::Long => FuturesSide::OpenLong,
            PositionDirection::Short => FuturesSide::OpenShort,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanType {
    #[serde(rename = "profit_plan")]
    TakeProfit,
    #[serde(rename = "loss_plan")]
    StopLoss,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::TakeProfit => "profit_plan",
            PlanType::StopLoss => "loss_plan",
        }
    }
}

/// Trading signal produced by a strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    OpenLong,
    OpenShort,
    Hold,
}

impl Signal {
    pub fn direction(&self) -> Option<PositionDirection> {
        match self {
            Signal::OpenLong => Some(PositionDirection::Long),
            Signal::OpenShort => Some(PositionDirection::Short),
            Signal::Hold => None,
        }
    }
}

/// API credentials for the private trading endpoints
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
    pub api_passphrase: String,
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return "N/A".to_string();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &mask(&self.api_key))
            .field("secret_key", &mask(&self.secret_key))
            .field("api_passphrase", &mask(&self.api_passphrase))
            .finish()
    }
}

pub const DEFAULT_TIMESTAMP_CURSOR: i64 = 100;

/// The bot's single mutable record
#[derive(Debug, Clone, PartialEq)]
pub struct PositionState {
    pub id: i64,
    pub credentials: Credentials,
    pub is_position_active: bool,
    pub timestamp_cursor: i64,
    /// Exchange id of the stop-loss order protecting the open position
    pub remote_id: Option<String>,
    pub sl_order_price: Option<Decimal>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub trace: Option<String>,
}

impl PositionState {
    pub fn new(id: i64, credentials: Credentials) -> Self {
        let now = Utc::now();
        Self {
            id,
            credentials,
            is_position_active: false,
            timestamp_cursor: DEFAULT_TIMESTAMP_CURSOR,
            remote_id: None,
            sl_order_price: None,
            created: now,
            updated: now,
            trace: None,
        }
    }

    /// A market order filled; the position is live but not yet protected
    pub fn mark_entered(&mut self, trace: String) -> Result<(), ApiError> {
        if self.is_position_active {
            return Err(ApiError::WrongActionBasedOnState);
        }
        self.is_position_active = true;
        self.remote_id = None;
        self.sl_order_price = None;
        self.trace = Some(trace);
        self.updated = Utc::now();
        Ok(())
    }

    /// Track the stop-loss protecting the position
    pub fn mark_opened(&mut self, remote_id: String, sl_price: Decimal) -> Result<(), ApiError> {
        if self.remote_id.is_some() {
            return Err(ApiError::WrongActionBasedOnState);
        }
        self.remote_id = Some(remote_id);
        self.sl_order_price = Some(sl_price);
        self.is_position_active = true;
        self.updated = Utc::now();
        Ok(())
    }

    pub fn mark_closed(&mut self, cursor_ms: i64) {
        self.is_position_active = false;
        self.remote_id = None;
        self.timestamp_cursor = cursor_ms;
        self.updated = Utc::now();
    }
}
