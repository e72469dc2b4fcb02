// Core modules
pub mod api;
pub mod backfill;
pub mod db;
pub mod execution;
pub mod models;
pub mod settings;
pub mod strategy;

// Re-export commonly used types
pub use api::{ApiError, MarketDataClient, TradingClient};
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
