pub mod envelope;
pub mod market_data;
pub mod signer;
pub mod trading;

pub use envelope::{get_param, interpret_response, interpret_response_optional, ApiError};
pub use market_data::MarketDataClient;
pub use signer::{AuthHeaders, Payload, RequestSigner};
pub use trading::{ConditionalOrder, ModifyOutcome, OrderFill, TradingClient};
