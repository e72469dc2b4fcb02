use reqwest::{Client, StatusCode, Url};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::api::envelope::{get_param, interpret_response};
use crate::api::signer::{Payload, RequestSigner};
use crate::api::ApiError;
use crate::models::{Coin, Credentials, FuturesSide, PlanType, PositionDirection};

pub const DEFAULT_TRADING_BASE_URL: &str = "https://api.coincatch.com";

const PLACE_ORDER_PATH: &str = "/api/mix/v1/order/placeOrder";
const PLACE_TPSL_PATH: &str = "/api/mix/v1/plan/placeTPSL";
const MODIFY_TPSL_PATH: &str = "/api/mix/v1/plan/modifyTPSLPlan";
const CANCEL_PLAN_PATH: &str = "/api/mix/v1/plan/cancelPlan";
const MARK_PRICE_PATH: &str = "/api/mix/v1/market/mark-price";
const ORDER_FILLS_PATH: &str = "/api/mix/v1/order/fills";
const ORDER_DETAIL_PATH: &str = "/api/mix/v1/order/detail";

const MARGIN_COIN: &str = "USDT";
const SUCCESS_CODE: &str = "00000";
/// Returned on modify when the plan order was already triggered or replaced
const ALREADY_CHANGED_CODE: &str = "43020";
const TRIGGER_PRICE_DECIMALS: u32 = 6;

// ============== Request Payloads ==============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarketOrderRequest<'a> {
    side: FuturesSide,
    symbol: &'a str,
    order_type: &'a str,
    margin_coin: &'a str,
    size: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceTpslRequest<'a> {
    symbol: &'a str,
    margin_coin: &'a str,
    plan_type: PlanType,
    trigger_price: String,
    hold_side: PositionDirection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyTpslRequest<'a> {
    symbol: &'a str,
    margin_coin: &'a str,
    plan_type: PlanType,
    trigger_price: String,
    order_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelPlanRequest<'a> {
    symbol: &'a str,
    margin_coin: &'a str,
    plan_type: PlanType,
    order_id: &'a str,
}

// ============== Public Types ==============

/// A take-profit or stop-loss order resting on the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalOrder {
    pub coin: Coin,
    pub plan_type: PlanType,
    pub remote_id: String,
}

/// Result of re-submitting a conditional order's trigger price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOutcome {
    /// 200 with the success code: the order is still live
    Modified,
    /// The exchange reports the order as already filled or replaced
    Changed,
    Failed,
}

/// Fill record of an executed order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub fill_amount: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub side: Option<String>,
    pub created: Option<i64>,
}

struct SignedResponse {
    status: StatusCode,
    body: Value,
}

// ============== Implementation ==============

/// Client for the authenticated futures endpoints
///
/// Every call is signed with fresh headers. Errors always propagate; there is no retry.
#[derive(Clone)]
pub struct TradingClient {
    client: Client,
    base_url: String,
    signer: RequestSigner,
}

impl TradingClient {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer: RequestSigner::new(credentials),
        })
    }

    async fn post_signed<T: Serialize>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<SignedResponse, ApiError> {
        let body = serde_json::to_string(payload)?;
        let headers = self
            .signer
            .headers("POST", path, Payload::Body(&body))?
            .to_header_map()?;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .headers(headers)
            .body(body)
            .send()
            .await?;

        read_response(path, response).await
    }

    async fn get_signed(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<SignedResponse, ApiError> {
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| ApiError::WrongRequest(format!("Invalid URL for {}: {}", path, e)))?;
        // Sign the exact query string that goes on the wire
        let query = url.query().unwrap_or_default().to_string();
        let headers = self
            .signer
            .headers("GET", path, Payload::Query(&query))?
            .to_header_map()?;

        let response = self.client.get(url).headers(headers).send().await?;

        read_response(path, response).await
    }

    /// Open or close a position at market price
    ///
    /// Endpoint: POST /api/mix/v1/order/placeOrder
    pub async fn place_market_order(
        &self,
        coin: Coin,
        quantity: Decimal,
        side: FuturesSide,
    ) -> Result<String, ApiError> {
        let payload = MarketOrderRequest {
            side,
            symbol: coin.as_str(),
            order_type: "market",
            margin_coin: MARGIN_COIN,
            size: quantity.to_string(),
        };

        let response = self.post_signed(PLACE_ORDER_PATH, &payload).await?;
        let order_id = value_to_string(&interpret_response(&response.body, "orderId")?);

        tracing::info!("Placed market {:?} {} {} (order {})", side, quantity, coin, order_id);

        Ok(order_id)
    }

    /// Place a take-profit or stop-loss trigger order for the open position
    ///
    /// Endpoint: POST /api/mix/v1/plan/placeTPSL. The plan covers the whole
    /// position, so `quantity` is not sent.
    pub async fn place_conditional_order(
        &self,
        coin: Coin,
        plan_type: PlanType,
        trigger_price: Decimal,
        direction: PositionDirection,
        quantity: Decimal,
    ) -> Result<String, ApiError> {
        let payload = PlaceTpslRequest {
            symbol: coin.as_str(),
            margin_coin: MARGIN_COIN,
            plan_type,
            trigger_price: trigger_price.round_dp(TRIGGER_PRICE_DECIMALS).to_string(),
            hold_side: direction,
        };

        let response = self.post_signed(PLACE_TPSL_PATH, &payload).await?;
        let order_id = value_to_string(&interpret_response(&response.body, "orderId")?);

        tracing::info!(
            "Placed {} for {:?} {} {} at {} (order {})",
            plan_type.as_str(),
            direction,
            quantity,
            coin,
            payload.trigger_price,
            order_id
        );

        Ok(order_id)
    }

    /// Re-submit a conditional order's trigger price
    ///
    /// Endpoint: POST /api/mix/v1/plan/modifyTPSLPlan
    pub async fn modify_conditional_order(
        &self,
        coin: Coin,
        plan_type: PlanType,
        remote_id: &str,
        trigger_price: Decimal,
    ) -> Result<ModifyOutcome, ApiError> {
        let payload = ModifyTpslRequest {
            symbol: coin.as_str(),
            margin_coin: MARGIN_COIN,
            plan_type,
            trigger_price: trigger_price.round_dp(TRIGGER_PRICE_DECIMALS).to_string(),
            order_id: remote_id,
        };

        let response = self.post_signed(MODIFY_TPSL_PATH, &payload).await?;
        let code = response_code(&response.body);

        tracing::debug!("Modify {} {} returned code {:?}", plan_type.as_str(), remote_id, code);

        let outcome = if response.status == StatusCode::OK {
            match code.as_deref() {
                Some(SUCCESS_CODE) => ModifyOutcome::Modified,
                _ => ModifyOutcome::Failed,
            }
        } else {
            match code.as_deref() {
                Some(ALREADY_CHANGED_CODE) => ModifyOutcome::Changed,
                _ => ModifyOutcome::Failed,
            }
        };

        Ok(outcome)
    }

    /// Cancel a conditional order; success is judged by HTTP status only
    ///
    /// Endpoint: POST /api/mix/v1/plan/cancelPlan
    pub async fn cancel_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<bool, ApiError> {
        let payload = CancelPlanRequest {
            symbol: order.coin.as_str(),
            margin_coin: MARGIN_COIN,
            plan_type: order.plan_type,
            order_id: &order.remote_id,
        };

        let response = self.post_signed(CANCEL_PLAN_PATH, &payload).await?;
        Ok(response.status == StatusCode::OK)
    }

    /// Current mark price
    ///
    /// Endpoint: GET /api/mix/v1/market/mark-price. Any non-200 is an error.
    pub async fn get_mark_price(&self, coin: Coin) -> Result<Decimal, ApiError> {
        let response = self
            .get_signed(MARK_PRICE_PATH, &[("symbol", coin.as_str())])
            .await?;

        if response.status != StatusCode::OK {
            return Err(ApiError::Http {
                status: response.status.as_u16(),
                body: response.body.to_string(),
            });
        }

        let mark_price = interpret_response(&response.body, "markPrice")?;
        value_to_decimal("markPrice", &mark_price)
    }

    /// Fill record of an order
    ///
    /// Endpoint: GET /api/mix/v1/order/fills. An empty fill list means the order
    /// is unknown or not filled yet and is reported as `NoOrderFound`.
    pub async fn get_order_fill_detail(
        &self,
        coin: Coin,
        remote_id: &str,
    ) -> Result<OrderFill, ApiError> {
        let response = self
            .get_signed(
                ORDER_FILLS_PATH,
                &[("symbol", coin.as_str()), ("orderId", remote_id)],
            )
            .await?;

        let fills = interpret_response(&response.body, "")?;
        let fill = fills
            .as_array()
            .and_then(|fills| fills.first())
            .ok_or(ApiError::NoOrderFound)?;

        let decimal = |key: &str| {
            get_param(fill, key)
                .map(|v| value_to_decimal(key, v))
                .transpose()
        };

        Ok(OrderFill {
            price: decimal("price")?,
            quantity: decimal("sizeQty")?,
            fee: decimal("fee")?,
            fill_amount: decimal("fillAmount")?,
            profit: decimal("profit")?,
            side: get_param(fill, "side").map(value_to_string),
            created: get_param(fill, "cTime")
                .map(|v| {
                    value_to_string(v)
                        .parse::<i64>()
                        .map_err(|_| ApiError::InvalidNumber {
                            field: "cTime".to_string(),
                            value: v.to_string(),
                        })
                })
                .transpose()?,
        })
    }

    /// Order state (e.g. "new", "filled", "canceled")
    ///
    /// Endpoint: GET /api/mix/v1/order/detail
    pub async fn get_order_state(&self, coin: Coin, remote_id: &str) -> Result<String, ApiError> {
        let response = self
            .get_signed(
                ORDER_DETAIL_PATH,
                &[("symbol", coin.as_str()), ("orderId", remote_id)],
            )
            .await?;

        let state = interpret_response(&response.body, "state")?;
        Ok(value_to_string(&state))
    }
}

async fn read_response(path: &str, response: reqwest::Response) -> Result<SignedResponse, ApiError> {
    let status = response.status();
    let text = response.text().await?;

    tracing::debug!("{} -> {} {}", path, status, text);

    // Non-JSON bodies are kept as text; envelope interpretation then reports NoResponse
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    Ok(SignedResponse { status, body })
}

fn response_code(body: &Value) -> Option<String> {
    get_param(body, "code").map(value_to_string)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_to_decimal(field: &str, value: &Value) -> Result<Decimal, ApiError> {
    let text = value_to_string(value);
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| ApiError::InvalidNumber {
            field: field.to_string(),
            value: text,
        })
}
