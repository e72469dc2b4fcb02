use serde_json::Value;
use thiserror::Error;

/// Errors from the exchange clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Wrong request: {0}")]
    WrongRequest(String),

    #[error("No response")]
    NoResponse,

    #[error("Unknown type of data: {0}")]
    UnknownTypeData(String),

    #[error("Wrong action based on state")]
    WrongActionBasedOnState,

    /// Error text reported by the exchange in the envelope's `msg`
    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("No order found")]
    NoOrderFound,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid number for {field}: {value}")]
    InvalidNumber { field: String, value: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Numeric code of the interpreter taxonomy errors
    pub fn code(&self) -> Option<i32> {
        match self {
            ApiError::KeyNotFound(_) => Some(-99),
            ApiError::WrongRequest(_) => Some(-100),
            ApiError::NoResponse => Some(-101),
            ApiError::UnknownTypeData(_) => Some(-102),
            ApiError::WrongActionBasedOnState => Some(-103),
            _ => None,
        }
    }
}

const SUCCESS_MSG: &str = "success";

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn interpret(envelope: &Value, key: &str, return_none: bool) -> Result<Option<Value>, ApiError> {
    match envelope.get("msg") {
        None | Some(Value::Null) => Err(ApiError::NoResponse),
        Some(Value::String(msg)) if msg == SUCCESS_MSG => {
            let data = envelope.get("data").unwrap_or(&Value::Null);
            match data {
                Value::Array(_) => Ok(Some(data.clone())),
                Value::Object(map) => match map.get(key) {
                    Some(value) if !value.is_null() => Ok(Some(value.clone())),
                    _ if return_none => Ok(None),
                    _ => Err(ApiError::KeyNotFound(key.to_string())),
                },
                other => Err(ApiError::UnknownTypeData(type_name(other).to_string())),
            }
        }
        Some(Value::String(msg)) => Err(ApiError::Exchange(msg.clone())),
        Some(other) => Err(ApiError::Exchange(other.to_string())),
    }
}

/// Interpret a `{msg, data}` envelope
///
/// List-shaped `data` is returned unchanged (as a JSON array); mapping-shaped
/// `data` yields the value under `key`.
pub fn interpret_response(envelope: &Value, key: &str) -> Result<Value, ApiError> {
    interpret(envelope, key, false)?.ok_or_else(|| ApiError::KeyNotFound(key.to_string()))
}

/// Same as [`interpret_response`] but a missing key yields `None`
pub fn interpret_response_optional(envelope: &Value, key: &str) -> Result<Option<Value>, ApiError> {
    interpret(envelope, key, true)
}

/// Optional field lookup on a JSON object; null counts as absent
pub fn get_param<'a>(object: &'a Value, key: &str) -> Option<&'a Value> {
    object.get(key).filter(|value| !value.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_data_returned_unchanged() {
        let envelope = json!({
            "msg": "success",
            "data": [{"price": "0.1"}, {"price": "0.2"}]
        });

        let data = interpret_response(&envelope, "orderId").unwrap();
        assert_eq!(data, envelope["data"]);
    }

    #[test]
    fn test_empty_list_is_still_a_list() {
        let envelope = json!({"msg": "success", "data": []});
        assert_eq!(interpret_response(&envelope, "").unwrap(), json!([]));
    }

    #[test]
    fn test_mapping_data_key_lookup() {
        let envelope = json!({
            "code": "00000",
            "msg": "success",
            "data": {"orderId": "1234", "clientOid": "abc"}
        });

        assert_eq!(interpret_response(&envelope, "orderId").unwrap(), json!("1234"));
    }

    #[test]
    fn test_missing_key_fails_unless_optional() {
        let envelope = json!({"msg": "success", "data": {"clientOid": "abc"}});

        let err = interpret_response(&envelope, "orderId").unwrap_err();
        assert!(matches!(err, ApiError::KeyNotFound(ref key) if key == "orderId"));
        assert_eq!(err.code(), Some(-99));

        assert_eq!(interpret_response_optional(&envelope, "orderId").unwrap(), None);
    }

    #[test]
    fn test_null_value_counts_as_missing() {
        let envelope = json!({"msg": "success", "data": {"orderId": null}});

        assert!(matches!(
            interpret_response(&envelope, "orderId"),
            Err(ApiError::KeyNotFound(_))
        ));
        assert_eq!(interpret_response_optional(&envelope, "orderId").unwrap(), None);
    }

    #[test]
    fn test_scalar_data_is_unknown_type() {
        let envelope = json!({"msg": "success", "data": "1234"});

        let err = interpret_response(&envelope, "orderId").unwrap_err();
        assert!(matches!(err, ApiError::UnknownTypeData(ref t) if t == "string"));

        let envelope = json!({"msg": "success"});
        let err = interpret_response_optional(&envelope, "orderId").unwrap_err();
        assert!(matches!(err, ApiError::UnknownTypeData(ref t) if t == "null"));
    }

    #[test]
    fn test_missing_msg_is_no_response() {
        for envelope in [
            json!({}),
            json!({"data": [1, 2, 3]}),
            json!({"msg": null, "data": {"orderId": "1"}}),
        ] {
            let err = interpret_response(&envelope, "orderId").unwrap_err();
            assert!(matches!(err, ApiError::NoResponse));
            assert_eq!(err.code(), Some(-101));
        }
    }

    #[test]
    fn test_other_msg_is_exchange_error() {
        let envelope = json!({"code": "40762", "msg": "The order size is greater than the max open size", "data": null});

        let err = interpret_response(&envelope, "orderId").unwrap_err();
        assert!(matches!(err, ApiError::Exchange(ref msg) if msg.contains("max open size")));
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_get_param() {
        let fill = json!({"price": "0.12", "fee": null});

        assert_eq!(get_param(&fill, "price"), Some(&json!("0.12")));
        assert_eq!(get_param(&fill, "fee"), None);
        assert_eq!(get_param(&fill, "profit"), None);
    }
}
