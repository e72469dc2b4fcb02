//! HMAC-SHA256 request signing for the private futures API.
//!
//! Pre-hash string: `{timestamp}{METHOD}{path}{body}` for requests with a body,
//! `{timestamp}{METHOD}{path}?{query}` for query requests. The signature is the
//! standard-alphabet base64 of the HMAC digest keyed by the secret.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use sha2::Sha256;

use crate::api::ApiError;
use crate::models::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// Signed part of a request: exactly one of body or query string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    Body(&'a str),
    Query(&'a str),
}

/// Auth headers for one request
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    /// ACCESS-KEY
    pub access_key: String,
    /// ACCESS-SIGN
    pub signature: String,
    /// ACCESS-TIMESTAMP, the same value that went into the signature
    pub timestamp: String,
    /// ACCESS-PASSPHRASE
    pub passphrase: String,
}

impl AuthHeaders {
    /// Header names are sent lowercase; HTTP treats them case-insensitively
    pub fn to_header_map(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("access-key", self.access_key.as_str()),
            ("access-sign", self.signature.as_str()),
            ("access-timestamp", self.timestamp.as_str()),
            ("access-passphrase", self.passphrase.as_str()),
            ("locale", "en-US"),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiError::Signing(format!("Invalid {} header: {}", name, e)))?;
            headers.insert(HeaderName::from_static(name), value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

pub fn pre_hash(timestamp: &str, method: &str, path: &str, payload: Payload<'_>) -> String {
    match payload {
        Payload::Body(body) => format!("{}{}{}{}", timestamp, method.to_uppercase(), path, body),
        Payload::Query(query) => {
            format!("{}{}{}?{}", timestamp, method.to_uppercase(), path, query)
        }
    }
}

pub fn sign(secret_key: &str, message: &str) -> Result<String, ApiError> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ApiError::Signing(format!("Invalid key length: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Signs private API requests with one set of credentials
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Credentials,
}

impl RequestSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Headers for a request signed now
    pub fn headers(
        &self,
        method: &str,
        path: &str,
        payload: Payload<'_>,
    ) -> Result<AuthHeaders, ApiError> {
        self.headers_at(Utc::now().timestamp_millis(), method, path, payload)
    }

    /// Headers for a request signed at an explicit millisecond timestamp
    pub fn headers_at(
        &self,
        timestamp_ms: i64,
        method: &str,
        path: &str,
        payload: Payload<'_>,
    ) -> Result<AuthHeaders, ApiError> {
        let timestamp = timestamp_ms.to_string();
        let message = pre_hash(&timestamp, method, path, payload);
        let signature = sign(&self.credentials.secret_key, &message)?;

        Ok(AuthHeaders {
            access_key: self.credentials.api_key.clone(),
            signature,
            timestamp,
            passphrase: self.credentials.api_passphrase.clone(),
        })
    }
}
