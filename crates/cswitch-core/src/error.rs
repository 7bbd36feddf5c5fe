use bytes::Bytes;
use http::StatusCode;
use serde_json::json;

/// Error answered to a relay caller: a status plus a JSON body.
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    pub fn new(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            status,
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn message(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, json!({ "error": message.into() }))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::message(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::message(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::message(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Upstream failure attributed to one provider.
    pub fn bad_gateway(provider: &str, message: impl Into<String>, elapsed_secs: f64) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            json!({
                "error": format!("provider {provider} request failed: {}", message.into()),
                "provider": provider,
                "duration": format!("{elapsed_secs:.2}s"),
            }),
        )
    }
}
