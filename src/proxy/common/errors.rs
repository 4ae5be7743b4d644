// Unified error response formatting for both public surfaces.
// Anthropic: {"type":"error","error":{"type":"<type>","message":"<msg>"}}
// OpenAI:    {"error":{"message":"<msg>","type":"<type>","code":null}}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Anthropic API compatible error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnthropicErrorType {
    InvalidRequestError,
    AuthenticationError,
    RateLimitError,
    ApiError,
    OverloadedError,
}

impl AnthropicErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequestError => "invalid_request_error",
            Self::AuthenticationError => "authentication_error",
            Self::RateLimitError => "rate_limit_error",
            Self::ApiError => "api_error",
            Self::OverloadedError => "overloaded_error",
        }
    }
}

/// Build an Anthropic-format error response.
pub fn error_response(
    status: StatusCode,
    error_type: AnthropicErrorType,
    message: &str,
) -> Response {
    let body = json!({
        "type": "error",
        "error": {
            "type": error_type.as_str(),
            "message": message
        }
    });
    (status, Json(body)).into_response()
}

/// Build an OpenAI-format error response.
pub fn openai_error_response(status: StatusCode, error_type: &str, message: &str) -> Response {
    let body = json!({
        "error": {
            "message": message,
            "type": error_type,
            "code": null
        }
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_strings() {
        assert_eq!(
            AnthropicErrorType::InvalidRequestError.as_str(),
            "invalid_request_error"
        );
        assert_eq!(
            AnthropicErrorType::AuthenticationError.as_str(),
            "authentication_error"
        );
        assert_eq!(AnthropicErrorType::RateLimitError.as_str(), "rate_limit_error");
        assert_eq!(AnthropicErrorType::ApiError.as_str(), "api_error");
        assert_eq!(AnthropicErrorType::OverloadedError.as_str(), "overloaded_error");
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let resp = error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            AnthropicErrorType::OverloadedError,
            "No healthy accounts available",
        );
        let (parts, body) = resp.into_parts();
        assert_eq!(parts.status, StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(body, 1_000_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["error"]["type"], "overloaded_error");
        assert_eq!(parsed["error"]["message"], "No healthy accounts available");
    }

    #[tokio::test]
    async fn test_openai_error_response_shape() {
        let resp = openai_error_response(StatusCode::UNAUTHORIZED, "invalid_request_error", "bad key");
        let (parts, body) = resp.into_parts();
        assert_eq!(parts.status, StatusCode::UNAUTHORIZED);
        let bytes = axum::body::to_bytes(body, 1_000_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["error"]["message"], "bad key");
        assert_eq!(parsed["error"]["type"], "invalid_request_error");
        assert!(parsed["error"]["code"].is_null());
    }
}
