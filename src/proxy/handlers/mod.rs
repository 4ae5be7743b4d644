pub mod admin;
pub mod claude;
pub mod models;
pub mod openai;

use axum::http::StatusCode;
use axum::response::Response;
use rand::Rng;

use crate::proxy::common::errors::{error_response, openai_error_response, AnthropicErrorType};
use crate::proxy::pool::DispatchError;

/// Which public protocol shape errors should take.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Surface {
    Anthropic,
    OpenAi,
}

pub(crate) fn new_trace_id() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Map a dispatch failure onto the requesting protocol's error shape.
pub(crate) fn dispatch_error_response(err: DispatchError, surface: Surface) -> Response {
    let (status, kind, message) = match &err {
        DispatchError::NoHealthyAccounts => (
            StatusCode::SERVICE_UNAVAILABLE,
            AnthropicErrorType::OverloadedError,
            err.to_string(),
        ),
        DispatchError::BadRequest(msg) => (
            StatusCode::BAD_REQUEST,
            AnthropicErrorType::InvalidRequestError,
            msg.clone(),
        ),
        DispatchError::Auth(msg) => (
            StatusCode::UNAUTHORIZED,
            AnthropicErrorType::AuthenticationError,
            msg.clone(),
        ),
        DispatchError::Upstream { status, message } => match status {
            Some(400) => (
                StatusCode::BAD_REQUEST,
                AnthropicErrorType::InvalidRequestError,
                message.clone(),
            ),
            _ => (
                StatusCode::BAD_GATEWAY,
                AnthropicErrorType::ApiError,
                message.clone(),
            ),
        },
    };

    match surface {
        Surface::Anthropic => error_response(status, kind, &message),
        Surface::OpenAi => openai_error_response(status, kind.as_str(), &message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_shape() {
        let id = new_trace_id();
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_no_healthy_accounts_maps_to_503() {
        let resp = dispatch_error_response(DispatchError::NoHealthyAccounts, Surface::Anthropic);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_upstream_400_maps_to_400() {
        let resp = dispatch_error_response(
            DispatchError::Upstream {
                status: Some(400),
                message: "bad shape".into(),
            },
            Surface::OpenAi,
        );
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_network_error_maps_to_502() {
        let resp = dispatch_error_response(
            DispatchError::Upstream {
                status: None,
                message: "connection refused".into(),
            },
            Surface::Anthropic,
        );
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_auth_error_maps_to_401() {
        let resp = dispatch_error_response(
            DispatchError::Auth("refresh failed".into()),
            Surface::OpenAi,
        );
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
