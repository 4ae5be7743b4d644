// Request authorization: when a proxy API key is configured, every
// non-health request must present it as `Authorization: Bearer <key>` or
// `x-api-key: <key>`.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::proxy::common::errors::{error_response, AnthropicErrorType};
use crate::proxy::server::AppState;

fn presented_key(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get("authorization") {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let required = { state.runtime.read().await.api_key.clone() };
    let Some(required) = required else {
        return next.run(request).await;
    };

    match presented_key(&request) {
        Some(key) if key == required => next.run(request).await,
        _ => error_response(
            StatusCode::UNAUTHORIZED,
            AnthropicErrorType::AuthenticationError,
            "Invalid or missing API key",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    fn request_with_header(name: &str, value: &str) -> Request {
        HttpRequest::builder()
            .uri("/v1/messages")
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_presented_key_bearer() {
        let req = request_with_header("authorization", "Bearer sk-123");
        assert_eq!(presented_key(&req).as_deref(), Some("sk-123"));
    }

    #[test]
    fn test_presented_key_x_api_key() {
        let req = request_with_header("x-api-key", "sk-456");
        assert_eq!(presented_key(&req).as_deref(), Some("sk-456"));
    }

    #[test]
    fn test_presented_key_absent() {
        let req = HttpRequest::builder()
            .uri("/v1/messages")
            .body(Body::empty())
            .unwrap();
        assert!(presented_key(&req).is_none());
    }

    #[test]
    fn test_presented_key_non_bearer_authorization_ignored() {
        let req = request_with_header("authorization", "Basic xyz");
        assert!(presented_key(&req).is_none());
    }
}
