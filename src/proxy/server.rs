// Router assembly and serve loop.

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::proxy::config::AppConfig;
use crate::proxy::handlers;
use crate::proxy::middleware::auth_middleware;
use crate::proxy::pool::AccountPool;
use crate::store::AccountStore;

/// Runtime-mutable proxy settings, adjustable through the admin surface.
pub struct ProxyRuntime {
    pub enabled: bool,
    pub port: u16,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<AccountPool>,
    pub store: Arc<dyn AccountStore>,
    pub runtime: Arc<RwLock<ProxyRuntime>>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::models::handle_health))
        .route("/v1/models", get(handlers::models::handle_list_models))
        .route("/v1/messages", post(handlers::claude::handle_messages))
        .route(
            "/v1/chat/completions",
            post(handlers::openai::handle_chat_completions),
        )
        .route(
            "/v1/api/event_logging",
            post(handlers::models::handle_silent_ok),
        )
        .route(
            "/v1/api/event_logging/batch",
            post(handlers::models::handle_silent_ok),
        )
        .route("/admin", get(handlers::admin::handle_portal))
        .route("/admin/data", get(handlers::admin::handle_data))
        .route("/admin/proxy", post(handlers::admin::handle_proxy_config))
        .route(
            "/admin/account",
            post(handlers::admin::handle_account_import)
                .delete(handlers::admin::handle_account_delete),
        )
        .route(
            "/admin/usage/refresh",
            post(handlers::admin::handle_usage_refresh),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(
    config: &AppConfig,
    pool: Arc<AccountPool>,
    store: Arc<dyn AccountStore>,
) -> Result<(), String> {
    let state = AppState {
        pool,
        store,
        runtime: Arc::new(RwLock::new(ProxyRuntime {
            enabled: true,
            port: config.port,
            api_key: config.api_key.clone(),
        })),
    };

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {}: {}", addr, e))?;

    info!("kiro-relay listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await
        .map_err(|e| format!("server error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state(api_key: Option<String>) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn AccountStore> = Arc::new(
            JsonFileStore::load_or_create(dir.path().join("accounts.json")).unwrap(),
        );
        let mut config = AppConfig::default();
        config.api_key = api_key.clone();
        let pool = Arc::new(AccountPool::new(store.clone(), &config));
        let state = AppState {
            pool,
            store,
            runtime: Arc::new(RwLock::new(ProxyRuntime {
                enabled: true,
                port: config.port,
                api_key,
            })),
        };
        (dir, state)
    }

    #[tokio::test]
    async fn test_health_is_open_without_key() {
        let (_dir, state) = test_state(Some("sk-secret".into()));
        let router = build_router(state);
        let resp = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["ok"], true);
    }

    #[tokio::test]
    async fn test_models_requires_key() {
        let (_dir, state) = test_state(Some("sk-secret".into()));
        let router = build_router(state);

        let denied = router
            .clone()
            .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = router
            .oneshot(
                Request::get("/v1/models")
                    .header("x-api-key", "sk-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_models_shape() {
        let (_dir, state) = test_state(None);
        let router = build_router(state);
        let resp = router
            .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["object"], "list");
        let data = parsed["data"].as_array().unwrap();
        assert!(!data.is_empty());
        assert_eq!(data[0]["object"], "model");
        assert_eq!(data[0]["owned_by"], "kiro");
        assert_eq!(data[0]["created"], 0);
    }

    #[tokio::test]
    async fn test_messages_with_empty_pool_is_503() {
        let (_dir, state) = test_state(None);
        let router = build_router(state);
        let body = serde_json::json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let resp = router
            .oneshot(
                Request::post("/v1/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["error"]["message"], "No healthy accounts available");
    }

    #[tokio::test]
    async fn test_empty_messages_is_400() {
        let (_dir, state) = test_state(None);
        let router = build_router(state);
        let body = serde_json::json!({
            "model": "claude-sonnet-4-5",
            "messages": []
        });
        let resp = router
            .oneshot(
                Request::post("/v1/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_completions_empty_pool_openai_error_shape() {
        let (_dir, state) = test_state(None);
        let router = build_router(state);
        let body = serde_json::json!({
            "model": "claude-opus-4-5",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let resp = router
            .oneshot(
                Request::post("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(parsed["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn test_admin_data_shape() {
        let (_dir, state) = test_state(None);
        let router = build_router(state);
        let resp = router
            .oneshot(Request::get("/admin/data").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(parsed["accounts"].is_array());
        assert_eq!(parsed["proxy"]["enabled"], true);
        assert_eq!(parsed["proxy"]["apiKeySet"], false);
    }

    #[tokio::test]
    async fn test_admin_portal_served() {
        let (_dir, state) = test_state(None);
        let router = build_router(state);
        let resp = router
            .oneshot(Request::get("/admin").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 262144).await.unwrap();
        let html = String::from_utf8_lossy(&bytes);
        assert!(html.contains("kiro-relay"));
    }

    #[tokio::test]
    async fn test_admin_account_delete_missing_id() {
        let (_dir, state) = test_state(None);
        let router = build_router(state);
        let resp = router
            .oneshot(
                Request::delete("/admin/account")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_proxy_update() {
        let (_dir, state) = test_state(None);
        let router = build_router(state.clone());
        let body = serde_json::json!({"enabled": false, "port": 9000, "apiKey": "sk-new"});
        let resp = router
            .oneshot(
                Request::post("/admin/proxy")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let runtime = state.runtime.read().await;
        assert!(!runtime.enabled);
        assert_eq!(runtime.port, 9000);
        assert_eq!(runtime.api_key.as_deref(), Some("sk-new"));
    }
}
