// Admin portal JSON endpoints. The HTML portal itself is an embedded
// static asset; only these endpoints carry behavior.

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::auth::types::{ClientRegistration, Credentials};
use crate::models::account::Account;
use crate::proxy::common::errors::{error_response, AnthropicErrorType};
use crate::proxy::server::AppState;

const ADMIN_PORTAL_HTML: &str = include_str!("../assets/admin.html");

pub async fn handle_portal() -> impl IntoResponse {
    Html(ADMIN_PORTAL_HTML)
}

pub async fn handle_data(State(state): State<AppState>) -> impl IntoResponse {
    let accounts: Vec<Value> = state
        .store
        .list()
        .iter()
        .map(|acc| {
            let mut entry = json!({
                "id": acc.id,
                "email": acc.email,
                "status": acc.status.as_str(),
            });
            if let Some(limits) = state.pool.cached_usage(&acc.id) {
                entry["usage"] = json!({
                    "limit": limits.limit,
                    "current": limits.current
                });
            }
            entry
        })
        .collect();

    let runtime = state.runtime.read().await;
    Json(json!({
        "accounts": accounts,
        "proxy": {
            "enabled": runtime.enabled,
            "port": runtime.port,
            "apiKeySet": runtime.api_key.is_some()
        }
    }))
}

#[derive(serde::Deserialize)]
pub struct ProxyConfigBody {
    pub enabled: bool,
    pub port: u16,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

pub async fn handle_proxy_config(
    State(state): State<AppState>,
    Json(body): Json<ProxyConfigBody>,
) -> impl IntoResponse {
    let mut runtime = state.runtime.write().await;
    runtime.enabled = body.enabled;
    runtime.port = body.port;
    if let Some(key) = body.api_key {
        if key.trim().is_empty() {
            runtime.api_key = None;
        } else {
            runtime.api_key = Some(key);
        }
    }
    info!(
        "proxy config updated: enabled={} port={} apiKeySet={}",
        runtime.enabled,
        runtime.port,
        runtime.api_key.is_some()
    );
    Json(json!({"ok": true}))
}

/// Import an account from an OIDC file pair: `tokenFile` (kiro-auth-token
/// JSON) and `clientFile` (client-identifier JSON).
pub async fn handle_account_import(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let mut token_json: Option<Value> = None;
    let mut client_json: Option<Value> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    AnthropicErrorType::InvalidRequestError,
                    &format!("malformed multipart body: {}", e),
                );
            }
        };
        let name = field.name().unwrap_or("").to_string();
        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    AnthropicErrorType::InvalidRequestError,
                    &format!("unreadable multipart field {}: {}", name, e),
                );
            }
        };
        match name.as_str() {
            "tokenFile" => token_json = serde_json::from_slice(&bytes).ok(),
            "clientFile" => client_json = serde_json::from_slice(&bytes).ok(),
            _ => {}
        }
    }

    let Some(token_json) = token_json else {
        return error_response(
            StatusCode::BAD_REQUEST,
            AnthropicErrorType::InvalidRequestError,
            "tokenFile field is required and must be valid JSON",
        );
    };

    let mut credentials: Credentials = match serde_json::from_value(token_json.clone()) {
        Ok(c) => c,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                AnthropicErrorType::InvalidRequestError,
                &format!("tokenFile is not a credential record: {}", e),
            );
        }
    };

    if let Some(client_json) = client_json {
        if let Ok(reg) = serde_json::from_value::<ClientRegistration>(client_json) {
            if credentials.client_id.is_none() {
                credentials.client_id = reg.client_id;
            }
            if credentials.client_secret.is_none() {
                credentials.client_secret = reg.client_secret;
            }
            if let Some(region) = reg.region {
                credentials.region = region;
            }
        }
    }

    if !credentials.is_usable() {
        return error_response(
            StatusCode::BAD_REQUEST,
            AnthropicErrorType::InvalidRequestError,
            "imported credentials carry no refresh token",
        );
    }

    let email = token_json
        .get("email")
        .and_then(|v| v.as_str())
        .unwrap_or("imported@kiro")
        .to_string();
    let account = Account::new(uuid::Uuid::new_v4().to_string(), email.clone(), credentials);
    let id = account.id.clone();

    if let Err(e) = state.store.upsert(account) {
        warn!("account import failed to persist: {}", e);
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            AnthropicErrorType::ApiError,
            &format!("failed to persist account: {}", e),
        );
    }

    info!("imported account {} ({})", email, id);
    Json(json!({"ok": true, "id": id, "email": email})).into_response()
}

pub async fn handle_account_delete(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(id) = params.get("id") else {
        return error_response(
            StatusCode::BAD_REQUEST,
            AnthropicErrorType::InvalidRequestError,
            "id query parameter is required",
        );
    };

    match state.store.remove(id) {
        Ok(()) => {
            state.pool.forget_account(id);
            info!("deleted account {}", id);
            Json(json!({"ok": true})).into_response()
        }
        Err(e) => error_response(
            StatusCode::NOT_FOUND,
            AnthropicErrorType::InvalidRequestError,
            &e.to_string(),
        ),
    }
}

pub async fn handle_usage_refresh(State(state): State<AppState>) -> impl IntoResponse {
    let updated = state.pool.refresh_usage().await;
    Json(json!({"ok": true, "updated": updated}))
}
