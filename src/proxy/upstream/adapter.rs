// Kiro upstream adapter: owns the per-account HTTP client, signs requests
// with the bit-exact SDK identity, and applies the in-call retry policy
// (403 → one forced refresh, 429/5xx → exponential backoff).

use std::time::Duration;

use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::endpoints::{amz_user_agent, codewhisperer_host, machine_id, q_host, user_agent};
use crate::auth::refresher::TokenRefresher;
use crate::auth::types::{AuthError, AuthMethod, Credentials, RefreshedToken};
use crate::models::account::Account;
use crate::proxy::common::model_mapping::is_amazonq;
use crate::proxy::config::REQUEST_TIMEOUT_SECS;

const MAX_SEND_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 1000;
const KEEP_ALIVE_SOCKETS: usize = 100;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
}

impl UpstreamError {
    /// The upstream HTTP status, when one was received. Network and auth
    /// failures have none, which the dispatcher treats as local.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Keyed per-account client cache. Clients keep connection pools alive
/// across requests for the same account.
#[derive(Default)]
pub struct ClientPool {
    clients: DashMap<String, Client>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_build(&self, account_id: &str) -> Client {
        self.clients
            .entry(account_id.to_string())
            .or_insert_with(|| {
                Client::builder()
                    .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                    .pool_max_idle_per_host(KEEP_ALIVE_SOCKETS)
                    .build()
                    .unwrap_or_default()
            })
            .clone()
    }

    pub fn evict(&self, account_id: &str) {
        self.clients.remove(account_id);
    }
}

/// Successful send. When a 403 forced a refresh mid-call, the refreshed
/// token rides along so the dispatcher can persist it.
pub struct SendOutcome {
    pub response: reqwest::Response,
    pub refreshed: Option<RefreshedToken>,
}

/// One adapter per account-call pair; the HTTP client behind it is shared
/// through the [`ClientPool`].
pub struct KiroAdapter {
    client: Client,
    region: String,
    machine_id: String,
    auth_method: AuthMethod,
    profile_arn: Option<String>,
}

impl KiroAdapter {
    pub fn for_account(pool: &ClientPool, account: &Account) -> Self {
        let creds = &account.credentials;
        Self {
            client: pool.get_or_build(&account.id),
            region: creds.region.clone(),
            machine_id: machine_id(
                creds.machine_uuid.as_deref(),
                creds.profile_arn.as_deref(),
                creds.client_id.as_deref(),
            ),
            auth_method: creds.auth_method,
            profile_arn: creds.profile_arn.clone(),
        }
    }

    fn headers(&self, access_token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", access_token)) {
            headers.insert(AUTHORIZATION, v);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(v) = HeaderValue::from_str(&user_agent(&self.machine_id)) {
            headers.insert(USER_AGENT, v);
        }
        if let Ok(v) = HeaderValue::from_str(&amz_user_agent(&self.machine_id)) {
            headers.insert("x-amz-user-agent", v);
        }
        headers
    }

    /// Generation endpoint for a model: `amazonq` ids use the streaming
    /// entry point, everything else the assistant-response one.
    pub fn generate_url(&self, model_id: &str) -> String {
        let host = codewhisperer_host(&self.region);
        if is_amazonq(model_id) {
            format!("{}/SendMessageStreaming", host)
        } else {
            format!("{}/generateAssistantResponse", host)
        }
    }

    fn usage_limits_url(&self) -> String {
        format!("{}/getUsageLimits", q_host(&self.region))
    }

    /// Send one generation request.
    ///
    /// Retry policy: a 403 forces exactly one credential refresh and retry;
    /// 429 and 5xx back off exponentially up to [`MAX_SEND_ATTEMPTS`];
    /// everything else surfaces immediately with its status attached.
    pub async fn send(
        &self,
        refresher: &TokenRefresher,
        creds: &Credentials,
        model_id: &str,
        payload: &Value,
    ) -> Result<SendOutcome, UpstreamError> {
        let url = self.generate_url(model_id);
        let mut access_token = creds.access_token.clone();
        let mut refreshed: Option<RefreshedToken> = None;
        let mut did_refresh = false;

        let mut attempt: u32 = 0;
        loop {
            debug!("POST {} (attempt {})", url, attempt + 1);
            let response = self
                .client
                .post(&url)
                .headers(self.headers(&access_token))
                .json(payload)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(SendOutcome {
                    response,
                    refreshed,
                });
            }

            let code = status.as_u16();
            if code == 403 && !did_refresh {
                let body = response.text().await.unwrap_or_default();
                warn!("upstream 403, forcing token refresh and retrying once: {}", body);
                let token = refresher.refresh(creds).await?;
                access_token = token.access_token.clone();
                refreshed = Some(token);
                did_refresh = true;
                continue;
            }

            if (code == 429 || code >= 500) && attempt + 1 < MAX_SEND_ATTEMPTS {
                let delay = BACKOFF_BASE_MS * (1 << attempt);
                warn!(
                    "upstream {} (attempt {}/{}), backing off {}ms",
                    code,
                    attempt + 1,
                    MAX_SEND_ATTEMPTS,
                    delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http { status: code, body });
        }
    }

    /// Query the account's agentic-request usage limits.
    pub async fn fetch_usage_limits(
        &self,
        access_token: &str,
    ) -> Result<UsageLimits, UpstreamError> {
        let mut query: Vec<(&str, String)> = vec![
            ("isEmailRequired", "true".into()),
            ("origin", "AI_EDITOR".into()),
            ("resourceType", "AGENTIC_REQUEST".into()),
        ];
        if self.auth_method == AuthMethod::Social {
            if let Some(arn) = &self.profile_arn {
                query.push(("profileArn", arn.clone()));
            }
        }

        let response = self
            .client
            .get(self.usage_limits_url())
            .headers(self.headers(access_token))
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await.map_err(UpstreamError::Network)?;
        Ok(UsageLimits::from_response(&body))
    }
}

/// Agentic-request usage snapshot, parsed tolerantly.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct UsageLimits {
    pub limit: i64,
    pub current: i64,
}

impl UsageLimits {
    fn from_response(body: &Value) -> Self {
        // The response nests per-resource breakdowns; take the first entry
        // that carries a limit, otherwise read the top-level fields.
        let entry = body
            .get("usageLimitList")
            .and_then(|l| l.as_array())
            .and_then(|l| l.first())
            .unwrap_or(body);
        let limit = entry
            .get("usageLimit")
            .or_else(|| entry.get("limit"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let current = entry
            .get("currentUsage")
            .or_else(|| entry.get("current"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Self { limit, current }
    }
}

/// Canonical short description substituted for oversized Claude Code `Bash`
/// tool descriptions, which upstream rejects.
pub const BASH_TOOL_DESCRIPTION: &str =
    "Executes a bash command in a persistent shell session, with optional timeout. \
     Use for running builds, tests, git operations, and other shell work.";

/// Replace the description of a `Bash` tool that still carries the oversized
/// Claude Code text. Other tools pass through untouched.
pub fn sanitize_tool_description(name: &str, description: &str) -> Option<&'static str> {
    if name == "Bash" && description.contains("Claude Code") {
        Some(BASH_TOOL_DESCRIPTION)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter_for(region: &str) -> KiroAdapter {
        let pool = ClientPool::new();
        let account = Account::new(
            "acc".into(),
            "a@example.com".into(),
            Credentials {
                refresh_token: "rt".into(),
                region: region.into(),
                profile_arn: Some("arn:aws:profile/x".into()),
                ..Default::default()
            },
        );
        KiroAdapter::for_account(&pool, &account)
    }

    #[test]
    fn test_generate_url_selection() {
        let adapter = adapter_for("us-east-1");
        assert_eq!(
            adapter.generate_url("CLAUDE_SONNET_4_5_20250929_V1_0"),
            "https://codewhisperer.us-east-1.amazonaws.com/generateAssistantResponse"
        );
        assert_eq!(
            adapter.generate_url("amazonq-developer"),
            "https://codewhisperer.us-east-1.amazonaws.com/SendMessageStreaming"
        );
    }

    #[test]
    fn test_usage_limits_url_uses_q_host() {
        let adapter = adapter_for("eu-west-1");
        assert_eq!(
            adapter.usage_limits_url(),
            "https://q.eu-west-1.amazonaws.com/getUsageLimits"
        );
    }

    #[test]
    fn test_headers_identity() {
        let adapter = adapter_for("us-east-1");
        let headers = adapter.headers("tok123");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok123");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        let ua = headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(ua.starts_with("aws-sdk-js/1.0.0 ua/2.1 os/"));
        assert!(ua.contains("api/codewhispererruntime#1.0.0 m/E KiroIDE-"));
        let amz = headers.get("x-amz-user-agent").unwrap().to_str().unwrap();
        assert!(amz.starts_with("aws-sdk-js/1.0.0 KiroIDE-"));
        // Both carry the same machine fingerprint suffix.
        let suffix = ua.rsplit('-').next().unwrap();
        assert!(amz.ends_with(suffix));
        assert_eq!(suffix.len(), 64);
    }

    #[test]
    fn test_client_pool_reuses_clients() {
        let pool = ClientPool::new();
        let _a = pool.get_or_build("acc-1");
        let _b = pool.get_or_build("acc-1");
        assert_eq!(pool.clients.len(), 1);
        let _c = pool.get_or_build("acc-2");
        assert_eq!(pool.clients.len(), 2);
        pool.evict("acc-1");
        assert_eq!(pool.clients.len(), 1);
    }

    #[test]
    fn test_usage_limits_parsing_nested() {
        let body = json!({
            "usageLimitList": [
                {"usageLimit": 500, "currentUsage": 123, "resourceType": "AGENTIC_REQUEST"}
            ]
        });
        let limits = UsageLimits::from_response(&body);
        assert_eq!(limits.limit, 500);
        assert_eq!(limits.current, 123);
    }

    #[test]
    fn test_usage_limits_parsing_flat_and_empty() {
        let limits = UsageLimits::from_response(&json!({"limit": 10, "current": 3}));
        assert_eq!(limits.limit, 10);
        assert_eq!(limits.current, 3);

        let empty = UsageLimits::from_response(&json!({}));
        assert_eq!(empty.limit, 0);
        assert_eq!(empty.current, 0);
    }

    #[test]
    fn test_sanitize_bash_tool_description() {
        assert_eq!(
            sanitize_tool_description("Bash", "Part of Claude Code: very long text..."),
            Some(BASH_TOOL_DESCRIPTION)
        );
        assert!(sanitize_tool_description("Bash", "plain bash runner").is_none());
        assert!(sanitize_tool_description("Shell", "Claude Code something").is_none());
    }

    #[test]
    fn test_upstream_error_status() {
        let err = UpstreamError::Http {
            status: 402,
            body: "quota".into(),
        };
        assert_eq!(err.status(), Some(402));
        let auth = UpstreamError::Auth(AuthError::MissingRefreshToken);
        assert_eq!(auth.status(), None);
    }
}
