use std::path::PathBuf;

use tracing::info;

use crate::auth::endpoints::REFRESH_BEFORE_EXPIRY_SECS;
use crate::store::expand_path;

/// Upstream request timeout, shared by the refresher. Seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Default cooldown applied to an account after a retryable upstream failure.
pub const DEFAULT_COOLDOWN_MS: i64 = 60_000;

/// Process configuration, resolved once at startup from the environment.
/// `KIRO_RELAY_*` names take precedence over the generic fallbacks.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Shared proxy API key; `None` disables request authorization.
    pub api_key: Option<String>,
    pub cooldown_ms: i64,
    pub refresh_before_expiry_secs: i64,
    /// Quota windows end at the next month boundary in UTC instead of local time.
    pub quota_reset_utc: bool,
    pub accounts_file: PathBuf,
    /// Standalone bootstrap inputs, used only when the accounts file is empty.
    pub token_file: PathBuf,
    pub client_file: Option<PathBuf>,
}

fn env_first(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| std::env::var(n).ok())
        .filter(|v| !v.trim().is_empty())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8045,
            api_key: None,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            refresh_before_expiry_secs: REFRESH_BEFORE_EXPIRY_SECS,
            quota_reset_utc: false,
            accounts_file: PathBuf::from("accounts.json"),
            token_file: expand_path("~/.aws/sso/cache/kiro-auth-token.json"),
            client_file: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(host) = env_first(&["KIRO_RELAY_HOST", "HOST"]) {
            cfg.host = host;
        }
        if let Some(port) = env_first(&["KIRO_RELAY_PORT", "PORT"]).and_then(|p| p.parse().ok()) {
            cfg.port = port;
        }
        if let Some(key) = env_first(&["KIRO_RELAY_API_KEY", "API_KEY"]) {
            info!("proxy API key configured from environment");
            cfg.api_key = Some(key);
        }
        if let Some(ms) = env_first(&["KIRO_RELAY_COOLDOWN_MS"]).and_then(|v| v.parse().ok()) {
            cfg.cooldown_ms = ms;
        }
        if let Some(secs) =
            env_first(&["KIRO_RELAY_REFRESH_BEFORE_EXPIRY_SECS"]).and_then(|v| v.parse().ok())
        {
            cfg.refresh_before_expiry_secs = secs;
        }
        if let Some(v) = env_first(&["KIRO_RELAY_QUOTA_RESET_UTC"]) {
            cfg.quota_reset_utc = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(path) = env_first(&["KIRO_RELAY_ACCOUNTS_FILE"]) {
            cfg.accounts_file = expand_path(&path);
        }
        if let Some(path) = env_first(&["KIRO_RELAY_TOKEN_FILE"]) {
            cfg.token_file = expand_path(&path);
        }
        if let Some(path) = env_first(&["KIRO_RELAY_CLIENT_FILE"]) {
            cfg.client_file = Some(expand_path(&path));
        }

        cfg
    }
}
