use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// OAuth flavor of a Kiro account.
///
/// - `Social`: Kiro Desktop social login, refreshed against the desktop auth endpoint
/// - `Idc`: AWS Identity Center OIDC, requires client id + secret at refresh time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AuthMethod {
    #[default]
    #[serde(rename = "social")]
    Social,
    #[serde(rename = "IdC", alias = "idc", alias = "Idc")]
    Idc,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Social => write!(f, "social"),
            AuthMethod::Idc => write!(f, "IdC"),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// One account's OAuth material, in the camelCase shape Kiro writes to
/// `kiro-auth-token.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub auth_method: AuthMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
    /// Machine uuid Kiro stamps into its credential files; feeds the fingerprint.
    #[serde(rename = "uuid", skip_serializing_if = "Option::is_none")]
    pub machine_uuid: Option<String>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            refresh_token: String::new(),
            client_id: None,
            client_secret: None,
            region: default_region(),
            expires_at: None,
            auth_method: AuthMethod::Social,
            profile_arn: None,
            machine_uuid: None,
        }
    }
}

impl Credentials {
    /// A record without a refresh token can never be made usable again.
    pub fn is_usable(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// True when the access token is absent or expires within `threshold_secs`.
    pub fn needs_refresh(&self, threshold_secs: i64) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expires_at {
            None => true,
            Some(at) => at - Utc::now() <= Duration::seconds(threshold_secs),
        }
    }

    /// Folds a successful refresh result back into the record.
    pub fn apply_refresh(&mut self, token: &RefreshedToken) {
        self.access_token = token.access_token.clone();
        if let Some(rt) = &token.refresh_token {
            self.refresh_token = rt.clone();
        }
        if let Some(arn) = &token.profile_arn {
            self.profile_arn = Some(arn.clone());
        }
        self.expires_at = Some(Utc::now() + Duration::seconds(token.expires_in));
    }
}

/// Value returned by the refresher. The refresher never persists anything;
/// the caller folds this into the account record and writes it through the store.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub profile_arn: Option<String>,
}

/// Wire shape of both refresh endpoints (desktop auth and AWS SSO OIDC reply
/// with the same camelCase field set; OIDC simply never sends `profileArn`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub profile_arn: Option<String>,
}

/// Auxiliary client-identifier JSON imported alongside the token file for
/// IdC accounts (`~/.aws/sso/cache/<hash>.json` style).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientRegistration {
    #[serde(alias = "clientId", alias = "client_id")]
    pub client_id: Option<String>,
    #[serde(alias = "clientSecret", alias = "client_secret")]
    pub client_secret: Option<String>,
    pub region: Option<String>,
}

/// Errors raised by the credential refresher.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("refresh token is not set")]
    MissingRefreshToken,

    #[error("client id is not set (required for IdC refresh)")]
    MissingClientId,

    #[error("client secret is not set (required for IdC refresh)")]
    MissingClientSecret,

    #[error("refresh response did not contain an access token")]
    MalformedResponse,

    #[error("refresh endpoint returned {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
