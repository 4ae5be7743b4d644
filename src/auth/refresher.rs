use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

use super::endpoints::{oidc_token_url, social_refresh_url};
use super::types::{AuthError, AuthMethod, Credentials, RefreshResponse, RefreshedToken};

/// Exchanges a refresh token for a fresh access token.
///
/// The refresher is a pure network component: it reads a credential record
/// and returns a [`RefreshedToken`]; persisting the result is the caller's
/// job. It shares the gateway-wide upstream timeout.
pub struct TokenRefresher {
    client: Client,
}

impl TokenRefresher {
    pub fn new(timeout: std::time::Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Refresh `creds` against the endpoint its auth method dictates.
    pub async fn refresh(&self, creds: &Credentials) -> Result<RefreshedToken, AuthError> {
        if creds.refresh_token.is_empty() {
            return Err(AuthError::MissingRefreshToken);
        }

        let (url, payload) = match creds.auth_method {
            AuthMethod::Social => (
                social_refresh_url(&creds.region),
                json!({ "refreshToken": creds.refresh_token }),
            ),
            AuthMethod::Idc => {
                let client_id = creds
                    .client_id
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or(AuthError::MissingClientId)?;
                let client_secret = creds
                    .client_secret
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or(AuthError::MissingClientSecret)?;
                (
                    oidc_token_url(&creds.region),
                    json!({
                        "refreshToken": creds.refresh_token,
                        "clientId": client_id,
                        "clientSecret": client_secret,
                        "grantType": "refresh_token",
                    }),
                )
            }
        };

        debug!("refreshing token via {} ({})", url, creds.auth_method);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let data: RefreshResponse = response.json().await?;
        let access_token = data
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MalformedResponse)?;
        let expires_in = data.expires_in.unwrap_or(3600);

        info!(
            "token refreshed ({}), expires in {}s",
            creds.auth_method, expires_in
        );

        Ok(RefreshedToken {
            access_token,
            refresh_token: data.refresh_token,
            expires_in,
            profile_arn: data.profile_arn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn refresher() -> TokenRefresher {
        TokenRefresher::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_refresh_missing_refresh_token() {
        let creds = Credentials::default();
        let err = refresher().refresh(&creds).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingRefreshToken));
    }

    #[tokio::test]
    async fn test_refresh_idc_missing_client_id() {
        let creds = Credentials {
            refresh_token: "rt".into(),
            auth_method: AuthMethod::Idc,
            ..Default::default()
        };
        let err = refresher().refresh(&creds).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingClientId));
    }

    #[tokio::test]
    async fn test_refresh_idc_missing_client_secret() {
        let creds = Credentials {
            refresh_token: "rt".into(),
            client_id: Some("cid".into()),
            auth_method: AuthMethod::Idc,
            ..Default::default()
        };
        let err = refresher().refresh(&creds).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingClientSecret));
    }

    #[tokio::test]
    async fn test_refresh_idc_empty_client_id_rejected() {
        let creds = Credentials {
            refresh_token: "rt".into(),
            client_id: Some("".into()),
            client_secret: Some("cs".into()),
            auth_method: AuthMethod::Idc,
            ..Default::default()
        };
        let err = refresher().refresh(&creds).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingClientId));
    }

    #[test]
    fn test_refresh_response_parses_partial_body() {
        let data: RefreshResponse =
            serde_json::from_str(r#"{"accessToken":"at","expiresIn":1800}"#).unwrap();
        assert_eq!(data.access_token.as_deref(), Some("at"));
        assert_eq!(data.expires_in, Some(1800));
        assert!(data.refresh_token.is_none());
        assert!(data.profile_arn.is_none());
    }
}
