//! OAuth refresh-token exchange against provider token endpoints.

use crate::error::MailgraphError;
use crate::models::OAuthConfig;
use crate::providers::ProviderKind;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in_seconds: i64,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        provider: ProviderKind,
        refresh_token: &str,
    ) -> Result<RefreshedToken, MailgraphError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

pub struct HttpTokenRefresher {
    http: reqwest::Client,
    oauth: OAuthConfig,
    google_token_url: String,
    outlook_token_url: String,
}

impl HttpTokenRefresher {
    pub fn new(http: reqwest::Client, oauth: OAuthConfig) -> Self {
        let outlook_token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            oauth.outlook_tenant
        );
        Self {
            http,
            oauth,
            google_token_url: GOOGLE_TOKEN_URL.to_string(),
            outlook_token_url,
        }
    }

    /// Test seam: point both exchanges at a local fake
    pub fn with_token_urls(mut self, google: String, outlook: String) -> Self {
        self.google_token_url = google;
        self.outlook_token_url = outlook;
        self
    }

    fn endpoint(&self, provider: ProviderKind) -> (&str, &str, &str) {
        match provider {
            ProviderKind::Outlook => (
                self.outlook_token_url.as_str(),
                self.oauth.outlook_client_id.as_str(),
                self.oauth.outlook_client_secret.as_str(),
            ),
            // Gmail and XOAUTH2 IMAP both exchange against Google
            ProviderKind::Gmail | ProviderKind::Imap => (
                self.google_token_url.as_str(),
                self.oauth.gmail_client_id.as_str(),
                self.oauth.gmail_client_secret.as_str(),
            ),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(
        &self,
        provider: ProviderKind,
        refresh_token: &str,
    ) -> Result<RefreshedToken, MailgraphError> {
        let (url, client_id, client_secret) = self.endpoint(provider);

        debug!(provider = %provider.as_str(), "Exchanging refresh token");

        let response = self
            .http
            .post(url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| MailgraphError::ProviderTransient(format!("token endpoint: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| MailgraphError::ProviderTransient(format!("token body: {}", e)))?;
            return Ok(RefreshedToken {
                access_token: body.access_token,
                expires_in_seconds: body.expires_in,
            });
        }

        if status.is_server_error() {
            return Err(MailgraphError::ProviderTransient(format!(
                "token endpoint returned {}",
                status
            )));
        }

        // 4xx: the grant itself is bad
        let error: TokenErrorResponse = response.json().await.unwrap_or(TokenErrorResponse {
            error: format!("http {}", status),
            error_description: String::new(),
        });
        Err(MailgraphError::CredentialRevoked(format!(
            "{}: {}",
            error.error, error.error_description
        )))
    }
}
