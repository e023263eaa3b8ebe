//! User service login

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Credentials read from `ADMIN_USERNAME` / `ADMIN_PASSWORD`
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            username: std::env::var("ADMIN_USERNAME").unwrap_or_else(|_| "a".to_string()),
            password: std::env::var("ADMIN_PASSWORD").unwrap_or_else(|_| ".".to_string()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("username", &self.username).finish_non_exhaustive()
    }
}

pub struct UserClient {
    client: reqwest::Client,
    base_url: String,
}

impl UserClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build user service client")?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// `POST {base}/login`, returning the bearer token
    pub async fn login(&self, credentials: &Credentials) -> anyhow::Result<String> {
        let body = serde_json::to_string(&LoginRequest {
            username: &credentials.username,
            password: &credentials.password,
        })?;
        let response = self
            .client
            .post(format!("{}/login", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .context("login")?;

        let status = response.status();
        info!(status = %status.as_u16(), "login_response");
        if !status.is_success() {
            bail!("Login failed with status {}", status.as_u16());
        }

        let text = response.text().await.context("login")?;
        let parsed: LoginResponse = serde_json::from_str(&text).context("login: invalid body")?;
        if parsed.token.is_empty() {
            bail!("Login returned an empty token");
        }
        Ok(parsed.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials { username: "admin".to_string(), password: "secret".to_string() };
        let shown = format!("{credentials:?}");
        assert!(shown.contains("admin"));
        assert!(!shown.contains("secret"));
    }

    #[tokio::test]
    async fn test_login_unreachable_service_is_error() {
        let client = UserClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let credentials = Credentials { username: "a".to_string(), password: ".".to_string() };
        assert!(client.login(&credentials).await.is_err());
    }
}
