//! HTTP SMS gateway client.
//!
//! Session protocol:
//! - `POST {base}/login` with `{"login", "password"}` → `{"token"}`
//! - `POST {base}/messages` with bearer token and `{"to", "body", "options"}`
//! - `POST {base}/logout` with bearer token

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::SmsGateway;
use crate::config::parse_var;
use crate::error::{ConfigError, GatewayError};

/// SMS gateway configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmsGatewayConfig {
    pub base_url: String,
    pub login: String,
    pub password: SecretString,
    pub timeout: Duration,
}

impl SmsGatewayConfig {
    /// Build config from environment variables.
    /// Returns `Ok(None)` if `SMS_GATEWAY_URL` is not set (SMS disabled).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(base_url) = lookup("SMS_GATEWAY_URL") else {
            return Ok(None);
        };

        let login = lookup("SMS_GATEWAY_LOGIN")
            .ok_or_else(|| ConfigError::MissingEnvVar("SMS_GATEWAY_LOGIN".into()))?;
        let password = SecretString::from(lookup("SMS_GATEWAY_PASSWORD").unwrap_or_default());
        let timeout_secs = parse_var::<u64>(&lookup, "SMS_GATEWAY_TIMEOUT_SECS")?.unwrap_or(30);

        Ok(Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            login,
            password,
            timeout: Duration::from_secs(timeout_secs),
        }))
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    login: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    body: &'a str,
    options: &'a HashMap<String, String>,
}

/// reqwest-backed gateway client holding the session token between
/// `login` and `logout`.
pub struct HttpSmsGateway {
    config: SmsGatewayConfig,
    client: reqwest::Client,
    token: Mutex<Option<String>>,
}

impl HttpSmsGateway {
    pub fn new(config: SmsGatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    async fn session_token(&self) -> Result<String, GatewayError> {
        self.token.lock().await.clone().ok_or(GatewayError::NoSession)
    }

    /// Map a non-2xx response to `GatewayError::Rejected`.
    async fn check(
        operation: &str,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, GatewayError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(GatewayError::Rejected {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn login(&self) -> Result<(), GatewayError> {
        let resp = self
            .client
            .post(self.url("login"))
            .json(&LoginRequest {
                login: &self.config.login,
                password: self.config.password.expose_secret(),
            })
            .send()
            .await?;
        let resp = Self::check("login", resp).await?;

        let session: LoginResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("login: {e}")))?;
        *self.token.lock().await = Some(session.token);

        tracing::debug!(gateway = %self.config.base_url, "SMS gateway session opened");
        Ok(())
    }

    async fn send_message(
        &self,
        recipient: &str,
        body: &str,
        options: &HashMap<String, String>,
    ) -> Result<(), GatewayError> {
        let token = self.session_token().await?;
        let resp = self
            .client
            .post(self.url("messages"))
            .bearer_auth(token)
            .json(&SendRequest {
                to: recipient,
                body,
                options,
            })
            .send()
            .await?;
        Self::check("send", resp).await?;

        tracing::debug!(recipient = %recipient, "SMS sent");
        Ok(())
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        let Some(token) = self.token.lock().await.take() else {
            return Ok(());
        };
        let resp = self
            .client
            .post(self.url("logout"))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check("logout", resp).await?;

        tracing::debug!(gateway = %self.config.base_url, "SMS gateway session closed");
        Ok(())
    }
}
