//! SMTP transport via lettre.

use std::sync::Mutex;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::Transport as _;
use secrecy::{ExposeSecret, SecretString};

use super::{SendReport, Transport};
use crate::config::parse_var;
use crate::error::{ConfigError, TransportError};
use crate::spool::record::ComposedMessage;

// ── Configuration ───────────────────────────────────────────────────

/// SMTP transport configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Sender used when a spooled message has no `from`.
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `Ok(None)` if `SMTP_HOST` is not set (transport disabled).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. A malformed `SMTP_PORT` is
    /// rejected rather than replaced by the default.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(host) = lookup("SMTP_HOST") else {
            return Ok(None);
        };

        let port = parse_var::<u16>(&lookup, "SMTP_PORT")?.unwrap_or(587);
        let username = lookup("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(lookup("SMTP_PASSWORD").unwrap_or_default());
        let from_address = lookup("SMTP_FROM").unwrap_or_else(|| username.clone());

        Ok(Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        }))
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// SMTP relay transport. The relay is built by `start()`.
pub struct SmtpTransport {
    config: SmtpConfig,
    relay: Mutex<Option<lettre::SmtpTransport>>,
}

impl SmtpTransport {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            relay: Mutex::new(None),
        }
    }

    fn send_failed(reason: impl Into<String>) -> TransportError {
        TransportError::SendFailed {
            name: "smtp".into(),
            reason: reason.into(),
        }
    }

    fn relay(&self) -> Option<lettre::SmtpTransport> {
        self.relay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Build the lettre message for the valid recipients.
    ///
    /// Returns `None` when no recipient parses, in which case nothing should
    /// be sent.
    fn build_email(
        &self,
        message: &ComposedMessage,
        report: &mut SendReport,
    ) -> Result<Option<lettre::Message>, TransportError> {
        let from = if message.from.is_empty() {
            &self.config.from_address
        } else {
            &message.from
        };
        let from: Mailbox = from
            .parse()
            .map_err(|e| TransportError::InvalidMessage(format!("Invalid from address: {e}")))?;

        let mut builder = lettre::Message::builder().from(from).subject(&message.subject);
        let mut accepted = 0;

        for to in &message.to {
            if let Some(mailbox) = parse_recipient(to, report) {
                builder = builder.to(mailbox);
                accepted += 1;
            }
        }
        for cc in &message.cc {
            if let Some(mailbox) = parse_recipient(cc, report) {
                builder = builder.cc(mailbox);
                accepted += 1;
            }
        }

        if accepted == 0 {
            return Ok(None);
        }

        let email = builder
            .body(message.body.clone())
            .map_err(|e| TransportError::InvalidMessage(format!("Failed to build email: {e}")))?;
        report.accepted = accepted;
        Ok(Some(email))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    fn is_started(&self) -> bool {
        self.relay().is_some()
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.is_started() {
            return Ok(());
        }

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        let relay = lettre::SmtpTransport::relay(&self.config.host)
            .map_err(|e| TransportError::StartFailed {
                name: "smtp".into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(self.config.port)
            .credentials(creds)
            .build();

        let check = relay.clone();
        let connected = tokio::task::spawn_blocking(move || check.test_connection())
            .await
            .map_err(|e| TransportError::StartFailed {
                name: "smtp".into(),
                reason: format!("Connection check panicked: {e}"),
            })?
            .map_err(|e| TransportError::StartFailed {
                name: "smtp".into(),
                reason: format!("SMTP connection failed: {e}"),
            })?;
        if !connected {
            return Err(TransportError::StartFailed {
                name: "smtp".into(),
                reason: format!("{}:{} refused the connection", self.config.host, self.config.port),
            });
        }

        *self
            .relay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(relay);
        tracing::info!(host = %self.config.host, port = self.config.port, "SMTP transport started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.relay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        tracing::info!("SMTP transport stopped");
        Ok(())
    }

    async fn send(&self, message: &ComposedMessage) -> Result<SendReport, TransportError> {
        let relay = self
            .relay()
            .ok_or_else(|| Self::send_failed("transport not started"))?;

        let mut report = SendReport::default();
        let Some(email) = self.build_email(message, &mut report)? else {
            tracing::warn!(
                failed = report.failed_recipients.len(),
                "No valid recipients, message not sent"
            );
            return Ok(report);
        };

        tokio::task::spawn_blocking(move || relay.send(&email))
            .await
            .map_err(|e| Self::send_failed(format!("Send task panicked: {e}")))?
            .map_err(|e| Self::send_failed(format!("SMTP send failed: {e}")))?;

        tracing::info!(accepted = report.accepted, subject = %message.subject, "Email sent");
        Ok(report)
    }
}

/// Parse a recipient into a mailbox, recording it as failed if it does not parse.
fn parse_recipient(address: &str, report: &mut SendReport) -> Option<Mailbox> {
    match address.parse::<Mailbox>() {
        Ok(mailbox) => Some(mailbox),
        Err(e) => {
            tracing::warn!(recipient = %address, "Rejected recipient: {e}");
            report.failed_recipients.push(address.to_string());
            None
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.test.com".into(),
            port: 587,
            username: "user".into(),
            password: SecretString::from("pass"),
            from_address: "spool@test.com".into(),
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn config_is_none_without_host() {
        assert!(SmtpConfig::from_lookup(lookup(&[("SMTP_PORT", "25")]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn config_defaults_port_and_sender() {
        let config = SmtpConfig::from_lookup(lookup(&[
            ("SMTP_HOST", "smtp.test.com"),
            ("SMTP_USERNAME", "user@test.com"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(config.port, 587);
        assert_eq!(config.from_address, "user@test.com");
    }

    #[test]
    fn config_rejects_malformed_port() {
        for port in ["58 7", "smtp", "70000"] {
            let err = SmtpConfig::from_lookup(lookup(&[
                ("SMTP_HOST", "smtp.test.com"),
                ("SMTP_PORT", port),
            ]))
            .unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidValue { key, .. } if key == "SMTP_PORT"),
                "SMTP_PORT={port} gave {err:?}"
            );
        }
    }

    #[test]
    fn transport_is_not_started_until_start() {
        let transport = SmtpTransport::new(test_config());
        assert_eq!(transport.name(), "smtp");
        assert!(!transport.is_started());
    }

    #[tokio::test]
    async fn send_before_start_fails() {
        let transport = SmtpTransport::new(test_config());
        let message = ComposedMessage::new("a@test.com", "b@test.com", "Hi", "Body");
        let err = transport.send(&message).await.unwrap_err();
        assert!(matches!(err, TransportError::SendFailed { .. }));
    }

    #[test]
    fn build_email_splits_invalid_recipients() {
        let transport = SmtpTransport::new(test_config());
        let message = ComposedMessage::new("a@test.com", "b@test.com", "Hi", "Body")
            .with_to("not an address")
            .with_cc("c@test.com");

        let mut report = SendReport::default();
        let email = transport.build_email(&message, &mut report).unwrap();
        assert!(email.is_some());
        assert_eq!(report.accepted, 2);
        assert_eq!(report.failed_recipients, vec!["not an address".to_string()]);
    }

    #[test]
    fn build_email_with_no_valid_recipient() {
        let transport = SmtpTransport::new(test_config());
        let message = ComposedMessage::new("a@test.com", "broken", "Hi", "Body");

        let mut report = SendReport::default();
        let email = transport.build_email(&message, &mut report).unwrap();
        assert!(email.is_none());
        assert_eq!(report.accepted, 0);
        assert_eq!(report.failed_recipients, vec!["broken".to_string()]);
    }

    #[test]
    fn build_email_uses_configured_sender_when_missing() {
        let transport = SmtpTransport::new(test_config());
        let mut message = ComposedMessage::new("", "b@test.com", "Hi", "Body");
        message.from.clear();

        let mut report = SendReport::default();
        let email = transport.build_email(&message, &mut report).unwrap().unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("From: spool@test.com"));
    }

    #[test]
    fn build_email_rejects_bad_sender() {
        let transport = SmtpTransport::new(test_config());
        let message = ComposedMessage::new("nobody", "b@test.com", "Hi", "Body");
        let mut report = SendReport::default();
        let err = transport.build_email(&message, &mut report).unwrap_err();
        assert!(matches!(err, TransportError::InvalidMessage(_)));
    }
}
