//! Outbound mail transports.

pub mod smtp;

pub use smtp::{SmtpConfig, SmtpTransport};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::spool::record::ComposedMessage;

/// Result of handing one composed message to a transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Recipients the transport accepted.
    pub accepted: usize,
    /// Recipients the transport refused.
    pub failed_recipients: Vec<String>,
}

/// A transport able to deliver composed messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name (e.g. "smtp").
    fn name(&self) -> &str;

    fn is_started(&self) -> bool;

    /// Start the transport. Calling it on a started transport is a no-op.
    async fn start(&self) -> Result<(), TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;

    /// Send one message to all its recipients.
    async fn send(&self, message: &ComposedMessage) -> Result<SendReport, TransportError>;
}
