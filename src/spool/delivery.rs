//! Delivery strategies, one per channel, behind a common capability trait.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::sms::{SmsGateway, normalize_recipient};
use crate::spool::record::MessageRecord;
use crate::spool::router::Channel;
use crate::transport::Transport;

/// What happened to a record handed to a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Sent. `accepted` counts recipients the channel took.
    Delivered {
        accepted: usize,
        failed_recipients: Vec<String>,
    },
    /// Not sent; the record must stay where it is.
    Skipped { reason: String },
}

/// Delivers records of one channel.
///
/// `open` and `close` bracket a whole pass.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn channel(&self) -> Channel;

    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn deliver(&self, record: &MessageRecord) -> Result<DeliveryOutcome>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ── Generic transport ───────────────────────────────────────────────

/// Sends composed messages one at a time through a mail transport.
pub struct TransportDelivery<'a> {
    transport: &'a dyn Transport,
}

impl<'a> TransportDelivery<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl DeliveryStrategy for TransportDelivery<'_> {
    fn channel(&self) -> Channel {
        Channel::Generic
    }

    async fn deliver(&self, record: &MessageRecord) -> Result<DeliveryOutcome> {
        let report = self.transport.send(&record.composed()).await?;
        Ok(DeliveryOutcome::Delivered {
            accepted: report.accepted,
            failed_recipients: report.failed_recipients,
        })
    }
}

// ── SMS gateway ─────────────────────────────────────────────────────

/// Sends SMS records inside one gateway session.
pub struct SmsDelivery<'a> {
    gateway: &'a dyn SmsGateway,
    options: HashMap<String, String>,
}

impl<'a> SmsDelivery<'a> {
    pub fn new(gateway: &'a dyn SmsGateway) -> Self {
        Self {
            gateway,
            options: HashMap::new(),
        }
    }
}

#[async_trait]
impl DeliveryStrategy for SmsDelivery<'_> {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn open(&self) -> Result<()> {
        self.gateway.login().await?;
        Ok(())
    }

    async fn deliver(&self, record: &MessageRecord) -> Result<DeliveryOutcome> {
        let Some(recipient) = normalize_recipient(&record.recipient) else {
            return Ok(DeliveryOutcome::Skipped {
                reason: format!("'{}' is not a French mobile number", record.recipient),
            });
        };

        self.gateway
            .send_message(&recipient, &record.body, &self.options)
            .await?;
        Ok(DeliveryOutcome::Delivered {
            accepted: 1,
            failed_recipients: Vec::new(),
        })
    }

    async fn close(&self) -> Result<()> {
        self.gateway.logout().await?;
        Ok(())
    }
}
