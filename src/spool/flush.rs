//! Batch flush controller.
//!
//! A flush runs two passes over the Ready records, in store order:
//!
//! 1. **Generic pass**: each generic record goes Processing → send →
//!    Complete. Message and time limits are checked after every record.
//! 2. **SMS pass**: only when the Ready set held an SMS record. One gateway
//!    session brackets the pass; invalid recipients are skipped and stay
//!    Ready. Only the message limit applies, counted against SMS sends.
//!
//! Any store, transport or gateway error aborts the flush. Records completed
//! before the error stay Complete.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::sms::SmsGateway;
use crate::spool::Spool;
use crate::spool::delivery::{DeliveryOutcome, DeliveryStrategy, SmsDelivery, TransportDelivery};
use crate::spool::ledger::StatusLedger;
use crate::spool::policy::{FlushLimits, TerminationPolicy};
use crate::spool::record::{MessageRecord, RecordStatus};
use crate::spool::router::{Channel, classify};
use crate::transport::Transport;

/// Outcome of one flush call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Recipients accepted by the mail transport.
    pub generic_sent: usize,
    /// SMS messages sent.
    pub sms_sent: usize,
    /// Recipients the transport refused.
    pub failed_recipients: Vec<String>,
    /// Ids of records a strategy declined to send. SMS records with an
    /// invalid recipient stay Ready; generic ones stay Processing.
    pub skipped: Vec<String>,
}

impl FlushReport {
    /// Total number of sent messages.
    pub fn count(&self) -> usize {
        self.generic_sent + self.sms_sent
    }
}

impl Spool {
    /// Flush the queue with the spool's configured limits.
    pub async fn flush_queue(
        &self,
        transport: &dyn Transport,
        sms_gateway: Option<&dyn SmsGateway>,
    ) -> Result<FlushReport> {
        self.flush(transport, sms_gateway, self.limits()).await
    }

    /// Deliver every Ready record, subject to `limits`.
    ///
    /// Callers must not run two flushes against the same store concurrently;
    /// records are not leased.
    pub async fn flush(
        &self,
        transport: &dyn Transport,
        sms_gateway: Option<&dyn SmsGateway>,
        limits: FlushLimits,
    ) -> Result<FlushReport> {
        if !transport.is_started() {
            transport.start().await?;
        }

        let mut ready = self.store().find_by_status(RecordStatus::Ready).await?;
        if ready.is_empty() {
            debug!("Spool empty, nothing to flush");
            return Ok(FlushReport::default());
        }

        let mut pass = FlushPass {
            ledger: StatusLedger::new(self.store_handle()),
            limits,
            started: Instant::now(),
            report: FlushReport::default(),
        };

        let generic = TransportDelivery::new(transport);
        let has_sms = pass.generic_pass(&mut ready, &generic).await?;

        if has_sms {
            match sms_gateway {
                Some(gateway) => {
                    let sms = SmsDelivery::new(gateway);
                    pass.sms_pass(&mut ready, &sms).await?;
                }
                None => warn!("SMS records queued but no SMS gateway configured, leaving them Ready"),
            }
        }

        let report = pass.report;
        info!(
            transport = transport.name(),
            generic_sent = report.generic_sent,
            sms_sent = report.sms_sent,
            failed_recipients = report.failed_recipients.len(),
            skipped = report.skipped.len(),
            elapsed_ms = pass.started.elapsed().as_millis() as u64,
            "Spool flushed"
        );
        Ok(report)
    }
}

/// State of a single flush call.
struct FlushPass {
    ledger: StatusLedger,
    limits: FlushLimits,
    started: Instant,
    report: FlushReport,
}

impl FlushPass {
    /// Deliver generic records. Returns whether the Ready set holds any SMS record.
    async fn generic_pass(
        &mut self,
        records: &mut [MessageRecord],
        strategy: &dyn DeliveryStrategy,
    ) -> Result<bool> {
        let policy = TerminationPolicy::for_generic_pass(self.limits);
        let has_sms = records.iter().any(|r| classify(r) == Channel::Sms);

        let channel = strategy.channel();
        for record in records.iter_mut().filter(|r| classify(r) == channel) {
            self.ledger
                .transition(record, RecordStatus::Processing)
                .await?;

            match strategy.deliver(record).await? {
                DeliveryOutcome::Delivered {
                    accepted,
                    failed_recipients,
                } => {
                    self.ledger.transition(record, RecordStatus::Complete).await?;
                    self.report.generic_sent += accepted;
                    self.report.failed_recipients.extend(failed_recipients);
                }
                DeliveryOutcome::Skipped { reason } => {
                    warn!(record_id = %record.id, %reason, "Generic record not sent, left Processing");
                    self.report.skipped.push(record.id.clone());
                }
            }

            if let Some(reason) =
                policy.should_stop(self.report.generic_sent, self.started.elapsed())
            {
                info!(?reason, sent = self.report.generic_sent, "Generic pass stopped early");
                break;
            }
        }

        Ok(has_sms)
    }

    /// Deliver SMS records inside one gateway session.
    ///
    /// The session is closed even when the pass fails; the pass error wins.
    async fn sms_pass(
        &mut self,
        records: &mut [MessageRecord],
        strategy: &dyn DeliveryStrategy,
    ) -> Result<()> {
        strategy.open().await?;

        let result = self.deliver_sms(records, strategy).await;
        let closed = strategy.close().await;

        match (result, closed) {
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Failed to close SMS session after error");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), closed) => closed,
        }
    }

    async fn deliver_sms(
        &mut self,
        records: &mut [MessageRecord],
        strategy: &dyn DeliveryStrategy,
    ) -> Result<()> {
        let policy = TerminationPolicy::for_sms_pass(self.limits);

        let channel = strategy.channel();
        for record in records.iter_mut().filter(|r| classify(r) == channel) {
            match strategy.deliver(record).await? {
                DeliveryOutcome::Delivered { accepted, .. } => {
                    self.ledger.transition(record, RecordStatus::Complete).await?;
                    self.report.sms_sent += accepted;
                }
                DeliveryOutcome::Skipped { reason } => {
                    warn!(record_id = %record.id, %reason, "SMS skipped, record left Ready");
                    self.report.skipped.push(record.id.clone());
                }
            }

            if let Some(reason) = policy.should_stop(self.report.sms_sent, self.started.elapsed()) {
                info!(?reason, sent = self.report.sms_sent, "SMS pass stopped early");
                break;
            }
        }
        Ok(())
    }
}
