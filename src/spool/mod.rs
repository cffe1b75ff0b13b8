//! The spool: enqueue operations and the flush engine.

pub mod delivery;
pub mod flush;
pub mod ledger;
pub mod policy;
pub mod record;
pub mod router;

pub use delivery::{DeliveryOutcome, DeliveryStrategy, SmsDelivery, TransportDelivery};
pub use flush::FlushReport;
pub use policy::{FlushLimits, StopReason, TerminationPolicy};
pub use record::{ComposedMessage, MessageRecord, NewRecord, RecordStatus, StatusCounts};
pub use router::{Channel, classify};

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::store::RecordStore;

/// Durable outbound spool over a record store.
pub struct Spool {
    store: Arc<dyn RecordStore>,
    limits: FlushLimits,
}

impl Spool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            limits: FlushLimits::unlimited(),
        }
    }

    pub fn with_limits(mut self, limits: FlushLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Default limits used by `flush_queue`.
    pub fn limits(&self) -> FlushLimits {
        self.limits
    }

    /// Maximum messages per pass; 0 disables the limit.
    pub fn set_message_limit(&mut self, limit: usize) {
        self.limits.message_limit = limit;
    }

    /// Maximum duration of the generic pass; zero disables the limit.
    pub fn set_time_limit(&mut self, limit: Duration) {
        self.limits.time_limit = limit;
    }

    pub(crate) fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub(crate) fn store_handle(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    /// Queue a composed email. Returns the new record's id.
    pub async fn enqueue_message(&self, message: &ComposedMessage) -> Result<String> {
        let record = self.store.insert_record(&NewRecord::generic(message)).await?;
        debug!(record_id = %record.id, recipient = %record.recipient, "Message queued");
        Ok(record.id)
    }

    /// Queue an SMS. The recipient is validated at flush time, not here.
    pub async fn enqueue_sms(&self, body: &str, recipient: &str) -> Result<String> {
        let record = self
            .store
            .insert_record(&NewRecord::sms(body, recipient))
            .await?;
        debug!(record_id = %record.id, recipient = %recipient, "SMS queued");
        Ok(record.id)
    }

    pub async fn status_counts(&self) -> Result<StatusCounts> {
        Ok(self.store.count_by_status().await?)
    }
}
