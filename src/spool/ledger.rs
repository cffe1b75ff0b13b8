//! Status ledger: persisted record state transitions.
//!
//! Every transition is written to the store before the in-memory record
//! changes, so a failed write leaves the record at its last persisted status.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::spool::record::{MessageRecord, RecordStatus};
use crate::store::RecordStore;

pub struct StatusLedger {
    store: Arc<dyn RecordStore>,
}

impl StatusLedger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Move `record` to `to` and persist it.
    ///
    /// Completing a record stamps its send date. Fails with
    /// `Error::InvalidTransition` without touching the store if the edge is
    /// not allowed, and with `Error::Persistence` if the write fails.
    pub async fn transition(&self, record: &mut MessageRecord, to: RecordStatus) -> Result<()> {
        if !record.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                id: record.id.clone(),
                from: record.status,
                to,
            });
        }

        let mut next = record.clone();
        next.status = to;
        next.updated_at = Utc::now();
        if to == RecordStatus::Complete {
            next.send_date = Some(next.updated_at);
        }

        self.store.save_record(&next).await?;

        debug!(record_id = %record.id, from = %record.status, to = %to, "Record transitioned");
        *record = next;
        Ok(())
    }
}
