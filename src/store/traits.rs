//! `RecordStore` trait, the async interface to spool persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::spool::record::{MessageRecord, NewRecord, RecordStatus, StatusCounts};

/// Backend-agnostic storage for spool records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record with status `Ready`. Returns the stored record.
    async fn insert_record(&self, record: &NewRecord) -> Result<MessageRecord, DatabaseError>;

    /// Persist the mutable fields (status, send date) of an existing record.
    async fn save_record(&self, record: &MessageRecord) -> Result<(), DatabaseError>;

    /// Get a record by ID.
    async fn get_record(&self, id: &str) -> Result<Option<MessageRecord>, DatabaseError>;

    /// All records with the given status, in insertion order.
    async fn find_by_status(
        &self,
        status: RecordStatus,
    ) -> Result<Vec<MessageRecord>, DatabaseError>;

    /// Count records per status.
    async fn count_by_status(&self) -> Result<StatusCounts, DatabaseError>;
}
