//! libSQL backend for `RecordStore`.
//!
//! Supports local file and in-memory databases. Records are returned in
//! insertion order (`rowid`), which gives flush passes FIFO semantics.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::spool::record::{ComposedMessage, MessageRecord, NewRecord, RecordStatus, StatusCounts};
use crate::store::migrations;
use crate::store::traits::RecordStore;

/// libSQL record store.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file, run migrations and verify the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Spool database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        migrations::verify_schema(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_records(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<MessageRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

const RECORD_COLUMNS: &str =
    "id, channel, recipient, body, message, status, send_date, created_at, updated_at";

/// Map a libsql Row to a MessageRecord.
///
/// Column order matches RECORD_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<MessageRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let id: String = row.get(0).map_err(parse)?;
    let message_str: Option<String> = row.get(4).ok();
    let status_str: String = row.get(5).map_err(parse)?;
    let send_date_str: Option<String> = row.get(6).ok();
    let created_str: String = row.get(7).map_err(parse)?;
    let updated_str: String = row.get(8).map_err(parse)?;

    let message = match message_str {
        Some(json) => Some(serde_json::from_str::<ComposedMessage>(&json).map_err(|e| {
            DatabaseError::Serialization(format!("record {id} message: {e}"))
        })?),
        None => None,
    };

    let status = RecordStatus::from_db(&status_str).ok_or_else(|| {
        DatabaseError::Serialization(format!("record {id} has unknown status '{status_str}'"))
    })?;

    Ok(MessageRecord {
        channel: row.get(1).map_err(parse)?,
        recipient: row.get(2).map_err(parse)?,
        body: row.get(3).map_err(parse)?,
        message,
        status,
        send_date: parse_optional_datetime(&send_date_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        id,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RecordStore for LibSqlStore {
    async fn insert_record(&self, record: &NewRecord) -> Result<MessageRecord, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let message_json = record
            .message
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("insert_record: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO spool_messages (id, channel, recipient, body, message, status,
                    send_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?7)",
                params![
                    id.clone(),
                    record.channel.clone(),
                    record.recipient.clone(),
                    record.body.clone(),
                    opt_text_owned(message_json),
                    RecordStatus::Ready.as_str(),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_record: {e}")))?;

        debug!(record_id = %id, channel = %record.channel, "Record inserted into spool");

        Ok(MessageRecord {
            id,
            channel: record.channel.clone(),
            recipient: record.recipient.clone(),
            body: record.body.clone(),
            message: record.message.clone(),
            status: RecordStatus::Ready,
            send_date: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn save_record(&self, record: &MessageRecord) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE spool_messages SET status = ?1, send_date = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    record.status.as_str(),
                    opt_text_owned(record.send_date.map(|d| d.to_rfc3339())),
                    now,
                    record.id.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_record: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "spool record".to_string(),
                id: record.id.clone(),
            });
        }

        debug!(record_id = %record.id, status = %record.status, "Record saved");
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<MessageRecord>, DatabaseError> {
        let records = self
            .query_records(
                &format!("SELECT {RECORD_COLUMNS} FROM spool_messages WHERE id = ?1"),
                params![id],
                "get_record",
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn find_by_status(
        &self,
        status: RecordStatus,
    ) -> Result<Vec<MessageRecord>, DatabaseError> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM spool_messages WHERE status = ?1 ORDER BY rowid ASC"
            ),
            params![status.as_str()],
            "find_by_status",
        )
        .await
    }

    async fn count_by_status(&self) -> Result<StatusCounts, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT status, COUNT(*) FROM spool_messages GROUP BY status",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_by_status: {e}")))?;

        let mut counts = StatusCounts::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count_by_status: {e}")))?
        {
            let status: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            let count = usize::try_from(count).unwrap_or(0);
            match RecordStatus::from_db(&status) {
                Some(RecordStatus::Ready) => counts.ready = count,
                Some(RecordStatus::Processing) => counts.processing = count,
                Some(RecordStatus::Complete) => counts.complete = count,
                None => tracing::warn!(status = %status, "Ignoring unknown status in counts"),
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    fn test_message(to: &str) -> ComposedMessage {
        ComposedMessage::new("spool@example.com", to, "Hello", "Hello world")
    }

    #[tokio::test]
    async fn insert_and_get_generic_record() {
        let store = test_store().await;
        let inserted = store
            .insert_record(&NewRecord::generic(&test_message("alice@example.com")))
            .await
            .unwrap();

        let loaded = store.get_record(&inserted.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, inserted.id);
        assert_eq!(loaded.channel, "generic");
        assert_eq!(loaded.recipient, "alice@example.com");
        assert_eq!(loaded.body, "Hello world");
        assert_eq!(loaded.message, Some(test_message("alice@example.com")));
        assert_eq!(loaded.status, RecordStatus::Ready);
        assert!(loaded.send_date.is_none());
    }

    #[tokio::test]
    async fn insert_sms_has_no_message() {
        let store = test_store().await;
        let inserted = store
            .insert_record(&NewRecord::sms("Your code is 1234", "06 12 34 56 78"))
            .await
            .unwrap();

        let loaded = store.get_record(&inserted.id).await.unwrap().unwrap();
        assert_eq!(loaded.channel, "sms");
        assert_eq!(loaded.recipient, "06 12 34 56 78");
        assert!(loaded.message.is_none());
    }

    #[tokio::test]
    async fn get_record_not_found() {
        let store = test_store().await;
        assert!(store.get_record("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_status_preserves_insertion_order() {
        let store = test_store().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let record = store
                .insert_record(&NewRecord::generic(&test_message(&format!("u{i}@x.com"))))
                .await
                .unwrap();
            ids.push(record.id);
        }

        let ready = store.find_by_status(RecordStatus::Ready).await.unwrap();
        let found: Vec<_> = ready.into_iter().map(|r| r.id).collect();
        assert_eq!(found, ids);
    }

    #[tokio::test]
    async fn save_record_updates_status_and_send_date() {
        let store = test_store().await;
        let mut record = store
            .insert_record(&NewRecord::sms("hi", "0612345678"))
            .await
            .unwrap();

        record.status = RecordStatus::Complete;
        record.send_date = Some(Utc::now());
        store.save_record(&record).await.unwrap();

        let loaded = store.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Complete);
        assert!(loaded.send_date.is_some());

        assert!(store.find_by_status(RecordStatus::Ready).await.unwrap().is_empty());
        assert_eq!(
            store.find_by_status(RecordStatus::Complete).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn save_unknown_record_is_not_found() {
        let store = test_store().await;
        let mut record = store
            .insert_record(&NewRecord::sms("hi", "0612345678"))
            .await
            .unwrap();
        record.id = "missing".to_string();

        let err = store.save_record(&record).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn count_by_status_groups() {
        let store = test_store().await;
        for _ in 0..3 {
            store
                .insert_record(&NewRecord::sms("hi", "0612345678"))
                .await
                .unwrap();
        }
        let mut first = store.find_by_status(RecordStatus::Ready).await.unwrap().remove(0);
        first.status = RecordStatus::Processing;
        store.save_record(&first).await.unwrap();

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.ready, 2);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.complete, 0);
        assert_eq!(counts.total(), 3);
    }

    #[tokio::test]
    async fn open_local_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("spool.db");
        let store = LibSqlStore::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());

        store
            .insert_record(&NewRecord::sms("hi", "0612345678"))
            .await
            .unwrap();
        drop(store);

        // Reopening runs migrations again and keeps the data.
        let reopened = LibSqlStore::new_local(&db_path).await.unwrap();
        assert_eq!(reopened.count_by_status().await.unwrap().ready, 1);
    }

    #[test]
    fn parse_datetime_formats() {
        let rfc = parse_datetime("2026-01-02T03:04:05+00:00");
        assert_eq!(rfc.to_rfc3339(), "2026-01-02T03:04:05+00:00");
        let sqlite = parse_datetime("2026-01-02 03:04:05");
        assert_eq!(sqlite, rfc);
        assert_eq!(parse_datetime("garbage"), DateTime::<Utc>::MIN_UTC);
    }
}
