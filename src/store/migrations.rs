//! Version-tracked migrations for the spool database.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks the
//! current version and applies only newer ones, in order. `verify_schema()`
//! checks once at startup that the record table carries every column the
//! spool reads and writes.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "spool_messages",
        sql: r#"
            CREATE TABLE IF NOT EXISTS spool_messages (
                id TEXT PRIMARY KEY,
                channel TEXT NOT NULL,
                recipient TEXT NOT NULL,
                body TEXT NOT NULL,
                message TEXT,
                status TEXT NOT NULL DEFAULT 'ready',
                send_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_spool_messages_status ON spool_messages(status);
        "#,
    },
    Migration {
        version: 2,
        name: "spool_messages_channel_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_spool_messages_channel_status
                ON spool_messages(channel, status);
        "#,
    },
];

/// Columns the record store requires on `spool_messages`.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "id",
    "channel",
    "recipient",
    "body",
    "message",
    "status",
    "send_date",
    "created_at",
    "updated_at",
];

/// Create the tracking table and apply pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        version = get_current_version(conn).await?,
        "Database migrations complete"
    );
    Ok(())
}

/// Check that `spool_messages` exists with every required column.
pub async fn verify_schema(conn: &Connection) -> Result<(), DatabaseError> {
    let mut rows = conn
        .query("PRAGMA table_info(spool_messages)", ())
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read table info: {e}")))?;

    let mut columns = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read table info row: {e}")))?
    {
        let name: String = row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("Failed to parse column name: {e}")))?;
        columns.push(name);
    }

    if columns.is_empty() {
        return Err(DatabaseError::Migration(
            "Table spool_messages does not exist".to_string(),
        ));
    }

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| !columns.iter().any(|c| c == required))
        .collect();
    if !missing.is_empty() {
        return Err(DatabaseError::Migration(format!(
            "Table spool_messages is missing columns: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_spool_table() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &["spool_messages", "_migrations"] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn verify_schema_after_migrations() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        verify_schema(&conn).await.unwrap();
    }

    #[tokio::test]
    async fn verify_schema_missing_table() {
        let conn = test_conn().await;
        let err = verify_schema(&conn).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn verify_schema_reports_missing_columns() {
        let conn = test_conn().await;
        conn.execute_batch(
            "CREATE TABLE spool_messages (
                id TEXT PRIMARY KEY,
                channel TEXT NOT NULL,
                recipient TEXT NOT NULL,
                body TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .await
        .unwrap();

        let err = verify_schema(&conn).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("message"), "{msg}");
        assert!(msg.contains("send_date"), "{msg}");
    }
}
