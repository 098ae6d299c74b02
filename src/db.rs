//! Database connection pool and schema management.
//!
//! This module provides utilities for:
//! - Creating and managing a SQLite connection pool
//! - Creating the schema and upgrading older deployments in place

use std::str::FromStr;

use sqlx::{
    Pool, Row, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Create a new SQLite connection pool.
///
/// The database file is created if it does not exist yet. The pool is shared
/// by every request handler and by the expiry tasks. WAL mode lets readers
/// proceed while a redemption holds the write lock.
///
/// # Errors
///
/// Returns an error if the connection string is invalid or the file cannot be opened.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        // Limit concurrent connections
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Ensure the schema exists and is current.
///
/// Safe to call on every startup:
/// 1. Create `keys` if missing (original three-column layout)
/// 2. Add `duration_minutes` (default 0) when an older table lacks it
/// 3. Create `grants` for persisted expiries
///
/// Existing rows are never rewritten.
///
/// # Errors
///
/// Returns an error if any DDL statement fails.
pub async fn initialize(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keys (
            code TEXT PRIMARY KEY,
            state INTEGER NOT NULL DEFAULT 0,
            redeemed_by TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    if !has_column(pool, "keys", "duration_minutes").await? {
        tracing::info!("Adding duration_minutes column to keys table");
        sqlx::query("ALTER TABLE keys ADD COLUMN duration_minutes INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS grants (
            code TEXT PRIMARY KEY REFERENCES keys(code),
            user_id TEXT NOT NULL,
            guild_id TEXT NOT NULL,
            role_id TEXT NOT NULL,
            granted_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            revoked INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS grants_pending ON grants (revoked, expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn has_column(pool: &DbPool, table: &str, column: &str) -> Result<bool, sqlx::Error> {
    // PRAGMA arguments cannot be bound, table names here are constants
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;

    for row in rows {
        let name: String = row.try_get("name")?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}


#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::{test_db::TestDb, *};

    #[tokio::test]
    async fn initialize_is_idempotent() -> TestResult {
        let db = TestDb::empty().await?;

        initialize(&db.pool).await?;
        initialize(&db.pool).await?;

        assert!(has_column(&db.pool, "keys", "duration_minutes").await?);
        assert!(has_column(&db.pool, "grants", "expires_at").await?);

        Ok(())
    }

    #[tokio::test]
    async fn legacy_table_gains_duration_without_touching_rows() -> TestResult {
        let db = TestDb::empty().await?;

        sqlx::query("CREATE TABLE keys (code TEXT PRIMARY KEY, state INTEGER, redeemed_by TEXT)")
            .execute(&db.pool)
            .await?;
        sqlx::query("INSERT INTO keys VALUES ('legacyUnused00001', 0, NULL), ('legacyUsed0000001', 1, '99')")
            .execute(&db.pool)
            .await?;

        initialize(&db.pool).await?;

        let rows: Vec<(String, i64, Option<String>, i64)> = sqlx::query_as(
            "SELECT code, state, redeemed_by, duration_minutes FROM keys ORDER BY code",
        )
        .fetch_all(&db.pool)
        .await?;

        assert_eq!(
            rows,
            vec![
                ("legacyUnused00001".to_string(), 0, None, 0),
                ("legacyUsed0000001".to_string(), 1, Some("99".to_string()), 0),
            ]
        );

        Ok(())
    }
}
