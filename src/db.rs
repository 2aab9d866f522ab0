use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crate::error::Result;

/// Open read transaction
pub type Tx<'a> = Transaction<'a, Sqlite>;

/// A ledger transaction started with `BEGIN IMMEDIATE`.
///
/// The write lock is taken up front, so a concurrent writer waits out the
/// busy timeout instead of failing when it upgrades from a read. Dropping it
/// without [`WriteTx::commit`] rolls back when the connection is returned to
/// the pool.
pub struct WriteTx {
    conn: PoolConnection<Sqlite>,
}

impl WriteTx {
    pub async fn commit(mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        Ok(())
    }
}

impl Deref for WriteTx {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        &self.conn
    }
}

impl DerefMut for WriteTx {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }
}

/// Pool hook run on every released connection. Ends a transaction left open
/// by a dropped [`WriteTx`]; SQLite answers "no transaction is active"
/// otherwise.
async fn reset_connection(conn: &mut SqliteConnection) -> std::result::Result<bool, sqlx::Error> {
    match sqlx::query("ROLLBACK").execute(&mut *conn).await {
        Ok(_) => {
            tracing::warn!("Rolled back a write transaction that was never finished");
            Ok(true)
        }
        Err(sqlx::Error::Database(e)) if e.message().contains("no transaction is active") => Ok(true),
        Err(e) => {
            tracing::warn!("Closing ledger connection that failed to reset: {}", e);
            Ok(false)
        }
    }
}

/// How long a writer waits for the SQLite write lock
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str, max_connections: u32) -> Result<Self> {
        Self::with_busy_timeout(path, max_connections, DEFAULT_BUSY_TIMEOUT).await
    }

    /// File-backed ledger in WAL mode. Writers queue on the SQLite write lock
    /// for up to `busy_timeout` before giving up.
    pub async fn with_busy_timeout(
        path: &str,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .after_release(|conn, _meta| Box::pin(reset_connection(conn)))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory ledger. A single connection is kept alive for the
    /// lifetime of the pool since the database vanishes with it.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .after_release(|conn, _meta| Box::pin(reset_connection(conn)))
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Deferred transaction for consistent multi-statement reads
    pub async fn begin(&self) -> Result<Tx<'static>> {
        Ok(self.pool.begin().await?)
    }

    /// Transaction holding the ledger write lock from its first statement
    pub async fn begin_write(&self) -> Result<WriteTx> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(WriteTx { conn })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                storage_quota INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_blobs (
                content_id TEXT PRIMARY KEY,
                hash TEXT UNIQUE NOT NULL,
                size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                reference_count INTEGER NOT NULL CHECK (reference_count >= 0),
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // content_id carries no foreign key: soft-deleted rows keep pointing
        // at content that has since been reclaimed.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                file_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                content_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shares (
                share_id TEXT PRIMARY KEY,
                file_id TEXT UNIQUE NOT NULL,
                is_public INTEGER NOT NULL,
                share_token TEXT UNIQUE NOT NULL,
                download_count INTEGER NOT NULL DEFAULT 0 CHECK (download_count >= 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (file_id) REFERENCES files(file_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_owner_id ON files(owner_id, is_deleted)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_content_id ON files(content_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_files_live_name ON files(owner_id, display_name) WHERE is_deleted = 0",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}

/// Current time in the ledger's timestamp format
pub fn now() -> String {
    format_timestamp(Utc::now())
}

/// Fixed-width RFC 3339 so that string order matches time order
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// True when `err` is a UNIQUE violation on `columns` (e.g. `shares.share_token`)
pub fn is_unique_violation(err: &sqlx::Error, columns: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .message()
            .contains(&format!("UNIQUE constraint failed: {}", columns)),
        _ => false,
    }
}

#[cfg(test)]
pub(crate) async fn test_database() -> Database {
    let db = Database::in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    db
}
