use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed feed/entry store.
///
/// Cloning is cheap (pool + channel handle). Every mutation bumps a
/// generation counter on a watch channel; [`Database::subscribe`] hands out
/// receivers so the drawer can requery on change instead of polling.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) changes: watch::Sender<u64>,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another instance of vane
    /// has the database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to
        // release before returning SQLITE_BUSY. foreign_keys is per
        // connection; group deletion relies on the cascade, so every pooled
        // connection must have it on.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);
        // Every connection to ":memory:" opens a fresh database, so the
        // in-memory case (tests) must stay on a single pooled connection.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let (changes, _) = watch::channel(0);
        let db = Self { pool, changes };
        db.migrate().await.map_err(|e| {
            // Migration errors could also be lock-related
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All migrations use `IF NOT EXISTS` for idempotency, so re-running on
    /// an existing database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Feeds double as group markers: a group has an empty link, the
        // is_group flag, and children pointing at it through group_id.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                link TEXT NOT NULL DEFAULT '',
                group_id INTEGER REFERENCES feeds(id) ON DELETE CASCADE,
                is_group INTEGER NOT NULL DEFAULT 0,
                retrieve_full_text INTEGER NOT NULL DEFAULT 0,
                fetch_error INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL DEFAULT '',
                read INTEGER NOT NULL DEFAULT 0,
                UNIQUE(feed_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_group ON feeds(group_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_feed ON entries(feed_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_read ON entries(read)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Change Notification
    // ========================================================================

    /// Subscribe to mutation notifications. The value is a generation
    /// counter; observers requery whatever they care about when it moves.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Bump the generation counter. Called after every committed mutation.
    pub(crate) fn mark_changed(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }
}
