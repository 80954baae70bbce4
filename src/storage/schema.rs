use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqliteConnection, SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and create the schema if missing.
    ///
    /// `":memory:"` opens a private in-memory database shared by every
    /// connection of the pool.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Migration` if the schema cannot be created and
    /// `DatabaseError::Other` for connection failures.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Every pooled connection inherits these settings.
        let options = SqliteConnectOptions::from_str(&url)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // SQLite is single-writer; reads come from listings and snapshots.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Create tables and indexes atomically. Re-running is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        create_schema(&mut *tx).await?;
        tx.commit().await
    }

    /// Drop every table and recreate an empty schema.
    ///
    /// Feed ids start from 1 again afterwards.
    pub async fn reset(&self) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DROP TABLE IF EXISTS items")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS feeds")
            .execute(&mut *tx)
            .await?;

        create_schema(&mut *tx)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        tx.commit().await?;
        tracing::info!("Database reset");
        Ok(())
    }

    pub async fn count_feeds(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_items(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn create_schema(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    // AUTOINCREMENT keeps ids of deleted feeds from being handed out again
    sqlx::query(
        r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                description TEXT,
                feed_type TEXT NOT NULL,
                url TEXT NOT NULL,
                image TEXT,
                link TEXT,
                created_at INTEGER NOT NULL
            )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_feeds_url ON feeds(url)")
        .execute(&mut *conn)
        .await?;

    // pubdate 0 means unknown
    sqlx::query(
        r#"
            CREATE TABLE IF NOT EXISTS items (
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                title TEXT NOT NULL,
                description TEXT,
                pubdate INTEGER NOT NULL DEFAULT 0,
                url TEXT NOT NULL,
                filesize INTEGER DEFAULT 0,
                duration INTEGER DEFAULT 0,
                guid TEXT NOT NULL,
                unplayed INTEGER DEFAULT 0,
                created_at INTEGER NOT NULL
            )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_items_feed_guid ON items(feed_id, guid)")
        .execute(&mut *conn)
        .await?;

    // Played toggling matches on download URL
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_url ON items(url)")
        .execute(&mut *conn)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_pubdate ON items(pubdate DESC)")
        .execute(&mut *conn)
        .await?;

    Ok(())
}
