use sqlx::{QueryBuilder, SqliteConnection};

use super::schema::Database;
use super::types::{pubdate_to_db, DatabaseError, ParsedItem};
use crate::util::normalise_text;

/// 10 columns * 50 rows stays well under SQLite's bind parameter limit.
const BATCH_SIZE: usize = 50;

/// Insert items for one feed on an open transaction, in the given order.
///
/// Plain INSERT: a GUID already stored for this feed (or repeated within
/// `items`) fails the statement with `DatabaseError::Duplicate`.
pub(crate) async fn insert_items(
    conn: &mut SqliteConnection,
    feed_id: i64,
    items: &[&ParsedItem],
    unplayed: bool,
    created_at: i64,
) -> Result<(), DatabaseError> {
    for chunk in items.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT INTO items (feed_id, unplayed, title, description, pubdate, url, filesize, duration, guid, created_at) ",
        );

        builder.push_values(chunk, |mut b, item| {
            b.push_bind(feed_id)
                .push_bind(unplayed)
                .push_bind(normalise_text(&item.title))
                .push_bind(item.description.as_deref().map(normalise_text))
                .push_bind(pubdate_to_db(item.pubdate))
                .push_bind(&item.url)
                .push_bind(item.filesize)
                .push_bind(item.duration)
                .push_bind(&item.guid)
                .push_bind(created_at);
        });

        builder
            .build()
            .execute(&mut *conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;
    }

    Ok(())
}

impl Database {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// Store items discovered by a sync as unplayed, in one transaction.
    ///
    /// Returns the number of items written.
    pub async fn insert_new_items(
        &self,
        feed_id: i64,
        items: &[&ParsedItem],
        created_at: i64,
    ) -> Result<usize, DatabaseError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        insert_items(&mut *tx, feed_id, items, true, created_at).await?;
        tx.commit().await?;

        Ok(items.len())
    }

    /// Mark every item with one of these download URLs as played or unplayed.
    ///
    /// Returns the number of rows changed. Unknown URLs are ignored.
    pub async fn set_played(&self, played: bool, urls: &[String]) -> Result<u64, DatabaseError> {
        if urls.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE items SET unplayed = ");
        builder.push_bind(!played);
        builder.push(" WHERE url IN (");

        let mut separated = builder.separated(", ");
        for url in urls {
            separated.push_bind(url);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
