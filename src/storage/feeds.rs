use sqlx::QueryBuilder;
use std::collections::{HashMap, HashSet};

use super::items::insert_items;
use super::schema::Database;
use super::types::{DatabaseError, FeedUpdate, ParsedFeed, ParsedItem, SyncSnapshot};
use crate::util::normalise_text;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Store a newly subscribed feed together with its whole back catalogue.
    ///
    /// The feed row and every item are written in one transaction. Initial
    /// items are stored as played. Returns the new feed id.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Duplicate` if the URL is already subscribed or
    /// two items share a GUID; nothing is written in either case.
    pub async fn insert_feed(&self, feed: &ParsedFeed, created_at: i64) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
                INSERT INTO feeds (title, author, description, feed_type, url, image, link, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(normalise_text(&feed.title))
        .bind(&feed.author)
        .bind(feed.description.as_deref().map(normalise_text))
        .bind(&feed.feed_type)
        .bind(&feed.url)
        .bind(&feed.image)
        .bind(&feed.link)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let feed_id = result.last_insert_rowid();

        let items: Vec<&ParsedItem> = feed.items.iter().collect();
        insert_items(&mut *tx, feed_id, &items, false, created_at).await?;

        tx.commit().await?;

        tracing::debug!(feed_id, url = %feed.url, items = items.len(), "Feed stored");
        Ok(feed_id)
    }

    /// Delete a feed and all of its items. Returns the number of items removed.
    ///
    /// Items go first so the foreign key never dangles.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let items = sqlx::query("DELETE FROM items WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let feeds = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        // Dropping tx without commit rolls back
        if feeds == 0 {
            return Err(DatabaseError::NotFound(feed_id));
        }

        tx.commit().await?;
        Ok(items)
    }

    /// Apply a partial update to one feed.
    ///
    /// Title and description are normalized the same way as on insert.
    ///
    /// # Errors
    ///
    /// - `NoValues` if no field is set
    /// - `NotFound` if no feed has this id
    /// - `Inconsistent` if more than one row would change (rolled back)
    /// - `Duplicate` if a new URL collides with another feed
    pub async fn update_feed(&self, feed_id: i64, update: &FeedUpdate) -> Result<(), DatabaseError> {
        if update.is_empty() {
            return Err(DatabaseError::NoValues);
        }

        let title = update.title.as_deref().map(normalise_text);
        let description = update.description.as_deref().map(normalise_text);

        let fields: [(&str, Option<&str>); 6] = [
            ("title", title.as_deref()),
            ("author", update.author.as_deref()),
            ("description", description.as_deref()),
            ("link", update.link.as_deref()),
            ("image", update.image.as_deref()),
            ("url", update.url.as_deref()),
        ];

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE feeds SET ");
        let mut separated = builder.separated(", ");
        for (column, value) in fields {
            if let Some(value) = value {
                separated.push(column);
                separated.push_unseparated(" = ");
                separated.push_bind_unseparated(value);
            }
        }
        builder.push(" WHERE id = ");
        builder.push_bind(feed_id);

        let mut tx = self.pool.begin().await?;
        let affected = builder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .rows_affected();

        match affected {
            0 => Err(DatabaseError::NotFound(feed_id)),
            1 => {
                tx.commit().await?;
                Ok(())
            }
            n => Err(DatabaseError::Inconsistent(format!(
                "update of feed {feed_id} touched {n} rows"
            ))),
        }
    }

    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// Feeds whose title contains `fragment`, case-insensitively, by title.
    pub async fn find_feeds(&self, fragment: &str) -> Result<Vec<(i64, String)>, DatabaseError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r"SELECT id, title FROM feeds WHERE title LIKE ? ESCAPE '\' ORDER BY title COLLATE NOCASE, id",
        )
        .bind(like_pattern(fragment))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Every subscribed URL, sorted case-insensitively.
    pub async fn feed_urls(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM feeds ORDER BY url COLLATE NOCASE")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// Load the id, title, URL and known GUIDs of one feed, or of all feeds.
    ///
    /// Snapshots come back in id order. An unknown id yields an empty list.
    pub async fn load_sync_snapshots(
        &self,
        feed_id: Option<i64>,
    ) -> Result<Vec<SyncSnapshot>, DatabaseError> {
        // Read both tables in one transaction so the GUID sets match the feeds
        let mut tx = self.pool.begin().await?;

        let feeds: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, title, url FROM feeds WHERE ?1 IS NULL OR id = ?1 ORDER BY id",
        )
        .bind(feed_id)
        .fetch_all(&mut *tx)
        .await?;

        let guid_rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT feed_id, guid FROM items WHERE ?1 IS NULL OR feed_id = ?1",
        )
        .bind(feed_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut guids: HashMap<i64, HashSet<String>> = HashMap::new();
        for (id, guid) in guid_rows {
            guids.entry(id).or_default().insert(guid);
        }

        Ok(feeds
            .into_iter()
            .map(|(id, title, url)| SyncSnapshot {
                id,
                title,
                url,
                guids: guids.remove(&id).unwrap_or_default(),
            })
            .collect())
    }
}

/// Build a `LIKE` pattern matching `s` anywhere, with wildcards escaped.
pub(crate) fn like_pattern(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_item(guid: &str) -> ParsedItem {
        ParsedItem {
            title: format!("Episode {}", guid),
            description: Some("<p>Show notes</p>".to_string()),
            pubdate: Some(1704067200),
            url: format!("https://cdn.example.com/{}.mp3", guid),
            filesize: 1024,
            duration: 1800,
            guid: guid.to_string(),
        }
    }

    fn test_feed(n: i64, guids: &[&str]) -> ParsedFeed {
        ParsedFeed {
            title: format!("Test Podcast {}", n),
            author: "Test Author".to_string(),
            description: Some("About&nbsp;the   show".to_string()),
            feed_type: "rss".to_string(),
            url: format!("https://feed{}.example.com/rss", n),
            link: Some(format!("https://feed{}.example.com", n)),
            image: None,
            items: guids.iter().map(|g| test_item(g)).collect(),
        }
    }

    #[tokio::test]
    async fn test_insert_feed_stores_items_played() {
        let db = test_db().await;
        let id = db.insert_feed(&test_feed(1, &["a", "b", "c"]), 100).await.unwrap();

        assert_eq!(db.count_feeds().await.unwrap(), 1);
        assert_eq!(db.count_items().await.unwrap(), 3);

        let (unplayed,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE unplayed = 1")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(unplayed, 0);

        let (description,): (Option<String>,) =
            sqlx::query_as("SELECT description FROM feeds WHERE id = ?")
                .bind(id)
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(description.as_deref(), Some("About the show"));
    }

    #[tokio::test]
    async fn test_insert_feed_duplicate_url_fails() {
        let db = test_db().await;
        db.insert_feed(&test_feed(1, &["a"]), 100).await.unwrap();

        let err = db.insert_feed(&test_feed(1, &["x", "y"]), 200).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate(_)));
        assert_eq!(db.count_feeds().await.unwrap(), 1);
        assert_eq!(db.count_items().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_feed_duplicate_guid_rolls_back() {
        let db = test_db().await;
        let err = db.insert_feed(&test_feed(1, &["a", "b", "a"]), 100).await.unwrap_err();

        assert!(matches!(err, DatabaseError::Duplicate(_)));
        assert_eq!(db.count_feeds().await.unwrap(), 0);
        assert_eq!(db.count_items().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_feed_without_items() {
        let db = test_db().await;
        db.insert_feed(&test_feed(1, &[]), 100).await.unwrap();
        assert_eq!(db.count_feeds().await.unwrap(), 1);
        assert_eq!(db.count_items().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_feed_returns_item_count() {
        let db = test_db().await;
        let keep = db.insert_feed(&test_feed(1, &["a", "b"]), 100).await.unwrap();
        let gone = db.insert_feed(&test_feed(2, &["c", "d", "e"]), 100).await.unwrap();

        assert_eq!(db.delete_feed(gone).await.unwrap(), 3);
        assert_eq!(db.count_feeds().await.unwrap(), 1);
        assert_eq!(db.count_items().await.unwrap(), 2);

        let snapshots = db.load_sync_snapshots(None).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].id, keep);
    }

    #[tokio::test]
    async fn test_delete_missing_feed() {
        let db = test_db().await;
        let err = db.delete_feed(99).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(99)));
    }

    #[tokio::test]
    async fn test_feed_ids_not_reused() {
        let db = test_db().await;
        let first = db.insert_feed(&test_feed(1, &[]), 100).await.unwrap();
        let second = db.insert_feed(&test_feed(2, &[]), 100).await.unwrap();
        db.delete_feed(second).await.unwrap();

        let third = db.insert_feed(&test_feed(3, &[]), 100).await.unwrap();
        assert!(third > second);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_update_feed_fields() {
        let db = test_db().await;
        let id = db.insert_feed(&test_feed(1, &[]), 100).await.unwrap();

        let update = FeedUpdate {
            title: Some("  <b>Renamed</b>  Show ".to_string()),
            author: Some("New Author".to_string()),
            ..FeedUpdate::default()
        };
        db.update_feed(id, &update).await.unwrap();

        let (title, author, url): (String, String, String) =
            sqlx::query_as("SELECT title, author, url FROM feeds WHERE id = ?")
                .bind(id)
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(title, "Renamed Show");
        assert_eq!(author, "New Author");
        assert_eq!(url, "https://feed1.example.com/rss");
    }

    #[tokio::test]
    async fn test_update_feed_url() {
        let db = test_db().await;
        let id = db.insert_feed(&test_feed(1, &["a"]), 100).await.unwrap();

        db.update_feed(id, &FeedUpdate::url("https://moved.example.com/rss"))
            .await
            .unwrap();

        let snapshots = db.load_sync_snapshots(Some(id)).await.unwrap();
        assert_eq!(snapshots[0].url, "https://moved.example.com/rss");
    }

    #[tokio::test]
    async fn test_update_feed_errors() {
        let db = test_db().await;
        let id = db.insert_feed(&test_feed(1, &[]), 100).await.unwrap();
        db.insert_feed(&test_feed(2, &[]), 100).await.unwrap();

        let err = db.update_feed(id, &FeedUpdate::default()).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NoValues));

        let err = db.update_feed(42, &FeedUpdate::url("https://x.example.com")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(42)));

        let err = db
            .update_feed(id, &FeedUpdate::url("https://feed2.example.com/rss"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_find_feeds_substring_case_insensitive() {
        let db = test_db().await;
        let mut feed = test_feed(1, &[]);
        feed.title = "The Daily Show".to_string();
        db.insert_feed(&feed, 100).await.unwrap();
        let mut feed = test_feed(2, &[]);
        feed.title = "Daily Tech".to_string();
        db.insert_feed(&feed, 100).await.unwrap();
        let mut feed = test_feed(3, &[]);
        feed.title = "100% Sport".to_string();
        db.insert_feed(&feed, 100).await.unwrap();

        let found = db.find_feeds("DAILY").await.unwrap();
        let titles: Vec<&str> = found.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(titles, vec!["Daily Tech", "The Daily Show"]);

        let found = db.find_feeds("0%").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(db.find_feeds("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_feed_urls_sorted() {
        let db = test_db().await;
        db.insert_feed(&test_feed(2, &[]), 100).await.unwrap();
        db.insert_feed(&test_feed(1, &[]), 100).await.unwrap();

        let urls = db.feed_urls().await.unwrap();
        assert_eq!(
            urls,
            vec![
                "https://feed1.example.com/rss".to_string(),
                "https://feed2.example.com/rss".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_load_sync_snapshots() {
        let db = test_db().await;
        let a = db.insert_feed(&test_feed(1, &["a1", "a2"]), 100).await.unwrap();
        let b = db.insert_feed(&test_feed(2, &[]), 100).await.unwrap();

        let all = db.load_sync_snapshots(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, a);
        assert_eq!(all[0].title, "Test Podcast 1");
        assert_eq!(
            all[0].guids,
            ["a1", "a2"].iter().map(|s| s.to_string()).collect::<HashSet<_>>()
        );
        assert_eq!(all[1].id, b);
        assert!(all[1].guids.is_empty());

        let one = db.load_sync_snapshots(Some(b)).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id, b);

        assert!(db.load_sync_snapshots(Some(999)).await.unwrap().is_empty());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("abc"), "%abc%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
