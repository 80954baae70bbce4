use sqlx::QueryBuilder;

use super::feeds::like_pattern;
use super::schema::Database;
use super::types::{
    DatabaseError, Episode, EpisodeRow, FeedQuery, FeedSort, FeedSummary, FeedSummaryRow,
    ItemQuery, ItemSort,
};

impl Database {
    // ========================================================================
    // Listings
    // ========================================================================

    /// List feeds with item and unplayed counts.
    ///
    /// Ties are broken by title (case-insensitive, ascending) and then by
    /// newest feed first.
    pub async fn list_feeds(&self, query: &FeedQuery) -> Result<Vec<FeedSummary>, DatabaseError> {
        let order = query
            .order
            .unwrap_or_else(|| query.sort.default_order())
            .as_sql();

        // Outer join so feeds without items still show up with zero counts
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            r#"
                SELECT
                    f.id, f.title, f.author, f.description, f.url, f.created_at,
                    COUNT(i.rowid) AS item_count,
                    IFNULL(SUM(i.unplayed), 0) AS unplayed_count,
                    IFNULL(MAX(i.pubdate), 0) AS last_pubdate
                FROM feeds f
                LEFT JOIN items i ON i.feed_id = f.id
                WHERE 1 = 1
            "#,
        );

        if let Some(title) = query.title.as_deref().filter(|s| !s.is_empty()) {
            builder.push(r" AND f.title LIKE ");
            builder.push_bind(like_pattern(title));
            builder.push(r" ESCAPE '\'");
        }
        if let Some(author) = query.author.as_deref().filter(|s| !s.is_empty()) {
            builder.push(r" AND f.author LIKE ");
            builder.push_bind(like_pattern(author));
            builder.push(r" ESCAPE '\'");
        }

        builder.push(" GROUP BY f.id ORDER BY ");
        match query.sort {
            FeedSort::Title => {
                builder.push(format_args!("f.title COLLATE NOCASE {order}, f.id DESC"));
            }
            sort => {
                let column = match sort {
                    FeedSort::Pubdate => "last_pubdate",
                    FeedSort::Items => "item_count",
                    FeedSort::Unplayed => "unplayed_count",
                    FeedSort::Timestamp | FeedSort::Title => "f.created_at",
                };
                builder.push(format_args!(
                    "{column} {order}, f.title COLLATE NOCASE ASC, f.id DESC"
                ));
            }
        }

        builder.push(" LIMIT ");
        builder.push_bind(limit_value(query.limit));

        let rows: Vec<FeedSummaryRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(FeedSummaryRow::into_summary).collect())
    }

    /// List episodes across feeds.
    ///
    /// Ties are broken by publish date and then by insertion order, newest
    /// first.
    pub async fn list_items(&self, query: &ItemQuery) -> Result<Vec<Episode>, DatabaseError> {
        let order = query
            .order
            .unwrap_or_else(|| query.sort.default_order())
            .as_sql();

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            r#"
                SELECT
                    i.rowid AS id, i.feed_id, f.title AS feed_title,
                    i.title, i.description, i.url, i.duration, i.pubdate,
                    i.unplayed, i.created_at
                FROM items i
                INNER JOIN feeds f ON f.id = i.feed_id
                WHERE 1 = 1
            "#,
        );

        if query.unplayed_only {
            builder.push(" AND i.unplayed = 1");
        }
        if let Some(since) = query.since {
            builder.push(" AND i.pubdate >= ");
            builder.push_bind(since);
        }
        if let Some(title) = query.title.as_deref().filter(|s| !s.is_empty()) {
            builder.push(r" AND i.title LIKE ");
            builder.push_bind(like_pattern(title));
            builder.push(r" ESCAPE '\'");
        }
        if let Some(feed_id) = query.feed_id {
            builder.push(" AND i.feed_id = ");
            builder.push_bind(feed_id);
        }

        builder.push(" ORDER BY ");
        match query.sort {
            ItemSort::Pubdate => {
                builder.push(format_args!("i.pubdate {order}, i.rowid DESC"));
            }
            sort => {
                let column = match sort {
                    ItemSort::Title => "i.title COLLATE NOCASE",
                    ItemSort::Feed => "f.title COLLATE NOCASE",
                    ItemSort::Duration => "i.duration",
                    ItemSort::Timestamp | ItemSort::Pubdate => "i.created_at",
                };
                builder.push(format_args!(
                    "{column} {order}, i.pubdate DESC, i.rowid DESC"
                ));
            }
        }

        builder.push(" LIMIT ");
        builder.push_bind(limit_value(query.limit));

        let rows: Vec<EpisodeRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(EpisodeRow::into_episode).collect())
    }
}

/// SQLite treats a negative LIMIT as no limit.
fn limit_value(limit: Option<i64>) -> i64 {
    match limit {
        Some(n) if n > 0 => n,
        _ => -1,
    }
}
