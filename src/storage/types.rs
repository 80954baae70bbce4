use std::collections::HashSet;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Schema creation failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A uniqueness constraint rejected the write (feed URL or item GUID)
    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    /// The feed does not exist
    #[error("Feed {0} not found")]
    NotFound(i64),

    /// An update was requested with no fields set
    #[error("No values to update")]
    NoValues,

    /// A write touched a different number of rows than it must
    #[error("Database inconsistency: {0}")]
    Inconsistent(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, separating uniqueness violations from the rest
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return DatabaseError::Duplicate(db_err.message().to_string());
            }
        }
        DatabaseError::Other(err)
    }
}

// ============================================================================
// Parsed Feed Data
// ============================================================================

/// A feed as produced by the normalizer, ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    /// "rss", "atom" or "json"
    pub feed_type: String,
    pub url: String,
    pub link: Option<String>,
    pub image: Option<String>,
    pub items: Vec<ParsedItem>,
}

/// A single episode as produced by the normalizer
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    pub title: String,
    pub description: Option<String>,
    /// Unix seconds; `None` when the feed gave no usable date
    pub pubdate: Option<i64>,
    pub url: String,
    pub filesize: i64,
    /// Whole seconds
    pub duration: i64,
    pub guid: String,
}

// ============================================================================
// Sync Support
// ============================================================================

/// The identity of one stored feed and the GUIDs it already holds.
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub guids: HashSet<String>,
}

/// Partial update of a feed's details. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub image: Option<String>,
    pub url: Option<String>,
}

impl FeedUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.description.is_none()
            && self.link.is_none()
            && self.image.is_none()
            && self.url.is_none()
    }

    /// Update that only moves the feed to a new URL
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

// ============================================================================
// Listing Views
// ============================================================================

/// Feed listing row with aggregate item counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSummary {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub url: String,
    pub item_count: i64,
    pub unplayed_count: i64,
    /// Most recent item pubdate, `None` when no item has a known date
    pub last_pubdate: Option<i64>,
    pub created_at: i64,
}

/// Internal row type for feed listings (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedSummaryRow {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub url: String,
    pub item_count: i64,
    pub unplayed_count: i64,
    pub last_pubdate: i64,
    pub created_at: i64,
}

impl FeedSummaryRow {
    pub(crate) fn into_summary(self) -> FeedSummary {
        FeedSummary {
            id: self.id,
            title: self.title,
            author: self.author,
            description: self.description,
            url: self.url,
            item_count: self.item_count,
            unplayed_count: self.unplayed_count,
            last_pubdate: pubdate_from_db(self.last_pubdate),
            created_at: self.created_at,
        }
    }
}

/// Episode listing row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub duration: i64,
    pub pubdate: Option<i64>,
    pub unplayed: bool,
    pub created_at: i64,
}

/// Internal row type for episode listings (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EpisodeRow {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub duration: i64,
    pub pubdate: i64,
    pub unplayed: bool,
    pub created_at: i64,
}

impl EpisodeRow {
    pub(crate) fn into_episode(self) -> Episode {
        Episode {
            id: self.id,
            feed_id: self.feed_id,
            feed_title: self.feed_title,
            title: self.title,
            description: self.description,
            url: self.url,
            duration: self.duration,
            pubdate: pubdate_from_db(self.pubdate),
            unplayed: self.unplayed,
            created_at: self.created_at,
        }
    }
}

/// Unknown publish dates are stored as 0.
pub(crate) fn pubdate_to_db(pubdate: Option<i64>) -> i64 {
    pubdate.unwrap_or(0)
}

pub(crate) fn pubdate_from_db(pubdate: i64) -> Option<i64> {
    (pubdate != 0).then_some(pubdate)
}

// ============================================================================
// Listing Queries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FeedSort {
    /// Most recent episode
    Pubdate,
    #[default]
    Title,
    /// Number of episodes
    Items,
    /// Number of unplayed episodes
    Unplayed,
    /// Subscription time
    Timestamp,
}

impl FeedSort {
    pub(crate) fn default_order(self) -> SortOrder {
        match self {
            FeedSort::Title => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ItemSort {
    #[default]
    Pubdate,
    Title,
    /// Feed title
    Feed,
    Duration,
    /// Time the episode was first stored
    Timestamp,
}

impl ItemSort {
    pub(crate) fn default_order(self) -> SortOrder {
        match self {
            ItemSort::Title | ItemSort::Feed => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

/// Filters and ordering for [`Database::list_feeds`](super::Database::list_feeds)
#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    /// Case-insensitive substring of the feed title
    pub title: Option<String>,
    /// Case-insensitive substring of the feed author
    pub author: Option<String>,
    pub sort: FeedSort,
    /// `None` picks the sort's natural direction
    pub order: Option<SortOrder>,
    pub limit: Option<i64>,
}

/// Filters and ordering for [`Database::list_items`](super::Database::list_items)
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    /// Case-insensitive substring of the episode title
    pub title: Option<String>,
    pub feed_id: Option<i64>,
    pub unplayed_only: bool,
    /// Only episodes published at or after this unix time
    pub since: Option<i64>,
    pub sort: ItemSort,
    pub order: Option<SortOrder>,
    pub limit: Option<i64>,
}
