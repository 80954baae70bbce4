mod feeds;
mod items;
mod listing;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    DatabaseError, Episode, FeedQuery, FeedSort, FeedSummary, FeedUpdate, ItemQuery, ItemSort,
    ParsedFeed, ParsedItem, SortOrder, SyncSnapshot,
};
