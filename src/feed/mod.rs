//! Feed retrieval: HTTP fetching, normalization and subscription files.
//!
//! - [`parser`] - converts RSS/Atom/JSON bytes into [`ParsedFeed`](crate::storage::ParsedFeed)
//! - [`fetcher`] - single fetches with moved-feed following, and the bounded
//!   concurrent pool used for batch operations
//! - [`opml`] - plain URL lists and OPML outlines for bulk subscribe, plus the
//!   plain-list export
//!
//! # Example
//!
//! ```ignore
//! use podsync::feed::{build_client, fetch_all, DEFAULT_TIMEOUT, DEFAULT_WORKERS};
//!
//! let client = build_client(DEFAULT_TIMEOUT)?;
//! let batch = fetch_all(&client, &urls, DEFAULT_WORKERS, None).await;
//! ```

mod fetcher;
mod opml;
mod parser;

pub use fetcher::{
    build_client, fetch_all, fetch_feed, FetchBatch, FetchError, DEFAULT_TIMEOUT, DEFAULT_WORKERS,
    USER_AGENT,
};
pub use opml::{
    export_to_file, parse_opml, parse_url_list, read_subscriptions, ImportFormat, OpmlError,
};
pub use parser::{new_feed_url, parse_feed, ParseFeedError};
