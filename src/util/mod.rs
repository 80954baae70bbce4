//! Utility functions shared by the storage layer and the command line.
//!
//! - **Text**: HTML tag stripping and whitespace normalization applied before
//!   titles and descriptions are stored, plus word wrapping for listings
//! - **Formatting**: relative dates, durations and `--since` parsing, all
//!   taking "today" as an explicit argument
//! - **URLs**: scheme validation for subscription URLs

mod feed_url;
mod format;
mod text;

pub use feed_url::{validate_feed_url, FeedUrlError};
pub use format::{format_seconds, parse_since, time_relative_to, SinceError};
pub use text::{normalise_text, wrap_lines};
