//! Podcast subscription manager with incremental feed sync.
//!
//! Feeds are fetched over HTTP, normalized, and reconciled against the
//! episodes already stored in SQLite by GUID. Only new episodes are written,
//! so played state survives every sync.

pub mod config;
pub mod feed;
pub mod storage;
pub mod sync;
pub mod util;
