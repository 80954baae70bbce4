use futures::stream::{self, StreamExt};
use reqwest::redirect::Policy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::feed::parser::{self, ParseFeedError};
use crate::storage::ParsedFeed;
use crate::util::validate_feed_url;

pub const USER_AGENT: &str = concat!("podsync/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WORKERS: usize = 10;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 10;
/// Longest chain of `<itunes:new-feed-url>` moves followed for one fetch.
const MAX_MOVES: usize = 10;

/// Errors that can occur while fetching a single feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, redirect loop, etc.)
    #[error("fetch error: {0}")]
    Request(#[source] reqwest::Error),
    /// Request exceeded the client timeout
    #[error("fetch error: request timed out")]
    Timeout,
    /// Any status other than 200 OK, e.g. "404 Not Found"
    #[error("bad status: {0}")]
    BadStatus(String),
    /// Response body exceeded the 10MB size limit
    #[error("response too large")]
    ResponseTooLarge,
    /// Body could not be read as RSS, Atom or JSON Feed
    #[error("parse error: {0}")]
    Parse(#[from] ParseFeedError),
    /// Parsed, but unusable as a subscription
    #[error("bad feed: no title")]
    BadFeed,
    /// The feed kept announcing new locations
    #[error("feed moved more than {0} times")]
    TooManyMoves(usize),
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Request(err)
        }
    }
}

/// Outcome of fetching many feeds, keyed by the URL that was requested.
///
/// Every requested URL lands in exactly one of the two maps.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub feeds: HashMap<String, ParsedFeed>,
    pub errors: HashMap<String, FetchError>,
}

impl FetchBatch {
    /// Remove and return the outcome recorded for `url`.
    pub fn take(&mut self, url: &str) -> Option<Result<ParsedFeed, FetchError>> {
        if let Some(feed) = self.feeds.remove(url) {
            return Some(Ok(feed));
        }
        self.errors.remove(url).map(Err)
    }
}

/// Build the shared HTTP client used for every feed request.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(redirect_policy())
        .timeout(timeout)
        .build()
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("too many redirects (max {MAX_REDIRECTS})"));
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len(),
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Fetch and normalize one feed.
///
/// HTTP redirects are followed by the client. A document announcing a new
/// location through `<itunes:new-feed-url>` is fetched again from there, up
/// to a fixed number of moves. The returned feed's `url` is the address the
/// final response came from.
///
/// # Errors
///
/// - [`FetchError::Request`] / [`FetchError::Timeout`] - transport failures
/// - [`FetchError::BadStatus`] - any status other than 200
/// - [`FetchError::ResponseTooLarge`] - body over 10MB
/// - [`FetchError::Parse`] - unreadable feed document
/// - [`FetchError::BadFeed`] - the feed has no title
/// - [`FetchError::TooManyMoves`] - moved-feed chain too long or cyclic
pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> Result<ParsedFeed, FetchError> {
    let mut current = url.to_string();

    for _ in 0..=MAX_MOVES {
        let (bytes, final_url) = fetch_bytes(client, &current).await?;
        let mut feed = parser::parse_feed(&bytes)?;

        // Compared in canonical form: a feed naming its own address as
        // `http://host` is served from `http://host/`.
        if let Some(moved) = parser::new_feed_url(&bytes) {
            match validate_feed_url(&moved) {
                Ok(next) if is_same_location(&next, &current, &final_url) => {}
                Ok(next) => {
                    tracing::info!(from = %current, to = %next, "Feed has moved");
                    current = next;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(feed = %current, new_url = %moved, error = %e, "Ignoring invalid new-feed-url");
                }
            }
        }

        if feed.title.trim().is_empty() {
            return Err(FetchError::BadFeed);
        }

        feed.url = if final_url.is_empty() {
            current
        } else {
            final_url
        };
        return Ok(feed);
    }

    Err(FetchError::TooManyMoves(MAX_MOVES))
}

/// Whether a canonical new-feed-url names the address just fetched, either
/// as requested or as served after redirects.
fn is_same_location(next: &str, requested: &str, served: &str) -> bool {
    next == served
        || next == requested
        || validate_feed_url(requested).is_ok_and(|canonical| canonical == next)
}

/// GET one URL, returning the body and the URL the response came from.
async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<(Vec<u8>, String), FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(FetchError::from_reqwest)?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(FetchError::BadStatus(response.status().to_string()));
    }

    let final_url = response.url().to_string();
    let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
    Ok((bytes, final_url))
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::from_reqwest)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// Fetch many feeds concurrently.
///
/// At most `max_workers` requests are in flight at once (values below 1
/// count as 1). One failure never affects another fetch, and the call
/// returns only after every URL has been attempted. Each completion is
/// reported on `progress` as `(done, total)` if a channel is given.
pub async fn fetch_all(
    client: &reqwest::Client,
    urls: &[String],
    max_workers: usize,
    progress: Option<mpsc::Sender<(usize, usize)>>,
) -> FetchBatch {
    let total = urls.len();
    let completed = Arc::new(AtomicUsize::new(0));

    let outcomes: Vec<(String, Result<ParsedFeed, FetchError>)> = stream::iter(urls.iter().cloned())
        .map(|url| {
            let progress = progress.clone();
            let completed = completed.clone();

            async move {
                let result = fetch_feed(client, &url).await;
                if let Err(e) = &result {
                    tracing::debug!(feed = %url, error = %e, "Fetch failed");
                }

                let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                if let Some(tx) = progress {
                    if tx.send((done, total)).await.is_err() {
                        tracing::debug!(done, total, "Progress receiver dropped");
                    }
                }

                (url, result)
            }
        })
        .buffer_unordered(max_workers.max(1))
        .collect()
        .await;

    let mut batch = FetchBatch::default();
    for (url, result) in outcomes {
        match result {
            Ok(feed) => {
                batch.feeds.insert(url, feed);
            }
            Err(e) => {
                batch.errors.insert(url, e);
            }
        }
    }

    tracing::debug!(
        fetched = batch.feeds.len(),
        failed = batch.errors.len(),
        "Fetch batch complete"
    );
    batch
}
