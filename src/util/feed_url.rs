use thiserror::Error;
use url::Url;

/// Errors produced when a subscription URL is rejected before fetching.
#[derive(Error, Debug)]
pub enum FeedUrlError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Validates a feed URL and returns its canonical string form.
///
/// Only `http` and `https` URLs with a host are accepted. Private and
/// loopback addresses are allowed: self-hosted podcast servers on a home
/// network are a normal subscription target.
///
/// # Examples
///
/// ```
/// use podsync::util::validate_feed_url;
///
/// let url = validate_feed_url("  https://example.com/feed.xml ").unwrap();
/// assert_eq!(url, "https://example.com/feed.xml");
///
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<String, FeedUrlError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(FeedUrlError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(FeedUrlError::MissingHost(url_str.to_owned()));
    }

    Ok(url.into())
}
