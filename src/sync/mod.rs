//! Subscribe, sync and remove feeds.
//!
//! Every operation fetches first and writes afterwards: nothing is stored
//! for a feed until its fetch has fully succeeded, and each write runs in
//! its own transaction. Batch operations keep going when one feed fails and
//! report one [`SyncResult`] per feed.

mod diff;

pub use diff::new_items;

use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::feed::{fetch_all, fetch_feed, FetchError};
use crate::storage::{Database, DatabaseError, FeedUpdate, ParsedFeed, SyncSnapshot};
use crate::util::normalise_text;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("no feed found")]
    NoFeedFound,

    /// Several titles match and none matches exactly
    #[error("several feeds match: {}", .0.join(", "))]
    Ambiguous(Vec<String>),

    #[error("could not retrieve feed")]
    Inconsistent,

    #[error("no feeds to sync")]
    NoFeeds,
}

/// Outcome of a successful single-feed subscribe or sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synced {
    pub id: i64,
    pub url: String,
    pub title: String,
    /// Items stored by this operation
    pub items: usize,
}

/// Outcome for one feed of a batch operation.
#[derive(Debug)]
pub struct SyncResult {
    /// Stored feed id; `None` when a subscribe failed
    pub id: Option<i64>,
    /// Where the feed was stored from after redirects and moves; the
    /// requested URL when the feed could not be stored
    pub url: String,
    /// Feed title, when one is known
    pub title: Option<String>,
    /// Number of items stored
    pub result: Result<usize, SyncError>,
}

impl SyncResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Title for display, falling back to the URL.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Subscribe to one feed.
///
/// The whole back catalogue is stored as played. Nothing is written unless
/// the fetch succeeds.
///
/// # Errors
///
/// - [`SyncError::Fetch`] - the feed could not be fetched or is unusable
/// - [`SyncError::Database`] - e.g. [`DatabaseError::Duplicate`] when the
///   final URL is already subscribed
pub async fn subscribe(
    db: &Database,
    client: &reqwest::Client,
    url: &str,
) -> Result<Synced, SyncError> {
    let feed = fetch_feed(client, url).await?;
    let id = db.insert_feed(&feed, now()).await?;

    tracing::info!(feed_id = id, url = %feed.url, items = feed.items.len(), "Subscribed");
    Ok(Synced {
        id,
        title: normalise_text(&feed.title),
        items: feed.items.len(),
        url: feed.url,
    })
}

/// Subscribe to many feeds, fetching them concurrently.
///
/// Repeated URLs are subscribed once. The result holds exactly one entry
/// per distinct input URL, in input order. A stored feed reports its final
/// URL, as [`subscribe`] does.
pub async fn subscribe_many(
    db: &Database,
    client: &reqwest::Client,
    urls: &[String],
    max_workers: usize,
    progress: Option<mpsc::Sender<(usize, usize)>>,
) -> Vec<SyncResult> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(urls.len());
    for url in urls {
        if seen.insert(url.as_str()) {
            unique.push(url.clone());
        }
    }

    let mut batch = fetch_all(client, &unique, max_workers, progress).await;
    let created_at = now();
    let mut results = Vec::with_capacity(unique.len());

    for url in unique {
        let Some(outcome) = batch.take(&url) else {
            tracing::error!(feed = %url, "Fetch outcome missing from batch");
            continue;
        };

        let result = match outcome {
            Ok(feed) => store_new_feed(db, &url, &feed, created_at).await,
            Err(e) => {
                tracing::warn!(feed = %url, error = %e, "Could not fetch feed");
                SyncResult {
                    id: None,
                    url,
                    title: None,
                    result: Err(e.into()),
                }
            }
        };
        results.push(result);
    }

    results
}

async fn store_new_feed(db: &Database, url: &str, feed: &ParsedFeed, created_at: i64) -> SyncResult {
    let title = Some(normalise_text(&feed.title));
    match db.insert_feed(feed, created_at).await {
        Ok(id) => SyncResult {
            id: Some(id),
            url: feed.url.clone(),
            title,
            result: Ok(feed.items.len()),
        },
        Err(e) => {
            tracing::warn!(feed = %url, error = %e, "Could not save feed");
            SyncResult {
                id: None,
                url: url.to_string(),
                title,
                result: Err(e.into()),
            }
        }
    }
}

/// Fetch one stored feed and store its new items as unplayed.
///
/// If the feed now lives at a different URL the stored URL is updated on a
/// best-effort basis after the items are committed.
pub async fn sync_one(
    db: &Database,
    client: &reqwest::Client,
    feed_id: i64,
) -> Result<Synced, SyncError> {
    let mut snapshots = db.load_sync_snapshots(Some(feed_id)).await?;
    let snapshot = match snapshots.len() {
        0 => return Err(SyncError::NoFeedFound),
        1 => snapshots.remove(0),
        _ => return Err(SyncError::Inconsistent),
    };

    let feed = fetch_feed(client, &snapshot.url).await?;
    let items = store_new_items(db, &snapshot, &feed, now()).await?;
    update_moved_url(db, &snapshot, &feed).await;

    Ok(Synced {
        id: snapshot.id,
        url: snapshot.url,
        title: snapshot.title,
        items,
    })
}

/// Sync every stored feed, fetching concurrently.
///
/// Returns one result per feed in id order. A feed that fails to fetch or
/// persist gets an error entry; the others are unaffected.
///
/// # Errors
///
/// [`SyncError::NoFeeds`] when nothing is subscribed, or a database error
/// while loading the feeds.
pub async fn sync_all(
    db: &Database,
    client: &reqwest::Client,
    max_workers: usize,
    progress: Option<mpsc::Sender<(usize, usize)>>,
) -> Result<Vec<SyncResult>, SyncError> {
    let snapshots = db.load_sync_snapshots(None).await?;
    if snapshots.is_empty() {
        return Err(SyncError::NoFeeds);
    }

    let urls: Vec<String> = snapshots.iter().map(|s| s.url.clone()).collect();
    let mut batch = fetch_all(client, &urls, max_workers, progress).await;
    let created_at = now();
    let mut results = Vec::with_capacity(snapshots.len());

    for snapshot in snapshots {
        let Some(outcome) = batch.take(&snapshot.url) else {
            tracing::error!(feed = %snapshot.url, "Fetch outcome missing from batch");
            continue;
        };

        let result = match outcome {
            Ok(feed) => match store_new_items(db, &snapshot, &feed, created_at).await {
                Ok(count) => {
                    update_moved_url(db, &snapshot, &feed).await;
                    Ok(count)
                }
                Err(e) => {
                    tracing::warn!(feed = %snapshot.url, error = %e, "Could not save new items");
                    Err(e)
                }
            },
            Err(e) => {
                tracing::warn!(feed = %snapshot.url, error = %e, "Could not fetch feed");
                Err(e.into())
            }
        };

        results.push(SyncResult {
            id: Some(snapshot.id),
            url: snapshot.url,
            title: Some(snapshot.title),
            result,
        });
    }

    Ok(results)
}

async fn store_new_items(
    db: &Database,
    snapshot: &SyncSnapshot,
    feed: &ParsedFeed,
    created_at: i64,
) -> Result<usize, SyncError> {
    let fresh = new_items(&snapshot.guids, &feed.items);
    let count = db.insert_new_items(snapshot.id, &fresh, created_at).await?;
    tracing::debug!(feed_id = snapshot.id, new = count, "Synced feed");
    Ok(count)
}

async fn update_moved_url(db: &Database, snapshot: &SyncSnapshot, feed: &ParsedFeed) {
    if feed.url.is_empty() || feed.url == snapshot.url {
        return;
    }

    match db.update_feed(snapshot.id, &FeedUpdate::url(feed.url.as_str())).await {
        Ok(()) => {
            tracing::info!(feed_id = snapshot.id, from = %snapshot.url, to = %feed.url, "Updated feed URL");
        }
        Err(e) => {
            tracing::warn!(feed_id = snapshot.id, url = %feed.url, error = %e, "Could not update feed URL");
        }
    }
}

/// Resolve a feed title fragment to a single feed id.
///
/// A fragment matching several feeds still resolves when exactly one of
/// them has that title, ignoring case.
pub async fn resolve_feed(db: &Database, name: &str) -> Result<i64, SyncError> {
    let name = name.trim();
    let matches = db.find_feeds(name).await?;

    match matches.as_slice() {
        [] => Err(SyncError::NoFeedFound),
        [(id, _)] => Ok(*id),
        _ => {
            let wanted = name.to_lowercase();
            let exact: Vec<i64> = matches
                .iter()
                .filter(|(_, title)| title.to_lowercase() == wanted)
                .map(|(id, _)| *id)
                .collect();

            match exact.as_slice() {
                [id] => Ok(*id),
                _ => Err(SyncError::Ambiguous(
                    matches.iter().map(|(_, title)| title.clone()).collect(),
                )),
            }
        }
    }
}

/// Unsubscribe from a feed, deleting its items.
///
/// Returns the number of items removed.
pub async fn remove_feed(db: &Database, feed_id: i64) -> Result<u64, SyncError> {
    let removed = db.delete_feed(feed_id).await?;
    tracing::info!(feed_id, items = removed, "Removed feed");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{build_client, DEFAULT_WORKERS};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn client() -> reqwest::Client {
        build_client(Duration::from_secs(5)).unwrap()
    }

    fn rss(title: &str, guids: &[&str]) -> String {
        let items: String = guids
            .iter()
            .map(|g| {
                format!(
                    r#"<item><title>Episode {g}</title><guid>{g}</guid>
<enclosure url="https://cdn.example.com/{g}.mp3" length="10" type="audio/mpeg"/></item>"#
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title>{items}</channel></rss>"#
        )
    }

    async fn serve(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn seed(db: &Database, title: &str, url: &str) -> i64 {
        let feed = ParsedFeed {
            title: title.to_string(),
            author: "Unknown Author".to_string(),
            description: None,
            feed_type: "rss".to_string(),
            url: url.to_string(),
            link: None,
            image: None,
            items: Vec::new(),
        };
        db.insert_feed(&feed, 1).await.unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_stores_feed() {
        let server = MockServer::start().await;
        serve(&server, "/feed", rss("My Show", &["a", "b"])).await;
        let db = test_db().await;

        let url = format!("{}/feed", server.uri());
        let synced = subscribe(&db, &client(), &url).await.unwrap();

        assert_eq!(synced.title, "My Show");
        assert_eq!(synced.items, 2);
        assert_eq!(synced.url, url);
        assert_eq!(db.count_feeds().await.unwrap(), 1);
        assert_eq!(db.count_items().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_twice_is_duplicate() {
        let server = MockServer::start().await;
        serve(&server, "/feed", rss("My Show", &["a"])).await;
        let db = test_db().await;
        let url = format!("{}/feed", server.uri());

        subscribe(&db, &client(), &url).await.unwrap();
        let err = subscribe(&db, &client(), &url).await.unwrap_err();

        assert!(matches!(err, SyncError::Database(DatabaseError::Duplicate(_))));
        assert_eq!(db.count_items().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_fetch_failure_writes_nothing() {
        let server = MockServer::start().await;
        let db = test_db().await;

        let err = subscribe(&db, &client(), &format!("{}/gone", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Fetch(FetchError::BadStatus(_))));
        assert_eq!(db.count_feeds().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_many_dedupes_and_keeps_order() {
        let server = MockServer::start().await;
        serve(&server, "/one", rss("One", &["1"])).await;
        serve(&server, "/two", rss("Two", &["2", "3"])).await;
        let db = test_db().await;

        let one = format!("{}/one", server.uri());
        let two = format!("{}/two", server.uri());
        let bad = format!("{}/bad", server.uri());
        let urls = vec![two.clone(), bad.clone(), one.clone(), two.clone()];

        let results = subscribe_many(&db, &client(), &urls, DEFAULT_WORKERS, None).await;

        let order: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(order, vec![two.as_str(), bad.as_str(), one.as_str()]);
        assert_eq!(results[0].result.as_ref().ok(), Some(&2));
        assert!(matches!(results[1].result, Err(SyncError::Fetch(_))));
        assert_eq!(results[1].label(), bad);
        assert_eq!(results[2].title.as_deref(), Some("One"));
        assert_eq!(db.count_feeds().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_many_reports_final_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", format!("{}/new", server.uri())),
            )
            .mount(&server)
            .await;
        serve(&server, "/new", rss("Moved", &["1"])).await;
        let db = test_db().await;
        let old = format!("{}/old", server.uri());
        let new = format!("{}/new", server.uri());

        let results = subscribe_many(&db, &client(), &[old], DEFAULT_WORKERS, None).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(results[0].url, new);
        assert_eq!(db.feed_urls().await.unwrap(), vec![new]);
    }

    #[tokio::test]
    async fn test_sync_one_unknown_feed() {
        let db = test_db().await;
        let err = sync_one(&db, &client(), 42).await.unwrap_err();
        assert!(matches!(err, SyncError::NoFeedFound));
    }

    #[tokio::test]
    async fn test_sync_all_without_feeds() {
        let db = test_db().await;
        let err = sync_all(&db, &client(), DEFAULT_WORKERS, None).await.unwrap_err();
        assert!(matches!(err, SyncError::NoFeeds));
    }

    #[tokio::test]
    async fn test_sync_one_stores_only_new_items() {
        let server = MockServer::start().await;
        serve(&server, "/feed", rss("Show", &["a", "b", "c"])).await;
        let db = test_db().await;
        let url = format!("{}/feed", server.uri());
        let id = seed(&db, "Show", &url).await;

        let first = sync_one(&db, &client(), id).await.unwrap();
        assert_eq!(first.items, 3);
        assert_eq!(first.title, "Show");

        let second = sync_one(&db, &client(), id).await.unwrap();
        assert_eq!(second.items, 0);
        assert_eq!(db.count_items().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_sync_one_updates_redirected_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", format!("{}/new", server.uri())),
            )
            .mount(&server)
            .await;
        serve(&server, "/new", rss("Show", &["a"])).await;
        let db = test_db().await;
        let id = seed(&db, "Show", &format!("{}/old", server.uri())).await;

        sync_one(&db, &client(), id).await.unwrap();

        assert_eq!(db.feed_urls().await.unwrap(), vec![format!("{}/new", server.uri())]);
    }

    #[tokio::test]
    async fn test_moved_url_taken_keeps_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", format!("{}/new", server.uri())),
            )
            .mount(&server)
            .await;
        serve(&server, "/new", rss("Show", &["a"])).await;
        let db = test_db().await;
        let old = format!("{}/old", server.uri());
        let new = format!("{}/new", server.uri());
        let id = seed(&db, "Show", &old).await;
        seed(&db, "Other", &new).await;

        // URL update collides with the other feed; the sync itself still succeeds
        let synced = sync_one(&db, &client(), id).await.unwrap();
        assert_eq!(synced.items, 1);
        let urls = db.feed_urls().await.unwrap();
        assert!(urls.contains(&old));
    }

    #[tokio::test]
    async fn test_resolve_feed() {
        let db = test_db().await;
        let news = seed(&db, "News", "https://a.example.com/rss").await;
        seed(&db, "Daily News", "https://b.example.com/rss").await;
        let tech = seed(&db, "Tech Talk", "https://c.example.com/rss").await;
        seed(&db, "Science Weekly", "https://d.example.com/rss").await;
        seed(&db, "Sports Weekly", "https://e.example.com/rss").await;

        assert_eq!(resolve_feed(&db, "tech").await.unwrap(), tech);
        assert_eq!(resolve_feed(&db, "news").await.unwrap(), news);
        assert!(matches!(
            resolve_feed(&db, "nothing").await,
            Err(SyncError::NoFeedFound)
        ));

        match resolve_feed(&db, "weekly").await {
            Err(SyncError::Ambiguous(titles)) => {
                assert_eq!(titles, vec!["Science Weekly", "Sports Weekly"]);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_feed() {
        let db = test_db().await;
        let id = seed(&db, "Show", "https://a.example.com/rss").await;

        assert_eq!(remove_feed(&db, id).await.unwrap(), 0);
        assert!(matches!(
            remove_feed(&db, id).await,
            Err(SyncError::Database(DatabaseError::NotFound(_)))
        ));
    }
}
