use chrono::DateTime;
use feed_rs::model::{Entry, FeedType};
use feed_rs::parser;
use quick_xml::events::Event;
use quick_xml::Reader;

pub use feed_rs::parser::ParseFeedError;

use crate::storage::{ParsedFeed, ParsedItem};

const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// Normalize a feed document into a [`ParsedFeed`].
///
/// The returned `url` is empty; the fetcher fills it in from the response.
/// Entries without a downloadable enclosure are dropped.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseFeedError> {
    // Keep missing ids empty so the enclosure URL can stand in as GUID
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)?;

    let total = feed.entries.len();
    let items: Vec<ParsedItem> = feed.entries.into_iter().filter_map(parse_entry).collect();
    if items.len() < total {
        tracing::debug!(
            dropped = total - items.len(),
            "Skipped entries without a download URL"
        );
    }

    let author = feed
        .authors
        .into_iter()
        .map(|p| p.name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        author,
        description: feed.description.map(|d| d.content),
        feed_type: feed_type_name(&feed.feed_type).to_string(),
        url: String::new(),
        link: feed.links.into_iter().next().map(|l| l.href),
        image: feed.logo.or(feed.icon).map(|i| i.uri),
        items,
    })
}

fn feed_type_name(feed_type: &FeedType) -> &'static str {
    match feed_type {
        FeedType::Atom => "atom",
        FeedType::JSON => "json",
        FeedType::RSS0 | FeedType::RSS1 | FeedType::RSS2 => "rss",
    }
}

fn parse_entry(entry: Entry) -> Option<ParsedItem> {
    // First media content carrying a URL is the download
    let (media, content) = entry.media.iter().find_map(|m| {
        m.content
            .iter()
            .find(|c| c.url.is_some())
            .map(|c| (m, c))
    })?;
    let url = content.url.as_ref()?.to_string();

    let filesize = content
        .size
        .and_then(|s| i64::try_from(s).ok())
        .unwrap_or(0);
    let duration = content
        .duration
        .or(media.duration)
        .or_else(|| entry.media.iter().find_map(|m| m.duration))
        .and_then(|d| i64::try_from(d.as_secs()).ok())
        .unwrap_or(0);

    let pubdate = entry.published.or(entry.updated).map(|dt| dt.timestamp());

    let title = entry
        .title
        .map(|t| t.content)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| untitled(pubdate));

    let guid = if entry.id.trim().is_empty() {
        url.clone()
    } else {
        entry.id
    };

    let description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body));

    Some(ParsedItem {
        title,
        description,
        pubdate,
        url,
        filesize,
        duration,
        guid,
    })
}

fn untitled(pubdate: Option<i64>) -> String {
    match pubdate.and_then(|ts| DateTime::from_timestamp(ts, 0)) {
        Some(dt) => format!("Untitled: {}", dt.format("%b %-d, %Y")),
        None => "Untitled".to_string(),
    }
}

/// Find the `<itunes:new-feed-url>` a publisher uses to announce a move.
///
/// Returns `None` if the tag is absent, empty or the document is not
/// readable XML.
pub fn new_feed_url(bytes: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut inside = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                inside = e.local_name().as_ref() == b"new-feed-url";
            }
            Ok(Event::Text(t)) if inside => {
                let url = t.unescape().ok()?.trim().to_string();
                return (!url.is_empty()).then_some(url);
            }
            Ok(Event::CData(c)) if inside => {
                let url = String::from_utf8_lossy(&c.into_inner()).trim().to_string();
                return (!url.is_empty()).then_some(url);
            }
            Ok(Event::End(_)) => inside = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PODCAST_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Test Podcast</title>
    <link>https://podcast.example.com</link>
    <description>A show about tests</description>
    <itunes:author>Jane Host</itunes:author>
    <image><url>https://podcast.example.com/cover.jpg</url></image>
    <item>
      <title>Episode 2</title>
      <guid>ep-2</guid>
      <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
      <description>&lt;p&gt;Second episode&lt;/p&gt;</description>
      <enclosure url="https://cdn.example.com/ep2.mp3" length="2048" type="audio/mpeg"/>
      <itunes:duration>01:02:03</itunes:duration>
    </item>
    <item>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
      <enclosure url="https://cdn.example.com/ep1.mp3" length="1024" type="audio/mpeg"/>
    </item>
    <item>
      <title>Blog post</title>
      <guid>post-1</guid>
      <link>https://podcast.example.com/blog</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_podcast_feed() {
        let feed = parse_feed(PODCAST_RSS.as_bytes()).unwrap();

        assert_eq!(feed.title, "Test Podcast");
        assert_eq!(feed.feed_type, "rss");
        assert_eq!(feed.description.as_deref(), Some("A show about tests"));
        assert!(feed
            .link
            .as_deref()
            .is_some_and(|l| l.starts_with("https://podcast.example.com")));
        assert!(feed.url.is_empty());
        assert_eq!(feed.items.len(), 2, "entry without enclosure is dropped");
    }

    #[test]
    fn test_parse_item_fields() {
        let feed = parse_feed(PODCAST_RSS.as_bytes()).unwrap();
        let item = &feed.items[0];

        assert_eq!(item.title, "Episode 2");
        assert_eq!(item.guid, "ep-2");
        assert_eq!(item.url, "https://cdn.example.com/ep2.mp3");
        assert_eq!(item.filesize, 2048);
        assert_eq!(item.duration, 3723);
        assert_eq!(item.pubdate, Some(1704189600));
        assert!(item.description.as_deref().unwrap().contains("Second episode"));
    }

    #[test]
    fn test_missing_guid_falls_back_to_enclosure_url() {
        let feed = parse_feed(PODCAST_RSS.as_bytes()).unwrap();
        assert_eq!(feed.items[1].guid, "https://cdn.example.com/ep1.mp3");
    }

    #[test]
    fn test_missing_title_uses_pubdate() {
        let feed = parse_feed(PODCAST_RSS.as_bytes()).unwrap();
        assert_eq!(feed.items[1].title, "Untitled: Jan 1, 2024");
    }

    #[test]
    fn test_untitled_without_date() {
        assert_eq!(untitled(None), "Untitled");
    }

    #[test]
    fn test_missing_author_defaults() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>No Author</title></channel></rss>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.author, "Unknown Author");
        assert!(feed.items.is_empty());
    }

    #[test]
    fn test_missing_pubdate_is_none() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title>
<item><title>Undated</title><enclosure url="https://cdn.example.com/x.mp3" type="audio/mpeg"/></item>
</channel></rss>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.items[0].pubdate, None);
        assert_eq!(feed.items[0].filesize, 0);
        assert_eq!(feed.items[0].duration, 0);
    }

    #[test]
    fn test_missing_feed_title_is_empty() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert!(feed.title.is_empty());
    }

    #[test]
    fn test_parse_atom_type() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Show</title>
  <id>urn:show</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Atom Episode</title>
    <id>urn:ep1</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <link rel="enclosure" type="audio/mpeg" length="99" href="https://cdn.example.com/atom.mp3"/>
  </entry>
</feed>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.feed_type, "atom");
        assert_eq!(feed.title, "Atom Show");
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_feed(b"this is not a feed").is_err());
    }

    #[test]
    fn test_new_feed_url_found() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Moved</title>
    <itunes:new-feed-url> https://new.example.com/feed.xml </itunes:new-feed-url>
  </channel>
</rss>"#;
        assert_eq!(
            new_feed_url(xml.as_bytes()).as_deref(),
            Some("https://new.example.com/feed.xml")
        );
    }

    #[test]
    fn test_new_feed_url_absent() {
        assert_eq!(new_feed_url(PODCAST_RSS.as_bytes()), None);
        assert_eq!(new_feed_url(b"not xml at all"), None);
    }

    #[test]
    fn test_new_feed_url_empty_tag() {
        let xml = r#"<rss xmlns:itunes="x"><channel><itunes:new-feed-url></itunes:new-feed-url></channel></rss>"#;
        assert_eq!(new_feed_url(xml.as_bytes()), None);
    }
}
