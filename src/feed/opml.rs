use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::util::validate_feed_url;

/// Maximum allowed nesting depth for OPML outline elements.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur while reading a subscription file.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// OPML nesting depth exceeds the safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// File I/O error.
    #[error("Failed to read subscription file: {0}")]
    Io(#[from] std::io::Error),
}

/// Layout of a subscription file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ImportFormat {
    /// One feed URL per line.
    #[default]
    List,
    /// OPML outline document.
    Opml,
}

/// Reads a subscription file from disk and extracts its feed URLs.
///
/// URLs are trimmed and de-duplicated, first occurrence first. Entries that
/// are not http(s) URLs are skipped.
pub async fn read_subscriptions(path: &Path, format: ImportFormat) -> Result<Vec<String>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    match format {
        ImportFormat::List => Ok(parse_url_list(&content)),
        ImportFormat::Opml => parse_opml(&content),
    }
}

/// Extracts feed URLs from a plain list.
///
/// Blank lines and lines starting with `#` are ignored.
pub fn parse_url_list(content: &str) -> Vec<String> {
    let mut urls = UrlSet::default();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        urls.push(line);
    }
    urls.into_inner()
}

/// Extracts the `xmlUrl` of every outline in an OPML document.
///
/// Folder outlines without `xmlUrl` are traversed but contribute nothing.
///
/// # Security
///
/// `quick-xml` does not parse `<!ENTITY>` declarations. A custom entity
/// reference in an attribute fails with an unrecognized-entity error instead
/// of expanding, so DOCTYPE payloads cannot inject content.
pub fn parse_opml(content: &str) -> Result<Vec<String>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut urls = UrlSet::default();
    let mut buf = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                if let Some(url) = outline_xml_url(&e, &reader)? {
                    urls.push(&url);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                // Self-closing outline doesn't affect depth
                if let Some(url) = outline_xml_url(&e, &reader)? {
                    urls.push(&url);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(urls.into_inner())
}

fn outline_xml_url(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Option<String>, OpmlError> {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        if attr.key.as_ref() == b"xmlUrl" {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Ordered, de-duplicated collection of accepted feed URLs.
#[derive(Default)]
struct UrlSet {
    seen: HashSet<String>,
    urls: Vec<String>,
}

impl UrlSet {
    fn push(&mut self, raw: &str) {
        let url = raw.trim();
        if url.is_empty() || self.seen.contains(url) {
            return;
        }
        if let Err(e) = validate_feed_url(url) {
            tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
            return;
        }
        self.seen.insert(url.to_string());
        self.urls.push(url.to_string());
    }

    fn into_inner(self) -> Vec<String> {
        self.urls
    }
}

/// Writes feed URLs to a file as a plain list, one per line, atomically.
///
/// Content goes to a temporary file in the same directory, is synced to
/// disk and then renamed over `path`, so the destination is never left
/// half-written.
pub fn export_to_file(urls: &[String], path: &Path) -> Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let mut content = String::new();
    for url in urls {
        content.push_str(url);
        content.push('\n');
    }

    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temporary file '{}'", temp_path.display()))?;

    std::io::Write::write_all(&mut file, content.as_bytes()).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to write temporary file '{}'", temp_path.display())
    })?;

    file.sync_all().with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to sync temporary file '{}'", temp_path.display())
    })?;

    drop(file);

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}'",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
