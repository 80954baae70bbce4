use regex::Regex;
use std::sync::OnceLock;

/// Opening, closing and self-closing HTML-like tags.
static TAG_PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();

fn tag_patterns() -> &'static [Regex; 3] {
    TAG_PATTERNS.get_or_init(|| {
        [
            // <p> or <a href="..."> (attributes may span lines)
            Regex::new(r"<[0-9A-Za-z:]+(\s+(?s:.+?))?>").expect("opening tag pattern"),
            // </p>
            Regex::new(r"</[0-9A-Za-z:]+>").expect("closing tag pattern"),
            // <br/> or <br />
            Regex::new(r"<[0-9A-Za-z:]+\s?/>").expect("self-closing tag pattern"),
        ]
    })
}

/// Strips HTML-like tags and normalizes whitespace.
///
/// Applied to feed and item titles and descriptions before they are stored.
/// Non-breaking spaces (both the literal U+00A0 character and the `&nbsp;`
/// entity) count as whitespace. Runs of whitespace collapse to a single
/// space and the result is trimmed.
///
/// # Examples
///
/// ```
/// use podsync::util::normalise_text;
///
/// assert_eq!(
///     normalise_text("<p>Episode&nbsp;12:\n  <b>The   Return</b></p>"),
///     "Episode 12: The Return"
/// );
/// ```
pub fn normalise_text(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }

    let mut text = s.to_string();
    for pattern in tag_patterns() {
        text = pattern.replace_all(&text, "").into_owned();
    }

    text.replace('\u{a0}', " ")
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Greedily wraps text into lines of at most `width` characters.
///
/// Words longer than `width` are kept whole on their own line.
pub fn wrap_lines(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in s.split_whitespace() {
        let word_len = word.chars().count();
        if current_len > 0 && current_len + 1 + word_len > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        lines.push(current);
    }

    lines
}
