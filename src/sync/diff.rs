use std::collections::HashSet;

use crate::storage::ParsedItem;

/// Items whose GUID is not in `known`, in feed order.
///
/// GUID equality is the only identity test: a stored episode whose title,
/// URL or date changed upstream is still the same episode.
pub fn new_items<'a>(known: &HashSet<String>, candidates: &'a [ParsedItem]) -> Vec<&'a ParsedItem> {
    candidates
        .iter()
        .filter(|item| !known.contains(&item.guid))
        .collect()
}
