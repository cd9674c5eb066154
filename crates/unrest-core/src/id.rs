//! Entity identifiers.
//!
//! Events are keyed by their knowledge-base item id (`Q` followed by
//! digits). Upstream rows carry the id embedded in an entity URI; the
//! change feed carries it as a bare page title.

use std::sync::LazyLock;

use regex::Regex;

static QID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Q\d+$").expect("Invalid QID regex"));

static ENTITY_URI_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://www\.wikidata\.org/entity/(Q\d+)$").expect("Invalid entity URI regex")
});

/// Returns true when `value` is a bare item id such as `Q42`.
pub fn is_qid(value: &str) -> bool {
    QID_REGEX.is_match(value)
}

/// Extracts the item id from an entity URI, e.g.
/// `http://www.wikidata.org/entity/Q42` → `Q42`.
pub fn extract_id(uri: &str) -> Option<String> {
    ENTITY_URI_REGEX
        .captures(uri.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
