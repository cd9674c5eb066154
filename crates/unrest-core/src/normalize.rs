//! Row normalization and merging.
//!
//! The two upstream queries (instantaneous events and ranged events) return
//! overlapping row sets: an item can appear several times within one query
//! (one row per coordinate/country combination) and in both queries. The
//! merger collapses all of them into one feature per id.
//!
//! Point rows are always processed before range rows. For an id seen more
//! than once:
//!
//! - geometry and type come from the first row processed,
//! - `instant` takes the incoming value when present, else keeps the existing,
//! - `interval` keeps the existing value when present, else takes the incoming,
//! - `title`, `country` and `externalLink` keep the first non-null value.

use std::sync::LazyLock;

use regex::Regex;

use crate::id::extract_id;
use crate::model::{Coordinates, EventFeature, EventType, FeatureCollection, Interval, RawRow};
use crate::time::Timestamp;

static POINT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*point\s*\(\s*([+-]?\d+(?:\.\d+)?)\s+([+-]?\d+(?:\.\d+)?)\s*\)\s*$")
        .expect("Invalid WKT point regex")
});

/// Item ids of the four known event classes.
const TYPE_TABLE: &[(&str, EventType)] = &[
    ("Q273120", EventType::Protest),
    ("Q124757", EventType::Riot),
    ("Q350604", EventType::Conflict),
    ("Q180684", EventType::Conflict),
    ("Q178561", EventType::Battle),
];

/// Label keywords, checked in priority order.
const TYPE_KEYWORDS: &[(&str, EventType)] = &[
    ("riot", EventType::Riot),
    ("battle", EventType::Battle),
    ("conflict", EventType::Conflict),
    ("protest", EventType::Protest),
];

/// Returned when neither the type table nor the label keywords match.
pub const DEFAULT_EVENT_TYPE: EventType = EventType::Conflict;

/// Item ids used by the query builders to select candidate events.
pub fn known_type_ids() -> impl Iterator<Item = &'static str> {
    TYPE_TABLE.iter().map(|(id, _)| *id)
}

/// Parses a WKT `Point(lon lat)` literal.
pub fn parse_point(literal: &str) -> Option<Coordinates> {
    let caps = POINT_REGEX.captures(literal)?;
    let lon: f64 = caps.get(1)?.as_str().parse().ok()?;
    let lat: f64 = caps.get(2)?.as_str().parse().ok()?;
    if !lon.is_finite() || !lat.is_finite() {
        return None;
    }
    Some(Coordinates::new(lon, lat))
}

/// Maps a type binding to the taxonomy, falling back to label keywords and
/// finally to [`DEFAULT_EVENT_TYPE`].
pub fn resolve_type(type_uri: Option<&str>, label: Option<&str>) -> EventType {
    if let Some(type_id) = type_uri.and_then(extract_id) {
        if let Some((_, event_type)) = TYPE_TABLE.iter().find(|(id, _)| *id == type_id) {
            return *event_type;
        }
    }

    if let Some(label) = label {
        let label = label.to_lowercase();
        if let Some((_, event_type)) = TYPE_KEYWORDS.iter().find(|(kw, _)| label.contains(kw)) {
            return *event_type;
        }
    }

    DEFAULT_EVENT_TYPE
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Builds one feature from a row. Rows without a parseable id or an on-globe
/// coordinate yield `None`.
pub fn to_feature(row: &RawRow) -> Option<EventFeature> {
    let id = row.item.as_deref().and_then(extract_id)?;
    let coordinates = row
        .coord
        .as_deref()
        .and_then(parse_point)
        .filter(Coordinates::is_on_globe)?;

    let label = non_empty(&row.label);
    let event_type = resolve_type(row.type_uri.as_deref(), label.as_deref());

    let instant = row.time.as_deref().and_then(Timestamp::parse_lenient);
    let interval = Interval {
        start: row.start.as_deref().and_then(Timestamp::parse_lenient),
        end: row.end.as_deref().and_then(Timestamp::parse_lenient),
    };

    Some(EventFeature {
        title: label.unwrap_or_else(|| id.clone()),
        id,
        event_type,
        country: non_empty(&row.country),
        coordinates,
        instant,
        interval: (!interval.is_empty()).then_some(interval),
        external_link: non_empty(&row.link),
    })
}

fn merge_into(existing: &mut EventFeature, incoming: EventFeature) {
    if incoming.instant.is_some() {
        existing.instant = incoming.instant;
    }
    if existing.interval.is_none() {
        existing.interval = incoming.interval;
    }
    // A label-less first row carries the id as its title.
    if existing.title == existing.id && incoming.title != incoming.id {
        existing.title = incoming.title;
    }
    if existing.country.is_none() {
        existing.country = incoming.country;
    }
    if existing.external_link.is_none() {
        existing.external_link = incoming.external_link;
    }
}

/// Normalizes and merges both row sets into one collection, one feature per
/// id. Point rows are processed first.
pub fn merge_and_normalize(point_rows: &[RawRow], range_rows: &[RawRow]) -> FeatureCollection {
    let mut collection = FeatureCollection::new();
    let mut dropped = 0usize;

    for row in point_rows.iter().chain(range_rows) {
        let Some(incoming) = to_feature(row) else {
            dropped += 1;
            continue;
        };
        match collection.get_mut(&incoming.id) {
            Some(existing) => merge_into(existing, incoming),
            None => collection.insert(incoming),
        }
    }

    tracing::debug!(
        point_rows = point_rows.len(),
        range_rows = range_rows.len(),
        features = collection.len(),
        dropped,
        "normalized upstream rows"
    );

    collection
}
