//! Canonical event model and its GeoJSON representation.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::CoreError;
use crate::time::Timestamp;

/// Value of the `source` property on every emitted feature.
pub const FEATURE_SOURCE: &str = "wikidata";

/// The fixed event taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Protest,
    Riot,
    Conflict,
    Battle,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Protest,
        EventType::Riot,
        EventType::Conflict,
        EventType::Battle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Protest => "protest",
            EventType::Riot => "riot",
            EventType::Conflict => "conflict",
            EventType::Battle => "battle",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "protest" => Ok(EventType::Protest),
            "riot" => Ok(EventType::Riot),
            "conflict" => Ok(EventType::Conflict),
            "battle" => Ok(EventType::Battle),
            other => Err(CoreError::unknown_event_type(other)),
        }
    }
}

/// A WGS84 position, longitude first as in GeoJSON.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinates {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// True if the position lies on the WGS84 globe.
    pub fn is_on_globe(&self) -> bool {
        (-180.0..=180.0).contains(&self.lon) && (-90.0..=90.0).contains(&self.lat)
    }
}

impl Serialize for Coordinates {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.lon, self.lat].serialize(serializer)
    }
}

/// A possibly open-ended time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Interval {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl Interval {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// One result row from the query endpoint, before normalization.
///
/// Every field is optional so that incomplete rows survive decoding and are
/// dropped by the normalizer instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub item: Option<String>,
    pub label: Option<String>,
    pub coord: Option<String>,
    pub time: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub country: Option<String>,
    pub link: Option<String>,
    pub type_uri: Option<String>,
}

/// The canonical event entity. `id` is the identity key.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFeature {
    pub id: String,
    pub title: String,
    pub event_type: EventType,
    pub country: Option<String>,
    pub coordinates: Coordinates,
    pub instant: Option<Timestamp>,
    pub interval: Option<Interval>,
    pub external_link: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeatureProperties<'a> {
    id: &'a str,
    title: &'a str,
    #[serde(rename = "type")]
    event_type: EventType,
    country: Option<&'a str>,
    source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<&'a Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    range: Option<&'a Interval>,
    external_link: Option<&'a str>,
}

#[derive(Serialize)]
struct PointGeometry<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    coordinates: &'a Coordinates,
}

impl Serialize for EventFeature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Feature", 3)?;
        state.serialize_field("type", "Feature")?;
        state.serialize_field(
            "geometry",
            &PointGeometry {
                kind: "Point",
                coordinates: &self.coordinates,
            },
        )?;
        state.serialize_field(
            "properties",
            &FeatureProperties {
                id: &self.id,
                title: &self.title,
                event_type: self.event_type,
                country: self.country.as_deref(),
                source: FEATURE_SOURCE,
                time: self.instant.as_ref(),
                range: self.interval.as_ref().filter(|i| !i.is_empty()),
                external_link: self.external_link.as_deref(),
            },
        )?;
        state.end()
    }
}

/// A set of features keyed by id, kept in insertion order so that the
/// serialized payload is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    features: IndexMap<String, EventFeature>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&EventFeature> {
        self.features.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut EventFeature> {
        self.features.get_mut(id)
    }

    /// Inserts or replaces the feature with the same id.
    pub fn insert(&mut self, feature: EventFeature) {
        self.features.insert(feature.id.clone(), feature);
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventFeature> {
        self.features.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&EventFeature) -> bool) {
        self.features.retain(|_, feature| keep(feature));
    }

    pub fn into_features(self) -> Vec<EventFeature> {
        self.features.into_values().collect()
    }
}

impl FromIterator<EventFeature> for FeatureCollection {
    fn from_iter<I: IntoIterator<Item = EventFeature>>(iter: I) -> Self {
        let mut collection = FeatureCollection::new();
        for feature in iter {
            collection.insert(feature);
        }
        collection
    }
}

impl Serialize for FeatureCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let features: Vec<&EventFeature> = self.features.values().collect();
        let mut state = serializer.serialize_struct("FeatureCollection", 2)?;
        state.serialize_field("type", "FeatureCollection")?;
        state.serialize_field("features", &features)?;
        state.end()
    }
}
