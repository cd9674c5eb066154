//! Server-side filters applied after merging.

use std::collections::BTreeSet;
use std::fmt;

use crate::model::{EventType, FeatureCollection};

/// A lon/lat bounding box `minLon,minLat,maxLon,maxLat`.
///
/// Boxes crossing the antimeridian are not supported; `min_lon` must not
/// exceed `max_lon`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    /// Parses `minLon,minLat,maxLon,maxLat`. Anything malformed (wrong arity,
    /// non-numeric parts, out-of-range or inverted bounds) yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        let [min_lon, min_lat, max_lon, max_lat] = parts[..] else {
            return None;
        };
        let bbox = BBox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        };
        bbox.is_sane().then_some(bbox)
    }

    fn is_sane(&self) -> bool {
        let lon_ok = |v: f64| v.is_finite() && (-180.0..=180.0).contains(&v);
        let lat_ok = |v: f64| v.is_finite() && (-90.0..=90.0).contains(&v);
        lon_ok(self.min_lon)
            && lon_ok(self.max_lon)
            && lat_ok(self.min_lat)
            && lat_ok(self.max_lat)
            && self.min_lon <= self.max_lon
            && self.min_lat <= self.max_lat
    }

    /// Inclusive containment. Positions outside the valid lon/lat ranges are
    /// never contained.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (-180.0..=180.0).contains(&lon)
            && (-90.0..=90.0).contains(&lat)
            && lon >= self.min_lon
            && lon <= self.max_lon
            && lat >= self.min_lat
            && lat <= self.max_lat
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// Keeps only features whose type is in `types`.
pub fn filter_by_types(collection: &mut FeatureCollection, types: &BTreeSet<EventType>) {
    collection.retain(|feature| types.contains(&feature.event_type));
}

/// Keeps only features located inside `bbox`.
pub fn filter_by_bbox(collection: &mut FeatureCollection, bbox: &BBox) {
    collection.retain(|feature| bbox.contains(feature.coordinates.lon, feature.coordinates.lat));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinates, EventFeature};

    fn feature(id: &str, event_type: EventType, lon: f64, lat: f64) -> EventFeature {
        EventFeature {
            id: id.to_string(),
            title: id.to_string(),
            event_type,
            country: None,
            coordinates: Coordinates::new(lon, lat),
            instant: None,
            interval: None,
            external_link: None,
        }
    }

    #[test]
    fn parses_well_formed_bbox() {
        let bbox = BBox::parse("-10, 35, 5, 45").unwrap();
        assert_eq!(bbox.min_lon, -10.0);
        assert_eq!(bbox.max_lat, 45.0);
        assert_eq!(bbox.to_string(), "-10,35,5,45");
    }

    #[test]
    fn malformed_bbox_is_treated_as_absent() {
        assert_eq!(BBox::parse("1,2,3"), None);
        assert_eq!(BBox::parse("1,2,3,4,5"), None);
        assert_eq!(BBox::parse("a,b,c,d"), None);
        assert_eq!(BBox::parse("-200,0,10,10"), None);
        assert_eq!(BBox::parse("0,-95,10,10"), None);
        assert_eq!(BBox::parse("10,0,0,10"), None);
        assert_eq!(BBox::parse(""), None);
    }

    #[test]
    fn out_of_range_positions_are_excluded_by_any_bbox() {
        let world = BBox::parse("-180,-90,180,90").unwrap();
        assert!(!world.contains(200.0, 10.0));
        assert!(world.contains(180.0, 90.0));

        let mut collection: FeatureCollection = vec![
            feature("Q1", EventType::Riot, 200.0, 10.0),
            feature("Q2", EventType::Riot, 10.0, 10.0),
        ]
        .into_iter()
        .collect();
        filter_by_bbox(&mut collection, &world);
        assert_eq!(collection.ids().collect::<Vec<_>>(), vec!["Q2"]);
    }

    #[test]
    fn type_filter_keeps_allowed_types() {
        let mut collection: FeatureCollection = vec![
            feature("Q1", EventType::Riot, 0.0, 0.0),
            feature("Q2", EventType::Protest, 0.0, 0.0),
            feature("Q3", EventType::Battle, 0.0, 0.0),
        ]
        .into_iter()
        .collect();
        let types = BTreeSet::from([EventType::Protest, EventType::Battle]);
        filter_by_types(&mut collection, &types);
        assert_eq!(collection.ids().collect::<Vec<_>>(), vec!["Q2", "Q3"]);
    }
}
