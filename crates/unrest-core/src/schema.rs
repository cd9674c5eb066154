//! Canonical shape check for outgoing payloads.
//!
//! Runs over the serialized JSON, not the typed model, so that it checks
//! exactly what a client would receive (and what would be cached).

use std::collections::HashSet;

use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::id::is_qid;
use crate::model::{EventType, FEATURE_SOURCE};
use crate::time::Timestamp;

fn violation(path: impl Into<String>, message: impl Into<String>) -> CoreError {
    CoreError::schema_violation(path, message)
}

fn check_timestamp(value: &Value, path: &str) -> Result<()> {
    match value.as_str() {
        Some(s) if s.parse::<Timestamp>().is_ok() => Ok(()),
        _ => Err(violation(path, "must be an RFC 3339 timestamp with offset")),
    }
}

fn check_nullable_string(props: &Value, field: &str, path: &str) -> Result<()> {
    match props.get(field) {
        Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(violation(format!("{path}.{field}"), "must be a string or null")),
        None => Err(violation(format!("{path}.{field}"), "is required")),
    }
}

fn check_geometry(geometry: Option<&Value>, path: &str) -> Result<()> {
    let geometry = geometry.ok_or_else(|| violation(path, "is required"))?;
    if geometry.get("type").and_then(Value::as_str) != Some("Point") {
        return Err(violation(format!("{path}.type"), "must be \"Point\""));
    }
    let coords = geometry
        .get("coordinates")
        .and_then(Value::as_array)
        .filter(|c| c.len() == 2)
        .ok_or_else(|| violation(format!("{path}.coordinates"), "must be [lon, lat]"))?;

    let lon = coords[0].as_f64();
    let lat = coords[1].as_f64();
    match (lon, lat) {
        (Some(lon), Some(lat))
            if (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat) =>
        {
            Ok(())
        }
        _ => Err(violation(
            format!("{path}.coordinates"),
            "longitude must be within [-180, 180] and latitude within [-90, 90]",
        )),
    }
}

fn check_properties(props: Option<&Value>, path: &str) -> Result<String> {
    let props = props
        .filter(|p| p.is_object())
        .ok_or_else(|| violation(path, "must be an object"))?;

    let id = props
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| is_qid(id))
        .ok_or_else(|| violation(format!("{path}.id"), "must match Q\\d+"))?;

    if !props.get("title").is_some_and(Value::is_string) {
        return Err(violation(format!("{path}.title"), "must be a string"));
    }

    let type_ok = props
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.parse::<EventType>().is_ok_and(|parsed| parsed.as_str() == t));
    if !type_ok {
        return Err(violation(
            format!("{path}.type"),
            "must be one of protest, riot, conflict, battle",
        ));
    }

    if props.get("source").and_then(Value::as_str) != Some(FEATURE_SOURCE) {
        return Err(violation(format!("{path}.source"), "has unexpected value"));
    }

    check_nullable_string(props, "country", path)?;
    check_nullable_string(props, "externalLink", path)?;

    if let Some(time) = props.get("time") {
        check_timestamp(time, &format!("{path}.time"))?;
    }

    if let Some(range) = props.get("range") {
        let range_path = format!("{path}.range");
        let range = range
            .as_object()
            .ok_or_else(|| violation(&range_path, "must be an object"))?;
        for (key, value) in range {
            match key.as_str() {
                "start" | "end" => check_timestamp(value, &format!("{range_path}.{key}"))?,
                other => {
                    return Err(violation(
                        format!("{range_path}.{other}"),
                        "unexpected field",
                    ));
                }
            }
        }
    }

    Ok(id.to_string())
}

/// Validates a serialized event payload against the canonical GeoJSON shape.
///
/// Checks the envelope, each feature's geometry and properties, and that no
/// id occurs twice.
pub fn validate_feature_collection(payload: &Value) -> Result<()> {
    if payload.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        return Err(violation("type", "must be \"FeatureCollection\""));
    }
    let features = payload
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| violation("features", "must be an array"))?;

    let mut seen = HashSet::with_capacity(features.len());
    for (index, feature) in features.iter().enumerate() {
        let path = format!("features[{index}]");
        if feature.get("type").and_then(Value::as_str) != Some("Feature") {
            return Err(violation(format!("{path}.type"), "must be \"Feature\""));
        }
        check_geometry(feature.get("geometry"), &format!("{path}.geometry"))?;
        let id = check_properties(feature.get("properties"), &format!("{path}.properties"))?;
        if !seen.insert(id.clone()) {
            return Err(violation(
                format!("{path}.properties.id"),
                format!("duplicate id {id}"),
            ));
        }
    }

    Ok(())
}
