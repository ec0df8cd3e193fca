//! Query, coordinate, and upstream-response validation.
//!
//! Everything here is pure: no I/O, no shared state. Failures are reported
//! as [`GeoError::Validation`] or [`GeoError::InvalidCoordinates`].

use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde_json::{Map, Value};

use crate::config::{CoordinateBounds, QueryLimits};
use crate::errors::{GeoError, Result};

lazy_static! {
    // Word characters, whitespace, the Hebrew block, quotes, and . , ( ) + -
    static ref DISALLOWED_CHARS: Regex =
        Regex::new(r#"[^\w\s\x{0590}-\x{05FF}"'.,()+\-]"#).expect("valid sanitize pattern");

    // "31.7683, 35.2137" or "31 35"
    static ref BARE_PAIR: Regex = Regex::new(
        r"^\s*([-+]?[0-9]{1,3}(?:\.[0-9]+)?)\s*[,\s]\s*([-+]?[0-9]{1,3}(?:\.[0-9]+)?)\s*$"
    )
    .expect("valid coordinate pattern");

    // "lat: 31.7683, lon: 35.2137"
    static ref LABELED_PAIR: Regex = Regex::new(
        r"(?i)^\s*lat(?:itude)?\s*[:=]\s*([-+]?[0-9]{1,3}(?:\.[0-9]+)?)\s*[,\s]+(?:lon|lng|longitude)\s*[:=]\s*([-+]?[0-9]{1,3}(?:\.[0-9]+)?)\s*$"
    )
    .expect("valid labeled coordinate pattern");
}

/// Outcome of looking at a query as a possible coordinate pair.
#[derive(Debug)]
pub enum QueryKind {
    Coordinates { lat: f64, lng: f64 },
    NotCoordinates,
    /// Shaped like a coordinate pair but the values are unusable.
    Malformed(GeoError),
}

/// Trims `query` and checks it against `limits`. Returns the trimmed text.
pub fn validate_query(query: &str, limits: &QueryLimits) -> Result<String> {
    if query.is_empty() {
        return Err(GeoError::validation("Query cannot be empty", Some("query")));
    }

    let query = query.trim();
    let length = query.chars().count();

    if length == 0 || length < limits.min_length {
        return Err(GeoError::validation(
            format!("Query too short (min {} characters)", limits.min_length),
            Some("query"),
        ));
    }

    if length > limits.max_length {
        return Err(GeoError::validation(
            format!("Query too long (max {} characters)", limits.max_length),
            Some("query"),
        ));
    }

    Ok(query.to_string())
}

/// Replaces characters outside the whitelist with spaces, then collapses
/// whitespace runs. Idempotent.
pub fn sanitize_query(query: &str) -> String {
    let replaced = DISALLOWED_CHARS.replace_all(query, " ");
    let sanitized = replaced.split_whitespace().collect::<Vec<_>>().join(" ");

    if sanitized != query {
        debug!("Query sanitized");
    }
    sanitized
}

/// Parses both values and checks them against `bounds`.
pub fn validate_coordinates(lat: &str, lng: &str, bounds: &CoordinateBounds) -> Result<(f64, f64)> {
    let (lat_value, lng_value) = match (lat.trim().parse::<f64>(), lng.trim().parse::<f64>()) {
        (Ok(lat), Ok(lng)) => (lat, lng),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Invalid coordinate format: lat={lat}, lng={lng}");
            return Err(GeoError::InvalidCoordinates {
                message: format!("Coordinates must be numbers: {e}"),
                lat: None,
                lng: None,
            });
        }
    };
    check_coordinate_range(lat_value, lng_value, bounds)
}

pub fn check_coordinate_range(lat: f64, lng: f64, bounds: &CoordinateBounds) -> Result<(f64, f64)> {
    if !(bounds.min_latitude..=bounds.max_latitude).contains(&lat) {
        warn!("Latitude out of range: {lat}");
        return Err(GeoError::invalid_coordinates(
            lat,
            lng,
            format!(
                "Latitude must be between {} and {}",
                bounds.min_latitude, bounds.max_latitude
            ),
        ));
    }

    if !(bounds.min_longitude..=bounds.max_longitude).contains(&lng) {
        warn!("Longitude out of range: {lng}");
        return Err(GeoError::invalid_coordinates(
            lat,
            lng,
            format!(
                "Longitude must be between {} and {}",
                bounds.min_longitude, bounds.max_longitude
            ),
        ));
    }

    debug!("Coordinates validated: {lat:.6}, {lng:.6}");
    Ok((lat, lng))
}

/// Classifies the whole query. Only the bare and labeled pair shapes count;
/// anything else is `NotCoordinates`.
pub fn classify_query(query: &str, bounds: &CoordinateBounds) -> QueryKind {
    let normalized = query.trim();

    let captures = [&*BARE_PAIR, &*LABELED_PAIR]
        .iter()
        .find_map(|pattern| pattern.captures(normalized));

    let Some(captures) = captures else {
        return QueryKind::NotCoordinates;
    };

    match validate_coordinates(&captures[1], &captures[2], bounds) {
        Ok((lat, lng)) => {
            info!("Extracted coordinates: {lat}, {lng}");
            QueryKind::Coordinates { lat, lng }
        }
        Err(err) => {
            debug!("Query looks like coordinates but values are invalid");
            QueryKind::Malformed(err)
        }
    }
}

/// In `strict` mode a malformed pair is an error; otherwise it is treated
/// as "not coordinates" so the caller falls through to address search.
pub fn parse_from_query(
    query: &str,
    strict: bool,
    bounds: &CoordinateBounds,
) -> Result<Option<(f64, f64)>> {
    match classify_query(query, bounds) {
        QueryKind::Coordinates { lat, lng } => Ok(Some((lat, lng))),
        QueryKind::NotCoordinates => Ok(None),
        QueryKind::Malformed(err) if strict => Err(err),
        QueryKind::Malformed(_) => Ok(None),
    }
}

pub fn validate_search_response(data: &Value) -> Result<&Vec<Value>> {
    let items = data
        .as_array()
        .ok_or_else(|| GeoError::validation("Expected list response from API", None))?;
    debug!("Search response validated: {} results", items.len());
    Ok(items)
}

pub fn validate_reverse_response(data: &Value) -> Result<&Map<String, Value>> {
    let object = data
        .as_object()
        .ok_or_else(|| GeoError::validation("Expected dict response from reverse API", None))?;

    if !object.contains_key("display_name") {
        return Err(GeoError::validation(
            "Missing 'display_name' in API response",
            None,
        ));
    }

    debug!("Reverse geocoding response validated");
    Ok(object)
}
