pub mod cache;
pub mod client;
pub mod rate_limiter;

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::config::GeocoderConfig;
use crate::errors::{GeoError, Result};
use crate::models::{resolution_timestamp, LocationResult};
use crate::validators::{
    check_coordinate_range, classify_query, sanitize_query, validate_coordinates, validate_query,
    validate_reverse_response, validate_search_response, QueryKind,
};

pub use cache::ResponseCache;
pub use client::GeocodingClient;
pub use rate_limiter::RateLimiter;

#[cfg(test)]
mod tests;

const UNKNOWN_ADDRESS: &str = "Unknown";

/// Turns one free-text query into resolved locations.
pub struct ResolutionService {
    client: GeocodingClient,
    config: GeocoderConfig,
}

impl ResolutionService {
    pub fn new(
        config: GeocoderConfig,
        limiter: Arc<RateLimiter>,
        cache: Option<Arc<ResponseCache>>,
    ) -> Self {
        let client = GeocodingClient::new(&config, limiter, cache);
        Self { client, config }
    }

    pub async fn resolve(&self, raw_query: &str) -> Result<Vec<LocationResult>> {
        let query = validate_query(raw_query, &self.config.query)?;
        let sanitized = sanitize_query(&query);
        if sanitized.is_empty() {
            return Err(GeoError::validation(
                "Query contains no searchable characters",
                Some("query"),
            ));
        }
        debug!("Search initiated");

        match self.classify(&query, &sanitized) {
            QueryKind::Coordinates { lat, lng } => {
                debug!("Query identified as coordinates");
                let result = self.reverse_geocode(lat, lng, &sanitized).await?;
                Ok(vec![result])
            }
            QueryKind::Malformed(err) => Err(err),
            QueryKind::NotCoordinates => {
                debug!("Searching by address");
                self.search(&sanitized).await
            }
        }
    }

    // The labeled form needs ':' or '=', which sanitizing strips, so the
    // trimmed input is looked at first and the sanitized text second.
    fn classify(&self, query: &str, sanitized: &str) -> QueryKind {
        match classify_query(query, &self.config.bounds) {
            QueryKind::NotCoordinates => classify_query(sanitized, &self.config.bounds),
            kind => kind,
        }
    }

    pub async fn reverse_geocode(&self, lat: f64, lng: f64, query: &str) -> Result<LocationResult> {
        let (lat, lng) = check_coordinate_range(lat, lng, &self.config.bounds)?;
        debug!("Reverse geocoding: {lat}, {lng}");

        let params = [
            ("lat", lat.to_string()),
            ("lon", lng.to_string()),
            ("format", "json".to_string()),
        ];
        let data = self
            .client
            .fetch(&self.config.reverse_url, &params, true)
            .await?;

        if is_empty_payload(&data) {
            return Err(GeoError::location_not_found(query));
        }
        let place = validate_reverse_response(&data)?;

        let address = place
            .get("display_name")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_ADDRESS)
            .to_string();

        let result = LocationResult::new(
            query,
            address,
            postal_code(place),
            lat.to_string(),
            lng.to_string(),
            &resolution_timestamp(),
        );
        debug!("Reverse geocoding successful: {}", result.display_address());
        Ok(result)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<LocationResult>> {
        let params = [
            ("q", query.to_string()),
            ("format", "json".to_string()),
            ("limit", self.config.max_search_results.to_string()),
            ("countrycodes", self.config.country_code.clone()),
            ("addressdetails", "1".to_string()),
        ];
        let data = self
            .client
            .fetch(&self.config.search_url, &params, true)
            .await?;

        if is_empty_payload(&data) {
            return Err(GeoError::location_not_found(query));
        }
        let items = validate_search_response(&data)?;

        let timestamp = resolution_timestamp();
        let mut results = Vec::with_capacity(items.len());
        let mut direct = 0;
        let mut enriched = 0;
        let mut fallback = 0;

        for item in items {
            let lat = coordinate_text(item.get("lat"));
            let lng = coordinate_text(item.get("lon"));
            let (Some(lat), Some(lng)) = (lat, lng) else {
                debug!("Skipping search hit without coordinates");
                continue;
            };

            let (lat_value, lng_value) =
                match validate_coordinates(&lat, &lng, &self.config.bounds) {
                    Ok(coordinates) => coordinates,
                    Err(err) => {
                        warn!("Skipping search hit with unusable coordinates: {err}");
                        continue;
                    }
                };

            let address = item
                .get("display_name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty());

            match address {
                Some(address) => {
                    let postal = match item.as_object().and_then(postal_code) {
                        Some(code) => Some(code),
                        None => {
                            enriched += 1;
                            self.lookup_postal_code(lat_value, lng_value).await
                        }
                    };
                    results.push(LocationResult::new(
                        query,
                        address.to_string(),
                        postal,
                        lat,
                        lng,
                        &timestamp,
                    ));
                    direct += 1;
                }
                None => {
                    let result = self.reverse_geocode(lat_value, lng_value, query).await?;
                    results.push(result);
                    fallback += 1;
                }
            }
        }

        if results.is_empty() {
            return Err(GeoError::location_not_found(query));
        }

        info!(
            "Search successful: {} results ({direct} direct, {enriched} postal lookups, {fallback} fallback reverse)",
            results.len()
        );
        for result in &results {
            debug!("  {}", result.display_address());
        }
        Ok(results)
    }

    /// Best-effort postal code for a point. Failures are logged and read as
    /// "unavailable"; they never abort the result being enriched.
    async fn lookup_postal_code(&self, lat: f64, lng: f64) -> Option<String> {
        let params = [
            ("lat", lat.to_string()),
            ("lon", lng.to_string()),
            ("format", "json".to_string()),
            ("addressdetails", "1".to_string()),
        ];
        match self.client.fetch(&self.config.reverse_url, &params, true).await {
            Ok(data) => data.as_object().and_then(postal_code),
            Err(err) => {
                warn!("Postal code lookup failed: {err}");
                None
            }
        }
    }
}

/// `None`, `{}`, `[]`, `""`, and the upstream's `{"error": ...}` reply all
/// mean nothing was found.
fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(object) => object.is_empty() || object.contains_key("error"),
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

fn postal_code(place: &Map<String, Value>) -> Option<String> {
    place
        .get("address")
        .and_then(|address| address.get("postcode"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
}

fn coordinate_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
