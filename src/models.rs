use std::time::Instant;

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::{MAP_SEARCH_URL, MAX_ADDRESS_DISPLAY_LENGTH};

pub const POSTAL_CODE_UNAVAILABLE: &str = "—";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultStatus {
    #[serde(rename = "OK")]
    Ok,
}

/// One resolved location. Coordinates keep the exact text that was resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationResult {
    original_query: String,
    address: String,
    postal_code: Option<String>,
    latitude: String,
    longitude: String,
    status: ResultStatus,
    timestamp: String,
}

impl LocationResult {
    pub(crate) fn new(
        original_query: &str,
        address: String,
        postal_code: Option<String>,
        latitude: String,
        longitude: String,
        timestamp: &str,
    ) -> Self {
        Self {
            original_query: original_query.to_string(),
            address,
            postal_code: normalize_postal_code(postal_code),
            latitude,
            longitude,
            status: ResultStatus::Ok,
            timestamp: timestamp.to_string(),
        }
    }

    pub fn original_query(&self) -> &str {
        &self.original_query
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn postal_code(&self) -> Option<&str> {
        self.postal_code.as_deref()
    }

    pub fn latitude(&self) -> &str {
        &self.latitude
    }

    pub fn longitude(&self) -> &str {
        &self.longitude
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn postal_code_display(&self) -> &str {
        self.postal_code().unwrap_or(POSTAL_CODE_UNAVAILABLE)
    }

    pub fn coordinates(&self) -> (f64, f64) {
        (
            self.latitude.parse().unwrap_or(f64::NAN),
            self.longitude.parse().unwrap_or(f64::NAN),
        )
    }

    pub fn formatted_coordinates(&self) -> String {
        let (lat, lng) = self.coordinates();
        format!("{lat:.6}, {lng:.6}")
    }

    pub fn short_address(&self, max_chars: usize) -> String {
        if self.address.chars().count() <= max_chars {
            return self.address.clone();
        }
        let mut short: String = self
            .address
            .chars()
            .take(max_chars.saturating_sub(1))
            .collect();
        short.truncate(short.trim_end().len());
        short.push('…');
        short
    }

    pub fn display_address(&self) -> String {
        self.short_address(MAX_ADDRESS_DISPLAY_LENGTH)
    }

    pub fn map_url(&self) -> String {
        let query = format!("{},{}", self.latitude, self.longitude);
        match Url::parse_with_params(MAP_SEARCH_URL, &[("api", "1"), ("query", query.as_str())]) {
            Ok(url) => url.into(),
            Err(_) => MAP_SEARCH_URL.to_string(),
        }
    }

    pub fn to_export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

pub fn export_file_name(now: DateTime<Local>) -> String {
    format!("location_{}.json", now.format("%Y%m%d_%H%M%S"))
}

pub fn resolution_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn normalize_postal_code(postal_code: Option<String>) -> Option<String> {
    postal_code
        .map(|code| code.trim().to_string())
        .filter(|code| !code.is_empty() && code != POSTAL_CODE_UNAVAILABLE)
}

/// Cache key: endpoint, parameters sorted by name, and the language flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    endpoint: String,
    params: Vec<(String, String)>,
    force_english: bool,
}

impl CacheKey {
    pub fn new(endpoint: &str, params: &[(&str, String)], force_english: bool) -> Self {
        let mut params: Vec<(String, String)> = params
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        params.sort();
        Self {
            endpoint: endpoint.to_string(),
            params,
            force_english,
        }
    }
}

pub struct CacheEntry {
    pub payload: Value,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}
