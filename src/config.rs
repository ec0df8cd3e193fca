use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::ConfigError;

pub const OSM_SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const OSM_REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";
pub const MAP_SEARCH_URL: &str = "https://www.google.com/maps/search/";
pub const USER_AGENT: &str = "GeoLookup/2.0";
pub const REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const MAX_RETRIES: u32 = 3; // reserved, nothing retries yet
pub const RETRY_BACKOFF_FACTOR: f64 = 2.0; // reserved
pub const MAX_REQUESTS_PER_SECOND: f64 = 1.0; // provider usage policy
pub const MIN_REQUESTS_PER_SECOND: f64 = 1.0 / 3600.0;
pub const RATE_LIMIT_CAPACITY: u32 = 1;
pub const MAX_SEARCH_RESULTS: u32 = 3;
pub const DEFAULT_COUNTRY_CODE: &str = "il";
pub const CACHE_TTL_SECS: u64 = 3600; // 1 hour
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 3600;
pub const CACHE_MAX_ENTRIES: usize = 1000;
pub const MIN_QUERY_LENGTH: usize = 1;
pub const MAX_QUERY_LENGTH: usize = 500;
pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;
pub const MAX_ADDRESS_DISPLAY_LENGTH: usize = 60;
pub const LISTEN_ADDR: &str = "127.0.0.1:3030";

const ENV_PREFIX: &str = "GEO_LOOKUP_";

/// Inclusive latitude/longitude ranges accepted as coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoordinateBounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Default for CoordinateBounds {
    fn default() -> Self {
        Self {
            min_latitude: MIN_LATITUDE,
            max_latitude: MAX_LATITUDE,
            min_longitude: MIN_LONGITUDE,
            max_longitude: MAX_LONGITUDE,
        }
    }
}

/// Length limits for a raw query, counted in characters after trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            min_length: MIN_QUERY_LENGTH,
            max_length: MAX_QUERY_LENGTH,
        }
    }
}

/// Everything the resolution pipeline can be tuned with.
///
/// `Default` mirrors the constants above. [`GeocoderConfig::from_env`]
/// overlays `GEO_LOOKUP_*` variables on top of the defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub search_url: String,
    pub reverse_url: String,
    pub user_agent: String,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_factor: f64,
    pub max_requests_per_second: f64,
    pub rate_limit_capacity: u32,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub max_search_results: u32,
    pub country_code: String,
    pub query: QueryLimits,
    pub bounds: CoordinateBounds,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            search_url: OSM_SEARCH_URL.to_string(),
            reverse_url: OSM_REVERSE_URL.to_string(),
            user_agent: USER_AGENT.to_string(),
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            max_retries: MAX_RETRIES,
            retry_backoff_factor: RETRY_BACKOFF_FACTOR,
            max_requests_per_second: MAX_REQUESTS_PER_SECOND,
            rate_limit_capacity: RATE_LIMIT_CAPACITY,
            cache_ttl_secs: CACHE_TTL_SECS,
            cache_max_entries: CACHE_MAX_ENTRIES,
            max_search_results: MAX_SEARCH_RESULTS,
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            query: QueryLimits::default(),
            bounds: CoordinateBounds::default(),
        }
    }
}

impl GeocoderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source. `lookup` receives
    /// the full variable name, e.g. `GEO_LOOKUP_TIMEOUT_MS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = EnvSource { lookup };

        if let Some(url) = env.string("SEARCH_URL") {
            config.search_url = url;
        }
        if let Some(url) = env.string("REVERSE_URL") {
            config.reverse_url = url;
        }
        if let Some(agent) = env.string("USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(code) = env.string("COUNTRY_CODE") {
            config.country_code = code;
        }
        if let Some(ms) = env.parse("TIMEOUT_MS")? {
            config.request_timeout_ms = ms;
        }
        if let Some(retries) = env.parse("MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(factor) = env.parse("RETRY_BACKOFF")? {
            config.retry_backoff_factor = factor;
        }
        if let Some(rate) = env.parse("MAX_RATE")? {
            config.max_requests_per_second = rate;
        }
        if let Some(capacity) = env.parse("RATE_CAPACITY")? {
            config.rate_limit_capacity = capacity;
        }
        if let Some(ttl) = env.parse("CACHE_TTL_SECS")? {
            config.cache_ttl_secs = ttl;
        }
        if let Some(entries) = env.parse("CACHE_MAX_ENTRIES")? {
            config.cache_max_entries = entries;
        }
        if let Some(limit) = env.parse("MAX_RESULTS")? {
            config.max_search_results = limit;
        }
        if let Some(min) = env.parse("MIN_QUERY_LENGTH")? {
            config.query.min_length = min;
        }
        if let Some(max) = env.parse("MAX_QUERY_LENGTH")? {
            config.query.max_length = max;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_requests_per_second.is_finite()
            && self.max_requests_per_second >= MIN_REQUESTS_PER_SECOND)
        {
            return Err(ConfigError::Invalid(format!(
                "max_requests_per_second must be at least {MIN_REQUESTS_PER_SECOND}, got {}",
                self.max_requests_per_second
            )));
        }
        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "cache_ttl_secs must be at most {MAX_CACHE_TTL_SECS}, got {}",
                self.cache_ttl_secs
            )));
        }
        if !(self.retry_backoff_factor.is_finite() && self.retry_backoff_factor >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "retry_backoff_factor must be at least 1, got {}",
                self.retry_backoff_factor
            )));
        }
        if self.rate_limit_capacity == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit_capacity must be at least 1".to_string(),
            ));
        }
        if self.query.min_length > self.query.max_length {
            return Err(ConfigError::Invalid(format!(
                "query length range is empty ({}..={})",
                self.query.min_length, self.query.max_length
            )));
        }
        if self.bounds.min_latitude > self.bounds.max_latitude
            || self.bounds.min_longitude > self.bounds.max_longitude
        {
            return Err(ConfigError::Invalid(
                "coordinate bounds are inverted".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.string(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
                name: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
        }
    }
}
