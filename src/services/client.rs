use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{ACCEPT_LANGUAGE, RETRY_AFTER, USER_AGENT};
use hyper::{Body, Client, HeaderMap, Method, Request, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::time::timeout;
use url::Url;

use crate::config::GeocoderConfig;
use crate::errors::{GeoError, Result};
use crate::models::CacheKey;
use crate::services::cache::ResponseCache;
use crate::services::rate_limiter::RateLimiter;

const ENGLISH_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

type HttpsClient = Client<HttpsConnector<HttpConnector>>;

/// Fetches and parses upstream JSON. Cache hits never touch the rate limiter.
pub struct GeocodingClient {
    http: HttpsClient,
    limiter: Arc<RateLimiter>,
    cache: Option<Arc<ResponseCache>>,
    user_agent: String,
    request_timeout: Duration,
}

impl GeocodingClient {
    pub fn new(
        config: &GeocoderConfig,
        limiter: Arc<RateLimiter>,
        cache: Option<Arc<ResponseCache>>,
    ) -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();

        Self {
            http: Client::builder().build(https),
            limiter,
            cache,
            user_agent: config.user_agent.clone(),
            request_timeout: config.request_timeout(),
        }
    }

    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        force_english: bool,
    ) -> Result<Value> {
        let key = CacheKey::new(endpoint, params, force_english);

        if let Some(cache) = &self.cache {
            if let Some(payload) = cache.get(&key).await {
                debug!("Cache hit for {endpoint}");
                return Ok(payload);
            }
        }

        // One wait at most; a miss afterwards is logged and the call still goes
        // out. Only the upstream's own 429 becomes `RateLimitExceeded`.
        if !self.limiter.acquire(true).await {
            warn!("Rate limiter still empty after waiting, sending request to {endpoint}");
        }

        let payload = self.send(endpoint, params, force_english).await?;

        if let Some(cache) = &self.cache {
            cache.insert(key, payload.clone()).await;
        }
        Ok(payload)
    }

    async fn send(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        force_english: bool,
    ) -> Result<Value> {
        let request = self.build_request(endpoint, params, force_english)?;
        debug!("API request to: {endpoint}");

        let (status, headers, body) = match timeout(self.request_timeout, self.execute(request)).await {
            Ok(result) => result?,
            Err(elapsed) => {
                error!(
                    "Request timeout after {:.1}s",
                    self.request_timeout.as_secs_f64()
                );
                return Err(GeoError::timeout(self.request_timeout, elapsed));
            }
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limit exceeded (429)");
            return Err(GeoError::RateLimitExceeded {
                wait_time: retry_after(&headers),
            });
        }

        if !status.is_success() {
            error!("HTTP error: {}", status.as_u16());
            return Err(GeoError::connection(
                format!("HTTP error: {}", status.as_u16()),
                Some(status.as_u16()),
            ));
        }

        let payload: Value = serde_json::from_slice(&body).map_err(|e| {
            error!("Invalid JSON response received: {e}");
            GeoError::invalid_response("Invalid JSON response from API")
        })?;

        info!("API response successful: {}", payload_kind(&payload));
        Ok(payload)
    }

    fn build_request(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        force_english: bool,
    ) -> Result<Request<Body>> {
        let mut query: Vec<(&str, &str)> = params
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect();
        if force_english {
            query.push(("accept-language", "en"));
        }

        let url = Url::parse_with_params(endpoint, &query)
            .map_err(|e| GeoError::wrap("Request failed", e))?;
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e| GeoError::wrap("Request failed", e))?;

        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(USER_AGENT, self.user_agent.as_str());
        if force_english {
            builder = builder.header(ACCEPT_LANGUAGE, ENGLISH_ACCEPT_LANGUAGE);
        }

        builder
            .body(Body::empty())
            .map_err(|e| GeoError::wrap("Request failed", e))
    }

    async fn execute(&self, request: Request<Body>) -> Result<(StatusCode, HeaderMap, Bytes)> {
        let response = self.http.request(request).await.map_err(|e| {
            error!("Request failed: {e}");
            GeoError::wrap("Request failed", e)
        })?;

        let (parts, body) = response.into_parts();
        let body = hyper::body::to_bytes(body).await.map_err(|e| {
            error!("Error reading response body: {e}");
            GeoError::wrap("Request failed", e)
        })?;

        Ok((parts.status, parts.headers, body))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn payload_kind(payload: &Value) -> String {
    match payload {
        Value::Array(items) => format!("list of {}", items.len()),
        Value::Object(_) => "object".to_string(),
        other => format!("{other}"),
    }
}
