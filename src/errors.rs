use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T, E = GeoError> = std::result::Result<T, E>;

/// The closed set of failures a lookup can end in.
///
/// `Display` carries the machine-oriented message; [`GeoError::user_message`]
/// is what a person should see.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<&'static str>,
    },

    #[error("{message}")]
    InvalidCoordinates {
        message: String,
        lat: Option<f64>,
        lng: Option<f64>,
    },

    #[error("Location not found for query: {query}")]
    LocationNotFound { query: String },

    #[error("API rate limit exceeded")]
    RateLimitExceeded { wait_time: Option<Duration> },

    #[error("{message}")]
    ApiConnection {
        message: String,
        status_code: Option<u16>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("{message}")]
    InvalidResponse { message: String },
}

impl GeoError {
    pub fn validation(message: impl Into<String>, field: Option<&'static str>) -> Self {
        Self::Validation {
            message: message.into(),
            field,
        }
    }

    pub fn invalid_coordinates(lat: f64, lng: f64, message: impl Into<String>) -> Self {
        Self::InvalidCoordinates {
            message: message.into(),
            lat: Some(lat),
            lng: Some(lng),
        }
    }

    pub fn location_not_found(query: impl Into<String>) -> Self {
        Self::LocationNotFound {
            query: query.into(),
        }
    }

    pub fn connection(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::ApiConnection {
            message: message.into(),
            status_code,
            source: None,
        }
    }

    /// Folds a foreign error into `ApiConnection`, keeping it as the source.
    pub fn wrap<E>(message: impl Into<String>, err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::ApiConnection {
            message: message.into(),
            status_code: None,
            source: Some(err.into()),
        }
    }

    pub fn timeout(after: Duration, elapsed: tokio::time::error::Elapsed) -> Self {
        Self::wrap(
            format!("Request timed out after {:.1} seconds", after.as_secs_f64()),
            elapsed,
        )
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::InvalidCoordinates { .. } => "invalid_coordinates",
            Self::LocationNotFound { .. } => "location_not_found",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::ApiConnection { .. } => "api_connection_error",
            Self::InvalidResponse { .. } => "invalid_response",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message, .. } => format!("Invalid input: {message}"),
            Self::InvalidCoordinates { message, .. } => {
                format!("Invalid GPS coordinates. {message}.")
            }
            Self::LocationNotFound { .. } => {
                "Location not found. Try different search terms or check spelling.".to_string()
            }
            Self::RateLimitExceeded { .. } => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            Self::ApiConnection { .. } => {
                "Unable to connect to location service. Please check your internet connection."
                    .to_string()
            }
            Self::InvalidResponse { .. } => {
                "Received unexpected response from location service. Please try again."
                    .to_string()
            }
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiConnection { status_code, .. } => *status_code,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ApiConnection {
                source: Some(source),
                ..
            } => source.is::<tokio::time::error::Elapsed>(),
            _ => false,
        }
    }
}

impl warp::reject::Reject for GeoError {}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
