pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod validators;

pub use config::GeocoderConfig;
pub use errors::{GeoError, Result};
pub use models::{LocationResult, ResultStatus};
pub use services::{GeocodingClient, RateLimiter, ResolutionService, ResponseCache};
