use std::convert::Infallible;
use std::sync::Arc;

use chrono::Local;
use hyper::{Body, Response, StatusCode};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use warp::{Filter, Rejection, Reply};

use crate::errors::GeoError;
use crate::middleware::{add_download_headers, cors_headers};
use crate::models::export_file_name;
use crate::services::ResolutionService;


#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub q: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

pub fn routes(
    service: Arc<ResolutionService>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let health_check = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| "OK");

    let resolve_route = warp::path("resolve")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<ResolveQuery>())
        .and(with_service(service.clone()))
        .and_then(resolve);

    let export_route = warp::path("export")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<ResolveQuery>())
        .and(with_service(service))
        .and_then(export);

    health_check
        .or(resolve_route)
        .or(export_route)
        .recover(handle_rejection)
        .with(warp::reply::with::headers(cors_headers()))
}

fn with_service(
    service: Arc<ResolutionService>,
) -> impl Filter<Extract = (Arc<ResolutionService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

pub async fn resolve(
    params: ResolveQuery,
    service: Arc<ResolutionService>,
) -> Result<impl Reply, Rejection> {
    let results = service
        .resolve(&params.q)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&results))
}

/// First result as a downloadable JSON file.
pub async fn export(
    params: ResolveQuery,
    service: Arc<ResolutionService>,
) -> Result<impl Reply, Rejection> {
    let results = service
        .resolve(&params.q)
        .await
        .map_err(warp::reject::custom)?;
    let first = results
        .into_iter()
        .next()
        .ok_or_else(|| warp::reject::custom(GeoError::location_not_found(params.q.as_str())))?;

    let body = first
        .to_export_json()
        .map_err(|e| warp::reject::custom(GeoError::wrap("Export failed", e)))?;

    let mut response = Response::new(Body::from(body));
    add_download_headers(response.headers_mut(), &export_file_name(Local::now()));
    Ok(response)
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, error, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "Not Found".to_string())
    } else if let Some(e) = err.find::<GeoError>() {
        (status_for(e), e.kind(), e.user_message())
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (
            StatusCode::BAD_REQUEST,
            "validation_error",
            "Invalid input: missing query parameter 'q'".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "Method not allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {err:?}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "An unexpected error occurred. Please try again.".to_string(),
        )
    };

    let body = warp::reply::json(&ErrorBody { error, message });
    Ok(warp::reply::with_status(body, code))
}

fn status_for(err: &GeoError) -> StatusCode {
    match err {
        GeoError::Validation { .. } => {
            warn!("Validation error: {err}");
            StatusCode::BAD_REQUEST
        }
        GeoError::InvalidCoordinates { .. } => {
            warn!("Invalid coordinates: {err}");
            StatusCode::BAD_REQUEST
        }
        GeoError::LocationNotFound { .. } => {
            warn!("Location not found");
            StatusCode::NOT_FOUND
        }
        GeoError::RateLimitExceeded { .. } => {
            warn!("Rate limit exceeded");
            StatusCode::TOO_MANY_REQUESTS
        }
        GeoError::ApiConnection { .. } if err.is_timeout() => {
            error!("API connection error: {err}");
            StatusCode::GATEWAY_TIMEOUT
        }
        GeoError::ApiConnection { .. } | GeoError::InvalidResponse { .. } => {
            error!("Service error: {err}");
            StatusCode::BAD_GATEWAY
        }
    }
}
