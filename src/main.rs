use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use geo_lookup::{
    config::LISTEN_ADDR,
    handlers::routes,
    GeocoderConfig, RateLimiter, ResolutionService, ResponseCache,
};
use log::{error, info};
use warp::Filter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match GeocoderConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let listen = std::env::var("GEO_LOOKUP_LISTEN_ADDR").unwrap_or_else(|_| LISTEN_ADDR.to_string());
    let addr: SocketAddr = match listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid listen address {listen}: {e}");
            process::exit(1);
        }
    };

    // One limiter and one cache for the whole process.
    let limiter = Arc::new(RateLimiter::from_config(&config));
    let cache = Arc::new(ResponseCache::from_config(&config));
    info!(
        "Upstream {} at {} req/sec, cache ttl {}s",
        config.search_url, config.max_requests_per_second, config.cache_ttl_secs
    );
    let service = Arc::new(ResolutionService::new(config, limiter, Some(cache)));

    let routes = routes(service).with(warp::log("geo_lookup::access"));

    info!("Geo lookup running on http://{addr}");
    warp::serve(routes).run(addr).await;
}
