#[cfg(test)]
mod tests {
    use crate::config::GeocoderConfig;
    use crate::errors::GeoError;
    use crate::services::{RateLimiter, ResolutionService, ResponseCache};
    use hyper::{Body, Response};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use warp::Filter;

    type Params = HashMap<String, String>;
    type Responder = Arc<dyn Fn(&Params) -> Response<Body> + Send + Sync>;

    #[derive(Debug, Clone)]
    struct Recorded {
        path: &'static str,
        params: Params,
        user_agent: Option<String>,
        accept_language: Option<String>,
    }

    struct Upstream {
        addr: SocketAddr,
        search_hits: Arc<AtomicUsize>,
        reverse_hits: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<Recorded>>>,
    }

    impl Upstream {
        fn search_hits(&self) -> usize {
            self.search_hits.load(Ordering::SeqCst)
        }

        fn reverse_hits(&self) -> usize {
            self.reverse_hits.load(Ordering::SeqCst)
        }

        fn requests_to(&self, path: &str) -> Vec<Recorded> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.path == path)
                .cloned()
                .collect()
        }

        fn config(&self) -> GeocoderConfig {
            GeocoderConfig {
                search_url: format!("http://{}/search", self.addr),
                reverse_url: format!("http://{}/reverse", self.addr),
                request_timeout_ms: 2_000,
                max_requests_per_second: 1_000.0,
                rate_limit_capacity: 100,
                ..GeocoderConfig::default()
            }
        }

        fn service(&self) -> ResolutionService {
            let config = self.config();
            let limiter = Arc::new(RateLimiter::from_config(&config));
            ResolutionService::new(config, limiter, None)
        }
    }

    fn json_reply(status: u16, body: Value) -> Response<Body> {
        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn respond(f: impl Fn(&Params) -> Response<Body> + Send + Sync + 'static) -> Responder {
        Arc::new(f)
    }

    fn fixed(status: u16, body: Value) -> Responder {
        respond(move |_| json_reply(status, body.clone()))
    }

    fn unused() -> Responder {
        fixed(500, json!({"error": "should not be called"}))
    }

    fn endpoint(
        path: &'static str,
        responder: Responder,
        hits: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<Recorded>>>,
    ) -> impl Filter<Extract = (Response<Body>,), Error = warp::Rejection> + Clone {
        warp::path(path)
            .and(warp::query::<Params>())
            .and(warp::header::optional::<String>("user-agent"))
            .and(warp::header::optional::<String>("accept-language"))
            .map(move |params: Params, user_agent, accept_language| {
                hits.fetch_add(1, Ordering::SeqCst);
                let response = responder(&params);
                requests.lock().unwrap().push(Recorded {
                    path,
                    params,
                    user_agent,
                    accept_language,
                });
                response
            })
    }

    fn spawn_upstream(search: Responder, reverse: Responder) -> Upstream {
        let search_hits = Arc::new(AtomicUsize::new(0));
        let reverse_hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let routes = endpoint("search", search, search_hits.clone(), requests.clone())
            .or(endpoint("reverse", reverse, reverse_hits.clone(), requests.clone()));
        let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        Upstream {
            addr,
            search_hits,
            reverse_hits,
            requests,
        }
    }

    fn jerusalem() -> Responder {
        fixed(
            200,
            json!({
                "display_name": "Jaffa Road, Jerusalem, Israel",
                "address": { "postcode": "9414501" }
            }),
        )
    }

    #[tokio::test]
    async fn test_coordinates_use_reverse_flow() {
        let upstream = spawn_upstream(unused(), jerusalem());

        let results = upstream.service().resolve("31.7683, 35.2137").await.unwrap();

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.latitude(), "31.7683");
        assert_eq!(result.longitude(), "35.2137");
        assert_eq!(result.coordinates(), (31.7683, 35.2137));
        assert_eq!(result.address(), "Jaffa Road, Jerusalem, Israel");
        assert_eq!(result.postal_code(), Some("9414501"));
        assert_eq!(result.original_query(), "31.7683, 35.2137");
        assert_eq!(upstream.search_hits(), 0);

        let reverse = upstream.requests_to("reverse");
        assert_eq!(reverse.len(), 1);
        let request = &reverse[0];
        assert_eq!(request.params["lat"], "31.7683");
        assert_eq!(request.params["lon"], "35.2137");
        assert_eq!(request.params["format"], "json");
        assert_eq!(request.params["accept-language"], "en");
        assert_eq!(request.user_agent.as_deref(), Some("GeoLookup/2.0"));
        assert_eq!(request.accept_language.as_deref(), Some("en-US,en;q=0.9"));
    }

    #[tokio::test]
    async fn test_valid_pairs_echo_coordinates() {
        let reverse = respond(|params| {
            json_reply(200, json!({ "display_name": format!("Point {}", params["lat"]) }))
        });
        let upstream = spawn_upstream(unused(), reverse);
        let service = upstream.service();

        let pairs = [
            (0.0, 0.0),
            (-90.0, -180.0),
            (90.0, 180.0),
            (32.0853, 34.7818),
            (-33.8688, 151.2093),
            (29.5577, 34.9519),
        ];
        for (lat, lng) in pairs {
            let results = service.resolve(&format!("{lat}, {lng}")).await.unwrap();
            assert_eq!(results.len(), 1);
            let (got_lat, got_lng) = results[0].coordinates();
            assert!((got_lat - lat).abs() < 1e-9, "lat for {lat}, {lng}");
            assert!((got_lng - lng).abs() < 1e-9, "lng for {lat}, {lng}");
        }
        assert_eq!(upstream.search_hits(), 0);
        assert_eq!(upstream.reverse_hits(), pairs.len());
    }

    #[tokio::test]
    async fn test_labeled_coordinates() {
        let upstream = spawn_upstream(unused(), jerusalem());

        let results = upstream
            .service()
            .resolve("lat: 31.7683, lon: 35.2137")
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].original_query(), "lat 31.7683, lon 35.2137");
        assert_eq!(upstream.search_hits(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_pair_never_searched() {
        let upstream = spawn_upstream(unused(), unused());
        let service = upstream.service();

        for query in ["999, 35", "999,999", "31.5, -181"] {
            let err = service.resolve(query).await.unwrap_err();
            assert!(matches!(err, GeoError::InvalidCoordinates { .. }), "{query}: {err:?}");
        }
        assert_eq!(upstream.search_hits(), 0);
        assert_eq!(upstream.reverse_hits(), 0);
    }

    #[tokio::test]
    async fn test_bad_length_rejected_before_network() {
        let upstream = spawn_upstream(unused(), unused());
        let service = upstream.service();
        let too_long = "a".repeat(501);

        for query in ["", "   ", "\t\n", too_long.as_str(), "@@@ ###"] {
            let err = service.resolve(query).await.unwrap_err();
            assert!(matches!(err, GeoError::Validation { .. }), "{query:?}: {err:?}");
        }
        assert_eq!(upstream.search_hits(), 0);
        assert_eq!(upstream.reverse_hits(), 0);
    }

    #[tokio::test]
    async fn test_search_params_and_order() {
        let search = fixed(
            200,
            json!([
                { "lat": "32.0970", "lon": "34.7740", "display_name": "Tel Aviv Port", "address": { "postcode": "6350601" } },
                { "lat": "32.0853", "lon": "34.7818", "display_name": "Tel Aviv-Yafo", "address": { "postcode": "6100000" } },
                { "lat": 31.0461, "lon": 34.8516, "display_name": "Israel", "address": { "postcode": "0000000" } }
            ]),
        );
        let upstream = spawn_upstream(search, unused());

        let results = upstream.service().resolve("Tel Aviv Port!!").await.unwrap();

        let addresses: Vec<_> = results.iter().map(|r| r.address()).collect();
        assert_eq!(addresses, ["Tel Aviv Port", "Tel Aviv-Yafo", "Israel"]);
        assert_eq!(results[2].latitude(), "31.0461");
        assert!(results.iter().all(|r| r.original_query() == "Tel Aviv Port"));
        assert_eq!(upstream.reverse_hits(), 0);

        let search = upstream.requests_to("search");
        let params = &search[0].params;
        assert_eq!(params["q"], "Tel Aviv Port");
        assert_eq!(params["format"], "json");
        assert_eq!(params["limit"], "3");
        assert_eq!(params["countrycodes"], "il");
        assert_eq!(params["addressdetails"], "1");
        assert_eq!(params["accept-language"], "en");
    }

    #[tokio::test]
    async fn test_missing_postal_code_filled_from_reverse() {
        let search = fixed(
            200,
            json!([{ "lat": "32.0745", "lon": "34.7920", "display_name": "Azrieli Center", "address": { "postcode": "" } }]),
        );
        let reverse = fixed(
            200,
            json!({ "display_name": "Azrieli Center, Tel Aviv", "address": { "postcode": "6701101" } }),
        );
        let upstream = spawn_upstream(search, reverse);

        let results = upstream.service().resolve("Azrieli Tower").await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].address(), "Azrieli Center");
        assert_eq!(results[0].postal_code(), Some("6701101"));

        let reverse = upstream.requests_to("reverse");
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].params["addressdetails"], "1");
        assert_eq!(reverse[0].params["lat"], "32.0745");
    }

    #[tokio::test]
    async fn test_postal_lookup_failure_degrades() {
        let search = fixed(
            200,
            json!([{ "lat": "32.0745", "lon": "34.7920", "display_name": "Azrieli Center" }]),
        );
        let upstream = spawn_upstream(search, fixed(503, json!({})));

        let results = upstream.service().resolve("Azrieli Tower").await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].postal_code(), None);
        assert_eq!(results[0].postal_code_display(), "—");
        assert_eq!(upstream.reverse_hits(), 1);
    }

    #[tokio::test]
    async fn test_hit_without_name_falls_back_to_reverse() {
        let search = fixed(
            200,
            json!([
                { "lat": "31.7683", "lon": "35.2137" },
                { "display_name": "No coordinates here" }
            ]),
        );
        let upstream = spawn_upstream(search, jerusalem());

        let results = upstream.service().resolve("Jaffa Road").await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].address(), "Jaffa Road, Jerusalem, Israel");
        assert_eq!(results[0].latitude(), "31.7683");
        assert_eq!(upstream.reverse_hits(), 1);
    }

    #[tokio::test]
    async fn test_empty_search_is_not_found() {
        let upstream = spawn_upstream(fixed(200, json!([])), unused());
        let err = upstream.service().resolve("Atlantis").await.unwrap_err();
        assert!(matches!(err, GeoError::LocationNotFound { ref query } if query == "Atlantis"));
    }

    #[tokio::test]
    async fn test_hits_without_coordinates_is_not_found() {
        let search = fixed(200, json!([{ "display_name": "Somewhere" }, { "lat": "31.7" }]));
        let upstream = spawn_upstream(search, unused());

        let err = upstream.service().resolve("Somewhere").await.unwrap_err();

        assert!(matches!(err, GeoError::LocationNotFound { .. }));
        assert_eq!(upstream.reverse_hits(), 0);
    }

    #[tokio::test]
    async fn test_non_list_search_response() {
        let upstream = spawn_upstream(fixed(200, json!({ "unexpected": true })), unused());
        let err = upstream.service().resolve("Haifa").await.unwrap_err();
        assert!(matches!(err, GeoError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_reverse_without_display_name() {
        let upstream = spawn_upstream(unused(), fixed(200, json!({ "address": {} })));
        let err = upstream.service().resolve("31.7683, 35.2137").await.unwrap_err();
        assert!(matches!(err, GeoError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_reverse_error_reply_is_not_found() {
        let upstream = spawn_upstream(unused(), fixed(200, json!({ "error": "Unable to geocode" })));
        let err = upstream.service().resolve("0, 0").await.unwrap_err();
        assert!(matches!(err, GeoError::LocationNotFound { .. }));
    }

    #[tokio::test]
    async fn test_429_is_rate_limit_error() {
        let search = respond(|_| {
            Response::builder()
                .status(429)
                .header("retry-after", "3")
                .body(Body::from("slow down"))
                .unwrap()
        });
        let upstream = spawn_upstream(search, unused());

        let err = upstream.service().resolve("Haifa").await.unwrap_err();

        match err {
            GeoError::RateLimitExceeded { wait_time } => {
                assert_eq!(wait_time, Some(Duration::from_secs(3)))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_500_is_connection_error_with_status() {
        let upstream = spawn_upstream(fixed(500, json!({})), unused());
        let err = upstream.service().resolve("Haifa").await.unwrap_err();
        assert!(matches!(err, GeoError::ApiConnection { .. }));
        assert_eq!(err.status_code(), Some(500));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let search = respond(|_| Response::builder().status(200).body(Body::from("<html>")).unwrap());
        let upstream = spawn_upstream(search, unused());

        let err = upstream.service().resolve("Haifa").await.unwrap_err();

        assert!(matches!(err, GeoError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_cache_hit_bypasses_rate_limiter() {
        let search = fixed(
            200,
            json!([{ "lat": "32.0970", "lon": "34.7740", "display_name": "Tel Aviv Port", "address": { "postcode": "6350601" } }]),
        );
        let upstream = spawn_upstream(search, unused());
        let config = GeocoderConfig {
            max_requests_per_second: 0.001,
            rate_limit_capacity: 1,
            ..upstream.config()
        };
        let limiter = Arc::new(RateLimiter::from_config(&config));
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60), 10));
        let service = ResolutionService::new(config, limiter.clone(), Some(cache.clone()));

        let first = service.resolve("Tel Aviv Port").await.unwrap();
        let start = Instant::now();
        let second = service.resolve("Tel Aviv Port").await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(first[0].address(), second[0].address());
        assert_eq!(upstream.search_hits(), 1);
        assert_eq!(cache.len().await, 1);
        // The only token went to the first, uncached request.
        assert!(!limiter.acquire(false).await);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_on_default_limiter_all_resolve() {
        let search = fixed(
            200,
            json!([{ "lat": "32.8191", "lon": "34.9983", "display_name": "Haifa", "address": { "postcode": "3100000" } }]),
        );
        let upstream = spawn_upstream(search, unused());
        let config = GeocoderConfig {
            max_requests_per_second: 1.0,
            rate_limit_capacity: 1,
            ..upstream.config()
        };
        let limiter = Arc::new(RateLimiter::from_config(&config));
        let sessions: Vec<_> = (0..3)
            .map(|_| ResolutionService::new(config.clone(), limiter.clone(), None))
            .collect();

        let outcomes =
            futures::future::join_all(sessions.iter().map(|service| service.resolve("Haifa"))).await;

        for outcome in &outcomes {
            let results = outcome.as_ref().expect("session should resolve");
            assert_eq!(results.len(), 1);
        }
        assert_eq!(upstream.search_hits(), 3);
    }

    #[tokio::test]
    async fn test_failed_request_is_not_cached() {
        let upstream = spawn_upstream(fixed(502, json!({})), unused());
        let config = upstream.config();
        let limiter = Arc::new(RateLimiter::from_config(&config));
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60), 10));
        let service = ResolutionService::new(config, limiter, Some(cache.clone()));

        assert!(service.resolve("Haifa").await.is_err());
        assert!(service.resolve("Haifa").await.is_err());

        assert_eq!(upstream.search_hits(), 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_timeout_is_connection_error_without_status() {
        let slow = warp::path("search").and_then(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<_, Infallible>(warp::reply::json(&Vec::<String>::new()))
        });
        let (addr, server) = warp::serve(slow).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let config = GeocoderConfig {
            search_url: format!("http://{addr}/search"),
            reverse_url: format!("http://{addr}/reverse"),
            request_timeout_ms: 100,
            max_requests_per_second: 1_000.0,
            rate_limit_capacity: 10,
            ..GeocoderConfig::default()
        };
        let limiter = Arc::new(RateLimiter::from_config(&config));
        let service = ResolutionService::new(config, limiter, None);

        let err = service.resolve("Haifa").await.unwrap_err();

        assert!(err.is_timeout(), "{err:?}");
        assert_eq!(err.status_code(), None);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_connection_error() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let config = GeocoderConfig {
            search_url: format!("http://{addr}/search"),
            reverse_url: format!("http://{addr}/reverse"),
            max_requests_per_second: 1_000.0,
            rate_limit_capacity: 10,
            ..GeocoderConfig::default()
        };
        let limiter = Arc::new(RateLimiter::from_config(&config));
        let service = ResolutionService::new(config, limiter, None);

        let err = service.resolve("Haifa").await.unwrap_err();

        assert!(matches!(err, GeoError::ApiConnection { status_code: None, .. }));
        assert!(std::error::Error::source(&err).is_some());
    }
}
