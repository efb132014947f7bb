//! Router tests driven through `oneshot`

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::all_unavailable;
use http_body_util::BodyExt;
use rstest::rstest;
use safeout::DataProcessor;
use safeout::api::{AppState, router};
use safeout::config::{LimitsConfig, ServerConfig};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn app_with_limits(limits: LimitsConfig) -> axum::Router {
    let processor = DataProcessor::new(all_unavailable())
        .with_radius_limits(limits.min_radius_meters, limits.max_radius_meters);
    router(
        AppState::new(Arc::new(processor), limits),
        &ServerConfig::default(),
    )
}

fn app() -> axum::Router {
    app_with_limits(LimitsConfig::default())
}

fn post_json(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/environmental-data")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], safeout::VERSION);
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_info_lists_registered_sources() {
    let response = app()
        .oneshot(Request::get("/api/v1/info").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let sources = json["data_sources"].as_array().unwrap();
    assert_eq!(sources.len(), 6);
    assert_eq!(sources[0]["type"], "precipitation");
    assert_eq!(json["limits"]["max_radius_meters"], 50_000);
    assert_eq!(json["limits"]["rate_limit"], "100 requests per minute");
    assert_eq!(json["grid_decoding"]["available"], cfg!(feature = "netcdf"));
    if !cfg!(feature = "netcdf") {
        assert!(json["grid_decoding"]["detail"].as_str().unwrap().contains("netcdf"));
    }
}

#[rstest]
#[case::latitude_out_of_range(r#"{"latitude": 95.0, "longitude": 0.0}"#)]
#[case::longitude_out_of_range(r#"{"latitude": 0.0, "longitude": -181.0}"#)]
#[case::radius_too_small(r#"{"latitude": 0.0, "longitude": 0.0, "radius_meters": 10}"#)]
#[case::radius_too_large(r#"{"latitude": 0.0, "longitude": 0.0, "radius_meters": 900000}"#)]
#[case::missing_longitude(r#"{"latitude": 0.0}"#)]
#[case::not_json("latitude=1")]
#[tokio::test]
async fn test_invalid_requests_are_rejected(#[case] body: &str) {
    let response = app().oneshot(post_json(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["detail"].is_string());
}

#[tokio::test]
async fn test_degraded_request_still_succeeds() {
    let response = app()
        .oneshot(post_json(
            r#"{"latitude": -27.5954, "longitude": -48.5480, "radius_meters": 5000}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["location"]["radius_meters"], 5000);
    assert_eq!(json["metadata"]["data_sources_queried"], 6);
    assert_eq!(json["metadata"]["data_sources_successful"], 0);
    assert_eq!(json["metadata"]["warnings"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_radius_defaults_from_limits() {
    let response = app()
        .oneshot(post_json(r#"{"latitude": 10.0, "longitude": 10.0}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["location"]["radius_meters"],
        LimitsConfig::default().default_radius_meters
    );
}

#[tokio::test]
async fn test_rate_limit_rejects_second_request() {
    let app = app_with_limits(LimitsConfig {
        rate_limit_per_minute: 1,
        ..LimitsConfig::default()
    });
    let body = r#"{"latitude": 10.0, "longitude": 10.0}"#;

    let first = app.clone().oneshot(post_json(body)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(post_json(body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key(header::RETRY_AFTER));
}
