//! HTTP surface tests, driving the router in-process.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use candle_core::Device;
use dfscan_adapters::http::{router, HttpConfig};
use dfscan_core::{FrameAnalyzer, FrameScorer, ModelPool, Preprocessor};
use dfscan_test_support::{FailingScorer, MockScorer, SyntheticFrameBuilder};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "dfscan-test-boundary";

fn app_with(scorers: Vec<Box<dyn FrameScorer>>, config: &HttpConfig) -> Router {
    let pool = ModelPool::from_scorers(scorers).unwrap();
    let analyzer = FrameAnalyzer::new(pool, Preprocessor::new(64, Device::Cpu));
    router(Arc::new(analyzer), config).unwrap()
}

fn app(scorers: Vec<Box<dyn FrameScorer>>) -> Router {
    app_with(scorers, &HttpConfig::default())
}

fn multipart_body(field: &str, filename: Option<&str>, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    let disposition = match filename {
        Some(f) => format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{f}\"\r\n"),
        None => format!("Content-Disposition: form-data; name=\"{field}\"\r\n"),
    };
    body.extend_from_slice(disposition.as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload(path: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn frame_upload(path: &str) -> Request<Body> {
    let png = SyntheticFrameBuilder::png_bytes(120, 90, [40, 80, 120]);
    upload(path, multipart_body("file", Some("frame.png"), &png))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_root_message() {
    let app = app(vec![Box::new(MockScorer::new(0.0))]);
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();

    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("Deepfake Server Running"));
}

#[tokio::test]
async fn test_analyze_frame_unified_schema() {
    let app = app(vec![
        Box::new(MockScorer::from_probability(0.8)),
        Box::new(MockScorer::from_probability(0.6)),
    ]);

    let (status, json) = send(&app, frame_upload("/analyze-frame/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!((json["deepfake_probability"].as_f64().unwrap() - 0.7).abs() < 1e-5);
    assert_eq!(json["result"], "high deepfake probability");
    assert_eq!(json["verdict"], "high");
    assert_eq!(json["model_probabilities"].as_array().unwrap().len(), 2);
    assert!(json["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_route_without_trailing_slash() {
    let app = app(vec![Box::new(MockScorer::from_probability(0.1))]);
    let (status, json) = send(&app, frame_upload("/analyze-frame")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["verdict"], "low");
    assert_eq!(json["result"], "low deepfake probability");
}

#[tokio::test]
async fn test_first_named_file_field_is_accepted() {
    let app = app(vec![Box::new(MockScorer::new(0.0))]);
    let png = SyntheticFrameBuilder::png_bytes(10, 10, [0, 0, 0]);
    let request = upload("/analyze-frame/", multipart_body("image", Some("x.png"), &png));

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_file_field_is_bad_request() {
    let app = app(vec![Box::new(MockScorer::new(0.0))]);
    let request = upload("/analyze-frame/", multipart_body("note", None, b"hello"));

    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
    assert!(json["error"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn test_non_multipart_body_is_bad_request() {
    let app = app(vec![Box::new(MockScorer::new(0.0))]);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/analyze-frame/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_undecodable_upload_then_valid_upload() {
    let app = app(vec![Box::new(MockScorer::from_probability(0.3))]);

    let garbage = upload(
        "/analyze-frame/",
        multipart_body("file", Some("frame.png"), &SyntheticFrameBuilder::garbage_bytes()),
    );
    let (status, json) = send(&app, garbage).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("decode"));

    let (status, json) = send(&app, frame_upload("/analyze-frame/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_scorer_failure_is_server_error() {
    let app = app(vec![Box::new(FailingScorer::new("device lost"))]);
    let (status, json) = send(&app, frame_upload("/analyze-frame/")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], "error");
    assert!(json["error"].as_str().unwrap().contains("device lost"));
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let config = HttpConfig {
        max_upload_bytes: 1024,
        ..HttpConfig::default()
    };
    let app = app_with(vec![Box::new(MockScorer::new(0.0))], &config);
    let request = upload(
        "/analyze-frame/",
        multipart_body("file", Some("big.bin"), &vec![7u8; 8 * 1024]),
    );

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_cors_preflight_allows_configured_origin() {
    let app = app(vec![Box::new(MockScorer::new(0.0))]);
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/analyze-frame/")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-requested-with")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let headers = response.headers();
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
        "x-requested-with"
    );
}

#[tokio::test]
async fn test_cors_ignores_other_origins() {
    let app = app(vec![Box::new(MockScorer::new(0.0))]);
    let request = Request::builder()
        .uri("/")
        .header(header::ORIGIN, "http://evil.example")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[test]
fn test_invalid_origin_is_rejected() {
    let pool = ModelPool::from_scorers(vec![Box::new(MockScorer::new(0.0))]).unwrap();
    let analyzer = Arc::new(FrameAnalyzer::new(pool, Preprocessor::new(8, Device::Cpu)));
    let config = HttpConfig {
        allowed_origin: "http://bad\norigin".to_string(),
        ..HttpConfig::default()
    };
    assert!(router(analyzer, &config).is_err());
}
