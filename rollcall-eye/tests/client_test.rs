//! Tests for DetectionClient against a mock detection service

use bytes::Bytes;
use image::RgbImage;
use mockito::Matcher;
use rollcall_core::Point;
use rollcall_eye::capture::{CaptureEncoder, CaptureFrame};
use rollcall_eye::client::{DetectionClient, Detector};
use rollcall_eye::config::{CaptureConfig, ScannerConfig};
use rollcall_eye::debug_log::DebugLog;
use rollcall_eye::error::ScanError;

fn config_for(url: &str) -> ScannerConfig {
    ScannerConfig {
        api_url: url.to_string(),
        request_timeout_ms: 2_000,
        ..ScannerConfig::default()
    }
}

fn frame() -> CaptureFrame {
    CaptureEncoder::new(&CaptureConfig {
        target_width: 32,
        target_height: 24,
        jpeg_quality: 60,
    })
    .encode(&RgbImage::new(64, 48))
    .unwrap()
}

#[tokio::test]
async fn test_detect_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/scan")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Regex(r#"^\{"image":"data:image/jpeg;base64,[A-Za-z0-9+/=]+"\}$"#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"data":"student-42","type":"QRCODE","polygon":[[0,0],[10,0],[10,10],[0,10]]}]"#)
        .create_async()
        .await;

    let client = DetectionClient::new(&config_for(&server.url())).unwrap();
    let codes = client.detect(&frame()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(codes.len(), 1);
    assert_eq!(codes[0].id, "student-42");
    assert_eq!(codes[0].polygon[2], Point::new(10.0, 10.0));
}

#[tokio::test]
async fn test_detect_empty_response() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/scan")
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let client = DetectionClient::new(&config_for(&server.url())).unwrap();
    assert!(client.detect(&frame()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_detect_service_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/scan")
        .with_status(500)
        .with_body("internal error")
        .create_async()
        .await;

    let client = DetectionClient::new(&config_for(&server.url())).unwrap();
    match client.detect(&frame()).await {
        Err(ScanError::Service { status, message }) => {
            assert_eq!(status, 500);
            assert!(message.contains("internal error"));
        }
        other => panic!("Expected Service error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_detect_logs_every_response_status() {
    let mut server = mockito::Server::new_async().await;
    let ok = server
        .mock("POST", "/scan")
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let log = DebugLog::new(10);
    let client = DetectionClient::new(&config_for(&server.url()))
        .unwrap()
        .with_debug_log(log.clone());
    client.detect(&frame()).await.unwrap();
    ok.remove_async().await;

    let _down = server
        .mock("POST", "/scan")
        .with_status(502)
        .create_async()
        .await;
    assert!(client.detect(&frame()).await.is_err());

    let endpoint = format!("Attempting to fetch: {}", client.endpoint());
    assert_eq!(
        log.entries(),
        vec![
            endpoint.clone(),
            "Response status: 200".to_string(),
            endpoint,
            "Response status: 502".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_detect_skips_unusable_codes() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/scan")
        .with_status(200)
        .with_body(
            r#"[{"data":"student-1","position":{"x":10,"y":20}},
                {"data":"broken","polygon":[[0,0]]},
                {"data":"student-2","polygon":[[0,0],[8,0],[8,8],[0,8]]}]"#,
        )
        .create_async()
        .await;

    let client = DetectionClient::new(&config_for(&server.url())).unwrap();
    let codes = client.detect(&frame()).await.unwrap();
    let ids: Vec<&str> = codes.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["student-1", "student-2"]);
}

#[tokio::test]
async fn test_detect_protocol_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/scan")
        .with_status(200)
        .with_body(r#"{"unexpected":"object"}"#)
        .create_async()
        .await;

    let client = DetectionClient::new(&config_for(&server.url())).unwrap();
    assert!(matches!(client.detect(&frame()).await, Err(ScanError::Protocol(_))));
}

#[tokio::test]
async fn test_detect_network_error() {
    let client = DetectionClient::new(&config_for("http://127.0.0.1:1")).unwrap();
    assert!(matches!(client.detect(&frame()).await, Err(ScanError::Network(_))));
}

#[tokio::test]
async fn test_detect_does_not_retry() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/scan")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let client = DetectionClient::new(&config_for(&server.url())).unwrap();
    let _ = client.detect(&frame()).await;
    mock.assert_async().await;
}

#[test]
fn test_endpoint_from_config() {
    let client = DetectionClient::new(&config_for("https://scan.example/")).unwrap();
    assert_eq!(client.endpoint(), "https://scan.example/scan");
}

#[test]
fn test_data_url_of_empty_frame() {
    let frame = CaptureFrame {
        jpeg: Bytes::new(),
        native_width: 1,
        native_height: 1,
        width: 1,
        height: 1,
    };
    assert_eq!(frame.to_data_url(), "data:image/jpeg;base64,");
}
