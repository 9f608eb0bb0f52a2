//! Integration tests for TraxClient against a mock service
//!
//! Each test starts its own wiremock server and points the client at
//! `<server>/api/v1`.

use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use trax_client::models::{DownloadOutcome, FilesResponse};
use trax_client::transport::{RequestSpec, ResponseBody};
use trax_client::{Algorithm, ClientError, Params, ResourceKind, TraxClient};
use trax_common::config::{ClientConfig, Credentials, ResponseFormat};
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AUTH: &str = "ApiKey test-key:test-secret";

fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig::for_base_url(
        Credentials::new("test-key", "test-secret"),
        &format!("{}/api/v1", server.uri()),
    )
    .unwrap()
}

fn client_for(server: &MockServer) -> TraxClient {
    TraxClient::new(config_for(server)).unwrap()
}

fn audio_file(id: u64) -> serde_json::Value {
    json!({
        "id": id,
        "file": format!("https://storage.example/{}.wav", id),
        "is_valid": true,
        "duration": -1,
        "channel_number": 2,
        "original_file_type": "wav",
        "resource_uri": format!("/api/v1/audiofile/{}/", id)
    })
}

#[tokio::test]
async fn test_upload_then_fetch_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/audiofile/"))
        .and(header("Authorization", AUTH))
        .and(body_string_contains("sample.wav"))
        .respond_with(ResponseTemplate::new(201).set_body_json(audio_file(7)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/audiofile/7/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(audio_file(7)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let audio = dir.path().join("sample.wav");
    std::fs::write(&audio, b"RIFF....WAVEfmt ").unwrap();

    let client = client_for(&server);
    let uploaded = client.upload(&audio, &Params::new()).await.unwrap();
    assert_eq!(uploaded.id, 7);
    assert_eq!(uploaded.is_valid, Some(true));

    let fetched = client.files(Some(uploaded.id), &Params::new()).await.unwrap();
    let single = fetched.as_single().expect("single record");
    assert_eq!(single.id, 7);
    assert_eq!(single.channel_number, Some(2));
}

#[tokio::test]
async fn test_files_listing_is_stable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/audiofile/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"limit": 20, "offset": 0, "total_count": 2, "next": null, "previous": null},
            "objects": [audio_file(1), audio_file(2)]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let first = client.files(None, &Params::new()).await.unwrap();
    let second = client.files(None, &Params::new()).await.unwrap();

    match &first {
        FilesResponse::Listing(listing) => {
            assert_eq!(listing.meta.total_count, 2);
            assert_eq!(listing.objects.len(), 2);
        }
        FilesResponse::Single(_) => panic!("expected a listing"),
    }
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_preanalysis_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/preanalysis/start/"))
        .and(query_param("file_id", "42"))
        .and(query_param("algo", "pitch"))
        .and(query_param("baseline", "v3"))
        .and(header("Authorization", AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 11,
            "input_file_id": 42,
            "algo": "pitch",
            "status": 0,
            "is_finished": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let job = client_for(&server)
        .preanalysis(42, Algorithm::Pitch, None, &Params::new())
        .await
        .unwrap();
    assert_eq!(job.id, 11);
    assert_eq!(job.input_file_id, 42);
}

#[tokio::test]
async fn test_preanalysis_consonant_tag_and_caller_override() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/preanalysis/start/"))
        .and(query_param("algo", "csnt"))
        .and(query_param("baseline", "v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 12,
            "input_file_id": 42
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut params = Params::new();
    params.insert("baseline".to_string(), "v2".to_string());

    let job = client_for(&server)
        .preanalysis(42, Algorithm::Consonant, Some("v3"), &params)
        .await
        .unwrap();
    assert_eq!(job.id, 12);
}

#[tokio::test]
async fn test_separation_with_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/separation/"))
        .and(query_param("file_id", "42"))
        .and(query_param("config_id", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 99,
            "input_file_id": 42,
            "config_id": 5,
            "status": "0"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let job = client_for(&server)
        .separation(42, Some(5), &Params::new())
        .await
        .unwrap();
    assert_eq!(job.id, 99);
    assert_eq!(job.config_id, Some(5));
    assert_eq!(job.status, 0);
}

#[tokio::test]
async fn test_status_path_per_resource_kind() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/separation/99/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 99,
            "status": 100,
            "extracted_file_id": 123
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/preanalysis/11/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 11,
            "status": 40
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let separation = client
        .status(ResourceKind::Separation, 99, &Params::new())
        .await
        .unwrap();
    assert!(separation.is_complete());
    assert_eq!(separation.extracted_file_id, Some(123));

    let preanalysis = client
        .status(ResourceKind::PreAnalysis, 11, &Params::new())
        .await
        .unwrap();
    assert_eq!(preanalysis.status, 40);
    assert!(!preanalysis.is_complete());
}

#[tokio::test]
async fn test_malformed_json_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/separation/1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .status(ResourceKind::Separation, 1, &Params::new())
        .await
        .unwrap_err();
    assert!(err.is_protocol(), "got {:?}", err);
    assert!(!err.is_transport());
}

#[tokio::test]
async fn test_error_status_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/audiofile/3/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .files(Some(3), &Params::new())
        .await
        .unwrap_err();
    assert!(err.is_protocol());
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_slow_response_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/separation/1/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": 1, "status": 0}))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let client =
        TraxClient::new(config_for(&server).with_timeout(Duration::from_millis(100))).unwrap();
    let err = client
        .status(ResourceKind::Separation, 1, &Params::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {:?}", err);
    assert!(!err.is_transport());
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Reserve a free port, then release it so nothing is listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = ClientConfig::for_base_url(
        Credentials::new("test-key", "test-secret"),
        &format!("http://127.0.0.1:{}/api/v1", port),
    )
    .unwrap();
    let err = TraxClient::new(config)
        .unwrap()
        .files(None, &Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_download_writes_body() {
    let server = MockServer::start().await;
    let audio = vec![0x52u8, 0x49, 0x46, 0x46, 1, 2, 3, 4, 5, 6];
    Mock::given(method("GET"))
        .and(path("/api/v1/audiofile/"))
        .and(query_param("pk", "123"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(audio.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out").join("extracted_123.wav");

    let outcome = client_for(&server)
        .download(123, &dest, &Params::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DownloadOutcome::Written {
            path: dest.clone(),
            bytes: audio.len() as u64
        }
    );
    assert_eq!(std::fs::read(&dest).unwrap(), audio);
}

#[tokio::test]
async fn test_download_error_status_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/audiofile/"))
        .and(query_param("pk", "404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("missing.wav");

    let outcome = client_for(&server)
        .download(404, &dest, &Params::new())
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Skipped { status: 404 });
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_annotation_artifact_written() {
    let server = MockServer::start().await;
    let artifact = json!({"pitch_annotation": "[[[0.0, 220.0]]]", "version": 3});
    Mock::given(method("GET"))
        .and(path("/api/v1/preanalysis/11/result/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(artifact.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("annotation_11.json");

    let outcome = client_for(&server)
        .annotation(11, &dest, &Params::new())
        .await
        .unwrap();
    assert!(outcome.is_written());

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&dest).unwrap()).unwrap();
    assert_eq!(written, artifact);
}

#[tokio::test]
async fn test_configuration_posts_json_body() {
    let server = MockServer::start().await;
    let payload = json!({"pitch_annotation": "[]", "consonant_annotation": [1, 2]});
    Mock::given(method("POST"))
        .and(path("/api/v1/configuration/"))
        .and(header("Authorization", AUTH))
        .and(body_json(payload.clone()))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 5,
            "resource_uri": "/api/v1/configuration/5/"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("merged.json");
    std::fs::write(&file, serde_json::to_string(&payload).unwrap()).unwrap();

    let configuration = client_for(&server)
        .configuration_from_file(&file, &Params::new())
        .await
        .unwrap();
    assert_eq!(configuration.id, 5);
}

/// Serve one 200 response declaring `declared` body bytes, writing `sent` of
/// them one at a time `gap` apart, then holding the connection open
async fn trickle_server(declared: usize, sent: usize, gap: Duration) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            declared
        );
        if socket.write_all(header.as_bytes()).await.is_err() {
            return;
        }
        for _ in 0..sent {
            tokio::time::sleep(gap).await;
            if socket.write_all(b"x").await.is_err() || socket.flush().await.is_err() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
    });

    port
}

fn local_client(port: u16, timeout: Duration) -> TraxClient {
    let config = ClientConfig::for_base_url(
        Credentials::new("test-key", "test-secret"),
        &format!("http://127.0.0.1:{}/api/v1", port),
    )
    .unwrap()
    .with_timeout(timeout);
    TraxClient::new(config).unwrap()
}

#[tokio::test]
async fn test_slow_but_active_download_completes() {
    // 10 bytes over ~600ms against a 200ms timeout; never idle for more than 60ms
    let port = trickle_server(10, 10, Duration::from_millis(60)).await;
    let client = local_client(port, Duration::from_millis(200));

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("slow.wav");

    let outcome = client.download(1, &dest, &Params::new()).await.unwrap();
    assert_eq!(
        outcome,
        DownloadOutcome::Written {
            path: dest.clone(),
            bytes: 10
        }
    );
    assert_eq!(std::fs::read(&dest).unwrap(), b"xxxxxxxxxx");
}

#[tokio::test]
async fn test_stalled_download_times_out_and_removes_partial_file() {
    let port = trickle_server(10, 2, Duration::from_millis(20)).await;
    let client = local_client(port, Duration::from_millis(200));

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("stalled.wav");

    let err = client
        .download(1, &dest, &Params::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {:?}", err);
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_download_follows_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/audiofile/"))
        .and(query_param("pk", "5"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/storage/5.wav", server.uri()).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/5.wav"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("extracted_5.wav");

    let outcome = client_for(&server)
        .download(5, &dest, &Params::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DownloadOutcome::Written {
            path: dest.clone(),
            bytes: 5
        }
    );
    assert_eq!(std::fs::read(&dest).unwrap(), b"audio");
}

#[tokio::test]
async fn test_redirect_to_missing_target_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/preanalysis/8/result/"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/storage/gone.json", server.uri()).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/gone.json"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("annotation_8.json");

    let outcome = client_for(&server)
        .annotation(8, &dest, &Params::new())
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Skipped { status: 404 });
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_text_format_returns_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/plain/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("queued, not json"))
        .expect(2)
        .mount(&server)
        .await;

    let text_client = TraxClient::new(
        config_for(&server).with_response_format(ResponseFormat::Text),
    )
    .unwrap();
    let body = text_client.request(RequestSpec::get("/plain/")).await.unwrap();
    assert_eq!(body, ResponseBody::Text("queued, not json".to_string()));

    let err = client_for(&server)
        .request(RequestSpec::get("/plain/"))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("bad json"), "got {}", err);
}
