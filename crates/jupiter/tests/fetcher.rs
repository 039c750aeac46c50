use std::path::Path;
use std::time::Duration;

use jupiter_engine::config::HttpConfig;
use jupiter_engine::http::build_client;
use jupiter_engine::{
    Asset, AssetOrigin, CancellationToken, Category, Fetch, FetchError, FetchOutcome, HttpFetcher,
    RetryPolicy, SkipReason,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        jitter: false,
    }
}

fn fetcher(max_attempts: u32) -> HttpFetcher {
    let client = build_client(&HttpConfig::default()).unwrap();
    HttpFetcher::new(client, fast_policy(max_attempts))
}

fn asset(url: String, destination: &Path) -> Asset {
    Asset {
        id: "1609219331".to_string(),
        title: "Piia seiklused".to_string(),
        file_name: "Piia_seiklused".to_string(),
        source_url: url,
        destination: destination.to_path_buf(),
        protected: false,
        expected_size: None,
        origin: AssetOrigin {
            target_url: "https://jupiter.err.ee/1609219331/piia-seiklused".to_string(),
            category: Category::Movie,
            series: None,
        },
    }
}

#[tokio::test]
async fn downloads_full_file() {
    let server = MockServer::start().await;
    let content = body(1000);
    Mock::given(method("GET"))
        .and(path("/piia.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("Piia_seiklused").join("Piia_seiklused.mp4");
    let asset = asset(format!("{}/piia.mp4", server.uri()), &dest);

    let outcome = fetcher(3)
        .fetch(&asset, &dest, &CancellationToken::new())
        .await;

    match outcome {
        FetchOutcome::Completed(done) => {
            assert_eq!(done.bytes_written, 1000);
            assert_eq!(done.file_size, 1000);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[tokio::test]
async fn resumes_partial_file_with_range_request() {
    let server = MockServer::start().await;
    let content = body(1000);
    Mock::given(method("GET"))
        .and(path("/piia.mp4"))
        .and(header("range", "bytes=400-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 400-999/1000")
                .set_body_bytes(content[400..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("piia.mp4");
    std::fs::write(&dest, &content[..400]).unwrap();
    let asset = asset(format!("{}/piia.mp4", server.uri()), &dest);

    let outcome = fetcher(3)
        .fetch(&asset, &dest, &CancellationToken::new())
        .await;

    match outcome {
        FetchOutcome::Completed(done) => {
            // Only the missing tail crossed the network.
            assert_eq!(done.bytes_written, 600);
            assert_eq!(done.file_size, 1000);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

/// Read one request head and return it lowercased.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&buf).to_lowercase()
}

#[tokio::test]
async fn dropped_connection_resumes_from_received_bytes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let content = body(1000);
    let served = content.clone();

    // First connection promises 1000 bytes and hangs up after 400.
    let server = tokio::spawn(async move {
        let mut requests = Vec::new();

        let (mut socket, _) = listener.accept().await.unwrap();
        requests.push(read_request(&mut socket).await);
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        socket.write_all(&served[..400]).await.unwrap();
        socket.shutdown().await.unwrap();
        drop(socket);

        let (mut socket, _) = listener.accept().await.unwrap();
        requests.push(read_request(&mut socket).await);
        socket
            .write_all(
                b"HTTP/1.1 206 Partial Content\r\nContent-Length: 600\r\n\
                  Content-Range: bytes 400-999/1000\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        socket.write_all(&served[400..]).await.unwrap();
        socket.shutdown().await.unwrap();
        requests
    });

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("Piia_seiklused.mp4");
    let asset = asset(format!("http://{addr}/piia.mp4"), &dest);

    let outcome = fetcher(3)
        .fetch(&asset, &dest, &CancellationToken::new())
        .await;

    match outcome {
        FetchOutcome::Completed(done) => {
            assert_eq!(done.bytes_written, 600);
            assert_eq!(done.file_size, 1000);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(std::fs::read(&dest).unwrap(), content);

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].contains("range:"));
    assert!(requests[1].contains("range: bytes=400-"));
}

#[tokio::test]
async fn ignored_range_replaces_partial_file() {
    let server = MockServer::start().await;
    let content = body(1000);
    Mock::given(method("GET"))
        .and(path("/piia.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("piia.mp4");
    std::fs::write(&dest, vec![0xffu8; 400]).unwrap();
    let asset = asset(format!("{}/piia.mp4", server.uri()), &dest);

    let outcome = fetcher(3)
        .fetch(&asset, &dest, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, FetchOutcome::Completed(done) if done.bytes_written == 1000));
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[tokio::test]
async fn misaligned_partial_response_restarts_from_scratch() {
    let server = MockServer::start().await;
    let content = body(1000);
    // Mounted first so it wins for ranged requests.
    Mock::given(method("GET"))
        .and(path("/piia.mp4"))
        .and(header("range", "bytes=400-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-999/1000")
                .set_body_bytes(content.clone()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/piia.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("piia.mp4");
    std::fs::write(&dest, vec![0xffu8; 400]).unwrap();
    let asset = asset(format!("{}/piia.mp4", server.uri()), &dest);

    let outcome = fetcher(3)
        .fetch(&asset, &dest, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, FetchOutcome::Completed(done) if done.file_size == 1000));
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[tokio::test]
async fn unsatisfiable_range_means_already_complete() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piia.mp4"))
        .and(header("range", "bytes=1000-"))
        .respond_with(ResponseTemplate::new(416).insert_header("content-range", "bytes */1000"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("piia.mp4");
    std::fs::write(&dest, body(1000)).unwrap();
    let asset = asset(format!("{}/piia.mp4", server.uri()), &dest);

    let outcome = fetcher(3)
        .fetch(&asset, &dest, &CancellationToken::new())
        .await;

    match outcome {
        FetchOutcome::Completed(done) => {
            assert_eq!(done.bytes_written, 0);
            assert_eq!(done.file_size, 1000);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_are_retried_up_to_the_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piia.mp4"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("piia.mp4");
    let asset = asset(format!("{}/piia.mp4", server.uri()), &dest);

    let outcome = fetcher(4)
        .fetch(&asset, &dest, &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        FetchOutcome::Failed(FetchError::HttpServerError { .. })
    ));
    assert!(!dest.exists(), "no placeholder file without bytes");
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piia.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("piia.mp4");
    let asset = asset(format!("{}/piia.mp4", server.uri()), &dest);

    let outcome = fetcher(5)
        .fetch(&asset, &dest, &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        FetchOutcome::Failed(FetchError::HttpClientError { .. })
    ));
    assert!(!dest.exists());
}

#[tokio::test]
async fn protected_asset_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("piia.mp4");
    let mut asset = asset(format!("{}/piia.mp4", server.uri()), &dest);
    asset.protected = true;

    let outcome = fetcher(3)
        .fetch(&asset, &dest, &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        FetchOutcome::Skipped(SkipReason::DrmProtected)
    ));
}

#[tokio::test]
async fn short_transfer_surfaces_size_mismatch_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piia.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body(1000)))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("piia.mp4");
    let mut asset = asset(format!("{}/piia.mp4", server.uri()), &dest);
    asset.expected_size = Some(2000);

    let outcome = fetcher(2)
        .fetch(&asset, &dest, &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        FetchOutcome::Failed(FetchError::SizeMismatch {
            expected: 2000,
            actual: 1000
        })
    ));
    // What arrived stays on disk for a later resume.
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 1000);
}

#[tokio::test]
async fn cancelled_run_does_not_start_downloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("piia.mp4");
    let asset = asset(format!("{}/piia.mp4", server.uri()), &dest);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = fetcher(3).fetch(&asset, &dest, &cancel).await;

    assert!(matches!(outcome, FetchOutcome::Failed(FetchError::Cancelled)));
}
