//! Bundle fetcher against a mock HTTP server
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use pretty_assertions::assert_eq;
use qpk_client::{
    BundleFetcher, CancellationToken, ClientError, FetchConfig, FetchError, LoadOptions,
    RetryPolicy,
};
use qpk_formats::{
    AssetInfo, AssetPayload, AssetType, CodecOptions, CompressionSettings, ContainerFormat,
    DecryptionPlugin, FormatError, FormatResult, ManifestOptions, PluginRegistry,
    generate_manifest, sha256_hex,
};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bundle_bytes(format: ContainerFormat, compression: CompressionSettings) -> Vec<u8> {
    named_bundle_bytes("main", format, compression)
}

fn named_bundle_bytes(
    name: &str,
    format: ContainerFormat,
    compression: CompressionSettings,
) -> Vec<u8> {
    let files: [(&str, &[u8]); 2] = [("images/a.png", b"AAAA"), ("images/b.png", b"BBBB")];
    let payloads: Vec<AssetPayload> = files
        .iter()
        .map(|(path, data)| {
            AssetPayload::new(
                AssetInfo::from_data(*path, AssetType::Image, data),
                data.to_vec(),
            )
        })
        .collect();
    let infos: Vec<AssetInfo> = payloads.iter().map(|p| p.info.clone()).collect();
    let manifest = generate_manifest(
        name,
        &infos,
        &ManifestOptions {
            format,
            compression,
            ..ManifestOptions::default()
        },
    )
    .expect("Operation should succeed");
    format
        .codec()
        .encode(&payloads, &manifest, &CodecOptions::for_manifest(&manifest))
        .expect("Operation should succeed")
}

fn fast_config(max_attempts: u32) -> FetchConfig {
    FetchConfig::default().with_retry(RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        ..RetryPolicy::default()
    })
}

/// Respond with 500 for the first `failures` requests, then serve `body`
fn flaky(failures: u32, body: Vec<u8>, counter: Arc<AtomicU32>) -> impl wiremock::Respond {
    move |_req: &wiremock::Request| {
        if counter.fetch_add(1, Ordering::SeqCst) < failures {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200).set_body_bytes(body.clone())
        }
    }
}

/// Raw HTTP server that closes the first `drops` connections after reading
/// the request and answers later ones with `body`
async fn dropping_server(drops: u32, body: &'static [u8]) -> (String, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicU32::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            if counter.fetch_add(1, Ordering::SeqCst) < drops {
                drop(socket);
                continue;
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body).await;
            let _ = socket.shutdown().await;
        }
    });
    (format!("http://{addr}"), accepted)
}

#[tokio::test]
async fn test_dropped_connections_are_retried() {
    let (base, accepted) = dropping_server(2, b"hello").await;
    let fetcher = BundleFetcher::new(fast_config(3)).expect("Operation should succeed");

    let data = fetcher
        .download(&format!("{base}/main-v1.qpk"), "main", &LoadOptions::default())
        .await
        .expect("Operation should succeed");

    assert_eq!(data, b"hello".to_vec());
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_dropped_connections_exhaust_budget() {
    let (base, accepted) = dropping_server(5, b"hello").await;
    let fetcher = BundleFetcher::new(fast_config(2)).expect("Operation should succeed");

    let err = fetcher
        .download(&format!("{base}/main-v1.qpk"), "main", &LoadOptions::default())
        .await
        .unwrap_err();

    assert!(
        matches!(err, ClientError::Network { source: FetchError::Http(_), .. }),
        "{err}"
    );
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retries_until_success() {
    let server = MockServer::start().await;
    let bytes = bundle_bytes(ContainerFormat::Qpk, CompressionSettings::default());
    let counter = Arc::new(AtomicU32::new(0));

    Mock::given(method("GET"))
        .and(path("/main-v1.qpk"))
        .respond_with(flaky(2, bytes.clone(), counter.clone()))
        .expect(3)
        .mount(&server)
        .await;

    let fetcher = BundleFetcher::new(fast_config(3)).expect("Operation should succeed");
    let url = format!("{}/main-v1.qpk", server.uri());
    let loaded = fetcher
        .load_bundle(&url, "main", &LoadOptions::default())
        .await
        .expect("Operation should succeed");

    assert_eq!(loaded.hash, sha256_hex(&bytes));
    assert_eq!(loaded.size, bytes.len() as u64);
    assert_eq!(loaded.format, ContainerFormat::Qpk);
    assert_eq!(loaded.assets.len(), 2);
    assert_eq!(counter.load(Ordering::SeqCst), 3);

    let again = fetcher
        .download(&url, "main", &LoadOptions::default())
        .await
        .expect("Operation should succeed");
    assert_eq!(again, bytes);
}

#[tokio::test]
async fn test_budget_exhausted_surfaces_last_error() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicU32::new(0));

    Mock::given(method("GET"))
        .and(path("/main-v1.qpk"))
        .respond_with(flaky(2, b"unused".to_vec(), counter.clone()))
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = BundleFetcher::new(fast_config(2)).expect("Operation should succeed");
    let err = fetcher
        .load_bundle(
            &format!("{}/main-v1.qpk", server.uri()),
            "main",
            &LoadOptions::default(),
        )
        .await
        .unwrap_err();

    match err {
        ClientError::Network { bundle, source } => {
            assert_eq!(bundle, "main");
            assert!(matches!(
                source,
                FetchError::HttpStatus(StatusCode::INTERNAL_SERVER_ERROR)
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = BundleFetcher::new(fast_config(5)).expect("Operation should succeed");
    let err = fetcher
        .download(
            &format!("{}/missing.qpk", server.uri()),
            "main",
            &LoadOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Network {
            source: FetchError::HttpStatus(StatusCode::NOT_FOUND),
            ..
        }
    ));
}

#[tokio::test]
async fn test_progress_reports_content_length() {
    let server = MockServer::start().await;
    let bytes = bundle_bytes(ContainerFormat::Qpk, CompressionSettings::default());

    Mock::given(method("GET"))
        .and(path("/main-v1.qpk"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
        .mount(&server)
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = LoadOptions::default().with_progress(move |downloaded, total| {
        sink.lock().unwrap().push((downloaded, total));
    });

    let fetcher = BundleFetcher::new(fast_config(1)).expect("Operation should succeed");
    fetcher
        .load_bundle(&format!("{}/main-v1.qpk", server.uri()), "main", &options)
        .await
        .expect("Operation should succeed");

    let seen = seen.lock().unwrap();
    let len = bytes.len() as u64;
    assert_eq!(seen.last().copied(), Some((len, len)));
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".to_vec())
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let fetcher = BundleFetcher::new(fast_config(3)).expect("Operation should succeed");
    let start = Instant::now();
    let err = fetcher
        .download(
            &format!("{}/main-v1.qpk", server.uri()),
            "main",
            &LoadOptions::default().with_cancel(token),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Cancelled { .. }), "{err}");
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancelled_token_skips_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    token.cancel();

    let fetcher = BundleFetcher::new(fast_config(3)).expect("Operation should succeed");
    let err = fetcher
        .download(
            &format!("{}/main-v1.qpk", server.uri()),
            "main",
            &LoadOptions::default().with_cancel(token),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled { .. }));
}

#[tokio::test]
async fn test_timeout_applies_per_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".to_vec())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = fast_config(2).with_attempt_timeout(Duration::from_millis(100));
    let fetcher = BundleFetcher::new(config).expect("Operation should succeed");
    let start = Instant::now();
    let err = fetcher
        .download(
            &format!("{}/main-v1.qpk", server.uri()),
            "main",
            &LoadOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Network {
            source: FetchError::Timeout(_),
            ..
        }
    ));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_disabled_cache_sends_no_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher =
        BundleFetcher::new(fast_config(1).with_cache(false)).expect("Operation should succeed");
    let data = fetcher
        .download(
            &format!("{}/index.json", server.uri()),
            "main",
            &LoadOptions::default(),
        )
        .await
        .expect("Operation should succeed");
    assert_eq!(data, b"fresh");
}

#[tokio::test]
async fn test_corrupt_payload_fails_whole_load() {
    let server = MockServer::start().await;
    let mut bytes = bundle_bytes(ContainerFormat::Qpk, CompressionSettings::none());
    // First entry record: u32 path length, path, u32 data length, data
    let path_len = u32::from_le_bytes(bytes[32..36].try_into().unwrap()) as usize;
    let data_start = 36 + path_len + 4;
    bytes[data_start] ^= 0xff;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
        .mount(&server)
        .await;

    let fetcher = BundleFetcher::new(fast_config(1)).expect("Operation should succeed");
    let err = fetcher
        .load_bundle(
            &format!("{}/main-v1.qpk", server.uri()),
            "main",
            &LoadOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, ClientError::Format(FormatError::Integrity { .. })),
        "{err}"
    );
}

#[tokio::test]
async fn test_zip_detected_by_magic_without_extension() {
    let server = MockServer::start().await;
    let bytes = bundle_bytes(ContainerFormat::Zip, CompressionSettings::default());
    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
        .mount(&server)
        .await;

    let fetcher = BundleFetcher::new(fast_config(1)).expect("Operation should succeed");
    let loaded = fetcher
        .load_bundle(
            &format!("{}/download", server.uri()),
            "main",
            &LoadOptions::default(),
        )
        .await
        .expect("Operation should succeed");

    assert_eq!(loaded.format, ContainerFormat::Zip);
    let keys: Vec<&str> = loaded.assets.iter().map(|a| a.key.as_str()).collect();
    assert_eq!(
        keys,
        vec!["main:default:image:a.png", "main:default:image:b.png"]
    );
}

struct XorFile(u8);

impl DecryptionPlugin for XorFile {
    fn name(&self) -> &str {
        "xor"
    }

    fn decrypt(&self, mut data: Vec<u8>) -> FormatResult<Vec<u8>> {
        for byte in &mut data {
            *byte ^= self.0;
        }
        Ok(data)
    }
}

#[tokio::test]
async fn test_decryption_plugins_run_before_decoding() {
    let server = MockServer::start().await;
    let scrambled: Vec<u8> = bundle_bytes(ContainerFormat::Qpk, CompressionSettings::default())
        .into_iter()
        .map(|b| b ^ 0x5a)
        .collect();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(scrambled))
        .mount(&server)
        .await;

    let mut plugins = PluginRegistry::new();
    plugins.register_decryption(Arc::new(XorFile(0x5a)));
    let fetcher = BundleFetcher::new(fast_config(1))
        .expect("Operation should succeed")
        .with_codec(CodecOptions::default().with_plugins(plugins));

    let loaded = fetcher
        .load_bundle(
            &format!("{}/main-v1.qpk", server.uri()),
            "main",
            &LoadOptions::default(),
        )
        .await
        .expect("Operation should succeed");
    assert_eq!(loaded.assets[0].data.as_ref(), b"AAAA");
}

#[tokio::test]
async fn test_assets_are_keyed_by_requested_bundle() {
    let server = MockServer::start().await;
    let bytes = named_bundle_bytes("other", ContainerFormat::Qpk, CompressionSettings::default());
    Mock::given(method("GET"))
        .and(path("/main-v1.qpk"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
        .mount(&server)
        .await;

    let fetcher = BundleFetcher::new(fast_config(1)).expect("Operation should succeed");
    let loaded = fetcher
        .load_bundle(
            &format!("{}/main-v1.qpk", server.uri()),
            "main",
            &LoadOptions::default(),
        )
        .await
        .expect("Operation should succeed");

    assert_eq!(loaded.manifest.name, "other");
    let keys: Vec<&str> = loaded.assets.iter().map(|a| a.key.as_str()).collect();
    assert_eq!(
        keys,
        vec!["main:default:image:a.png", "main:default:image:b.png"]
    );
    assert!(loaded.assets.iter().all(|a| a.bundle_name == "main"));
}
