//! End-to-end fetches through the driver

use crate::server::{Route, TestServer};
use flate2::write::GzEncoder;
use flate2::Compression;
use h2fetch::config::Config;
use h2fetch::request::BodySource;
use h2fetch::{Driver, DriverReport};
use std::io::Write;
use std::time::Duration;

async fn fetch(config: &Config, uris: &[String]) -> (DriverReport, Vec<u8>, String) {
    fetch_with(Driver::new(config), uris).await
}

async fn fetch_with(driver: Driver<'_>, uris: &[String]) -> (DriverReport, Vec<u8>, String) {
    let mut bodies = Vec::new();
    let mut stats = Vec::new();
    let report = tokio::time::timeout(
        Duration::from_secs(10),
        driver.run(uris, &mut bodies, &mut stats),
    )
    .await
    .expect("fetch did not finish");
    (report, bodies, String::from_utf8(stats).unwrap())
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn test_single_fetch_writes_body() {
    let server = TestServer::start(vec![("/", Route::ok("hello h2"))]).await;
    let config = Config::default();

    let (report, bodies, stats) = fetch(&config, &[server.uri("/")]).await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(bodies, b"hello h2");
    assert!(stats.is_empty());

    let session = &report.sessions[0];
    assert!(session.is_success());
    assert_eq!(session.total, 1);
    assert_eq!(session.completed, 1);
    assert_eq!(session.requests[0].status, Some(200));
}

#[tokio::test]
async fn test_default_request_headers() {
    let server = TestServer::start(vec![("/", Route::ok("x"))]).await;
    let mut config = Config::default();
    config.headers.insert("x-trace", "on");
    config.headers.insert("accept", "text/html");

    fetch(&config, &[server.uri("/")]).await;

    let request = &server.requests()[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.header("x-trace"), Some("on"));
    assert_eq!(request.header("accept"), Some("text/html"));
    assert_eq!(request.header("accept-encoding"), Some("gzip, deflate"));
    assert!(request
        .header("user-agent")
        .is_some_and(|ua| ua.starts_with("h2fetch/")));
    assert_eq!(
        request.header(":authority"),
        Some(format!("127.0.0.1:{}", server.port()).as_str())
    );
}

#[tokio::test]
async fn test_gzip_response_is_inflated() {
    let page = "<html>".to_string() + &"compressible ".repeat(2000) + "</html>";
    let server = TestServer::start(vec![(
        "/",
        Route::ok(gzip(page.as_bytes())).with_header("content-encoding", "gzip"),
    )])
    .await;
    let config = Config::default();

    let (report, bodies, _) = fetch(&config, &[server.uri("/")]).await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(bodies, page.as_bytes());
}

#[tokio::test]
async fn test_same_origin_uris_share_one_connection() {
    let server = TestServer::start(vec![
        ("/a", Route::ok("aaa")),
        ("/b", Route::ok("bbb")),
        ("/c", Route::ok("ccc")),
    ])
    .await;
    let config = Config::default();
    let uris = vec![server.uri("/a"), server.uri("/b"), server.uri("/c")];

    let (report, bodies, _) = fetch(&config, &uris).await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].completed, 3);
    assert_eq!(server.connections(), 1);

    let mut paths = server.paths();
    paths.sort();
    assert_eq!(paths, vec!["/a", "/b", "/c"]);
    assert_eq!(bodies.len(), 9);
}

#[tokio::test]
async fn test_each_origin_gets_its_own_session() {
    let first = TestServer::start(vec![("/", Route::ok("one"))]).await;
    let second = TestServer::start(vec![("/", Route::ok("two"))]).await;
    let config = Config::default();

    let (report, bodies, _) = fetch(&config, &[first.uri("/"), second.uri("/")]).await;

    assert_eq!(report.sessions.len(), 2);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(first.connections(), 1);
    assert_eq!(second.connections(), 1);
    // sessions run one after another
    assert_eq!(bodies, b"onetwo");
}

#[tokio::test]
async fn test_crawl_fetches_same_origin_assets_once() {
    let page = r#"<html><head>
        <link rel="stylesheet" href="/style.css">
        <script src="http://other.invalid/tracker.js"></script>
    </head><body>
        <img src="/logo.png"><img src="logo.png#again">
    </body></html>"#;
    let server = TestServer::start(vec![
        ("/", Route::ok(page)),
        ("/style.css", Route::ok("body{}")),
        ("/logo.png", Route::ok("png")),
    ])
    .await;
    let config = Config {
        get_assets: true,
        ..Config::default()
    };

    let (report, _, _) = fetch(&config, &[server.uri("/")]).await;

    assert_eq!(report.exit_code(), 0);
    let session = &report.sessions[0];
    assert_eq!(session.total, 3);
    assert_eq!(session.completed, 3);
    assert_eq!(session.requests[0].level, 0);
    assert!(session.requests[1..].iter().all(|r| r.level == 1));

    let mut paths = server.paths();
    paths.sort();
    assert_eq!(paths, vec!["/", "/logo.png", "/style.css"]);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_assets_are_not_crawled_further() {
    let server = TestServer::start(vec![
        ("/", Route::ok(r#"<script src="/app.js"></script>"#)),
        ("/app.js", Route::ok(r#"<img src="/deeper.png">"#)),
    ])
    .await;
    let config = Config {
        get_assets: true,
        ..Config::default()
    };

    fetch(&config, &[server.uri("/")]).await;

    let mut paths = server.paths();
    paths.sort();
    assert_eq!(paths, vec!["/", "/app.js"]);
}

#[tokio::test]
async fn test_post_uploads_body() {
    let server = TestServer::start(vec![("/upload", Route::ok("stored"))]).await;
    let config = Config::default();
    let payload = vec![b'x'; 100_000];
    let driver = Driver::new(&config).with_body(BodySource::from_bytes(payload.clone()));

    let (report, bodies, _) = fetch_with(driver, &[server.uri("/upload")]).await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(bodies, b"stored");

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.header("content-length"), Some("100000"));
    assert_eq!(request.body, payload);
}

#[tokio::test]
async fn test_multiply_repeats_requests() {
    let server = TestServer::start(vec![("/", Route::ok("r"))]).await;
    let config = Config {
        multiply: 3,
        ..Config::default()
    };

    let (report, bodies, _) = fetch(&config, &[server.uri("/")]).await;

    assert_eq!(report.sessions[0].completed, 3);
    assert_eq!(server.paths().len(), 3);
    assert_eq!(bodies, b"rrr");
}

#[tokio::test]
async fn test_error_status_still_completes() {
    let server = TestServer::start(vec![]).await;
    let config = Config::default();

    let (report, bodies, _) = fetch(&config, &[server.uri("/missing")]).await;

    assert_eq!(report.exit_code(), 0);
    assert!(bodies.is_empty());
    assert_eq!(report.sessions[0].requests[0].status, Some(404));
}

#[tokio::test]
async fn test_statistics_block() {
    let server = TestServer::start(vec![("/", Route::ok("s"))]).await;
    let config = Config {
        stat: true,
        null_out: true,
        ..Config::default()
    };

    let (_, _, stats) = fetch(&config, &[server.uri("/")]).await;

    let lines: Vec<&str> = stats.lines().collect();
    assert_eq!(lines[0], "***** Statistics *****");
    assert_eq!(lines[1], format!("#1: {}", server.uri("/")));
    assert_eq!(lines[2], "    Status: 200");
    assert_eq!(lines[3], "    Delta (ms) from handshake(HEADERS):");
    assert!(lines[4].starts_with("        Response headers: "));
    assert!(lines[5].starts_with("        Completed: "));
}

#[tokio::test]
async fn test_unreachable_origin_is_a_failure() {
    let server = TestServer::start(vec![("/", Route::ok("up"))]).await;
    let closed = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = Config {
        timeout: Some(Duration::from_secs(2)),
        ..Config::default()
    };
    let uris = vec![format!("http://127.0.0.1:{}/", closed), server.uri("/")];

    let (report, bodies, _) = fetch(&config, &uris).await;

    assert_eq!(report.sessions.len(), 2);
    assert_eq!(report.failures, 1);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(bodies, b"up");
}
