//! End-to-end crawl tests against a mocked gallery.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gallery_crawl::{continuation_variables, derive, CrawlConfig, CrawlError, Crawler};

// ─────────────────────── helpers ───────────────────────

const USER_ID: &str = "1234567";
const SEED: &str = "4f8732eb9ba7d1c8e8897a75d6474d4e";
const UNRELATED_QUERY: &str = "ffffffffffffffffffffffffffffffff";
const TIMELINE_QUERY: &str = "472f257a40c653c64c666ce877d59d2b";
const BUNDLE_PATH: &str = "/static/bundles/ProfilePageContainer.js";

/// Media node in either schema. `ts_key` selects the timestamp field name.
fn node(url: &str, is_video: bool, ts_key: &str) -> Value {
    json!({ "node": {
        "display_url": url,
        "thumbnail_src": format!("{url}?thumb"),
        "is_video": is_video,
        ts_key: 1_500_000_000,
        "dimensions": { "width": 1080, "height": 1080 }
    }})
}

fn page_info(cursor: Option<&str>, has_next: bool) -> Value {
    json!({ "end_cursor": cursor, "has_next_page": has_next })
}

fn profile_html(edges: Vec<Value>, info: Value) -> String {
    let shared = json!({
        "rhx_gis": SEED,
        "entry_data": { "ProfilePage": [ { "graphql": { "user": {
            "id": USER_ID,
            "edge_owner_to_timeline_media": { "edges": edges, "page_info": info }
        }}}]}
    });
    format!(
        "<!DOCTYPE html><html><head>\
         <link rel=\"preload\" href=\"{BUNDLE_PATH}\" as=\"script\" type=\"text/javascript\">\
         </head><body>\
         <script type=\"text/javascript\">window._sharedData = {shared};</script>\
         <script>window.__initialDataLoaded(window._sharedData);</script>\
         </body></html>"
    )
}

fn continuation_json(edges: Vec<Value>, info: Value) -> String {
    json!({ "data": { "user": { "edge_owner_to_timeline_media": {
        "page_info": info,
        "edges": edges
    }}}, "status": "ok" })
    .to_string()
}

fn bundle_js(ids: &[&str]) -> String {
    ids.iter()
        .enumerate()
        .map(|(i, id)| format!(r#"e.q{i}={{"queryId":"{id}",queryParams:[]}};"#))
        .collect()
}

async fn mount_profile(server: &MockServer, html: String) {
    Mock::given(method("GET"))
        .and(path("/alice"))
        .and(header("X-Requested-With", "XMLHttpRequest"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html; charset=utf-8"))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_bundle(server: &MockServer, ids: &[&str]) {
    Mock::given(method("GET"))
        .and(path(BUNDLE_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(bundle_js(ids), "application/javascript"),
        )
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, route: &str, bytes: &[u8], times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(bytes.to_vec(), "image/jpeg"))
        .expect(times)
        .mount(server)
        .await;
}

/// Mount a continuation page answering the request that follows `cursor`.
async fn mount_continuation(server: &MockServer, cursor: &str, body: String) {
    let vars = continuation_variables(USER_ID, 50, cursor);
    let signature = derive(SEED, &vars).expect("seed is set");
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(query_param("query_hash", TIMELINE_QUERY))
        .and(query_param("variables", vars.as_str()))
        .and(header("X-Instagram-GIS", signature.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .expect(1)
        .mount(server)
        .await;
}

fn crawler(server: &MockServer, out: &Path) -> Crawler {
    let config = CrawlConfig::default()
        .with_base_url(&server.uri())
        .with_output_root(out)
        .with_concurrency(2);
    Crawler::new(config).unwrap()
}

fn stored_files(out: &Path) -> Vec<String> {
    let dir = out.join("instagram_alice");
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

async fn graphql_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/graphql/query/")
        .count()
}

// ═══════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_alice_two_pages_skipping_video() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    let uri = server.uri();

    mount_profile(
        &server,
        profile_html(
            vec![
                node(&format!("{uri}/media/1.jpg"), false, "date"),
                node(&format!("{uri}/media/video.jpg"), true, "date"),
                node(&format!("{uri}/media/2.jpg"), false, "date"),
                node(&format!("{uri}/media/3.jpg"), false, "date"),
            ],
            page_info(Some("CURSOR1"), true),
        ),
    )
    .await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;
    mount_continuation(
        &server,
        "CURSOR1",
        continuation_json(
            vec![
                node(&format!("{uri}/media/4.jpg"), false, "taken_at_timestamp"),
                node(&format!("{uri}/media/5.jpg"), false, "taken_at_timestamp"),
            ],
            page_info(None, false),
        ),
    )
    .await;
    for i in 1..=5 {
        mount_image(&server, &format!("/media/{i}.jpg"), format!("jpeg-{i}").as_bytes(), 1).await;
    }
    mount_image(&server, "/media/video.jpg", b"never", 0).await;

    let report = crawler(&server, out.path()).crawl("alice").await.unwrap();

    assert_eq!(report.user_id.as_deref(), Some(USER_ID));
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.continuation_requests, 1);
    assert_eq!(report.videos_skipped, 1);
    assert_eq!(report.downloads_attempted, 5);
    assert_eq!(report.files_written, 5);
    assert_eq!(report.transport_errors, 0);
    assert_eq!(graphql_requests(&server).await, 1);

    let files = stored_files(out.path());
    assert_eq!(files.len(), 5);
    assert!(files.iter().all(|f| f.ends_with(".jpg") && f.len() == 36));
    let expected = format!("{}.jpg", gallery_crawl::fingerprint(b"jpeg-3"));
    assert!(files.contains(&expected));
}

#[tokio::test]
async fn test_root_request_carries_headers_but_no_signature() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/alice"))
        .and(header("Referer", format!("{}/alice", server.uri()).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            profile_html(vec![], page_info(None, false)),
            "text/html",
        ))
        .expect(1)
        .mount(&server)
        .await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;

    let report = crawler(&server, out.path()).crawl("alice").await.unwrap();
    assert_eq!(report.pages_fetched, 1);

    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| r.headers.get("x-instagram-gis").is_none()));
    assert!(requests.iter().all(|r| r
        .headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        == Some(gallery_crawl::http_client::USER_AGENT)));
}

#[tokio::test]
async fn test_identical_bytes_stored_once() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    let uri = server.uri();

    mount_profile(
        &server,
        profile_html(
            vec![
                node(&format!("{uri}/media/a.jpg"), false, "date"),
                node(&format!("{uri}/media/b.jpg"), false, "date"),
            ],
            page_info(None, false),
        ),
    )
    .await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;
    mount_image(&server, "/media/a.jpg", b"same bytes", 1).await;
    mount_image(&server, "/media/b.jpg", b"same bytes", 1).await;

    let report = crawler(&server, out.path()).crawl("alice").await.unwrap();

    assert_eq!(report.downloads_attempted, 2);
    assert_eq!(report.files_written, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(
        stored_files(out.path()),
        vec![format!("{}.jpg", gallery_crawl::fingerprint(b"same bytes"))]
    );
}

#[tokio::test]
async fn test_three_pages_then_stop() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    let uri = server.uri();

    mount_profile(
        &server,
        profile_html(
            vec![node(&format!("{uri}/media/1.jpg"), false, "date")],
            page_info(Some("CURSOR1"), true),
        ),
    )
    .await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;
    mount_continuation(
        &server,
        "CURSOR1",
        continuation_json(
            vec![node(&format!("{uri}/media/2.jpg"), false, "taken_at_timestamp")],
            page_info(Some("CURSOR2"), true),
        ),
    )
    .await;
    mount_continuation(
        &server,
        "CURSOR2",
        continuation_json(
            vec![node(&format!("{uri}/media/3.jpg"), false, "taken_at_timestamp")],
            page_info(Some("CURSOR3"), false),
        ),
    )
    .await;
    for i in 1..=3 {
        mount_image(&server, &format!("/media/{i}.jpg"), format!("img-{i}").as_bytes(), 1).await;
    }

    let report = crawler(&server, out.path()).crawl("alice").await.unwrap();

    assert_eq!(report.pages_fetched, 3);
    assert_eq!(report.continuation_requests, 2);
    assert_eq!(graphql_requests(&server).await, 2);
    assert_eq!(report.files_written, 3);
}

#[tokio::test]
async fn test_page_limit_stops_pagination() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    let uri = server.uri();

    mount_profile(
        &server,
        profile_html(
            vec![node(&format!("{uri}/media/1.jpg"), false, "date")],
            page_info(Some("CURSOR1"), true),
        ),
    )
    .await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;
    mount_image(&server, "/media/1.jpg", b"img-1", 1).await;

    let config = CrawlConfig::default()
        .with_base_url(&server.uri())
        .with_output_root(out.path())
        .with_max_pages(Some(1));
    let report = Crawler::new(config).unwrap().crawl("alice").await.unwrap();

    assert_eq!(report.pages_fetched, 1);
    assert_eq!(graphql_requests(&server).await, 0);
}

// ═══════════════════════════════════════════════════════
// FAILURES
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_single_query_id_aborts_before_continuation() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();

    mount_profile(
        &server,
        profile_html(vec![], page_info(Some("CURSOR1"), true)),
    )
    .await;
    mount_bundle(&server, &[UNRELATED_QUERY]).await;

    let err = crawler(&server, out.path()).crawl("alice").await.unwrap_err();

    assert!(matches!(err, CrawlError::RequestIdNotFound(_)));
    assert_eq!(graphql_requests(&server).await, 0);
}

#[tokio::test]
async fn test_missing_bundle_is_fatal() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();

    mount_profile(
        &server,
        profile_html(vec![], page_info(Some("CURSOR1"), true)),
    )
    .await;

    let err = crawler(&server, out.path()).crawl("alice").await.unwrap_err();
    assert!(matches!(err, CrawlError::RequestIdNotFound(_)));
}

#[tokio::test]
async fn test_malformed_initial_page_is_fatal() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();

    let html = format!(
        "<html><head><link rel=\"preload\" href=\"{BUNDLE_PATH}\" as=\"script\"></head>\
         <body><script>window._sharedData = {{\"entry_data\": 42}};</script></body></html>"
    );
    mount_profile(&server, html).await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;

    let err = crawler(&server, out.path()).crawl("alice").await.unwrap_err();
    assert!(matches!(err, CrawlError::MalformedInitialPage(_)));
}

#[tokio::test]
async fn test_malformed_continuation_is_fatal() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();

    mount_profile(
        &server,
        profile_html(vec![], page_info(Some("CURSOR1"), true)),
    )
    .await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;
    mount_continuation(&server, "CURSOR1", r#"{"data": {"user": null}}"#.to_string()).await;

    let err = crawler(&server, out.path()).crawl("alice").await.unwrap_err();
    assert!(matches!(err, CrawlError::MalformedContinuationPage(_)));
}

#[tokio::test]
async fn test_failed_media_request_does_not_abort() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    let uri = server.uri();

    mount_profile(
        &server,
        profile_html(
            vec![
                node(&format!("{uri}/media/gone.jpg"), false, "date"),
                node(&format!("{uri}/media/ok.jpg"), false, "date"),
                node(&format!("{uri}/media/page.jpg"), false, "date"),
            ],
            page_info(None, false),
        ),
    )
    .await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;
    Mock::given(method("GET"))
        .and(path("/media/gone.jpg"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .expect(1)
        .mount(&server)
        .await;
    mount_image(&server, "/media/ok.jpg", b"ok", 1).await;
    Mock::given(method("GET"))
        .and(path("/media/page.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let report = crawler(&server, out.path()).crawl("alice").await.unwrap();

    assert_eq!(report.downloads_attempted, 3);
    assert_eq!(report.files_written, 1);
    assert_eq!(report.transport_errors, 1);
    assert_eq!(report.ignored_responses, 1);
    assert_eq!(stored_files(out.path()).len(), 1);
}

#[tokio::test]
async fn test_failed_continuation_request_ends_crawl() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();

    mount_profile(
        &server,
        profile_html(vec![], page_info(Some("CURSOR1"), true)),
    )
    .await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .expect(1)
        .mount(&server)
        .await;

    let report = crawler(&server, out.path()).crawl("alice").await.unwrap();
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.transport_errors, 1);
}

#[tokio::test]
async fn test_non_json_continuation_is_ignored() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();

    mount_profile(
        &server,
        profile_html(vec![], page_info(Some("CURSOR1"), true)),
    )
    .await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>login</html>", "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let report = crawler(&server, out.path()).crawl("alice").await.unwrap();
    assert_eq!(report.ignored_responses, 1);
    assert_eq!(report.pages_fetched, 2);
}

#[tokio::test]
async fn test_unreachable_profile_is_logged_not_fatal() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/alice"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let report = crawler(&server, out.path()).crawl("alice").await.unwrap();
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.transport_errors, 1);
    assert_eq!(report.user_id, None);
    assert!(!out.path().join("instagram_alice").exists());
}

#[tokio::test]
async fn test_write_failure_stops_pagination() {
    let server = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    let uri = server.uri();

    // A non-empty directory where the first image belongs makes its write fail.
    let dir = out.path().join("instagram_alice");
    let blocked = format!("{}.jpg", gallery_crawl::fingerprint(b"blocked"));
    std::fs::create_dir_all(dir.join(&blocked)).unwrap();
    std::fs::write(dir.join(&blocked).join("keep"), b"x").unwrap();

    mount_profile(
        &server,
        profile_html(
            vec![node(&format!("{uri}/media/1.jpg"), false, "date")],
            page_info(Some("CURSOR1"), true),
        ),
    )
    .await;
    mount_bundle(&server, &[UNRELATED_QUERY, TIMELINE_QUERY]).await;
    mount_image(&server, "/media/1.jpg", b"blocked", 1).await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(query_param(
            "variables",
            continuation_variables(USER_ID, 50, "CURSOR1").as_str(),
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    continuation_json(
                        vec![node(&format!("{uri}/media/2.jpg"), false, "taken_at_timestamp")],
                        page_info(Some("CURSOR2"), true),
                    ),
                    "application/json",
                )
                .set_delay(Duration::from_millis(300)),
        )
        .expect(0..=1)
        .mount(&server)
        .await;
    mount_image(&server, "/media/2.jpg", b"never", 0).await;

    let err = crawler(&server, out.path()).crawl("alice").await.unwrap_err();

    assert!(matches!(err, CrawlError::Io(_)));
    assert!(graphql_requests(&server).await <= 1);
    assert_eq!(stored_files(out.path()), vec![blocked]);
}
