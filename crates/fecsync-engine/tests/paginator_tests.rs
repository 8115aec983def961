//! Paginator behavior against a mock upstream API
//!
//! Covers cursor propagation, stream termination, retry/backoff on rate
//! limits, and the protocol violations that must abort a run instead of
//! being retried.

use fecsync_common::SyncError;
use fecsync_engine::client::ApiClient;
use fecsync_engine::config::{ApiConfig, RetryConfig};
use fecsync_engine::paginator::{format_watermark_filter, Paginator};
use fecsync_engine::record::parse_indexed_date;
use fecsync_engine::source::SourceDescriptor;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_descriptor() -> SourceDescriptor {
    SourceDescriptor {
        name: "widgets".to_string(),
        source: "testsrc".to_string(),
        endpoint: "/widgets/".to_string(),
        dest_table: "raw_widgets".to_string(),
        merge_key: "sub_id".to_string(),
        indexed_date_field: "load_date".to_string(),
        watermark_param: Some("min_load_date".to_string()),
        sort_param: None,
        extra_params: Vec::new(),
        first_run_lookback_days: None,
    }
}

fn api_config(server: &MockServer, max_pages: Option<u32>) -> ApiConfig {
    ApiConfig {
        base_url: server.uri(),
        api_key: "TEST_KEY".to_string(),
        per_page: 100,
        max_pages,
        request_timeout_secs: 5,
    }
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay_ms: 10,
    }
}

fn page(ids: &[u64], cursor: Option<Value>) -> Value {
    let results: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "sub_id": id.to_string(), "load_date": "2024-01-15T08:30:00" }))
        .collect();
    let count = results.len();
    json!({
        "results": results,
        "pagination": { "count": count, "last_indexes": cursor }
    })
}

#[tokio::test]
async fn three_pages_yield_three_batches_then_stop() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .and(query_param_is_missing("last_index"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&[1, 2], Some(json!({"last_index": "2"})))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .and(query_param("last_index", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&[3, 4], Some(json!({"last_index": "4"})))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .and(query_param("last_index", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[5], None)))
        .mount(&server)
        .await;

    let api = api_config(&server, None);
    let client = ApiClient::new(&api, fast_retry(3)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, None);

    let mut batches = Vec::new();
    while let Some(batch) = paginator.next_batch().await.unwrap() {
        batches.push(batch);
    }

    assert_eq!(batches.len(), 3);
    let total: usize = batches.iter().map(Vec::len).sum();
    assert_eq!(total, 5);
    assert_eq!(batches[0][0].record_id, "1");
    assert_eq!(batches[2][0].record_id, "5");

    // Exhausted stream keeps answering None without further requests
    assert!(paginator.next_batch().await.unwrap().is_none());
}

#[tokio::test]
async fn empty_result_set_is_zero_batches() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[], None)))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_config(&server, None);
    let client = ApiClient::new(&api, fast_retry(3)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, None);

    assert!(paginator.next_batch().await.unwrap().is_none());
}

#[tokio::test]
async fn rate_limit_is_retried_with_backoff() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[1], None)))
        .mount(&server)
        .await;

    let api = api_config(&server, None);
    let client = ApiClient::new(&api, fast_retry(5)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, None);

    let batch = paginator.next_batch().await.unwrap().unwrap();
    assert_eq!(batch.len(), 1);
}

#[tokio::test]
async fn exhausted_retry_budget_is_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(2)
        .mount(&server)
        .await;

    let api = api_config(&server, None);
    let client = ApiClient::new(&api, fast_retry(2)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, None);

    let err = paginator.next_batch().await.unwrap_err();
    match err {
        SyncError::Transient { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected transient error, got {other}"),
    }
}

#[tokio::test]
async fn client_error_is_fatal_and_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad two_year_transaction_period"))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_config(&server, None);
    let client = ApiClient::new(&api, fast_retry(5)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, None);

    let err = paginator.next_batch().await.unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)), "got {err}");
}

#[tokio::test]
async fn missing_pagination_object_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "sub_id": "1", "load_date": "2024-01-15T08:30:00" }]
        })))
        .mount(&server)
        .await;

    let api = api_config(&server, None);
    let client = ApiClient::new(&api, fast_retry(3)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, None);

    let err = paginator.next_batch().await.unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)), "got {err}");
}

#[tokio::test]
async fn empty_cursor_on_nonempty_page_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[1], Some(json!({})))))
        .mount(&server)
        .await;

    let api = api_config(&server, None);
    let client = ApiClient::new(&api, fast_retry(3)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, None);

    let err = paginator.next_batch().await.unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)), "got {err}");
}

#[tokio::test]
async fn non_advancing_cursor_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .and(query_param_is_missing("last_index"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&[1], Some(json!({"last_index": "1"})))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .and(query_param("last_index", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&[1], Some(json!({"last_index": "1"})))),
        )
        .mount(&server)
        .await;

    let api = api_config(&server, None);
    let client = ApiClient::new(&api, fast_retry(3)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, None);

    assert!(paginator.next_batch().await.unwrap().is_some());
    let err = paginator.next_batch().await.unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)), "got {err}");
}

#[tokio::test]
async fn watermark_is_sent_strictly_after() {
    let server = MockServer::start().await;
    let mark = parse_indexed_date("2023-07-10T21:05:09").unwrap();

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .and(query_param("min_load_date", "2023-07-10T21:05:10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[], None)))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_config(&server, None);
    let client = ApiClient::new(&api, fast_retry(3)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, Some(mark));

    assert!(paginator.next_batch().await.unwrap().is_none());
    assert_eq!(format_watermark_filter(mark), "2023-07-10T21:05:10");
}

#[tokio::test]
async fn first_run_sends_no_watermark_filter() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .and(query_param_is_missing("min_load_date"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[], None)))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_config(&server, None);
    let client = ApiClient::new(&api, fast_retry(3)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, None);

    assert!(paginator.next_batch().await.unwrap().is_none());
}

#[tokio::test]
async fn page_cap_ends_stream_cleanly() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&[1, 2], Some(json!({"last_index": "2"})))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = api_config(&server, Some(1));
    let client = ApiClient::new(&api, fast_retry(3)).unwrap();
    let descriptor = test_descriptor();
    let mut paginator = Paginator::new(&client, &descriptor, &api, None);

    let batch = paginator.next_batch().await.unwrap().unwrap();
    assert_eq!(batch.len(), 2);
    assert!(paginator.next_batch().await.unwrap().is_none());
}
