#![cfg(feature = "clickhouse")]

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiered_log_sink::config::SinkConfig;
use tiered_log_sink::{BatchingLogSink, FlushStage, Level, LogRecord, SinkError};
use tokio::net::TcpListener;

/// Minimal stand-in for the ClickHouse HTTP interface.
///
/// Like the real server, an INSERT whose `insert_deduplication_token` was
/// already applied is acknowledged without writing anything.
#[derive(Clone, Default)]
struct FakeClickHouse {
    inserts: Arc<Mutex<Vec<CapturedInsert>>>,
    tokens: Arc<Mutex<HashSet<String>>>,
    deduplicated: Arc<AtomicUsize>,
    reject_inserts: Arc<AtomicBool>,
    reply_delay_ms: Arc<AtomicU64>,
}

#[derive(Clone, Debug)]
struct CapturedInsert {
    database: Option<String>,
    query: String,
    user: Option<String>,
    key: Option<String>,
    token: Option<String>,
    body: String,
}

impl FakeClickHouse {
    fn inserts(&self) -> Vec<CapturedInsert> {
        self.inserts.lock().unwrap().clone()
    }
}

async fn handle(
    State(state): State<FakeClickHouse>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let query = params.get("query").cloned().unwrap_or_default();
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    let user = header("x-clickhouse-user");

    if user.as_deref() == Some("intruder") {
        return (
            StatusCode::UNAUTHORIZED,
            "Code: 516. DB::Exception: intruder: Authentication failed".to_string(),
        );
    }
    if query.starts_with("SELECT 1") {
        return (StatusCode::OK, "1\n".to_string());
    }
    if query.starts_with("INSERT") {
        if state.reject_inserts.load(Ordering::SeqCst) {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Code: 241. DB::Exception: Memory limit exceeded".to_string(),
            );
        }
        let token = params.get("insert_deduplication_token").cloned();
        let fresh = match &token {
            Some(token) => state.tokens.lock().unwrap().insert(token.clone()),
            None => true,
        };
        if fresh {
            state.inserts.lock().unwrap().push(CapturedInsert {
                database: params.get("database").cloned(),
                query,
                user,
                key: header("x-clickhouse-key"),
                token,
                body,
            });
        } else {
            state.deduplicated.fetch_add(1, Ordering::SeqCst);
        }
        // The rows are applied before the reply goes out.
        let delay = state.reply_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        return (StatusCode::OK, String::new());
    }
    (StatusCode::BAD_REQUEST, format!("unexpected query {query:?}"))
}

async fn start_server() -> (FakeClickHouse, String) {
    let state = FakeClickHouse::default();
    let app = Router::new().route("/", post(handle)).with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (state, format!("127.0.0.1:{}", addr.port()))
}

fn entry(i: usize) -> LogRecord {
    LogRecord::new(Level::Info, format!("entry-{i}"))
}

fn body_messages(body: &str) -> Vec<String> {
    body.lines()
        .map(|line| {
            let row: serde_json::Value = serde_json::from_str(line).unwrap();
            row["message"].as_str().unwrap().to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_each_batch_is_one_insert_request() {
    let (server, host) = start_server().await;
    let dsn = format!("clickhouse://default:secret@{host}/default/tiered_logs");
    let mut sink = BatchingLogSink::connect(&dsn, 5).await.unwrap();

    for i in 0..10 {
        sink.append(entry(i)).await.unwrap();
    }
    sink.close().await.unwrap();

    let inserts = server.inserts();
    assert_eq!(inserts.len(), 2);
    assert_eq!(
        inserts[0].query,
        "INSERT INTO default.tiered_logs (event_time, level, message) FORMAT JSONEachRow"
    );
    assert_eq!(inserts[0].database.as_deref(), Some("default"));
    assert_eq!(inserts[0].user.as_deref(), Some("default"));
    assert_eq!(inserts[0].key.as_deref(), Some("secret"));
    assert!(inserts[0].token.is_some());
    assert_ne!(inserts[0].token, inserts[1].token);
    assert_eq!(body_messages(&inserts[0].body), ["entry-0", "entry-1", "entry-2", "entry-3", "entry-4"]);
    assert_eq!(body_messages(&inserts[1].body), ["entry-5", "entry-6", "entry-7", "entry-8", "entry-9"]);
}

#[tokio::test]
async fn test_rows_carry_all_three_columns() {
    let (server, host) = start_server().await;
    let mut sink = BatchingLogSink::connect(&format!("http://{host}/?table=app_logs"), 1)
        .await
        .unwrap();

    sink.append(LogRecord::new(Level::Error, "payment failed")).await.unwrap();

    let inserts = server.inserts();
    assert!(inserts[0].query.starts_with("INSERT INTO default.app_logs "));
    let row: serde_json::Value = serde_json::from_str(inserts[0].body.trim_end()).unwrap();
    assert_eq!(row["level"], "error");
    assert_eq!(row["message"], "payment failed");
    assert_eq!(row["event_time"].as_str().unwrap().len(), "2024-01-01 00:00:00.000000".len());
}

#[tokio::test]
async fn test_rejected_insert_is_a_commit_failure() {
    let (server, host) = start_server().await;
    let mut sink = BatchingLogSink::connect(&format!("clickhouse://{host}/default"), 2)
        .await
        .unwrap();
    server.reject_inserts.store(true, Ordering::SeqCst);

    sink.append(entry(0)).await.unwrap();
    let err = sink.append(entry(1)).await.unwrap_err();

    assert_eq!(err.flush_stage(), Some(FlushStage::Commit));
    assert!(err.to_string().contains("Memory limit exceeded"));
    assert_eq!(sink.buffered(), 2);

    // Once the server recovers the retained rows go out in one request.
    server.reject_inserts.store(false, Ordering::SeqCst);
    sink.flush().await.unwrap();
    let inserts = server.inserts();
    assert_eq!(inserts.len(), 1);
    assert_eq!(body_messages(&inserts[0].body), ["entry-0", "entry-1"]);
}

#[tokio::test]
async fn test_refused_connection_fails_construction() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = BatchingLogSink::connect(&format!("clickhouse://127.0.0.1:{port}/default"), 5).await;
    assert!(matches!(result, Err(SinkError::Connection(_))));
}

#[tokio::test]
async fn test_bad_credentials_fail_construction() {
    let (_server, host) = start_server().await;
    let config = SinkConfig {
        dsn: format!("clickhouse://default@{host}/default"),
        batch_size: 5,
        user: Some("intruder".to_string()),
        ..SinkConfig::default()
    };

    let err = BatchingLogSink::from_config(&config).await.err().unwrap();
    assert!(err.is_connection());
    assert!(err.to_string().contains("401"));
}

fn written_messages(server: &FakeClickHouse) -> Vec<String> {
    server.inserts().iter().flat_map(|insert| body_messages(&insert.body)).collect()
}

#[tokio::test]
async fn test_commit_cancelled_in_flight_is_not_written_twice() {
    let (server, host) = start_server().await;
    let mut sink = BatchingLogSink::connect(&format!("clickhouse://{host}/default"), 10)
        .await
        .unwrap();
    server.reply_delay_ms.store(200, Ordering::SeqCst);

    sink.append(entry(0)).await.unwrap();
    let timed_out = tokio::time::timeout(Duration::from_millis(50), sink.flush())
        .await
        .is_err();
    assert!(timed_out);
    assert_eq!(sink.buffered(), 1);

    server.reply_delay_ms.store(0, Ordering::SeqCst);
    sink.flush().await.unwrap();

    assert_eq!(sink.buffered(), 0);
    assert_eq!(written_messages(&server), ["entry-0"]);
}

#[tokio::test]
async fn test_retry_after_cancelled_commit_only_adds_new_rows() {
    let (server, host) = start_server().await;
    let mut sink = BatchingLogSink::connect(&format!("clickhouse://{host}/default"), 10)
        .await
        .unwrap();
    server.reply_delay_ms.store(200, Ordering::SeqCst);

    sink.append(entry(0)).await.unwrap();
    sink.append(entry(1)).await.unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(50), sink.flush())
        .await
        .is_err());
    // Give the server time to apply the first INSERT.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(written_messages(&server), ["entry-0", "entry-1"]);

    server.reply_delay_ms.store(0, Ordering::SeqCst);
    sink.append(entry(2)).await.unwrap();
    sink.flush().await.unwrap();

    assert_eq!(written_messages(&server), ["entry-0", "entry-1", "entry-2"]);
    assert_eq!(server.deduplicated.load(Ordering::SeqCst), 1);
}
