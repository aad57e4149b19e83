//! InfluxDB Sink Tests
//!
//! Tests the HTTP sink against a local stand-in server:
//! - Schema bootstrap (ping + CREATE DATABASE)
//! - Batch write request shape
//! - Rejected and unreachable writes
//! - Pipeline end to end through the sink
//

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use iotbridge_core::{
    BatchPipeline, PipelineConfig, Point, PointSink, PointValue, SinkError,
};
use iotbridge_sinks::influx::{InfluxConfig, InfluxSink};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Request {
    query: HashMap<String, String>,
    authorization: Option<String>,
    body: String,
}

#[derive(Default)]
struct Recorded {
    queries: Mutex<Vec<String>>,
    writes: Mutex<Vec<Request>>,
}

async fn ping() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn query(State(recorded): State<Arc<Recorded>>, body: String) -> StatusCode {
    recorded.queries.lock().push(body);
    StatusCode::OK
}

async fn write(
    State(recorded): State<Arc<Recorded>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    if body.contains("malformed") {
        return (StatusCode::BAD_REQUEST, "unable to parse".to_string());
    }
    recorded.writes.lock().push(Request {
        query,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    (StatusCode::NO_CONTENT, String::new())
}

async fn start_server() -> (String, Arc<Recorded>) {
    let recorded = Arc::new(Recorded::default());
    let app = Router::new()
        .route("/ping", get(ping))
        .route("/query", post(query))
        .route("/write", post(write))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), recorded)
}

fn sink(base_url: &str) -> InfluxSink {
    let mut config = InfluxConfig::new(base_url, "thingsroot");
    config.username = Some("root".to_string());
    config.password = Some("root".to_string());
    config.timeout = Duration::from_secs(5);
    InfluxSink::new(config).unwrap()
}

#[tokio::test]
async fn test_ensure_schema_creates_database() {
    let (url, recorded) = start_server().await;
    sink(&url).ensure_schema().await.unwrap();

    let queries = recorded.queries.lock();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].starts_with("q=CREATE+DATABASE"));
    assert!(queries[0].contains("thingsroot"));
}

#[tokio::test]
async fn test_write_batch_request() {
    let (url, recorded) = start_server().await;
    let batch = vec![
        Point::new("temp", "int_value", "d1", 1000.0, PointValue::Integer(21), 0),
        Point::new("device_status", "online", "g1", 1001.0, PointValue::Boolean(true), 0),
    ];
    sink(&url).write(&batch).await.unwrap();

    let writes = recorded.writes.lock();
    assert_eq!(writes.len(), 1);
    let request = &writes[0];
    assert_eq!(request.query.get("db").map(String::as_str), Some("thingsroot"));
    assert_eq!(request.query.get("precision").map(String::as_str), Some("ms"));
    // "root:root"
    assert_eq!(request.authorization.as_deref(), Some("Basic cm9vdDpyb290"));
    assert_eq!(
        request.body,
        "temp,device=d1 int_value=21i,quality=0i 1000000\n\
         device_status,device=g1 online=true,quality=0i 1001000"
    );
}

#[tokio::test]
async fn test_bad_request_is_rejected() {
    let (url, _recorded) = start_server().await;
    let batch = vec![Point::new(
        "m",
        "value",
        "d1",
        1.0,
        PointValue::String("malformed".to_string()),
        0,
    )];
    let err = sink(&url).write(&batch).await.unwrap_err();
    match err {
        SinkError::Rejected { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "unable to parse");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unreachable_store_fails_schema_check() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = sink(&url).ensure_schema().await.unwrap_err();
    assert!(matches!(err, SinkError::Connection(_)));
}

#[tokio::test]
async fn test_pipeline_writes_through_sink() {
    let (url, recorded) = start_server().await;
    let pipeline = BatchPipeline::new(PipelineConfig::default(), Arc::new(sink(&url)));

    for i in 0..3 {
        pipeline
            .submit(Point::new("temp", "value", "d1", i as f64, PointValue::Float(1.5), 0))
            .await;
    }
    pipeline.flush();
    pipeline.drain().await;

    let writes = recorded.writes.lock();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].body.lines().count(), 3);
    assert_eq!(pipeline.stats().written_points, 3);
}
