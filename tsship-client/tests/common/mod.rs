//! Mock ingestion endpoint and helpers shared by the client integration tests.

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tsship_client::ShipperOptions;
use tsship_persistent_storage::compression;
use tsship_persistent_storage::PersistenceConfig;

/// One POST as the endpoint saw it.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Received {
    pub gzip: bool,
    pub query: Option<String>,
    pub points: Vec<serde_json::Value>,
}

#[derive(Clone)]
pub struct MockEndpoint {
    pub url: String,
    pub healthy: Arc<AtomicBool>,
    pub probes: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Received>>>,
    // scripted (status, body) answers for the next POSTs; default is a 200 summary
    script: Arc<Mutex<VecDeque<(u16, String)>>>,
}

#[allow(dead_code)]
impl MockEndpoint {
    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    pub fn post_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn all_points(&self) -> Vec<serde_json::Value> {
        self.received()
            .into_iter()
            .flat_map(|r| r.points)
            .collect()
    }

    pub fn script(&self, status: u16, body: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back((status, body.to_string()));
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

async fn put(
    State(mock): State<MockEndpoint>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> (StatusCode, String) {
    let gzip = headers
        .get(header::CONTENT_ENCODING)
        .map(|v| v == "gzip")
        .unwrap_or(false);
    let raw = if gzip {
        match compression::decompress(&body) {
            Ok(raw) => raw,
            Err(_) => return (StatusCode::BAD_REQUEST, "bad gzip".to_string()),
        }
    } else {
        body.to_vec()
    };
    let points: Vec<serde_json::Value> = match serde_json::from_slice(&raw) {
        Ok(points) => points,
        Err(_) => return (StatusCode::BAD_REQUEST, "Unable to parse the given JSON".to_string()),
    };
    let n = points.len();
    mock.received.lock().unwrap().push(Received {
        gzip,
        query: query.clone(),
        points,
    });

    if let Some((status, body)) = mock.script.lock().unwrap().pop_front() {
        return (StatusCode::from_u16(status).unwrap(), body);
    }
    let body = match query.as_deref() {
        Some("details") => format!(r#"{{"errors":[],"failed":0,"success":{}}}"#, n),
        Some("summary") => format!(r#"{{"failed":0,"success":{}}}"#, n),
        _ => String::new(),
    };
    (StatusCode::OK, body)
}

async fn version(State(mock): State<MockEndpoint>) -> (StatusCode, &'static str) {
    mock.probes.fetch_add(1, Ordering::SeqCst);
    if mock.healthy.load(Ordering::SeqCst) {
        (StatusCode::OK, r#"{"version":"2.4.1"}"#)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

/// Start a mock endpoint on an ephemeral localhost port.
pub async fn start_mock() -> MockEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    let mock = MockEndpoint {
        url: format!("http://{}", addr),
        healthy: Arc::new(AtomicBool::new(true)),
        probes: Arc::new(AtomicUsize::new(0)),
        received: Arc::new(Mutex::new(Vec::new())),
        script: Arc::new(Mutex::new(VecDeque::new())),
    };
    let app = Router::new()
        .route("/api/put", post(put))
        .route("/api/version", get(version))
        .with_state(mock.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    mock
}

/// A localhost URL nothing listens on.
#[allow(dead_code)]
pub async fn closed_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{}", addr)
}

/// Fast timeouts, threshold-1 batches, storage under `dir`.
pub fn test_options(endpoint: &str, dir: &Path) -> ShipperOptions {
    ShipperOptions {
        endpoint: endpoint.to_string(),
        connect_timeout_ms: 300,
        request_timeout_ms: 1_000,
        probe_connect_timeout_ms: 300,
        probe_request_timeout_ms: 500,
        probe_period_ms: 50,
        retry_count: 1,
        retry_delay_ms: 10,
        batch_size: 1,
        batch_time_ms: 60_000,
        persistence: PersistenceConfig {
            dir: dir.to_path_buf(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Poll `cond` until it holds or `timeout` passes.
#[allow(dead_code)]
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
