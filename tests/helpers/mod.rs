#![allow(dead_code)] // Test helpers appear unused when compiled independently

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use reqwest::Client;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(100);

pub type Event = BTreeMap<String, String>;

#[derive(Clone)]
struct CollectorState {
    events: Arc<Mutex<Vec<Event>>>,
    /// Requests still to be answered with 503.
    failures: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

pub struct MockCollector {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    state: CollectorState,
}

impl MockCollector {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }

    /// Answer the next `count` tracker requests with 503.
    pub fn fail_next(&self, count: usize) {
        self.state.failures.store(count, Ordering::SeqCst);
    }

    /// Tracker requests received, failed ones included.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }
}

/// Find an available TCP port
pub async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// Spawn the mock collector, return (handle, base URL)
pub async fn spawn_mock_collector(port: u16) -> (MockCollector, String) {
    let state = CollectorState {
        events: Arc::new(Mutex::new(Vec::new())),
        failures: Arc::new(AtomicUsize::new(0)),
        attempts: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/tracker", get(track))
        .route("/events", get(events))
        .route("/reset", post(reset))
        .route("/health", get(health))
        .with_state(state.clone());

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("failed to bind mock collector listener");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock collector server error: {}", err);
        }
    });

    (
        MockCollector {
            shutdown_tx,
            handle,
            state,
        },
        format!("http://127.0.0.1:{}", port),
    )
}

/// Wait for a server to respond to /health
pub async fn wait_for_health(client: &Client, base_url: &str) {
    poll_until(|| async {
        client
            .get(format!("{}/health", base_url))
            .send()
            .await
            .ok()
            .map(|_| ())
    })
    .await
    .unwrap_or_else(|| panic!("timed out waiting for {} to be healthy", base_url));
}

/// Poll /events until we have at least `min_count` events
pub async fn wait_for_events(client: &Client, base_url: &str, min_count: usize) -> Vec<Event> {
    poll_until(|| async {
        match client.get(format!("{}/events", base_url)).send().await.ok() {
            Some(resp) => match resp.json::<Vec<Event>>().await.ok() {
                Some(events) if events.len() >= min_count => Some(events),
                _ => None,
            },
            None => None,
        }
    })
    .await
    .unwrap_or_else(|| panic!("timed out waiting for {} events at {}", min_count, base_url))
}

/// Reset the collector's event store
pub async fn reset_events(client: &Client, base_url: &str) {
    client
        .post(format!("{}/reset", base_url))
        .send()
        .await
        .expect("failed to reset events");
}

pub async fn poll_until<T, F, Fut>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(result) = f().await {
            return Some(result);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}

async fn track(
    State(state): State<CollectorState>,
    Query(event): Query<Event>,
) -> Result<&'static str, StatusCode> {
    state.attempts.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    state.events.lock().await.push(event);
    Ok("ok")
}

async fn events(State(state): State<CollectorState>) -> Json<Vec<Event>> {
    let events = state.events.lock().await;
    Json(events.clone())
}

async fn reset(State(state): State<CollectorState>) -> Json<serde_json::Value> {
    state.events.lock().await.clear();
    Json(serde_json::json!({ "status": "ok" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
