use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::metrics::Payload;

/// Initialize the tracing subscriber.
/// Uses RUST_LOG env var for filtering (defaults to info).
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_ansi(true)).init();
    }
}

/// Events received by the development collector, in arrival order.
#[derive(Clone, Default)]
pub struct CollectorLog {
    events: Arc<Mutex<Vec<Payload>>>,
}

impl CollectorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Payload> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn record(&self, event: Payload) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Payload>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Local collector: `GET /tracker` records the query string as one event.
/// `GET /events` lists what was recorded and `POST /reset` clears it.
pub fn build_router(log: CollectorLog) -> Router {
    Router::new()
        .route("/tracker", get(handle_tracker))
        .route("/events", get(handle_events))
        .route("/reset", post(handle_reset))
        .route("/health", get(|| async { "ok" }))
        .with_state(log)
}

async fn handle_tracker(State(log): State<CollectorLog>, Query(event): Query<Payload>) -> &'static str {
    info!(
        event = event.get("event").map(String::as_str).unwrap_or(""),
        fields = event.len(),
        "metrics event received"
    );
    log.record(event);
    "ok"
}

async fn handle_events(State(log): State<CollectorLog>) -> Json<Vec<Payload>> {
    Json(log.events())
}

async fn handle_reset(State(log): State<CollectorLog>) -> &'static str {
    log.clear();
    "ok"
}
