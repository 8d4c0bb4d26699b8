//! Batched usage metrics: one event in flight at a time, fixed events first,
//! live events re-reported every poll interval.

pub mod backoff;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod event;

pub use backoff::BackoffStrategy;
pub use config::{MetricsConfig, Payload, SessionData, DEFAULT_INTERVAL_MS, DEFAULT_URI};
pub use delivery::{build_collector_url, Delivery, DeliveryError, HttpDelivery};
pub use engine::{LiveHandle, MetricsEngine, QueueStats};

#[derive(Debug)]
pub enum MetricsError {
    /// `init` was called outside a tokio runtime.
    NoRuntime,
    InvalidConfig(String),
}

impl std::fmt::Display for MetricsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsError::NoRuntime => write!(f, "metrics engine requires a tokio runtime"),
            MetricsError::InvalidConfig(e) => write!(f, "invalid metrics config: {}", e),
        }
    }
}

impl std::error::Error for MetricsError {}
