// src/lib.rs
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod metrics;
pub mod native;

pub use cache::Cache;
pub use config::SdkConfig;
pub use context::{AppContext, SessionIds};
pub use metrics::{LiveHandle, MetricsConfig, MetricsEngine, Payload, SessionData};

// Re-export tracing for use in other modules
pub use tracing;

pub use native::build_router;
