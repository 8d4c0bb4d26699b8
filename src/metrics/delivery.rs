//! Delivery channel carrying one encoded event to the collector.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use super::config::Payload;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when delivering an event
#[derive(Debug)]
pub enum DeliveryError {
    Http { status: u16, uri: String },
    Network(String),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Http { status, uri } => write!(f, "HTTP {} from {}", status, uri),
            DeliveryError::Network(msg) => write!(f, "network error: {}", msg),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Sends a fully built collector URL. Resolving `Ok` is the "load" outcome,
/// `Err` the "error" outcome.
#[async_trait::async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, url: &str) -> Result<(), DeliveryError>;
}

/// Fires a GET per event, like a tracking pixel.
pub struct HttpDelivery {
    client: Client,
}

impl HttpDelivery {
    /// Returns an error if the HTTP client fails to build.
    pub fn new() -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| DeliveryError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Delivery for HttpDelivery {
    async fn deliver(&self, url: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(error_chain(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Http {
                status: status.as_u16(),
                uri: strip_query(url).to_string(),
            });
        }
        debug!(status = status.as_u16(), "metrics event delivered");
        Ok(())
    }
}

/// `<uri>?k1=v1&k2=v2` with every key and value percent-encoded.
pub fn build_collector_url(uri: &str, payload: &Payload) -> String {
    let query = payload
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    if query.is_empty() {
        uri.to_string()
    } else {
        format!("{}?{}", uri, query)
    }
}

/// `e` followed by each of its sources, so connect failures name their cause.
fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(" <- ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
