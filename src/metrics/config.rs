//! Metrics engine configuration and session-wide data.

use std::collections::BTreeMap;
use std::time::Duration;

use super::backoff::BackoffStrategy;
use super::MetricsError;

/// Flat string map sent as query parameters.
pub type Payload = BTreeMap<String, String>;

pub const DEFAULT_URI: &str = "http://localhost:44080/tracker";
pub const DEFAULT_INTERVAL_MS: i64 = 5000;
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(250);

/// Path segment every collector URI must end with.
pub const COLLECTOR_PATH: &str = "tracker";

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Collector endpoint. `/tracker` is appended when missing.
    pub uri: String,
    /// Poll interval in milliseconds. Zero or negative sends every event as
    /// soon as it is queued and disables live events.
    pub interval_ms: i64,
    /// Added to the session data as `domain` when set.
    pub domain: Option<String>,
    /// Lower bound on the retry delay after a failed send.
    pub min_backoff: Duration,
    /// Payloads recorded before the engine existed, queued ahead of the first flush.
    pub pending: Vec<Payload>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            interval_ms: DEFAULT_INTERVAL_MS,
            domain: None,
            min_backoff: DEFAULT_MIN_BACKOFF,
            pending: Vec::new(),
        }
    }
}

impl MetricsConfig {
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: i64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_min_backoff(mut self, min_backoff: Duration) -> Self {
        self.min_backoff = min_backoff;
        self
    }

    pub fn with_pending(mut self, pending: Vec<Payload>) -> Self {
        self.pending = pending;
        self
    }

    pub fn validate(&self) -> Result<(), MetricsError> {
        let uri = self.uri.trim();
        if uri.is_empty() {
            return Err(MetricsError::InvalidConfig(
                "collector uri must not be empty".to_string(),
            ));
        }
        if !(uri.starts_with("http://") || uri.starts_with("https://")) {
            return Err(MetricsError::InvalidConfig(format!(
                "collector uri must be http(s): {}",
                uri
            )));
        }
        Ok(())
    }

    /// Collector URI with the canonical `/tracker` suffix.
    pub fn collector_uri(&self) -> String {
        let uri = self.uri.trim().trim_end_matches('/');
        let suffix = format!("/{}", COLLECTOR_PATH);
        if uri.ends_with(&suffix) {
            uri.to_string()
        } else {
            format!("{}{}", uri, suffix)
        }
    }

    /// Poll interval, or `None` when polling is disabled.
    pub fn interval(&self) -> Option<Duration> {
        if self.interval_ms > 0 {
            Some(Duration::from_millis(self.interval_ms as u64))
        } else {
            None
        }
    }

    /// Retry delay grows with the poll interval; without polling it is the floor.
    pub fn backoff(&self) -> BackoffStrategy {
        match self.interval() {
            Some(interval) => BackoffStrategy::Logarithmic {
                interval,
                floor: self.min_backoff,
            },
            None => BackoffStrategy::Fixed(self.min_backoff),
        }
    }
}

/// Session-wide identifiers merged into every outgoing event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData(Payload);

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn as_map(&self) -> &Payload {
        &self.0
    }

    pub fn into_map(self) -> Payload {
        self.0
    }
}

impl From<Payload> for SessionData {
    fn from(map: Payload) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_collector_conventions() {
        let config = MetricsConfig::default();
        assert_eq!(config.uri, "http://localhost:44080/tracker");
        assert_eq!(config.interval(), Some(Duration::from_millis(5000)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn collector_uri_appends_tracker_once() {
        let cases = [
            ("http://metrics.example.com", "http://metrics.example.com/tracker"),
            ("http://metrics.example.com/", "http://metrics.example.com/tracker"),
            ("http://host:44080/tracker", "http://host:44080/tracker"),
            ("http://host:44080/tracker/", "http://host:44080/tracker"),
            ("http://host/api", "http://host/api/tracker"),
        ];
        for (input, expected) in cases {
            let config = MetricsConfig::default().with_uri(input);
            assert_eq!(config.collector_uri(), expected, "input: {}", input);
        }
    }

    #[test]
    fn non_positive_interval_disables_polling() {
        assert_eq!(MetricsConfig::default().with_interval_ms(0).interval(), None);
        assert_eq!(MetricsConfig::default().with_interval_ms(-5).interval(), None);
    }

    #[test]
    fn immediate_mode_retries_at_the_floor() {
        let config = MetricsConfig::default()
            .with_interval_ms(0)
            .with_min_backoff(Duration::from_millis(40));
        assert_eq!(config.backoff().delay_for_errors(7), Duration::from_millis(40));

        let polling = MetricsConfig::default().with_min_backoff(Duration::ZERO);
        assert_eq!(polling.backoff().delay_for_errors(1), Duration::ZERO);
    }

    #[test]
    fn validate_rejects_bad_uris() {
        assert!(MetricsConfig::default().with_uri("").validate().is_err());
        let err = MetricsConfig::default()
            .with_uri("ftp://example.com")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn session_data_builder() {
        let session = SessionData::new()
            .with("account", "42")
            .with("view", "home");
        assert_eq!(session.get("account"), Some("42"));
        assert_eq!(session.as_map().len(), 2);
    }
}
