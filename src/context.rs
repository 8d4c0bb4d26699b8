//! Per-session context handed to view code.
//!
//! Owns the cache and the metrics engine for one application/view session
//! and maps view lifecycle notifications (first run, session start, focus,
//! blur) onto metrics calls.

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::metrics::{LiveHandle, MetricsConfig, MetricsEngine, MetricsError, Payload, SessionData};

/// Identifiers of the running application and view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIds {
    pub account: Option<String>,
    pub application: Option<String>,
    /// Namespaces cache keys. Falls back to the page location in the host.
    pub view: String,
}

impl SessionIds {
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            view: view.into(),
            ..Self::default()
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    /// Session data attached to every metrics event.
    pub fn session_data(&self) -> SessionData {
        let mut data = SessionData::new().with("view", self.view.clone());
        if let Some(account) = &self.account {
            data.insert("account", account.clone());
        }
        if let Some(application) = &self.application {
            data.insert("application", application.clone());
        }
        data
    }
}

#[derive(Debug)]
pub struct AppContext {
    ids: SessionIds,
    cache: Cache,
    metrics: MetricsEngine,
    session_tracker: Option<LiveHandle>,
    view_tracker: Option<LiveHandle>,
}

impl AppContext {
    pub fn new(ids: SessionIds, cache: Cache, metrics: MetricsEngine) -> Self {
        Self {
            ids,
            cache,
            metrics,
            session_tracker: None,
            view_tracker: None,
        }
    }

    pub fn ids(&self) -> &SessionIds {
        &self.ids
    }

    pub fn cache(&mut self) -> &mut Cache {
        &mut self.cache
    }

    pub fn metrics(&self) -> &MetricsEngine {
        &self.metrics
    }

    /// `<view>_<suffix>`, e.g. `home_settings`.
    pub fn view_key(&self, suffix: &str) -> String {
        format!("{}_{}", self.ids.view, suffix)
    }

    /// Write `value` under this view's `suffix` key unless the cached value is
    /// already equal. Returns whether a write happened.
    pub fn store_if_changed<T: Serialize + ?Sized>(&mut self, suffix: &str, value: &T) -> bool {
        let key = self.view_key(suffix);
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to serialize value for cache");
                return false;
            }
        };
        if self.cache.get_value(&key).as_ref() == Some(&value) {
            debug!(key = %key, "cached value unchanged");
            return false;
        }
        self.cache.set_value(&key, &value);
        true
    }

    /// Start metrics with this session's identifiers.
    pub fn init_metrics(&self, config: MetricsConfig) -> Result<(), MetricsError> {
        self.metrics.init(config, self.ids.session_data())
    }

    pub fn on_first_run(&self) {
        self.metrics.track("installation", Payload::new());
    }

    pub fn on_session_start(&mut self) {
        if let Some(previous) = self.session_tracker.take() {
            previous.cancel();
        }
        self.session_tracker = Some(self.metrics.live("session", Payload::new()));
    }

    /// Start timing the view. A tracker left over from an earlier focus is ended first.
    pub fn on_view_focus(&mut self) {
        if let Some(previous) = self.view_tracker.take() {
            previous.cancel();
        }
        self.view_tracker = Some(self.metrics.live("view", Payload::new()));
    }

    pub fn on_view_blur(&mut self) {
        if let Some(tracker) = self.view_tracker.take() {
            tracker.cancel();
        }
    }

    /// Unload metrics and return every undelivered payload.
    pub fn shutdown(&mut self) -> Vec<Payload> {
        self.session_tracker = None;
        self.view_tracker = None;
        self.metrics.unload()
    }
}
