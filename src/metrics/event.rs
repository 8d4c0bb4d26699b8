//! Fixed (send once) and live (duration accumulating) metric events.

use std::time::Duration;

use tokio::time::Instant;

use super::config::Payload;

/// Build the base payload for an event: `event`, `time`, then the caller's
/// properties (which win on key collisions).
pub fn event_payload(event: &str, properties: Payload, now_ms: i64) -> Payload {
    let mut payload = Payload::new();
    payload.insert("event".to_string(), event.to_string());
    payload.insert("time".to_string(), now_ms.to_string());
    payload.extend(properties);
    payload
}

/// One-shot event, discarded once delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedEvent {
    payload: Payload,
}

impl FixedEvent {
    pub fn new(payload: Payload) -> Self {
        Self { payload }
    }

    pub fn data(&self) -> &Payload {
        &self.payload
    }

    pub fn into_data(self) -> Payload {
        self.payload
    }
}

/// Identifies a live event for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveId(pub(crate) u64);

/// Event re-sent every poll interval with the time elapsed since its last
/// successful delivery in `units` (milliseconds).
#[derive(Debug)]
pub struct LiveEvent {
    id: LiveId,
    payload: Payload,
    last: Instant,
    transit: Option<Instant>,
}

impl LiveEvent {
    pub fn new(id: LiveId, payload: Payload, now: Instant) -> Self {
        Self {
            id,
            payload,
            last: now,
            transit: None,
        }
    }

    pub fn id(&self) -> LiveId {
        self.id
    }

    pub fn in_transit(&self) -> bool {
        self.transit.is_some()
    }

    /// Ready when not already in flight and at least one full interval has
    /// passed since the last successful send. Never ready without an interval.
    pub fn is_ready(&self, now: Instant, interval: Option<Duration>) -> bool {
        match interval {
            Some(interval) if self.transit.is_none() => {
                now.saturating_duration_since(self.last) >= interval
            }
            _ => false,
        }
    }

    /// Snapshot the payload for sending, stamping `units` with the time since
    /// the last successful send and marking the event as in flight.
    pub fn take_data(&mut self, now: Instant) -> Payload {
        self.transit = Some(now);
        let units = now.saturating_duration_since(self.last).as_millis();
        self.payload.insert("units".to_string(), units.to_string());
        self.payload.clone()
    }

    /// Delivery succeeded: the next delta starts where this one ended.
    pub fn complete(&mut self) {
        if let Some(sent) = self.transit.take() {
            self.last = sent;
        }
    }

    /// Delivery failed: the same delta (plus new time) goes out next time.
    pub fn error(&mut self) {
        self.transit = None;
    }
}
