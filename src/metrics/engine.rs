//! The metrics send loop.
//!
//! Events wait in two places: a FIFO of fixed events and an unordered set of
//! live events. [`MetricsEngine::send`] moves at most one event into the
//! in-transit slot and hands its URL to the [`Delivery`] on a spawned task;
//! nothing else is sent until that task resolves the slot. Fixed events are
//! always preferred over ready live events.
//!
//! State lives behind a mutex that is never held across an `.await`. Every
//! spawned task carries the generation it was started in, and `unload` bumps
//! the generation, so late completions from a previous session are dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::backoff::BackoffStrategy;
use super::config::{MetricsConfig, Payload, SessionData};
use super::delivery::{build_collector_url, Delivery, DeliveryError, HttpDelivery};
use super::event::{event_payload, FixedEvent, LiveEvent, LiveId};
use super::MetricsError;
use crate::clock::{Clock, SystemClock};

/// Snapshot of the queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub live: usize,
    pub in_transit: bool,
    pub errors: u32,
}

/// Cheap to clone; all clones drive the same queues.
#[derive(Clone)]
pub struct MetricsEngine {
    inner: Arc<Inner>,
}

/// Ends a live event. Returned by [`MetricsEngine::live`].
///
/// Cancelling queues a final fixed snapshot of the event. Cancelling twice, or
/// after the engine was unloaded or dropped, does nothing.
#[must_use = "dropping the handle leaves the live event running until unload"]
#[derive(Debug, Clone)]
pub struct LiveHandle {
    engine: Weak<Inner>,
    id: LiveId,
}

impl LiveHandle {
    pub fn cancel(&self) {
        if let Some(inner) = self.engine.upgrade() {
            inner.die(self.id);
        }
    }
}

struct Inner {
    state: Mutex<State>,
    delivery: Arc<dyn Delivery>,
    clock: Arc<dyn Clock>,
}

struct Settings {
    uri: String,
    interval: Option<Duration>,
    backoff: BackoffStrategy,
    session: Payload,
    runtime: Handle,
}

enum InTransit {
    Fixed(FixedEvent),
    Live(LiveId),
}

#[derive(Default)]
struct State {
    settings: Option<Arc<Settings>>,
    generation: u64,
    in_transit: Option<InTransit>,
    pending: VecDeque<FixedEvent>,
    live: Vec<LiveEvent>,
    next_live_id: u64,
    errors: u32,
    poll: Option<JoinHandle<()>>,
    task: Option<JoinHandle<()>>,
}

impl MetricsEngine {
    pub fn new(delivery: Arc<dyn Delivery>) -> Self {
        Self::with_clock(delivery, Arc::new(SystemClock))
    }

    /// Engine delivering over HTTP GET.
    pub fn http() -> Result<Self, DeliveryError> {
        Ok(Self::new(Arc::new(HttpDelivery::new()?)))
    }

    /// `clock` stamps the `time` field of new events.
    pub fn with_clock(delivery: Arc<dyn Delivery>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                delivery,
                clock,
            }),
        }
    }

    /// Start sending. Events queued before this call are kept, followed by
    /// `config.pending`. Must be called from within a tokio runtime.
    pub fn init(&self, config: MetricsConfig, session: SessionData) -> Result<(), MetricsError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| MetricsError::NoRuntime)?;

        let mut session = session.into_map();
        if let Some(domain) = &config.domain {
            session.insert("domain".to_string(), domain.clone());
        }
        let settings = Settings {
            uri: config.collector_uri(),
            interval: config.interval(),
            backoff: config.backoff(),
            session,
            runtime,
        };

        {
            let mut state = self.inner.lock();
            if state.settings.is_some() {
                debug!("metrics engine re-initialized");
                if let Some(poll) = state.poll.take() {
                    poll.abort();
                }
            }
            let adopted = config.pending.len();
            state
                .pending
                .extend(config.pending.into_iter().map(FixedEvent::new));
            info!(
                uri = %settings.uri,
                interval_ms = config.interval_ms,
                queued = state.pending.len(),
                adopted,
                "metrics engine initialized"
            );
            state.settings = Some(Arc::new(settings));
        }

        self.inner.flush(false);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().settings.is_some()
    }

    /// Queue a one-shot event.
    pub fn track(&self, event: &str, properties: Payload) {
        self.inner.track(event, properties);
    }

    /// Queue `<event>_view` and start a live `<event>_usage` tracker.
    pub fn live(&self, event: &str, properties: Payload) -> LiveHandle {
        let now_ms = self.inner.clock.now_ms();
        let usage = event_payload(&format!("{}_usage", event), properties.clone(), now_ms);
        let now = Instant::now();

        self.inner.track(&format!("{}_view", event), properties);

        let id = {
            let mut state = self.inner.lock();
            let id = LiveId(state.next_live_id);
            state.next_live_id += 1;
            state.live.push(LiveEvent::new(id, usage, now));
            id
        };
        self.inner.flush(false);

        LiveHandle {
            engine: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Send now when `force` is set or polling is disabled; otherwise make
    /// sure the poll timer is running. No-op before `init`.
    pub fn flush(&self, force: bool) {
        self.inner.flush(force);
    }

    /// Dispatch the next eligible event if nothing is in flight.
    pub fn send(&self) {
        self.inner.send();
    }

    /// Stop sending and hand back every undelivered payload, including the
    /// one in flight. The engine accepts events again but sends nothing
    /// until the next `init`.
    pub fn unload(&self) -> Vec<Payload> {
        let mut state = self.inner.lock();
        state.settings = None;
        state.generation += 1;
        state.errors = 0;

        if let Some(task) = state.task.take() {
            task.abort();
        }
        if let Some(poll) = state.poll.take() {
            poll.abort();
        }
        match state.in_transit.take() {
            Some(InTransit::Fixed(event)) => state.pending.push_back(event),
            Some(InTransit::Live(id)) => {
                if let Some(event) = state.live.iter_mut().find(|e| e.id() == id) {
                    event.error();
                }
            }
            None => {}
        }

        let now = Instant::now();
        let mut drained: Vec<Payload> = state.pending.drain(..).map(FixedEvent::into_data).collect();
        drained.extend(state.live.drain(..).map(|mut event| event.take_data(now)));

        debug!(drained = drained.len(), "metrics engine unloaded");
        drained
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock();
        QueueStats {
            pending: state.pending.len(),
            live: state.live.len(),
            in_transit: state.in_transit.is_some(),
            errors: state.errors,
        }
    }
}

impl std::fmt::Debug for MetricsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsEngine")
            .field("initialized", &self.is_initialized())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(self: &Arc<Self>, event: &str, properties: Payload) {
        let payload = event_payload(event, properties, self.clock.now_ms());
        self.lock().pending.push_back(FixedEvent::new(payload));
        self.flush(false);
    }

    fn die(self: &Arc<Self>, id: LiveId) {
        {
            let mut state = self.lock();
            let Some(pos) = state.live.iter().position(|e| e.id() == id) else {
                return;
            };
            let mut event = state.live.remove(pos);
            let snapshot = event.take_data(Instant::now());
            state.pending.push_back(FixedEvent::new(snapshot));
        }
        self.flush(false);
    }

    fn flush(self: &Arc<Self>, force: bool) {
        let mut state = self.lock();
        let Some(settings) = state.settings.clone() else {
            return;
        };

        match settings.interval {
            Some(period) if !force => {
                if state.poll.is_none() {
                    state.poll = Some(self.spawn_poll(&settings.runtime, period));
                }
            }
            _ => {
                drop(state);
                self.send();
            }
        }
    }

    fn spawn_poll(self: &Arc<Self>, runtime: &Handle, period: Duration) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let start = Instant::now() + period;
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                inner.send();
            }
        })
    }

    fn send(self: &Arc<Self>) {
        let mut state = self.lock();
        if state.in_transit.is_some() {
            return;
        }
        let Some(settings) = state.settings.clone() else {
            return;
        };

        let now = Instant::now();
        let (in_transit, mut data) = if let Some(event) = state.pending.pop_front() {
            let data = event.data().clone();
            (InTransit::Fixed(event), data)
        } else if let Some(event) = state
            .live
            .iter_mut()
            .find(|e| e.is_ready(now, settings.interval))
        {
            (InTransit::Live(event.id()), event.take_data(now))
        } else {
            return;
        };

        data.extend(settings.session.clone());
        let url = build_collector_url(&settings.uri, &data);
        debug!(
            event = data.get("event").map(String::as_str).unwrap_or(""),
            "sending metrics event"
        );

        state.in_transit = Some(in_transit);
        let generation = state.generation;
        let inner = Arc::clone(self);
        let runtime = settings.runtime.clone();
        state.task = Some(runtime.spawn(async move {
            let result = inner.delivery.deliver(&url).await;
            inner.resolve(generation, &settings, result).await;
        }));
    }

    async fn resolve(
        self: &Arc<Self>,
        generation: u64,
        settings: &Settings,
        result: Result<(), DeliveryError>,
    ) {
        match result {
            Ok(()) => {
                {
                    let mut state = self.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.errors = 0;
                    if let Some(InTransit::Live(id)) = state.in_transit.take() {
                        if let Some(event) = state.live.iter_mut().find(|e| e.id() == id) {
                            event.complete();
                        }
                    }
                    state.task = None;
                }
                self.send();
            }
            Err(e) => {
                let (errors, delay) = {
                    let mut state = self.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.errors = state.errors.saturating_add(1);
                    let errors = state.errors;
                    (errors, settings.backoff.delay_for_errors(errors))
                };
                warn!(
                    uri = %settings.uri,
                    error = %e,
                    errors,
                    delay_ms = delay.as_millis() as u64,
                    "unable to send metrics, retrying"
                );

                tokio::time::sleep(delay).await;

                {
                    let mut state = self.lock();
                    if state.generation != generation {
                        return;
                    }
                    match state.in_transit.take() {
                        Some(InTransit::Fixed(event)) => state.pending.push_back(event),
                        Some(InTransit::Live(id)) => {
                            if let Some(event) = state.live.iter_mut().find(|e| e.id() == id) {
                                event.error();
                            }
                        }
                        None => {}
                    }
                    state.task = None;
                }
                self.send();
            }
        }
    }
}
