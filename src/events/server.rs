//! In-process publish/subscribe hub with pre-start buffering and adapter
//! fan-out.
//!
//! Lifecycle is `stopped → started` with no reverse transition; a fresh
//! instance is required to "restart". While stopped, published envelopes are
//! buffered and drained FIFO on `start()`.

use crate::events::adapters::EventAdapter;
use crate::events::envelope::{Envelope, HealthProbe, StaticHealthProbe};
use crate::events::topic::TopicPattern;
use crate::identity::WorkerIdentity;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle returned by `subscribe`; disposing it via `unsubscribe` is
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handle returned by `register_adapter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterId(u64);

type EventHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

pub struct EventServer {
    identity: WorkerIdentity,
    probe: Arc<dyn HealthProbe>,
    started: AtomicBool,
    buffer: Mutex<VecDeque<Envelope>>,
    next_id: AtomicU64,
    /// Exact-topic subscriptions, keyed by topic so broad wildcard listeners
    /// never slow down exact-topic delivery.
    exact: RwLock<HashMap<String, Vec<(u64, EventHandler)>>>,
    /// Wildcard subscriptions (`*` and prefix patterns), walked separately.
    wildcard: RwLock<Vec<(u64, TopicPattern, EventHandler)>>,
    adapters: RwLock<Vec<(u64, Arc<dyn EventAdapter>)>>,
}

impl EventServer {
    pub fn new(identity: WorkerIdentity) -> Self {
        Self::with_probe(identity, Arc::new(StaticHealthProbe))
    }

    /// Health state for envelope headers is read synchronously from the
    /// given probe at publish time; the probe never fails.
    pub fn with_probe(identity: WorkerIdentity, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            identity,
            probe,
            started: AtomicBool::new(false),
            buffer: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            exact: RwLock::new(HashMap::new()),
            wildcard: RwLock::new(Vec::new()),
            adapters: RwLock::new(Vec::new()),
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Begin normal operation: drain the pre-start buffer in FIFO order,
    /// delivering each envelope exactly as if published live.
    pub async fn start(&self) {
        // The flag flips under the buffer lock so a concurrent publish
        // either lands in the drained batch or sees started and delivers live
        let buffered: Vec<Envelope> = {
            let mut buffer = self.buffer.lock();
            if self.started.swap(true, Ordering::AcqRel) {
                return;
            }
            buffer.drain(..).collect()
        };
        if !buffered.is_empty() {
            debug!(count = buffered.len(), "Draining pre-start event buffer");
        }
        for envelope in buffered {
            self.deliver(&envelope).await;
        }
    }

    /// Publish an event. Before `start()` the constructed envelope is
    /// buffered; afterwards it is delivered to local subscribers and every
    /// registered adapter. Never fails due to infrastructure state.
    pub async fn publish(&self, event: impl Into<String>, payload: Value) -> Envelope {
        let envelope = Envelope::new(event, payload, &self.identity, self.probe.current_state());

        {
            let mut buffer = self.buffer.lock();
            if !self.is_started() {
                buffer.push_back(envelope.clone());
                return envelope;
            }
        }

        self.deliver(&envelope).await;
        envelope
    }

    async fn deliver(&self, envelope: &Envelope) {
        self.emit_local(envelope);

        let adapters: Vec<Arc<dyn EventAdapter>> = {
            let adapters = self.adapters.read();
            adapters.iter().map(|(_, a)| Arc::clone(a)).collect()
        };
        for adapter in adapters {
            if let Err(e) = adapter.publish(envelope).await {
                // Best-effort once accepted: swallow, log, keep going
                warn!(
                    adapter = adapter.name(),
                    event = %envelope.event,
                    error = %e,
                    "Adapter publish failed"
                );
            }
        }
    }

    /// Deliver to local subscribers only. Used by remote transports to
    /// re-inject envelopes received from other workers.
    pub fn emit_local(&self, envelope: &Envelope) {
        let exact_handlers: Vec<EventHandler> = {
            let exact = self.exact.read();
            exact
                .get(&envelope.event)
                .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in exact_handlers {
            handler(envelope);
        }

        let wildcard_handlers: Vec<EventHandler> = {
            let wildcard = self.wildcard.read();
            wildcard
                .iter()
                .filter(|(_, pattern, _)| pattern.matches(&envelope.event))
                .map(|(_, _, h)| Arc::clone(h))
                .collect()
        };
        for handler in wildcard_handlers {
            handler(envelope);
        }
    }

    /// Subscribe to an exact topic, `"*"`, or a trailing-`*` prefix pattern.
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: EventHandler = Arc::new(handler);
        let parsed = TopicPattern::parse(pattern);

        match parsed {
            TopicPattern::Exact(topic) => {
                self.exact.write().entry(topic).or_default().push((id, handler));
            }
            pattern => {
                self.wildcard.write().push((id, pattern, handler));
            }
        }
        SubscriptionId(id)
    }

    /// Remove a subscription. Unknown or already-removed ids are no-ops.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        {
            let mut exact = self.exact.write();
            for subs in exact.values_mut() {
                subs.retain(|(sub_id, _)| *sub_id != id.0);
            }
            exact.retain(|_, subs| !subs.is_empty());
        }
        self.wildcard.write().retain(|(sub_id, _, _)| *sub_id != id.0);
    }

    /// Register an adapter transport. Re-registering the same adapter
    /// instance is a no-op returning the existing id.
    pub fn register_adapter(&self, adapter: Arc<dyn EventAdapter>) -> AdapterId {
        let mut adapters = self.adapters.write();
        if let Some((id, _)) = adapters
            .iter()
            .find(|(_, existing)| Arc::ptr_eq(existing, &adapter))
        {
            return AdapterId(*id);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        adapters.push((id, adapter));
        AdapterId(id)
    }

    /// Remove an adapter. Unknown ids are no-ops.
    pub fn unregister_adapter(&self, id: AdapterId) {
        self.adapters.write().retain(|(adapter_id, _)| *adapter_id != id.0);
    }

    #[cfg(test)]
    pub(crate) fn buffered_count(&self) -> usize {
        self.buffer.lock().len()
    }
}
