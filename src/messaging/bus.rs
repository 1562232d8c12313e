//! Hybrid local/remote pub-sub primitive.
//!
//! Local delivery always happens via the in-process handler registry; remote
//! mirroring is opportunistic and hot-attaches/detaches as the remote-store
//! readiness flag flips. Subscribers never know (or re-subscribe) when the
//! transport comes and goes.

use crate::constants::{self, outage_keys};
use crate::infra::{InfraStatus, OutageDeduper};
use crate::messaging::store::RemoteStore;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wire frame for mirrored bus messages. The origin pid lets receivers drop
/// their own mirrored publishes (local delivery already happened).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BusFrame {
    origin_pid: u32,
    payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusSubscriptionId(u64);

type BusHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

pub struct MessageBus {
    pid: u32,
    store: Arc<dyn RemoteStore>,
    infra: Arc<InfraStatus>,
    outages: Arc<OutageDeduper>,
    prefix: String,
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(u64, BusHandler)>>>,
    attached: AtomicBool,
    pump_task: Mutex<Option<JoinHandle<()>>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl MessageBus {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        infra: Arc<InfraStatus>,
        outages: Arc<OutageDeduper>,
        prefix: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pid: std::process::id(),
            store,
            infra,
            outages,
            prefix: prefix.into(),
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
            attached: AtomicBool::new(false),
            pump_task: Mutex::new(None),
            watch_task: Mutex::new(None),
        })
    }

    /// Begin watching readiness transitions; attaches immediately when the
    /// remote store is already up. Local delivery works with or without this.
    pub fn start(self: &Arc<Self>) {
        let mut watch = self.watch_task.lock();
        if watch.is_some() {
            return;
        }

        if self.infra.is_up(constants::flags::REMOTE_STORE) {
            self.attach();
        }

        let this = Arc::clone(self);
        *watch = Some(tokio::spawn(async move {
            let mut rx = this.infra.watch();
            loop {
                match rx.recv().await {
                    Ok(transition) if transition.flag == constants::flags::REMOTE_STORE => {
                        if transition.up {
                            this.attach();
                        } else {
                            this.detach();
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        // Re-sync with the raw flag after lagging
                        if this.infra.is_up(constants::flags::REMOTE_STORE) {
                            this.attach();
                        } else {
                            this.detach();
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.watch_task.lock().take() {
            task.abort();
        }
        self.detach();
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Publish a message. Local delivery is unconditional and immediate;
    /// remote mirroring only happens while attached, and its failures are
    /// logged and ignored — local delivery already counts as success.
    pub async fn publish(&self, topic: &str, payload: Value) {
        self.emit_local(topic, &payload);

        if !self.is_attached() {
            return;
        }

        let frame = BusFrame {
            origin_pid: self.pid,
            payload,
        };
        let serialized = match serde_json::to_string(&frame) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!(topic = topic, error = %e, "Bus frame serialization failed");
                return;
            }
        };

        let channel = format!("{}:{}", self.prefix, topic);
        if let Err(e) = self.store.publish(&channel, &serialized).await {
            debug!(topic = topic, error = %e, "Remote bus mirror failed, local delivery stands");
        }
    }

    /// Register a handler for one topic. Remote-origin messages are
    /// translated back into local emissions, so handlers never see where a
    /// message came from.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> BusSubscriptionId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        BusSubscriptionId(id)
    }

    /// Remove a subscription; unknown ids are no-ops.
    pub fn unsubscribe(&self, id: BusSubscriptionId) {
        let mut handlers = self.handlers.write();
        for subs in handlers.values_mut() {
            subs.retain(|(sub_id, _)| *sub_id != id.0);
        }
        handlers.retain(|_, subs| !subs.is_empty());
    }

    fn emit_local(&self, topic: &str, payload: &Value) {
        let matched: Vec<BusHandler> = {
            let handlers = self.handlers.read();
            handlers
                .get(topic)
                .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in matched {
            handler(topic, payload);
        }
    }

    fn attach(self: &Arc<Self>) {
        if self.attached.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(prefix = %self.prefix, "Message bus attaching remote mirror");

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.pump_loop().await });
        if let Some(previous) = self.pump_task.lock().replace(handle) {
            previous.abort();
        }
    }

    fn detach(&self) {
        if !self.attached.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(prefix = %self.prefix, "Message bus detaching remote mirror");
        if let Some(task) = self.pump_task.lock().take() {
            task.abort();
        }
    }

    async fn pump_loop(self: Arc<Self>) {
        let pattern = format!("{}:*", self.prefix);
        let mut attempt: u32 = 0;

        while self.is_attached() {
            match self.store.subscribe_pattern(&pattern).await {
                Ok(mut rx) => {
                    attempt = 0;
                    if self.outages.up(outage_keys::BUS_SUB) {
                        info!(pattern = %pattern, "Bus remote subscription established");
                    }
                    while let Some(msg) = rx.recv().await {
                        self.handle_remote(&msg.channel, &msg.payload);
                    }
                    self.outages.down(outage_keys::BUS_SUB, "subscription stream ended");
                }
                Err(e) => {
                    self.outages.down(outage_keys::BUS_SUB, e.to_string());
                }
            }

            let ms = constants::RECONNECT_STEP_MS
                .saturating_mul(u64::from(attempt) + 1)
                .min(constants::RECONNECT_CAP_MS);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            attempt = attempt.saturating_add(1);
        }
    }

    fn handle_remote(&self, channel: &str, payload: &str) {
        let frame: BusFrame = match serde_json::from_str(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(channel = channel, error = %e, "Undecodable bus frame, dropping");
                return;
            }
        };

        if frame.origin_pid == self.pid {
            return; // our own mirror, already delivered locally
        }

        let topic = match channel.strip_prefix(&self.prefix).and_then(|rest| rest.strip_prefix(':')) {
            Some(topic) => topic,
            None => {
                warn!(channel = channel, "Bus frame on channel outside prefix, dropping");
                return;
            }
        };

        self.emit_local(topic, &frame.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::store::MemoryStore;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn wiring() -> (Arc<MemoryStore>, Arc<InfraStatus>, Arc<MessageBus>) {
        let store = Arc::new(MemoryStore::new());
        let infra = Arc::new(InfraStatus::new());
        let bus = MessageBus::new(
            Arc::clone(&store) as Arc<dyn RemoteStore>,
            Arc::clone(&infra),
            Arc::new(OutageDeduper::new()),
            "bus",
        );
        (store, infra, bus)
    }

    fn collector(bus: &MessageBus, topic: &str) -> Arc<StdMutex<Vec<Value>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(topic, move |_, payload| {
            sink.lock().unwrap().push(payload.clone());
        });
        seen
    }

    #[tokio::test]
    async fn test_local_delivery_without_remote() {
        let (_, _, bus) = wiring();
        let seen = collector(&bus, "sys:heartbeat");

        bus.publish("sys:heartbeat", json!({"pid": 1})).await;
        bus.publish("other", json!(2)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["pid"], 1);
    }

    #[tokio::test]
    async fn test_mirrors_to_remote_when_attached() {
        let (store, infra, bus) = wiring();
        infra.set(constants::flags::REMOTE_STORE, true, serde_json::Map::new());
        bus.start();
        assert!(bus.is_attached());

        let mut rx = store.subscribe_pattern("bus:*").await.unwrap();
        bus.publish("sys:heartbeat", json!({"seq": 9})).await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "bus:sys:heartbeat");
        let frame: BusFrame = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(frame.origin_pid, std::process::id());
        assert_eq!(frame.payload["seq"], 9);
    }

    #[tokio::test]
    async fn test_remote_frames_from_other_pids_are_emitted() {
        let (_, _, bus) = wiring();
        let seen = collector(&bus, "jobs:done");

        let foreign = serde_json::to_string(&BusFrame {
            origin_pid: std::process::id() + 1,
            payload: json!("remote"),
        })
        .unwrap();
        bus.handle_remote("bus:jobs:done", &foreign);

        let own = serde_json::to_string(&BusFrame {
            origin_pid: std::process::id(),
            payload: json!("self-echo"),
        })
        .unwrap();
        bus.handle_remote("bus:jobs:done", &own);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], json!("remote"));
    }

    #[tokio::test]
    async fn test_hot_detach_keeps_local_delivery() {
        let (store, infra, bus) = wiring();
        infra.set(constants::flags::REMOTE_STORE, true, serde_json::Map::new());
        bus.start();
        assert!(bus.is_attached());

        let seen = collector(&bus, "topic");

        // Store goes down; detach must not disturb local subscribers
        store.set_healthy(false);
        infra.set(constants::flags::REMOTE_STORE, false, serde_json::Map::new());
        tokio::task::yield_now().await;

        bus.publish("topic", json!(1)).await;
        // Poll until the watch task has processed the transition
        for _ in 0..50 {
            if !bus.is_attached() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(!bus.is_attached());
        bus.publish("topic", json!(2)).await;

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_publish_survives_store_error_while_attached() {
        let (store, infra, bus) = wiring();
        infra.set(constants::flags::REMOTE_STORE, true, serde_json::Map::new());
        bus.start();

        let seen = collector(&bus, "topic");
        store.set_healthy(false);

        // Remote mirror fails but the publish neither errors nor drops local delivery
        bus.publish("topic", json!("still works")).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
