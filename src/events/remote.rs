//! Remote transport adapter: mirrors local envelopes onto the shared channel
//! namespace and re-injects envelopes published by other workers.
//!
//! Connections are lazy and retried with capped linear backoff; nothing here
//! ever blocks the start sequence. Connection trouble is recorded through
//! `InfraStatus` + `OutageDeduper` so a flapping store produces one
//! announcement per outage episode, and only from the leader.

use crate::constants::{self, outage_keys};
use crate::error::Result;
use crate::events::adapters::EventAdapter;
use crate::events::envelope::Envelope;
use crate::events::server::EventServer;
use crate::infra::{InfraStatus, OutageDeduper};
use crate::messaging::store::RemoteStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct RemoteEventAdapter {
    store: Arc<dyn RemoteStore>,
    server: Arc<EventServer>,
    infra: Arc<InfraStatus>,
    outages: Arc<OutageDeduper>,
    namespace: String,
    subscriber_task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteEventAdapter {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        server: Arc<EventServer>,
        infra: Arc<InfraStatus>,
        outages: Arc<OutageDeduper>,
        namespace: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            server,
            infra,
            outages,
            namespace: namespace.into(),
            subscriber_task: Mutex::new(None),
        })
    }

    /// Spawn the subscriber loop. Returns immediately; connection attempts
    /// happen in the background with capped linear backoff.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.subscriber_task.lock();
        if task.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move { this.subscriber_loop().await }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.subscriber_task.lock().take() {
            task.abort();
        }
    }

    fn backoff(attempt: u32) -> Duration {
        let ms = constants::RECONNECT_STEP_MS
            .saturating_mul(u64::from(attempt) + 1)
            .min(constants::RECONNECT_CAP_MS);
        Duration::from_millis(ms)
    }

    async fn subscriber_loop(self: Arc<Self>) {
        let pattern = format!("{}:*", self.namespace);
        let mut attempt: u32 = 0;

        loop {
            match self.store.subscribe_pattern(&pattern).await {
                Ok(mut rx) => {
                    attempt = 0;
                    self.mark_up(outage_keys::EVENTBUS_SUB).await;
                    info!(pattern = %pattern, "Remote event subscription established");

                    while let Some(msg) = rx.recv().await {
                        self.handle_remote(&msg.payload);
                    }

                    // Stream ended: connection dropped
                    self.mark_down(outage_keys::EVENTBUS_SUB, "subscription stream ended")
                        .await;
                }
                Err(e) => {
                    self.mark_down(outage_keys::EVENTBUS_SUB, e.to_string()).await;
                }
            }

            tokio::time::sleep(Self::backoff(attempt)).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Parse and re-inject a remote envelope, dropping our own publishes so
    /// a mirrored event never loops back to its producer.
    fn handle_remote(&self, payload: &str) {
        let envelope: Envelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Undecodable remote envelope, dropping");
                return;
            }
        };

        if envelope.from_process(self.server.identity()) {
            return;
        }

        self.server.emit_local(&envelope);
    }

    async fn mark_up(&self, key: &str) {
        self.infra
            .set(constants::flags::REMOTE_STORE, true, serde_json::Map::new());
        if self.outages.up(key) {
            self.announce(true, key, None).await;
        }
    }

    async fn mark_down(&self, key: &str, reason: impl Into<String>) {
        let reason = reason.into();
        self.infra
            .set(constants::flags::REMOTE_STORE, false, serde_json::Map::new());
        if self.outages.down(key, reason.clone()) {
            self.announce(false, key, Some(reason)).await;
        }
    }

    /// Cluster-wide announcements come only from the leader, so N workers
    /// hitting the same dead store produce one event, not N.
    async fn announce(&self, up: bool, key: &str, reason: Option<String>) {
        let direction = if up { "up" } else { "down" };
        info!(resource = key, direction = direction, "Remote store transition");

        if !self.server.identity().is_leader() {
            return;
        }

        let event = format!(
            "{}:{}:{}",
            constants::topics::INFRA_PREFIX,
            constants::flags::REMOTE_STORE,
            direction
        );
        // Full publish, adapter fan-out included: on the up edge the store
        // is reachable again, so the whole cluster hears the transition.
        // Re-entering this adapter terminates at the deduper, whose edge has
        // already been consumed.
        self.server
            .publish(event, json!({ "resource": key, "reason": reason }))
            .await;
    }
}

#[async_trait]
impl EventAdapter for RemoteEventAdapter {
    fn name(&self) -> &str {
        "remote-transport"
    }

    /// Mirror a local envelope onto `"<namespace>:<event>"`. Failures mark
    /// the outage and bubble up to the event server, which logs and swallows.
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        if !self.infra.is_up(constants::flags::REMOTE_STORE) {
            // Degraded: local delivery already happened, fan-out waits for recovery
            debug!(event = %envelope.event, "Remote store down, skipping fan-out");
            return Ok(());
        }

        let channel = format!("{}:{}", self.namespace, envelope.event);
        let payload = serde_json::to_string(envelope)?;

        match self.store.publish(&channel, &payload).await {
            Ok(()) => {
                self.mark_up(outage_keys::EVENTBUS_PUB).await;
                Ok(())
            }
            Err(e) => {
                self.mark_down(outage_keys::EVENTBUS_PUB, e.to_string()).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Role, WorkerIdentity};
    use crate::messaging::store::MemoryStore;
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    fn wiring(worker_index: usize) -> (Arc<MemoryStore>, Arc<EventServer>, Arc<RemoteEventAdapter>) {
        let store = Arc::new(MemoryStore::new());
        let identity = WorkerIdentity::new("node-a", worker_index, Role::Worker, "server-a");
        let server = Arc::new(EventServer::new(identity));
        let infra = Arc::new(InfraStatus::new());
        infra.set(constants::flags::REMOTE_STORE, true, serde_json::Map::new());
        let adapter = RemoteEventAdapter::new(
            Arc::clone(&store) as Arc<dyn RemoteStore>,
            Arc::clone(&server),
            infra,
            Arc::new(OutageDeduper::new()),
            "eventbus",
        );
        (store, server, adapter)
    }

    #[tokio::test]
    async fn test_mirror_to_remote_channel() {
        let (store, server, adapter) = wiring(0);
        server.start().await;
        server.register_adapter(Arc::clone(&adapter) as Arc<dyn EventAdapter>);

        let mut rx = store.subscribe_pattern("eventbus:*").await.unwrap();
        server.publish("jobqueue:completed", json!({"id": "j1"})).await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "eventbus:jobqueue:completed");
        let mirrored: Envelope = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(mirrored.event, "jobqueue:completed");
        assert_eq!(mirrored.payload["id"], "j1");
    }

    #[tokio::test]
    async fn test_self_origin_envelopes_are_filtered() {
        let (_, server, adapter) = wiring(0);
        server.start().await;

        let seen = Arc::new(StdMutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        server.subscribe("*", move |env| {
            sink.lock().unwrap().push(env.event.clone());
        });

        // An envelope stamped with our own identity must not re-deliver
        let own = Envelope::new(
            "echo:self",
            Value::Null,
            server.identity(),
            crate::events::envelope::HealthState::ok(),
        );
        adapter.handle_remote(&serde_json::to_string(&own).unwrap());
        assert!(seen.lock().unwrap().is_empty());

        // An envelope from a different worker does
        let other_identity = WorkerIdentity::new("node-b", 3, Role::Worker, "server-b");
        let foreign = Envelope::new(
            "echo:other",
            Value::Null,
            &other_identity,
            crate::events::envelope::HealthState::ok(),
        );
        adapter.handle_remote(&serde_json::to_string(&foreign).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec!["echo:other"]);
    }

    #[tokio::test]
    async fn test_publish_skipped_while_store_down() {
        let (store, server, adapter) = wiring(0);
        server.start().await;

        // Flag down: publish succeeds without touching the store
        adapter
            .infra
            .set(constants::flags::REMOTE_STORE, false, serde_json::Map::new());
        store.set_healthy(false);

        let envelope = Envelope::new(
            "anything",
            Value::Null,
            server.identity(),
            crate::events::envelope::HealthState::ok(),
        );
        assert!(adapter.publish(&envelope).await.is_ok());
    }

    #[tokio::test]
    async fn test_leader_recovery_announcement_fans_out() {
        let (store, server, adapter) = wiring(0); // leader
        server.start().await;
        server.register_adapter(Arc::clone(&adapter) as Arc<dyn EventAdapter>);

        let seen = Arc::new(StdMutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        server.subscribe("sys:infra:*", move |env| {
            sink.lock().unwrap().push(env.event.clone());
        });
        let mut rx = store.subscribe_pattern("eventbus:sys:infra:*").await.unwrap();

        // Open an outage episode, then recover
        adapter.outages.down(outage_keys::EVENTBUS_PUB, "connect refused");
        adapter.mark_up(outage_keys::EVENTBUS_PUB).await;

        // The transition reaches leader-local subscribers and the remote
        // channel namespace, not just this process
        assert_eq!(*seen.lock().unwrap(), vec!["sys:infra:remote-store:up"]);
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "eventbus:sys:infra:remote-store:up");
        let mirrored: Envelope = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(mirrored.payload["resource"], "remote:eventbus:pub");
    }

    #[tokio::test]
    async fn test_publish_failure_marks_single_outage_episode() {
        let (store, server, adapter) = wiring(1); // follower: no announcements
        server.start().await;
        store.set_healthy(false);

        let envelope = Envelope::new(
            "anything",
            Value::Null,
            server.identity(),
            crate::events::envelope::HealthState::ok(),
        );

        assert!(adapter.publish(&envelope).await.is_err());
        // Flag now reflects the failure; further publishes degrade silently
        assert!(!adapter.infra.is_up(constants::flags::REMOTE_STORE));
        assert!(adapter.publish(&envelope).await.is_ok());

        let record = adapter.outages.record(outage_keys::EVENTBUS_PUB).unwrap();
        assert!(record.down);
    }
}
