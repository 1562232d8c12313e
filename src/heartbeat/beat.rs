//! Per-worker heartbeat timers.

use crate::config::HeartbeatConfig;
use crate::constants::topics;
use crate::heartbeat::ipc::{IpcHandle, IpcMessage};
use crate::heartbeat::sample::HeartbeatSample;
use crate::identity::WorkerIdentity;
use crate::messaging::bus::MessageBus;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Two independent timers per worker: a fast IPC heartbeat to the primary
/// (cheap, always on) and an optional slower MessageBus broadcast for when
/// IPC alone is not enough (e.g. feeding a remote-backed aggregator).
pub struct ClusterHeartbeat {
    identity: WorkerIdentity,
    config: HeartbeatConfig,
    ipc: IpcHandle,
    bus: Option<Arc<MessageBus>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterHeartbeat {
    pub fn new(identity: WorkerIdentity, config: HeartbeatConfig, ipc: IpcHandle) -> Self {
        Self {
            identity,
            config,
            ipc,
            bus: None,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Wire the optional bus broadcast path; it only runs when
    /// `heartbeat.broadcast` is enabled.
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let interval = Duration::from_millis(self.config.effective_ipc_interval_ms());
        let identity = self.identity.clone();
        let detail = self.config.detail;
        let ipc = self.ipc.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sample = HeartbeatSample::capture(&identity, detail);
                ipc.send(IpcMessage::Heartbeat { payload: sample }).await;
            }
        }));

        if self.config.broadcast {
            let Some(bus) = self.bus.clone() else {
                warn!("Heartbeat broadcast enabled but no bus wired, skipping");
                return;
            };
            let interval = Duration::from_millis(self.config.interval_ms);
            let identity = self.identity.clone();
            let detail = self.config.detail;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let sample = HeartbeatSample::capture(&identity, detail);
                    match serde_json::to_value(&sample) {
                        Ok(payload) => bus.publish(topics::HEARTBEAT, payload).await,
                        Err(e) => debug!(error = %e, "Heartbeat sample serialization failed"),
                    }
                }
            }));
        }
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for ClusterHeartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::ipc::PrimaryRouter;
    use crate::identity::Role;

    #[tokio::test]
    async fn test_fast_timer_sends_ipc_samples() {
        let router = PrimaryRouter::new();
        router.start();
        let handle = router.handle();
        let mut rx = handle.subscribe();

        let identity = WorkerIdentity::new("node-a", 2, Role::Worker, "test");
        let config = HeartbeatConfig {
            ipc_interval_ms: 1, // floored to 250ms
            ..HeartbeatConfig::default()
        };
        let heartbeat = ClusterHeartbeat::new(identity, config, handle.clone());
        heartbeat.start();

        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("heartbeat within floor interval")
            .unwrap();
        match message {
            IpcMessage::Heartbeat { payload } => {
                assert_eq!(payload.worker_index, 2);
                assert_eq!(payload.pid, std::process::id());
            }
            other => panic!("unexpected message: {other:?}"),
        }

        heartbeat.stop();
    }
}
