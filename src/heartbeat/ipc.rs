//! Primary↔worker inter-process channel modeled as a router actor.
//!
//! The primary carries no business logic: every inbound message is forwarded
//! verbatim to all workers, so whichever worker holds leader duties consumes
//! heartbeats uniformly no matter which process produced them.

use crate::heartbeat::sample::HeartbeatSample;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Messages exchanged over the primary↔worker channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcMessage {
    #[serde(rename = "sys:heartbeat")]
    Heartbeat { payload: HeartbeatSample },
    #[serde(rename = "config:push")]
    ConfigPush { payload: Value },
    #[serde(rename = "worker:online")]
    WorkerOnline { pid: u32 },
    #[serde(rename = "worker:error")]
    WorkerError { pid: u32, message: String },
    #[serde(rename = "worker:stopped")]
    WorkerStopped { pid: u32 },
}

/// A worker's view of the IPC channel: send to the primary, receive
/// everything the primary relays.
#[derive(Clone)]
pub struct IpcHandle {
    inbound: mpsc::Sender<IpcMessage>,
    outbound: broadcast::Sender<IpcMessage>,
}

impl IpcHandle {
    /// Send a message to the primary. Cheap, no remote-store serialization.
    pub async fn send(&self, message: IpcMessage) {
        // A closed channel means the primary is gone; nothing useful to do
        let _ = self.inbound.send(message).await;
    }

    /// Receive every message the primary relays (including our own sends).
    pub fn subscribe(&self) -> broadcast::Receiver<IpcMessage> {
        self.outbound.subscribe()
    }
}

/// The primary-side relay. Pure message forwarding, no inspection.
pub struct PrimaryRouter {
    inbound_tx: mpsc::Sender<IpcMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<IpcMessage>>>,
    outbound: broadcast::Sender<IpcMessage>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PrimaryRouter {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (outbound, _) = broadcast::channel(256);
        Arc::new(Self {
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            outbound,
            task: Mutex::new(None),
        })
    }

    /// Start relaying. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let Some(mut rx) = self.inbound_rx.lock().take() else {
            return;
        };
        let outbound = self.outbound.clone();
        *task = Some(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                // Forward verbatim to all workers; no subscribers is fine
                let _ = outbound.send(message);
            }
            debug!("Primary router channel closed");
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Handle handed to each worker (and to the primary's own consumers).
    pub fn handle(&self) -> IpcHandle {
        IpcHandle {
            inbound: self.inbound_tx.clone(),
            outbound: self.outbound.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Role, WorkerIdentity};

    #[test]
    fn test_ipc_wire_format_tags() {
        let identity = WorkerIdentity::new("node-a", 0, Role::Worker, "test");
        let sample = HeartbeatSample::capture(&identity, crate::config::HeartbeatDetail::Summary);

        let wire = serde_json::to_value(&IpcMessage::Heartbeat { payload: sample }).unwrap();
        assert_eq!(wire["type"], "sys:heartbeat");
        assert_eq!(wire["payload"]["nodeId"], "node-a");

        let wire = serde_json::to_value(&IpcMessage::WorkerOnline { pid: 42 }).unwrap();
        assert_eq!(wire["type"], "worker:online");
        assert_eq!(wire["pid"], 42);
    }

    #[tokio::test]
    async fn test_router_relays_to_all_workers() {
        let router = PrimaryRouter::new();
        router.start();

        let worker_a = router.handle();
        let worker_b = router.handle();
        let mut rx_a = worker_a.subscribe();
        let mut rx_b = worker_b.subscribe();

        worker_a.send(IpcMessage::WorkerOnline { pid: 7 }).await;

        // Both workers see the relayed message, sender included
        assert!(matches!(
            rx_a.recv().await.unwrap(),
            IpcMessage::WorkerOnline { pid: 7 }
        ));
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            IpcMessage::WorkerOnline { pid: 7 }
        ));
    }
}
