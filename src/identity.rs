//! Worker identity: who this process is within the cluster.
//!
//! Identity is established once at startup and injected into every component
//! that needs it (envelope headers, self-origin filtering, leader checks).

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Instant;

/// Process role within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The OS-level forking parent; relays IPC messages between workers.
    Primary,
    Worker,
}

/// Identity of one cluster process.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    /// Stable host/node identifier (hostname by default).
    pub node_id: String,
    pub pid: u32,
    /// Index within the worker pool. Index 0 is the leader.
    pub worker_index: usize,
    pub role: Role,
    /// Server name used as envelope origin.
    pub origin: String,
    started_at: Instant,
}

impl WorkerIdentity {
    pub fn new(node_id: impl Into<String>, worker_index: usize, role: Role, origin: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            pid: std::process::id(),
            worker_index,
            role,
            origin: origin.into(),
            started_at: Instant::now(),
        }
    }

    /// Whether this process carries leader duties (aggregation, cluster-wide
    /// announcements). Static assignment by worker index — if the index-0
    /// worker dies, no replacement leader is elected.
    pub fn is_leader(&self) -> bool {
        self.worker_index == 0
    }

    /// Seconds since this process started.
    pub fn uptime_sec(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Header metadata carried in every envelope's health state.
    pub fn header_meta(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert("pid".to_string(), json!(self.pid));
        meta.insert("workerIndex".to_string(), json!(self.worker_index));
        meta.insert("role".to_string(), json!(self.role));
        meta
    }

    /// Whether an incoming envelope's header metadata names this process.
    /// Matches on the `(pid, workerIndex, origin)` triple.
    pub fn matches_meta(&self, origin: &str, meta: &Map<String, Value>) -> bool {
        let pid = meta.get("pid").and_then(Value::as_u64);
        let worker_index = meta.get("workerIndex").and_then(Value::as_u64);
        origin == self.origin
            && pid == Some(u64::from(self.pid))
            && worker_index == Some(self.worker_index as u64)
    }
}
