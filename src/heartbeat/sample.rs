//! Per-worker heartbeat sample and process memory readings.

use crate::config::HeartbeatDetail;
use crate::identity::WorkerIdentity;
use serde::{Deserialize, Serialize};

/// One worker's heartbeat, keyed cluster-wide by `(node_id, pid)` and
/// overwritten in place on every sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSample {
    pub node_id: String,
    pub pid: u32,
    pub worker_index: usize,
    /// Epoch millis at capture time.
    pub ts: i64,
    pub uptime_sec: u64,
    /// Resident set size in bytes.
    pub rss: u64,
    /// Data segment size in bytes (closest procfs analog to heap usage).
    pub heap_used: u64,
    /// Virtual size in bytes; only captured at `full` detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap_total: Option<u64>,
}

impl HeartbeatSample {
    pub fn capture(identity: &WorkerIdentity, detail: HeartbeatDetail) -> Self {
        let memory = ProcessMemory::read();
        Self {
            node_id: identity.node_id.clone(),
            pid: identity.pid,
            worker_index: identity.worker_index,
            ts: chrono::Utc::now().timestamp_millis(),
            uptime_sec: identity.uptime_sec(),
            rss: memory.rss,
            heap_used: memory.heap_used,
            heap_total: match detail {
                HeartbeatDetail::Full => Some(memory.heap_total),
                HeartbeatDetail::Summary => None,
            },
        }
    }

    /// Aggregation key: one entry per live process.
    pub fn key(&self) -> (String, u32) {
        (self.node_id.clone(), self.pid)
    }
}

#[derive(Debug, Default)]
struct ProcessMemory {
    rss: u64,
    heap_used: u64,
    heap_total: u64,
}

impl ProcessMemory {
    /// Parse VmRSS/VmData/VmSize from `/proc/self/status`. On platforms
    /// without procfs the fields read zero rather than failing the sample.
    fn read() -> Self {
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            return Self::default();
        };

        let mut memory = Self::default();
        for line in status.lines() {
            let target = match line.split(':').next() {
                Some("VmRSS") => &mut memory.rss,
                Some("VmData") => &mut memory.heap_used,
                Some("VmSize") => &mut memory.heap_total,
                _ => continue,
            };
            if let Some(kb) = line
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<u64>().ok())
            {
                *target = kb * 1024;
            }
        }
        memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    #[test]
    fn test_capture_summary_omits_heap_total() {
        let identity = WorkerIdentity::new("node-a", 1, Role::Worker, "test");
        let sample = HeartbeatSample::capture(&identity, HeartbeatDetail::Summary);
        assert_eq!(sample.node_id, "node-a");
        assert_eq!(sample.pid, std::process::id());
        assert!(sample.heap_total.is_none());

        let wire = serde_json::to_value(&sample).unwrap();
        assert!(wire.get("heapTotal").is_none());
        assert!(wire.get("workerIndex").is_some());
    }

    #[test]
    fn test_capture_full_includes_heap_total() {
        let identity = WorkerIdentity::new("node-a", 1, Role::Worker, "test");
        let sample = HeartbeatSample::capture(&identity, HeartbeatDetail::Full);
        assert!(sample.heap_total.is_some());
    }

    #[test]
    fn test_proc_memory_reads_nonzero_on_linux() {
        if !std::path::Path::new("/proc/self/status").exists() {
            return;
        }
        let memory = ProcessMemory::read();
        assert!(memory.rss > 0);
        assert!(memory.heap_total > 0);
    }
}
