//! Configuration surface consumed by the coordination core.
//!
//! Plain structs with defaults and environment overrides; parse failures are
//! configuration errors and fail fast at startup.

use crate::constants;
use crate::error::{ColonyError, Result};
use std::collections::HashMap;

/// Heartbeat sample detail level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatDetail {
    /// Lightweight sample (uptime, rss, heap used).
    Summary,
    /// Adds total heap and raw per-worker samples to snapshots.
    Full,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Fast IPC heartbeat cadence. Floored at 250ms.
    pub ipc_interval_ms: u64,
    /// Whether the slower MessageBus heartbeat broadcast runs at all.
    pub broadcast: bool,
    /// Cadence of the bus broadcast and of leader aggregation windows.
    pub interval_ms: u64,
    pub detail: HeartbeatDetail,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ipc_interval_ms: 5_000,
            broadcast: false,
            interval_ms: 60_000,
            detail: HeartbeatDetail::Summary,
        }
    }
}

impl HeartbeatConfig {
    /// Effective IPC interval with the floor applied.
    pub fn effective_ipc_interval_ms(&self) -> u64 {
        self.ipc_interval_ms.max(constants::HEARTBEAT_IPC_FLOOR_MS)
    }
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// In-memory backlog length that turns throttling on.
    pub throttle_count: usize,
    /// Sleep per pump iteration while throttled.
    pub throttle_time_ms: u64,
    /// Use the shared remote list instead of per-process memory.
    pub use_remote_queue: bool,
    /// Parallel pump loops per process (min 1).
    pub worker_concurrency: usize,
    /// Publish a completion envelope per successful job.
    pub broadcast_completions: bool,
    /// Start the queue engine only on the elected leader.
    pub leader_only: bool,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            throttle_count: 100,
            throttle_time_ms: 1_000,
            use_remote_queue: false,
            worker_concurrency: 1,
            broadcast_completions: false,
            leader_only: false,
        }
    }
}

impl JobQueueConfig {
    pub fn effective_concurrency(&self) -> usize {
        self.worker_concurrency.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct ColonyConfig {
    /// Origin name stamped into every envelope header.
    pub server_name: String,
    /// Remote store URL; `None` means purely local operation.
    pub remote_store_url: Option<String>,
    /// Configured cluster size, compared against observed heartbeats.
    pub expected_workers: usize,
    /// Event-bus remote channel namespace (`<namespace>:<event>`).
    pub namespace_prefix: String,
    /// MessageBus remote channel prefix (`<prefix>:<topic>`).
    pub bus_prefix: String,
    /// Shared list key for the remote-backed job queue.
    pub job_list_key: String,
    pub heartbeat: HeartbeatConfig,
    pub jobqueue: JobQueueConfig,
    /// Which dependencies being down flip overall health to NotOk.
    pub health_require: HashMap<String, bool>,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        Self {
            server_name: "colony".to_string(),
            remote_store_url: None,
            expected_workers: 1,
            namespace_prefix: constants::EVENTBUS_NAMESPACE.to_string(),
            bus_prefix: constants::BUS_PREFIX.to_string(),
            job_list_key: constants::JOB_LIST_KEY.to_string(),
            heartbeat: HeartbeatConfig::default(),
            jobqueue: JobQueueConfig::default(),
            health_require: HashMap::new(),
        }
    }
}

impl ColonyConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("COLONY_SERVER_NAME") {
            config.server_name = name;
        }

        if let Ok(url) = std::env::var("COLONY_REMOTE_STORE_URL") {
            if !url.is_empty() {
                config.remote_store_url = Some(url);
            }
        }

        if let Ok(workers) = std::env::var("COLONY_EXPECTED_WORKERS") {
            config.expected_workers = workers.parse().map_err(|e| {
                ColonyError::ConfigurationError(format!("Invalid expected_workers: {e}"))
            })?;
        }

        if let Ok(count) = std::env::var("COLONY_THROTTLE_COUNT") {
            config.jobqueue.throttle_count = count.parse().map_err(|e| {
                ColonyError::ConfigurationError(format!("Invalid throttle_count: {e}"))
            })?;
        }

        if let Ok(secs) = std::env::var("COLONY_THROTTLE_TIME_SEC") {
            let secs: f64 = secs.parse().map_err(|e| {
                ColonyError::ConfigurationError(format!("Invalid throttle_time_sec: {e}"))
            })?;
            config.jobqueue.throttle_time_ms = (secs * 1000.0) as u64;
        }

        if let Ok(remote) = std::env::var("COLONY_USE_REMOTE_QUEUE") {
            config.jobqueue.use_remote_queue = remote == "true" || remote == "1";
        }

        if let Ok(concurrency) = std::env::var("COLONY_WORKER_CONCURRENCY") {
            config.jobqueue.worker_concurrency = concurrency.parse().map_err(|e| {
                ColonyError::ConfigurationError(format!("Invalid worker_concurrency: {e}"))
            })?;
        }

        Ok(config)
    }
}
