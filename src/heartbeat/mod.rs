//! # Cluster Heartbeats
//!
//! Each worker emits fast heartbeat samples over the primary↔worker IPC
//! channel and, optionally, slower samples over the MessageBus. The primary
//! is a pure relay; the leader worker folds every sample into one cluster
//! snapshot per aggregation window. Metrics counters follow the same
//! fan-in pattern but aggregate additively with a short debounce.

pub mod aggregator;
pub mod beat;
pub mod ipc;
pub mod sample;

pub use aggregator::{HeartbeatAggregator, HeartbeatSnapshot, MetricsAggregator, StatRange};
pub use beat::ClusterHeartbeat;
pub use ipc::{IpcHandle, IpcMessage, PrimaryRouter};
pub use sample::HeartbeatSample;
