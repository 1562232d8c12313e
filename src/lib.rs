#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, BLPOP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Colony Core
//!
//! Coordination core for a single-node process cluster: one primary process
//! supervising N workers, with best-effort cross-process fan-out through a
//! shared remote store.
//!
//! ## Overview
//!
//! Application code talks to three local-first services: the
//! [`events::EventServer`] (publish/subscribe with pluggable transport
//! adapters), the [`messaging::MessageBus`] (topic messaging that mirrors to
//! the remote store when it is attached), and the
//! [`jobqueue::JobQueueServer`] (FIFO jobs, in-memory or remote-backed).
//! All three degrade to purely local operation when the remote store is
//! down: [`infra::InfraStatus`] gates every remote touch and
//! [`infra::OutageDeduper`] keeps retry noise down to one announcement per
//! outage episode. Callers never block or fail because of an infra outage.
//!
//! ## Architecture
//!
//! - **Local-first**: every publish/enqueue completes against in-process
//!   state before any remote mirroring is attempted.
//! - **Leader by convention**: the worker at index 0 carries aggregation
//!   duties (heartbeat snapshots, metrics folds). This is a static
//!   assignment, not an election.
//! - **Explicit wiring**: components receive their collaborators at
//!   construction time; there is no global service registry.
//!
//! ## Module Organization
//!
//! - [`events`] - Envelope pub/sub hub with wildcard topics and adapters
//! - [`messaging`] - `RemoteStore` boundary and the hybrid `MessageBus`
//! - [`infra`] - Readiness flags and outage deduplication
//! - [`heartbeat`] - Per-worker heartbeats, IPC relay, leader aggregation
//! - [`jobqueue`] - FIFO job engine with throttling
//! - [`identity`] - Process identity and leader determination
//! - [`config`] - Configuration with environment overrides
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colony_core::config::ColonyConfig;
//! use colony_core::events::EventServer;
//! use colony_core::identity::{Role, WorkerIdentity};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = ColonyConfig::default();
//! let identity = WorkerIdentity::new("node-a", 0, Role::Worker, &config.server_name);
//!
//! let server = Arc::new(EventServer::new(identity));
//! server.subscribe("sys:*", |envelope| {
//!     println!("{} from {}", envelope.event, envelope.header.origin);
//! });
//!
//! // Publishes before start() are buffered and flushed in order
//! server.publish("sys:booting", serde_json::json!({})).await;
//! server.start().await;
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod identity;
pub mod infra;
pub mod jobqueue;
pub mod logging;
pub mod messaging;

pub use config::{ColonyConfig, HeartbeatConfig, HeartbeatDetail, JobQueueConfig};
pub use error::{ColonyError, Result};
pub use events::{Envelope, EventAdapter, EventServer, TopicPattern};
pub use heartbeat::{ClusterHeartbeat, HeartbeatAggregator, HeartbeatSnapshot, MetricsAggregator};
pub use identity::{Role, WorkerIdentity};
pub use infra::{InfraStatus, OutageDeduper};
pub use jobqueue::{JobHandler, JobQueueServer, JobRecord};
pub use messaging::{MessageBus, MemoryStore, RedisStore, RemoteStore};
