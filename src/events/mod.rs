//! # Event Distribution
//!
//! In-process publish/subscribe hub with wildcard topics, envelope
//! construction, pre-start buffering, and pluggable adapter transports that
//! mirror envelopes to external media (remote store, realtime sockets).
//! Delivery is at-least-once with idempotent consumers assumed; adapter
//! failures never affect local delivery or other adapters.

pub mod adapters;
pub mod envelope;
pub mod remote;
pub mod server;
pub mod topic;

pub use adapters::{EventAdapter, SystemEchoAdapter};
pub use envelope::{Envelope, Header, HealthProbe, HealthState, HealthStatus, InfraHealthProbe, StaticHealthProbe};
pub use remote::RemoteEventAdapter;
pub use server::{AdapterId, EventServer, SubscriptionId};
pub use topic::TopicPattern;
