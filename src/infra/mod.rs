//! # Infrastructure Readiness Tracking
//!
//! Process-local readiness flags with change notification, and per-resource
//! outage deduplication so noisy retry loops announce each outage episode
//! exactly once. Connectors combine the two: `OutageDeduper` decides whether
//! to announce a transition, `InfraStatus` always reflects the latest raw
//! state so gating logic stays accurate even when the announcement is
//! suppressed.

pub mod outage;
pub mod status;

pub use outage::{OutageDeduper, OutageRecord};
pub use status::{InfraStatus, InfraTransition};
