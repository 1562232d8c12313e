//! # Job Queue
//!
//! FIFO job engine: register definitions, enqueue by name, pump with bounded
//! concurrency. Backed by a per-process in-memory queue (with level-triggered
//! intake throttling) or a shared remote list that serializes consumption
//! across workers.

pub mod record;
pub mod server;
pub mod throttle;

pub use record::{FnJobHandler, JobContext, JobHandler, JobRecord};
pub use server::{JobQueueServer, JobQueueStats};
pub use throttle::Throttle;
