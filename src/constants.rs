//! System-wide topic names, channel prefixes, and defaults.

/// Infrastructure readiness flags. Mutated only by the connector that owns
/// the dependency, never by consumers.
pub mod flags {
    /// The remote key-value/pub-sub store backing cross-worker fan-out.
    pub const REMOTE_STORE: &str = "remote-store";
    /// The document store (specified at its boundary only; gated the same way).
    pub const DOCUMENT_STORE: &str = "document-store";
}

/// Well-known event topics.
pub mod topics {
    /// Per-worker heartbeat sample (MessageBus broadcast path).
    pub const HEARTBEAT: &str = "sys:heartbeat";
    /// Leader-published cluster heartbeat snapshot.
    pub const HEARTBEAT_SNAPSHOT: &str = "sys:heartbeat:snapshot";
    /// Per-worker metrics counter flush (MessageBus).
    pub const METRICS_FLUSH: &str = "sys:metrics:flush";
    /// Leader-published aggregated metrics snapshot.
    pub const METRICS_SNAPSHOT: &str = "sys:metrics:snapshot";
    /// Per-job completion broadcast (optional).
    pub const JOB_COMPLETED: &str = "jobqueue:completed";
    /// Infra transition announcements, suffixed `:up` / `:down`.
    pub const INFRA_PREFIX: &str = "sys:infra";
}

/// Outage deduplication keys for the remote event-bus connections.
pub mod outage_keys {
    pub const EVENTBUS_PUB: &str = "remote:eventbus:pub";
    pub const EVENTBUS_SUB: &str = "remote:eventbus:sub";
    pub const BUS_SUB: &str = "remote:bus:sub";
    pub const JOB_LIST: &str = "remote:jobq:list";
}

/// Default remote channel namespace for the event bus (`<prefix>:<event>`).
pub const EVENTBUS_NAMESPACE: &str = "eventbus";
/// Default remote channel prefix for the generic MessageBus (`<prefix>:<topic>`).
pub const BUS_PREFIX: &str = "bus";
/// Single shared list key for the remote-backed job queue.
pub const JOB_LIST_KEY: &str = "jobq:_all";

/// Reconnect backoff: linear growth step and ceiling.
pub const RECONNECT_STEP_MS: u64 = 10_000;
pub const RECONNECT_CAP_MS: u64 = 60_000;

/// Bounded wait for blocking pops so pumps re-check the running flag promptly.
pub const POP_WAIT_MS: u64 = 1_000;
/// In-memory pump sleep when the queue is empty (polling, never busy-spin).
pub const POLL_IDLE_MS: u64 = 100;

/// Floor for the fast IPC heartbeat interval.
pub const HEARTBEAT_IPC_FLOOR_MS: u64 = 250;
/// Debounce window coalescing per-worker metrics flushes into one cluster flush.
pub const METRICS_DEBOUNCE_MS: u64 = 200;
