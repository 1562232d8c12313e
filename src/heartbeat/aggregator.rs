//! Leader-side aggregation: N per-worker samples in, one cluster snapshot out.

use crate::config::{HeartbeatConfig, HeartbeatDetail};
use crate::constants::{self, topics};
use crate::events::server::EventServer;
use crate::heartbeat::ipc::{IpcHandle, IpcMessage};
use crate::heartbeat::sample::HeartbeatSample;
use crate::identity::WorkerIdentity;
use crate::messaging::bus::MessageBus;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Min/avg/max over one sampled dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatRange {
    pub min: u64,
    pub avg: f64,
    pub max: u64,
}

impl StatRange {
    fn over<F: Fn(&HeartbeatSample) -> u64>(samples: &[HeartbeatSample], field: F) -> Self {
        if samples.is_empty() {
            return Self {
                min: 0,
                avg: 0.0,
                max: 0,
            };
        }
        let values: Vec<u64> = samples.iter().map(field).collect();
        let sum: u64 = values.iter().sum();
        Self {
            min: *values.iter().min().expect("non-empty"),
            avg: sum as f64 / values.len() as f64,
            max: *values.iter().max().expect("non-empty"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    pub uptime_sec: StatRange,
    pub rss: StatRange,
    pub heap_used: StatRange,
}

/// Aggregator output, published once per window. Monitoring input only,
/// never authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSnapshot {
    pub ts: i64,
    pub expected_workers: usize,
    pub observed_workers: usize,
    pub stats: SnapshotStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<Vec<HeartbeatSample>>,
}

impl HeartbeatSnapshot {
    /// Pure fold of one window's samples. `observed` counts distinct
    /// `(node_id, pid)` keys; the delta from `expected` is the "N workers
    /// have not reported" monitoring signal.
    pub fn aggregate(samples: Vec<HeartbeatSample>, expected: usize, include_workers: bool) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            expected_workers: expected,
            observed_workers: samples.len(),
            stats: SnapshotStats {
                uptime_sec: StatRange::over(&samples, |s| s.uptime_sec),
                rss: StatRange::over(&samples, |s| s.rss),
                heap_used: StatRange::over(&samples, |s| s.heap_used),
            },
            workers: include_workers.then_some(samples),
        }
    }
}

/// Leader-only heartbeat fold. Samples arrive over IPC (relayed by the
/// primary) and optionally over the bus; the map is last-write-wins per
/// `(node_id, pid)` and is drained on every window flush.
pub struct HeartbeatAggregator {
    identity: WorkerIdentity,
    expected_workers: usize,
    config: HeartbeatConfig,
    server: Arc<EventServer>,
    bus: Option<Arc<MessageBus>>,
    samples: Arc<DashMap<(String, u32), HeartbeatSample>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HeartbeatAggregator {
    pub fn new(
        identity: WorkerIdentity,
        expected_workers: usize,
        config: HeartbeatConfig,
        server: Arc<EventServer>,
    ) -> Self {
        Self {
            identity,
            expected_workers,
            config,
            server,
            bus: None,
            samples: Arc::new(DashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Also fold samples broadcast on the bus (`sys:heartbeat`), for workers
    /// reporting over the remote store instead of IPC.
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn start(&self, ipc: IpcHandle) {
        if !self.identity.is_leader() {
            debug!(
                worker_index = self.identity.worker_index,
                "Not the leader, heartbeat aggregation stays off"
            );
            return;
        }
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        // IPC fan-in
        let samples = Arc::clone(&self.samples);
        let mut rx = ipc.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(IpcMessage::Heartbeat { payload }) => {
                        samples.insert(payload.key(), payload);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Heartbeat aggregator lagged on IPC");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // Bus fan-in
        if let Some(bus) = &self.bus {
            let samples = Arc::clone(&self.samples);
            bus.subscribe(topics::HEARTBEAT, move |_, payload| {
                match serde_json::from_value::<HeartbeatSample>(payload.clone()) {
                    Ok(sample) => {
                        samples.insert(sample.key(), sample);
                    }
                    Err(e) => warn!(error = %e, "Undecodable bus heartbeat, dropping"),
                }
            });
        }

        // Window flush
        let samples = Arc::clone(&self.samples);
        let server = Arc::clone(&self.server);
        let expected = self.expected_workers;
        let include_workers = self.config.detail == HeartbeatDetail::Full;
        let window = Duration::from_millis(self.config.interval_ms);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                // Remove entries one key at a time: a sample racing the
                // drain lands either in this window or the next, never in
                // neither
                let keys: Vec<(String, u32)> =
                    samples.iter().map(|entry| entry.key().clone()).collect();
                let mut window_samples = Vec::with_capacity(keys.len());
                for key in keys {
                    if let Some((_, sample)) = samples.remove(&key) {
                        window_samples.push(sample);
                    }
                }

                let snapshot =
                    HeartbeatSnapshot::aggregate(window_samples, expected, include_workers);
                match serde_json::to_value(&snapshot) {
                    Ok(payload) => {
                        server.publish(topics::HEARTBEAT_SNAPSHOT, payload).await;
                    }
                    Err(e) => warn!(error = %e, "Snapshot serialization failed"),
                }
            }
        }));
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Samples currently pending in the open window (observability).
    pub fn pending_samples(&self) -> usize {
        self.samples.len()
    }
}

/// Additive metrics counters with leader-side fold and a short debounce
/// coalescing bursts of per-worker flushes into one cluster snapshot.
pub struct MetricsAggregator {
    identity: WorkerIdentity,
    server: Arc<EventServer>,
    bus: Arc<MessageBus>,
    local: Arc<DashMap<String, u64>>,
    cluster: Arc<DashMap<String, u64>>,
    flush_pending: Arc<AtomicBool>,
    debounce: Duration,
}

impl MetricsAggregator {
    pub fn new(identity: WorkerIdentity, server: Arc<EventServer>, bus: Arc<MessageBus>) -> Self {
        Self {
            identity,
            server,
            bus,
            local: Arc::new(DashMap::new()),
            cluster: Arc::new(DashMap::new()),
            flush_pending: Arc::new(AtomicBool::new(false)),
            debounce: Duration::from_millis(constants::METRICS_DEBOUNCE_MS),
        }
    }

    /// Increment a local counter. Addition only, so concurrent increments
    /// from any local source commute.
    pub fn incr(&self, key: &str, by: u64) {
        *self.local.entry(key.to_string()).or_insert(0) += by;
    }

    /// Publish this worker's accumulated counters on the bus and reset them.
    /// The leader (including this process, when it is the leader) folds them.
    pub async fn flush(&self) {
        let counters = drain_counters(&self.local);
        if counters.is_empty() {
            return;
        }
        self.bus
            .publish(topics::METRICS_FLUSH, serde_json::Value::Object(counters))
            .await;
    }

    /// Leader only: fold every flush arriving on the bus, debounce, publish
    /// one `sys:metrics:snapshot` envelope, reset.
    pub fn start(&self) {
        if !self.identity.is_leader() {
            debug!(
                worker_index = self.identity.worker_index,
                "Not the leader, metrics aggregation stays off"
            );
            return;
        }

        let cluster = Arc::clone(&self.cluster);
        let flush_pending = Arc::clone(&self.flush_pending);
        let server = Arc::clone(&self.server);
        let debounce = self.debounce;

        self.bus.subscribe(topics::METRICS_FLUSH, move |_, payload| {
            let Some(counters) = payload.as_object() else {
                warn!("Malformed metrics flush payload, dropping");
                return;
            };
            for (key, value) in counters {
                if let Some(count) = value.as_u64() {
                    *cluster.entry(key.clone()).or_insert(0) += count;
                }
            }

            // Coalesce bursts: one snapshot per debounce window
            if flush_pending.swap(true, Ordering::AcqRel) {
                return;
            }
            let cluster = Arc::clone(&cluster);
            let flush_pending = Arc::clone(&flush_pending);
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                // Cleared before the drain: a fold landing mid-drain either
                // gets taken here or re-arms its own debounce
                flush_pending.store(false, Ordering::Release);
                let folded = drain_counters(&cluster);

                server
                    .publish(
                        topics::METRICS_SNAPSHOT,
                        json!({
                            "ts": chrono::Utc::now().timestamp_millis(),
                            "counters": folded,
                        }),
                    )
                    .await;
            });
        });
    }
}

/// Take every counter out of the map, one key at a time. An increment racing
/// the drain is either included here or left behind for the next drain;
/// nothing is wiped unpublished.
fn drain_counters(map: &DashMap<String, u64>) -> serde_json::Map<String, Value> {
    let keys: Vec<String> = map.iter().map(|entry| entry.key().clone()).collect();
    let mut drained = serde_json::Map::new();
    for key in keys {
        if let Some((key, value)) = map.remove(&key) {
            drained.insert(key, json!(value));
        }
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    fn sample(node: &str, pid: u32, rss: u64) -> HeartbeatSample {
        HeartbeatSample {
            node_id: node.to_string(),
            pid,
            worker_index: 0,
            ts: 0,
            uptime_sec: 100,
            rss,
            heap_used: rss / 2,
            heap_total: None,
        }
    }

    #[test]
    fn test_aggregate_min_avg_max() {
        let samples = vec![
            sample("node-a", 1, 10),
            sample("node-a", 2, 20),
            sample("node-a", 3, 30),
        ];
        let snapshot = HeartbeatSnapshot::aggregate(samples, 3, false);

        assert_eq!(snapshot.observed_workers, 3);
        assert_eq!(snapshot.expected_workers, 3);
        assert_eq!(snapshot.stats.rss.min, 10);
        assert_eq!(snapshot.stats.rss.avg, 20.0);
        assert_eq!(snapshot.stats.rss.max, 30);
        assert!(snapshot.workers.is_none());
    }

    #[test]
    fn test_aggregate_empty_window() {
        let snapshot = HeartbeatSnapshot::aggregate(Vec::new(), 4, true);
        assert_eq!(snapshot.observed_workers, 0);
        assert_eq!(snapshot.expected_workers, 4);
        assert_eq!(snapshot.stats.rss.min, 0);
        assert_eq!(snapshot.stats.rss.avg, 0.0);
        assert_eq!(snapshot.workers, Some(Vec::new()));
    }

    #[test]
    fn test_observed_counts_distinct_keys() {
        // Same (node, pid) reported twice: last write wins, counted once
        let map: DashMap<(String, u32), HeartbeatSample> = DashMap::new();
        for s in [
            sample("node-a", 1, 10),
            sample("node-a", 1, 15),
            sample("node-b", 1, 20),
        ] {
            map.insert(s.key(), s);
        }
        let samples: Vec<HeartbeatSample> = map.iter().map(|e| e.value().clone()).collect();
        let snapshot = HeartbeatSnapshot::aggregate(samples, 5, false);
        assert_eq!(snapshot.observed_workers, 2);
    }

    #[tokio::test]
    async fn test_non_leader_aggregator_stays_off() {
        use crate::heartbeat::ipc::PrimaryRouter;

        let identity = WorkerIdentity::new("node-a", 3, Role::Worker, "test");
        let server = Arc::new(EventServer::new(identity.clone()));
        let aggregator =
            HeartbeatAggregator::new(identity, 4, HeartbeatConfig::default(), server);

        let router = PrimaryRouter::new();
        aggregator.start(router.handle());
        assert!(aggregator.tasks.lock().is_empty());
    }

    use crate::infra::{InfraStatus, OutageDeduper};
    use crate::messaging::store::{MemoryStore, RemoteStore};
    use std::sync::Mutex as StdMutex;

    async fn metrics_wiring() -> (Arc<EventServer>, Arc<MessageBus>, Arc<StdMutex<Vec<Value>>>) {
        let leader = WorkerIdentity::new("node-a", 0, Role::Worker, "test");
        let server = Arc::new(EventServer::new(leader));
        server.start().await;

        let bus = MessageBus::new(
            Arc::new(MemoryStore::new()) as Arc<dyn RemoteStore>,
            Arc::new(InfraStatus::new()),
            Arc::new(OutageDeduper::new()),
            "bus",
        );

        let snapshots = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&snapshots);
        server.subscribe(topics::METRICS_SNAPSHOT, move |envelope| {
            sink.lock().unwrap().push(envelope.payload.clone());
        });
        (server, bus, snapshots)
    }

    fn metrics_worker(
        worker_index: usize,
        server: &Arc<EventServer>,
        bus: &Arc<MessageBus>,
    ) -> MetricsAggregator {
        MetricsAggregator::new(
            WorkerIdentity::new("node-a", worker_index, Role::Worker, "test"),
            Arc::clone(server),
            Arc::clone(bus),
        )
    }

    async fn wait_for(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_metrics_fold_debounce_and_reset() {
        let (server, bus, snapshots) = metrics_wiring().await;

        let leader = metrics_worker(0, &server, &bus);
        leader.start();
        let worker_a = metrics_worker(1, &server, &bus);
        let worker_b = metrics_worker(2, &server, &bus);

        // Two worker flushes inside one debounce window
        worker_a.incr("jobs", 2);
        worker_a.flush().await;
        worker_b.incr("jobs", 3);
        worker_b.incr("signals", 1);
        worker_b.flush().await;

        let sink = Arc::clone(&snapshots);
        wait_for(move || !sink.lock().unwrap().is_empty()).await;
        {
            let published = snapshots.lock().unwrap();
            // Coalesced into one snapshot with additively folded counters
            assert_eq!(published.len(), 1);
            assert_eq!(published[0]["counters"]["jobs"], 5);
            assert_eq!(published[0]["counters"]["signals"], 1);
        }

        // Counters reset on publish: the next window folds fresh counts only
        worker_a.incr("jobs", 1);
        worker_a.flush().await;

        let sink = Arc::clone(&snapshots);
        wait_for(move || sink.lock().unwrap().len() == 2).await;
        let published = snapshots.lock().unwrap();
        assert_eq!(published[1]["counters"]["jobs"], 1);
        assert!(published[1]["counters"].get("signals").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_flushes_lose_no_counts() {
        let (server, bus, snapshots) = metrics_wiring().await;

        let leader = metrics_worker(0, &server, &bus);
        leader.start();
        let worker = Arc::new(metrics_worker(1, &server, &bus));

        let mut producers = Vec::new();
        for _ in 0..4 {
            let worker = Arc::clone(&worker);
            producers.push(tokio::spawn(async move {
                for _ in 0..100 {
                    worker.incr("ops", 1);
                    worker.flush().await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        worker.flush().await;

        // Every increment surfaces in some snapshot: 400 in, 400 out
        let sink = Arc::clone(&snapshots);
        wait_for(move || {
            sink.lock()
                .unwrap()
                .iter()
                .filter_map(|payload| payload["counters"]["ops"].as_u64())
                .sum::<u64>()
                == 400
        })
        .await;
    }
}
