//! FIFO job engine with bounded-concurrency pump loops.

use crate::config::JobQueueConfig;
use crate::constants::{self, flags, outage_keys, topics};
use crate::error::{ColonyError, Result};
use crate::events::server::EventServer;
use crate::identity::WorkerIdentity;
use crate::infra::{InfraStatus, OutageDeduper};
use crate::jobqueue::record::{JobContext, JobHandler, JobRecord};
use crate::jobqueue::throttle::Throttle;
use crate::messaging::store::RemoteStore;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Init,
    Running,
    Stopped,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQueueStats {
    pub total_jobs: u64,
    pub per_route: HashMap<String, u64>,
    pub throttle_events: u64,
    pub throttled_ms_total: u64,
    /// `None` when remote-backed: the shared list's length is not cheaply
    /// knowable from here.
    pub queue_length: Option<usize>,
    pub concurrency: usize,
    pub throttle_active: bool,
}

/// FIFO job engine. Runs purely in-memory per worker by default, or against
/// a shared remote list when `use_remote_queue` is set and the store is
/// healthy. Per-job failures never stop a pump; remote outages degrade the
/// engine to local-only intake instead of failing `enqueue`.
pub struct JobQueueServer {
    identity: WorkerIdentity,
    config: JobQueueConfig,
    list_key: String,
    server: Arc<EventServer>,
    store: Option<Arc<dyn RemoteStore>>,
    infra: Arc<InfraStatus>,
    outages: Arc<OutageDeduper>,
    jobs: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    queue: Mutex<VecDeque<JobRecord>>,
    throttle: Throttle,
    total_jobs: AtomicU64,
    per_route: DashMap<String, u64>,
    state: RwLock<Lifecycle>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueueServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: WorkerIdentity,
        config: JobQueueConfig,
        list_key: impl Into<String>,
        server: Arc<EventServer>,
        store: Option<Arc<dyn RemoteStore>>,
        infra: Arc<InfraStatus>,
        outages: Arc<OutageDeduper>,
    ) -> Arc<Self> {
        let throttle = Throttle::new(config.throttle_count, config.throttle_time_ms);
        Arc::new(Self {
            identity,
            config,
            list_key: list_key.into(),
            server,
            store,
            infra,
            outages,
            jobs: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            throttle,
            total_jobs: AtomicU64::new(0),
            per_route: DashMap::new(),
            state: RwLock::new(Lifecycle::Init),
            pumps: Mutex::new(Vec::new()),
        })
    }

    /// Register (or replace) a job definition. Overwriting an existing name
    /// is allowed, as a warning rather than an error.
    pub fn register_job(&self, name: &str, handler: Arc<dyn JobHandler>) -> Result<()> {
        if name.is_empty() {
            return Err(ColonyError::InvalidDefinition {
                name: name.to_string(),
                reason: "job name must be non-empty".to_string(),
            });
        }
        if self.jobs.write().insert(name.to_string(), handler).is_some() {
            warn!(job = name, "Job definition overwritten");
        } else {
            debug!(job = name, "Job registered");
        }
        Ok(())
    }

    /// Enqueue a job by name. An unregistered name is a contract violation
    /// surfaced to the caller before any queue mutation; a remote push
    /// failure is not, and falls back to the in-memory queue for this job.
    pub async fn enqueue(&self, name: &str, payload: Value) -> Result<String> {
        if !self.jobs.read().contains_key(name) {
            return Err(ColonyError::UnknownJob(name.to_string()));
        }

        let record = JobRecord::new(name, payload);
        let job_id = record.id.clone();

        if let Some(store) = self.remote_store() {
            let serialized = serde_json::to_string(&record)?;
            match store.push_tail(&self.list_key, &serialized).await {
                Ok(()) => {
                    if self.outages.up(outage_keys::JOB_LIST) {
                        info!(key = %self.list_key, "Remote job list reachable again");
                    }
                    return Ok(job_id);
                }
                Err(e) => {
                    if self.outages.down(outage_keys::JOB_LIST, &e.to_string()) {
                        warn!(key = %self.list_key, error = %e,
                              "Remote job push failed, degrading to in-memory queue");
                    }
                }
            }
        }

        self.push_local(record);
        Ok(job_id)
    }

    /// Start the pump loops. With `leader_only` set, a non-leader start is a
    /// logged no-op so every worker can call this unconditionally.
    pub fn start(self: &Arc<Self>) {
        if self.config.leader_only && !self.identity.is_leader() {
            info!(
                worker_index = self.identity.worker_index,
                "Job queue is leader-only, not starting on this worker"
            );
            return;
        }
        {
            let mut state = self.state.write();
            if *state == Lifecycle::Running {
                return;
            }
            *state = Lifecycle::Running;
        }

        let concurrency = self.config.effective_concurrency();
        let mut pumps = self.pumps.lock();
        for slot in 0..concurrency {
            let engine = Arc::clone(self);
            pumps.push(tokio::spawn(async move { engine.pump_loop(slot).await }));
        }
        info!(
            concurrency = concurrency,
            remote = self.config.use_remote_queue,
            "Job queue running"
        );
    }

    /// Flip to stopped. Pumps observe the flag within one bounded pop wait
    /// and drain out on their own.
    pub fn stop(&self) {
        *self.state.write() = Lifecycle::Stopped;
    }

    pub fn is_running(&self) -> bool {
        *self.state.read() == Lifecycle::Running
    }

    pub fn stats(&self) -> JobQueueStats {
        let per_route = self
            .per_route
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let remote = self.config.use_remote_queue && self.store.is_some();
        JobQueueStats {
            total_jobs: self.total_jobs.load(Ordering::Relaxed),
            per_route,
            throttle_events: self.throttle.events(),
            throttled_ms_total: self.throttle.throttled_ms_total(),
            queue_length: (!remote).then(|| self.queue.lock().len()),
            concurrency: self.config.effective_concurrency(),
            throttle_active: self.throttle.is_active(),
        }
    }

    /// The remote list, but only when configured AND currently healthy.
    fn remote_store(&self) -> Option<&Arc<dyn RemoteStore>> {
        if !self.config.use_remote_queue || !self.infra.is_up(flags::REMOTE_STORE) {
            return None;
        }
        self.store.as_ref()
    }

    fn push_local(&self, record: JobRecord) {
        let backlog = {
            let mut queue = self.queue.lock();
            queue.push_back(record);
            queue.len()
        };
        self.throttle.evaluate(backlog);
    }

    fn pop_local(&self) -> Option<JobRecord> {
        let (record, backlog) = {
            let mut queue = self.queue.lock();
            let record = queue.pop_front();
            (record, queue.len())
        };
        self.throttle.evaluate(backlog);
        record
    }

    async fn pump_loop(self: Arc<Self>, slot: usize) {
        debug!(slot = slot, "Pump loop started");
        while self.is_running() {
            // Fallback jobs land locally even in remote mode; drain them first
            let record = match self.pop_local() {
                Some(record) => Some(record),
                None => self.pop_remote().await,
            };

            match record {
                Some(record) => self.run_job(record, slot).await,
                None if self.remote_store().is_none() => {
                    // In-memory idle: poll, never busy-spin
                    tokio::time::sleep(Duration::from_millis(constants::POLL_IDLE_MS)).await;
                }
                None => {}
            }

            if let Some(pause) = self.throttle.pause() {
                tokio::time::sleep(pause).await;
            }
        }
        debug!(slot = slot, "Pump loop stopped");
    }

    /// Bounded-wait pop from the shared list. Errors count as one outage
    /// episode and cost one wait interval, so a dead store never hot-loops.
    async fn pop_remote(&self) -> Option<JobRecord> {
        let store = self.remote_store()?;
        let wait = Duration::from_millis(constants::POP_WAIT_MS);
        match store.pop_head(&self.list_key, wait).await {
            Ok(Some(raw)) => {
                if self.outages.up(outage_keys::JOB_LIST) {
                    info!(key = %self.list_key, "Remote job list reachable again");
                }
                match serde_json::from_str::<JobRecord>(&raw) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(error = %e, "Undecodable job record popped, dropping");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(e) => {
                if self.outages.down(outage_keys::JOB_LIST, &e.to_string()) {
                    warn!(key = %self.list_key, error = %e, "Remote job pop failed");
                }
                tokio::time::sleep(wait).await;
                None
            }
        }
    }

    /// Run one job to completion. Every failure mode here is per-job: it is
    /// logged and the pump keeps going.
    async fn run_job(&self, record: JobRecord, slot: usize) {
        let Some(handler) = self.jobs.read().get(&record.name).cloned() else {
            warn!(job = %record.name, job_id = %record.id,
                  "Popped job has no registered definition, skipping");
            return;
        };

        let ctx = JobContext {
            job_id: record.id.clone(),
            name: record.name.clone(),
            worker_index: self.identity.worker_index,
        };

        let payload = match handler.middleware(record.payload, &ctx).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(job = %record.name, job_id = %record.id, slot = slot, error = %e,
                       "Job middleware failed");
                return;
            }
        };

        match handler.execute(payload, &ctx).await {
            Ok(()) => {
                self.total_jobs.fetch_add(1, Ordering::Relaxed);
                *self.per_route.entry(record.name.clone()).or_insert(0) += 1;
                debug!(job = %record.name, job_id = %record.id, slot = slot, "Job completed");

                if self.config.broadcast_completions {
                    self.server
                        .publish(
                            topics::JOB_COMPLETED,
                            json!({
                                "jobId": record.id,
                                "name": record.name,
                                "workerIndex": self.identity.worker_index,
                            }),
                        )
                        .await;
                }
            }
            Err(e) => {
                error!(job = %record.name, job_id = %record.id, slot = slot, error = %e,
                       "Job execution failed");
            }
        }
    }
}

impl Drop for JobQueueServer {
    fn drop(&mut self) {
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
    }
}
