//! Job records and the handler contract.

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One queued unit of work. Serialized as-is onto the remote list, so the
/// wire shape is the in-memory shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub payload: Value,
    /// Epoch millis at enqueue time.
    pub enqueued_at: i64,
}

impl JobRecord {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            // Sortable-ish and best-effort unique, not a global sequence
            id: format!("{}-{}", now, &suffix[..8]),
            name: name.into(),
            payload,
            enqueued_at: now,
        }
    }
}

/// Execution-time context handed to middleware and execute.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub name: String,
    pub worker_index: usize,
}

/// A registered job definition. `middleware` runs first and produces the
/// effective payload; the default is pass-through.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn middleware(&self, payload: Value, _ctx: &JobContext) -> Result<Value> {
        Ok(payload)
    }

    async fn execute(&self, payload: Value, ctx: &JobContext) -> Result<()>;
}

/// Closure adapter so callers can register plain async functions without
/// hand-writing a handler type.
pub struct FnJobHandler {
    func: Box<dyn Fn(Value, JobContext) -> BoxFuture<'static, Result<()>> + Send + Sync>,
}

impl FnJobHandler {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            func: Box::new(move |payload, ctx| Box::pin(func(payload, ctx))),
        }
    }
}

#[async_trait]
impl JobHandler for FnJobHandler {
    async fn execute(&self, payload: Value, ctx: &JobContext) -> Result<()> {
        (self.func)(payload, ctx.clone()).await
    }
}
