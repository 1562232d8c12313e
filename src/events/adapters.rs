//! Pluggable adapter transports attached to the event server.

use crate::error::Result;
use crate::events::envelope::Envelope;
use async_trait::async_trait;
use tracing::debug;

/// A transport that mirrors envelopes to an external medium. Adapter
/// failures are isolated by the event server: one adapter failing never
/// affects another's delivery or the publishing caller.
#[async_trait]
pub trait EventAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, envelope: &Envelope) -> Result<()>;
}

/// Echoes `sys:*` envelopes to the log. Cheap observability for system
/// traffic without a remote transport.
#[derive(Debug, Default)]
pub struct SystemEchoAdapter;

#[async_trait]
impl EventAdapter for SystemEchoAdapter {
    fn name(&self) -> &str {
        "system-echo"
    }

    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        if envelope.event.starts_with("sys:") {
            debug!(
                event = %envelope.event,
                origin = %envelope.header.origin,
                "System event"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::envelope::HealthState;
    use crate::identity::{Role, WorkerIdentity};
    use serde_json::Value;

    #[tokio::test]
    async fn test_echo_adapter_never_fails() {
        let identity = WorkerIdentity::new("node-a", 0, Role::Worker, "test");
        let adapter = SystemEchoAdapter;
        for event in ["sys:heartbeat", "app:whatever"] {
            let envelope = Envelope::new(event, Value::Null, &identity, HealthState::ok());
            assert!(adapter.publish(&envelope).await.is_ok());
        }
    }
}
