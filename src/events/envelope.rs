//! The envelope: unit of event distribution, in-process and on the wire.

use crate::identity::WorkerIdentity;
use crate::infra::InfraStatus;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Producer health at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Ok,
    NotOk,
}

/// Health snapshot carried in every envelope header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthState {
    pub status: HealthStatus,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl HealthState {
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
            meta: Map::new(),
        }
    }
}

/// Producer identity and health snapshot, stamped once at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub origin: String,
    /// Epoch millis, set exactly once by the publishing process.
    pub timestamp: i64,
    pub state: HealthState,
}

/// The unit of event distribution. `event` is immutable once constructed;
/// `payload` is opaque to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub header: Header,
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: Value, identity: &WorkerIdentity, mut state: HealthState) -> Self {
        // Identity meta rides along with whatever the probe reported
        for (k, v) in identity.header_meta() {
            state.meta.insert(k, v);
        }
        Self {
            event: event.into(),
            header: Header {
                origin: identity.origin.clone(),
                timestamp: chrono::Utc::now().timestamp_millis(),
                state,
            },
            payload,
        }
    }

    /// Whether this envelope was produced by the given process.
    pub fn from_process(&self, identity: &WorkerIdentity) -> bool {
        identity.matches_meta(&self.header.origin, &self.header.state.meta)
    }
}

/// Synchronous health read used when stamping envelope headers.
/// Implementations never fail; when nothing meaningful can be read the
/// answer is plain `Ok`.
pub trait HealthProbe: Send + Sync {
    fn current_state(&self) -> HealthState;
}

/// Always reports `Ok`. The default when no health wiring exists yet.
#[derive(Debug, Default)]
pub struct StaticHealthProbe;

impl HealthProbe for StaticHealthProbe {
    fn current_state(&self) -> HealthState {
        HealthState::ok()
    }
}

/// Reports `NotOk` when any required dependency flag is down, listing the
/// down dependencies in meta. Requirements come from `health.require.{dep}`
/// configuration.
pub struct InfraHealthProbe {
    infra: Arc<InfraStatus>,
    require: HashMap<String, bool>,
}

impl InfraHealthProbe {
    pub fn new(infra: Arc<InfraStatus>, require: HashMap<String, bool>) -> Self {
        Self { infra, require }
    }
}

impl HealthProbe for InfraHealthProbe {
    fn current_state(&self) -> HealthState {
        let down: Vec<&str> = self
            .require
            .iter()
            .filter(|(flag, required)| **required && !self.infra.is_up(flag))
            .map(|(flag, _)| flag.as_str())
            .collect();

        if down.is_empty() {
            HealthState::ok()
        } else {
            let mut meta = Map::new();
            meta.insert("downDependencies".to_string(), json!(down));
            HealthState {
                status: HealthStatus::NotOk,
                meta,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use serde_json::Map;

    fn test_identity() -> WorkerIdentity {
        WorkerIdentity::new("node-a", 1, Role::Worker, "test-server")
    }

    #[test]
    fn test_wire_format_round_trip() {
        let identity = test_identity();
        let envelope = Envelope::new(
            "sys:heartbeat:snapshot",
            json!({"observed": 3}),
            &identity,
            HealthState::ok(),
        );

        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["event"], "sys:heartbeat:snapshot");
        assert_eq!(wire["header"]["origin"], "test-server");
        assert_eq!(wire["header"]["state"]["status"], "Ok");
        assert_eq!(wire["header"]["state"]["meta"]["workerIndex"], 1);
        assert_eq!(wire["payload"]["observed"], 3);

        let parsed: Envelope = serde_json::from_value(wire).unwrap();
        assert!(parsed.from_process(&identity));
    }

    #[test]
    fn test_infra_probe_reports_down_required_deps() {
        let infra = Arc::new(InfraStatus::new());
        let mut require = HashMap::new();
        require.insert("remote-store".to_string(), true);
        require.insert("document-store".to_string(), false);

        let probe = InfraHealthProbe::new(infra.clone(), require);
        let state = probe.current_state();
        assert_eq!(state.status, HealthStatus::NotOk);
        assert_eq!(state.meta["downDependencies"], json!(["remote-store"]));

        infra.set("remote-store", true, Map::new());
        assert_eq!(probe.current_state().status, HealthStatus::Ok);
    }
}
