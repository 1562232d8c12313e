//! Named boolean readiness flags with change notification.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// A single flag transition, broadcast to watchers on value change only.
#[derive(Debug, Clone)]
pub struct InfraTransition {
    pub flag: String,
    pub up: bool,
    /// Epoch millis at transition time.
    pub ts: i64,
    pub meta: Map<String, Value>,
}

impl InfraTransition {
    /// Event name for announcements: `"<flag>:up"` or `"<flag>:down"`.
    pub fn event_name(&self) -> String {
        if self.up {
            format!("{}:up", self.flag)
        } else {
            format!("{}:down", self.flag)
        }
    }
}

/// Process-local readiness flags (`remote-store`, `document-store`, ...).
///
/// Flags are mutated only by the connector that owns the dependency.
/// Same-value writes are no-ops; a missing flag reads as down.
#[derive(Debug)]
pub struct InfraStatus {
    flags: RwLock<HashMap<String, bool>>,
    notify: broadcast::Sender<InfraTransition>,
}

impl InfraStatus {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(64);
        Self {
            flags: RwLock::new(HashMap::new()),
            notify,
        }
    }

    /// Update a flag. Only on value change does this record the transition
    /// and notify watchers; repeated same-value writes do nothing.
    pub fn set(&self, flag: &str, up: bool, meta: Map<String, Value>) {
        {
            let mut flags = self.flags.write();
            match flags.get(flag) {
                Some(current) if *current == up => return,
                _ => {
                    flags.insert(flag.to_string(), up);
                }
            }
        }

        debug!(flag = flag, up = up, "Infra flag transition");

        let transition = InfraTransition {
            flag: flag.to_string(),
            up,
            ts: chrono::Utc::now().timestamp_millis(),
            meta,
        };
        // Send fails only when no watcher is subscribed, which is fine
        let _ = self.notify.send(transition);
    }

    /// Pure read; a flag never set reads as down.
    pub fn is_up(&self, flag: &str) -> bool {
        self.flags.read().get(flag).copied().unwrap_or(false)
    }

    /// Subscribe to flag transitions.
    pub fn watch(&self) -> broadcast::Receiver<InfraTransition> {
        self.notify.subscribe()
    }
}

impl Default for InfraStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_unset_flag_reads_down() {
        let status = InfraStatus::new();
        assert!(!status.is_up("remote-store"));
    }

    #[tokio::test]
    async fn test_transition_notifies_once() {
        let status = InfraStatus::new();
        let mut watcher = status.watch();

        status.set("remote-store", true, Map::new());
        status.set("remote-store", true, Map::new()); // same-value no-op
        status.set("remote-store", false, Map::new());

        let first = watcher.recv().await.unwrap();
        assert!(first.up);
        assert_eq!(first.event_name(), "remote-store:up");

        let second = watcher.recv().await.unwrap();
        assert!(!second.up);
        assert_eq!(second.event_name(), "remote-store:down");

        // Nothing else pending
        assert!(matches!(
            watcher.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn test_is_up_reflects_latest_write() {
        let status = InfraStatus::new();
        status.set("document-store", true, Map::new());
        assert!(status.is_up("document-store"));
        status.set("document-store", false, Map::new());
        assert!(!status.is_up("document-store"));
    }
}
